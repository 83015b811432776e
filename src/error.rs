use core::fmt;

use thiserror::Error;

/// Coarse classification handed to a [`FatalSink`](crate::FatalSink),
/// matching the kernel's numeric error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorKind {
  NotFound = -1,
  NoMemory = -2,
  NoSpace = -3,
  Invalid = -4,
}

impl ErrorKind {
  pub fn code(self) -> i32 {
    self as i32
  }

  pub fn as_str(self) -> &'static str {
    match self {
      ErrorKind::NotFound => "not found",
      ErrorKind::NoMemory => "out of memory",
      ErrorKind::NoSpace => "out of space",
      ErrorKind::Invalid => "invalid request",
    }
  }
}

impl fmt::Display for ErrorKind {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Every way a heap operation can fail. None of them is recoverable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HeapError {
  #[error("invalid heap range {start:#x}..{limit:#x}")]
  InvalidRange { start: usize, limit: usize },

  #[error("heap range {start:#x}..{limit:#x} too small after alignment")]
  RangeTooSmall { start: usize, limit: usize },

  #[error("out of memory allocating {requested} bytes")]
  OutOfMemory { requested: usize },

  #[error("invalid free of {addr:#x}")]
  InvalidFree { addr: usize },

  #[error("heap used before initialization")]
  Uninitialized,

  #[error("heap already initialized")]
  AlreadyInitialized,
}

impl HeapError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      HeapError::InvalidRange { .. } => ErrorKind::Invalid,
      HeapError::RangeTooSmall { .. } => ErrorKind::NoSpace,
      HeapError::OutOfMemory { .. } => ErrorKind::NoMemory,
      HeapError::InvalidFree { .. } => ErrorKind::Invalid,
      HeapError::Uninitialized => ErrorKind::NotFound,
      HeapError::AlreadyInitialized => ErrorKind::Invalid,
    }
  }
}

pub type Result<T> = core::result::Result<T, HeapError>;
