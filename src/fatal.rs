//! Boundary to whatever halts the machine.
//!
//! Heap operations return [`HeapError`]s. Deciding that an error stops the
//! system belongs to the caller, which hands it to a [`FatalSink`].

use core::fmt;

use crate::error::{ErrorKind, HeapError};

/// Receives a fatal report and never returns control to the reporting flow.
pub trait FatalSink: Sync {
  fn fatal(
    &self,
    message: fmt::Arguments<'_>,
    kind: ErrorKind,
  ) -> !;
}

/// Panics with a `[PANIC] <message> [<kind>]` line.
///
/// Building the panic message may allocate and the panic may unwind, so
/// this sink must not back a `#[global_allocator]`. Use it for heaps driven
/// directly and on bare-metal targets whose `#[panic_handler]` halts.
pub struct PanicSink;

impl FatalSink for PanicSink {
  fn fatal(
    &self,
    message: fmt::Arguments<'_>,
    kind: ErrorKind,
  ) -> ! {
    panic!("[PANIC] {} [{}]", message, kind)
  }
}

/// Forwards `err` to `sink`.
pub fn report(
  err: &HeapError,
  sink: &dyn FatalSink,
) -> ! {
  log::error!("fatal heap error: {}", err);
  sink.fatal(format_args!("{}", err), err.kind())
}

/// Turns a heap result into its value, or halts through a sink.
pub trait OrHalt<T> {
  fn or_halt(
    self,
    sink: &dyn FatalSink,
  ) -> T;
}

impl<T> OrHalt<T> for Result<T, HeapError> {
  fn or_halt(
    self,
    sink: &dyn FatalSink,
  ) -> T {
    match self {
      Ok(value) => value,
      Err(err) => report(&err, sink),
    }
  }
}
