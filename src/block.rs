//! Block headers and the handle type that walks them.
//!
//! Every raw pointer cast of the crate lives here. [`Block`] is a copyable
//! handle onto a header inside the managed region; the heap logic only ever
//! goes through its accessors.

use core::{fmt, marker::PhantomData, ptr::NonNull};

use crate::config::HEADER_SIZE;

const FREE_TAG: usize = 0;
const USED_TAG: usize = 1;

/// Allocation state of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
  Free,
  Used,
}

impl BlockState {
  fn tag(self) -> usize {
    match self {
      BlockState::Free => FREE_TAG,
      BlockState::Used => USED_TAG,
    }
  }
}

impl fmt::Display for BlockState {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match self {
      BlockState::Free => f.write_str("free"),
      BlockState::Used => f.write_str("used"),
    }
  }
}

/// Metadata stored immediately in front of every block's payload.
///
/// The field order (`size`, `state`, `next`, `prev`) is fixed; tools that
/// inspect the heap directly rely on it.
#[repr(C, align(16))]
pub struct BlockHeader {
  size: usize,
  state: usize,
  next: *mut BlockHeader,
  prev: *mut BlockHeader,
}

impl BlockHeader {
  /// Usable bytes behind the header.
  pub fn size(&self) -> usize {
    self.size
  }

  pub fn state(&self) -> BlockState {
    if self.state == USED_TAG {
      BlockState::Used
    } else {
      BlockState::Free
    }
  }

  pub fn is_free(&self) -> bool {
    self.state() == BlockState::Free
  }

  /// Address of the header itself.
  pub fn addr(&self) -> usize {
    self as *const Self as usize
  }

  /// Address handed out by the allocator for this block.
  pub fn payload_addr(&self) -> usize {
    self.addr() + HEADER_SIZE
  }

  pub fn next(&self) -> Option<&BlockHeader> {
    // SAFETY: links always point at headers inside the same heap, which
    // outlives the borrow of `self`.
    unsafe { self.next.as_ref() }
  }

  pub fn prev(&self) -> Option<&BlockHeader> {
    // SAFETY: see `next`.
    unsafe { self.prev.as_ref() }
  }

  pub fn info(&self) -> BlockInfo {
    BlockInfo {
      addr: self.addr(),
      size: self.size,
      state: self.state(),
    }
  }
}

impl fmt::Debug for BlockHeader {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.debug_struct("BlockHeader")
      .field("addr", &format_args!("{:#x}", self.addr()))
      .field("size", &self.size)
      .field("state", &self.state())
      .field("next", &self.next)
      .field("prev", &self.prev)
      .finish()
  }
}

/// Owned snapshot of a header, safe to keep after the heap moves on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  pub addr: usize,
  pub size: usize,
  pub state: BlockState,
}

/// Handle onto a header inside the managed region.
///
/// Handles are only produced by the `unsafe` constructors below, whose
/// contracts guarantee the header is valid for as long as the owning heap
/// lives. The accessors rely on that and are therefore safe.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct Block {
  header: NonNull<BlockHeader>,
  _region: PhantomData<*mut u8>,
}

impl Block {
  fn from_raw(header: NonNull<BlockHeader>) -> Self {
    Self {
      header,
      _region: PhantomData,
    }
  }

  fn from_link(link: *mut BlockHeader) -> Option<Self> {
    NonNull::new(link).map(Self::from_raw)
  }

  fn link(block: Option<Block>) -> *mut BlockHeader {
    block.map_or(core::ptr::null_mut(), |b| b.header.as_ptr())
  }

  /// Writes a fresh, unlinked, free header at `at`.
  ///
  /// # Safety
  ///
  /// `at` must be `ALIGN`-aligned and `at .. at + HEADER_SIZE + size` must
  /// be writable memory owned by the heap.
  pub(crate) unsafe fn install(
    at: NonNull<u8>,
    size: usize,
  ) -> Self {
    let header = at.cast::<BlockHeader>();

    unsafe {
      header.as_ptr().write(BlockHeader {
        size,
        state: FREE_TAG,
        next: core::ptr::null_mut(),
        prev: core::ptr::null_mut(),
      });
    }

    Self::from_raw(header)
  }

  /// Recovers the handle of the block whose payload starts at `payload`.
  ///
  /// # Safety
  ///
  /// `payload - HEADER_SIZE` must be a header written by [`Block::install`]
  /// in a heap that is still alive.
  pub(crate) unsafe fn from_payload(payload: NonNull<u8>) -> Self {
    let header = unsafe { payload.sub(HEADER_SIZE) };
    Self::from_raw(header.cast())
  }

  /// Writes a free header `offset` bytes past this block's payload start.
  ///
  /// # Safety
  ///
  /// The new header and its `size` bytes must lie inside this block.
  pub(crate) unsafe fn install_in_payload(
    self,
    offset: usize,
    size: usize,
  ) -> Block {
    unsafe { Block::install(self.payload().add(offset), size) }
  }

  pub(crate) fn addr(self) -> usize {
    self.header.as_ptr() as usize
  }

  pub(crate) fn payload(self) -> NonNull<u8> {
    // SAFETY: the header is followed by its payload inside the region.
    unsafe { self.header.cast::<u8>().add(HEADER_SIZE) }
  }

  /// # Safety
  ///
  /// `'a` must not outlive the heap that owns this block, and the header
  /// must not be mutated while the reference is alive.
  pub(crate) unsafe fn header<'a>(self) -> &'a BlockHeader {
    unsafe { self.header.as_ref() }
  }

  fn raw(self) -> *mut BlockHeader {
    self.header.as_ptr()
  }

  pub(crate) fn size(self) -> usize {
    unsafe { (*self.raw()).size }
  }

  pub(crate) fn set_size(
    self,
    size: usize,
  ) {
    unsafe { (*self.raw()).size = size }
  }

  pub(crate) fn state(self) -> BlockState {
    unsafe { (*self.raw()).state() }
  }

  pub(crate) fn is_free(self) -> bool {
    self.state() == BlockState::Free
  }

  pub(crate) fn set_state(
    self,
    state: BlockState,
  ) {
    unsafe { (*self.raw()).state = state.tag() }
  }

  pub(crate) fn next(self) -> Option<Block> {
    Block::from_link(unsafe { (*self.raw()).next })
  }

  pub(crate) fn set_next(
    self,
    next: Option<Block>,
  ) {
    unsafe { (*self.raw()).next = Block::link(next) }
  }

  pub(crate) fn prev(self) -> Option<Block> {
    Block::from_link(unsafe { (*self.raw()).prev })
  }

  pub(crate) fn set_prev(
    self,
    prev: Option<Block>,
  ) {
    unsafe { (*self.raw()).prev = Block::link(prev) }
  }
}

impl fmt::Debug for Block {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    fmt::Debug::fmt(unsafe { self.header() }, f)
  }
}
