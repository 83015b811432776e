//! A [`Heap`] that can live in a `static` and serve `#[global_allocator]`.

use core::{
  alloc::{GlobalAlloc, Layout},
  ptr::{self, NonNull},
};

use log::warn;
use spin::{Mutex, MutexGuard};

use crate::{
  block::BlockInfo,
  config::ALIGN,
  error::{HeapError, Result},
  fatal::{FatalSink, report},
  heap::Heap,
};

/// Spin-locked, lazily initialized heap.
///
/// Until [`LockedHeap::init`] succeeds every request fails with
/// [`HeapError::Uninitialized`] and [`LockedHeap::head`] returns `None`.
///
/// The lock does not mask interrupts. A handler that allocates while the
/// interrupted code holds the lock spins forever, so handlers must not
/// allocate or free at all.
///
/// As a [`GlobalAlloc`], running out of memory returns null and leaves the
/// halt to `handle_alloc_error`. Any other error goes to the sink.
pub struct LockedHeap {
  inner: Mutex<Option<Heap>>,
  sink: &'static dyn FatalSink,
}

impl LockedHeap {
  /// An uninitialized heap reporting fatal errors to `sink` when used as
  /// the global allocator.
  ///
  /// A sink serving the global allocator must neither allocate nor unwind:
  /// it runs inside `alloc`/`dealloc`. [`PanicSink`](crate::PanicSink) does
  /// both and only suits heaps that are not installed globally.
  pub const fn empty(sink: &'static dyn FatalSink) -> Self {
    Self {
      inner: Mutex::new(None),
      sink,
    }
  }

  /// Initializes the heap over `start..limit`. May succeed only once.
  ///
  /// # Safety
  ///
  /// Same contract as [`Heap::init`].
  pub unsafe fn init(
    &self,
    start: *mut u8,
    limit: *mut u8,
  ) -> Result<()> {
    let mut inner = self.inner.lock();
    if inner.is_some() {
      return Err(HeapError::AlreadyInitialized);
    }

    *inner = Some(unsafe { Heap::init(start, limit) }?);
    Ok(())
  }

  fn lock(&self) -> MutexGuard<'_, Option<Heap>> {
    self.inner.lock()
  }

  /// Runs `f` on the initialized heap with the lock held, `None` before
  /// initialization.
  pub fn with_heap<R>(
    &self,
    f: impl FnOnce(&Heap) -> R,
  ) -> Option<R> {
    self.lock().as_ref().map(f)
  }

  pub fn allocate(
    &self,
    size: usize,
  ) -> Result<Option<NonNull<u8>>> {
    self.lock().as_mut().ok_or(HeapError::Uninitialized)?.allocate(size)
  }

  /// # Safety
  ///
  /// Same contract as [`Heap::free`].
  pub unsafe fn free(
    &self,
    ptr: Option<NonNull<u8>>,
  ) -> Result<()> {
    let mut inner = self.lock();
    let heap = inner.as_mut().ok_or(HeapError::Uninitialized)?;
    unsafe { heap.free(ptr) }
  }

  /// Snapshot of the first block, `None` before initialization.
  pub fn head(&self) -> Option<BlockInfo> {
    self.lock().as_ref().map(|heap| heap.head().info())
  }

  pub fn remaining(&self) -> usize {
    self.lock().as_ref().map_or(0, Heap::remaining)
  }
}

unsafe impl GlobalAlloc for LockedHeap {
  unsafe fn alloc(
    &self,
    layout: Layout,
  ) -> *mut u8 {
    if layout.align() > ALIGN {
      warn!("unsupported alignment {} for {} bytes", layout.align(), layout.size());
      return ptr::null_mut();
    }

    match self.allocate(layout.size()) {
      Ok(Some(ptr)) => ptr.as_ptr(),
      Ok(None) => ptr::null_mut(),
      Err(HeapError::OutOfMemory { requested }) => {
        warn!("out of memory allocating {} bytes", requested);
        ptr::null_mut()
      }
      Err(err) => report(&err, self.sink),
    }
  }

  unsafe fn dealloc(
    &self,
    ptr: *mut u8,
    _layout: Layout,
  ) {
    if let Err(err) = unsafe { self.free(NonNull::new(ptr)) } {
      report(&err, self.sink);
    }
  }
}
