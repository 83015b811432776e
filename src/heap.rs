use core::{fmt, ops::Range, ptr::NonNull};

use log::{debug, trace};

use crate::{
  align,
  align::{align_down, is_aligned},
  block::{Block, BlockHeader, BlockState},
  config::{HEADER_SIZE, should_split},
  error::{HeapError, Result},
};

/// First-fit heap over a single caller-provided memory range.
///
/// A `Heap` only exists once [`Heap::init`] accepted a range, so there is no
/// way to allocate from an uninitialized heap. Every mutation takes
/// `&mut self`.
///
/// # Interrupt safety
///
/// List updates are not atomic. Interrupt and signal handlers must never
/// allocate or free through a heap that the interrupted flow may be using.
pub struct Heap {
  head: Block,
  start: usize,
  end: usize,
}

// SAFETY: the heap exclusively owns its region and every header in it.
unsafe impl Send for Heap {}

impl Heap {
  /// Takes ownership of `start..limit` and installs one free block
  /// spanning it.
  ///
  /// The start is rounded up and the limit down to [`ALIGN`](crate::ALIGN).
  /// A region starting at address 0 is not supported and is rejected as
  /// [`HeapError::InvalidRange`], since headers are held as non-null
  /// pointers.
  ///
  /// # Safety
  ///
  /// `start..limit` must be writable memory that nothing else reads or
  /// writes for as long as the returned heap, or any pointer it hands out,
  /// is alive.
  pub unsafe fn init(
    start: *mut u8,
    limit: *mut u8,
  ) -> Result<Self> {
    let (s, l) = (start as usize, limit as usize);

    if start.is_null() || l <= s {
      return Err(HeapError::InvalidRange { start: s, limit: l });
    }

    let too_small = HeapError::RangeTooSmall { start: s, limit: l };
    let aligned_start = align!(s).ok_or(too_small)?;
    let aligned_end = align_down(l);

    if aligned_end < aligned_start || aligned_end - aligned_start < HEADER_SIZE {
      return Err(too_small);
    }

    let at = NonNull::new(start.wrapping_add(aligned_start - s)).ok_or(too_small)?;
    let head = unsafe { Block::install(at, aligned_end - aligned_start - HEADER_SIZE) };

    debug!(
      "heap init {:#x}..{:#x}, {} bytes free",
      aligned_start,
      aligned_end,
      head.size()
    );

    Ok(Self {
      head,
      start: aligned_start,
      end: aligned_end,
    })
  }

  fn find_free_block(
    &self,
    size: usize,
  ) -> Option<Block> {
    let mut current = Some(self.head);

    while let Some(block) = current {
      if block.is_free() && block.size() >= size {
        return Some(block);
      }
      current = block.next();
    }

    None
  }

  /// Cuts `block` down to `size` bytes and links the rest in after it as a
  /// new free block.
  fn split(
    block: Block,
    size: usize,
  ) {
    let remainder_size = block.size() - size - HEADER_SIZE;
    // SAFETY: `should_split` guarantees the remainder header and payload
    // fit inside `block`.
    let remainder = unsafe { block.install_in_payload(size, remainder_size) };
    let after = block.next();

    remainder.set_prev(Some(block));
    remainder.set_next(after);
    if let Some(after) = after {
      after.set_prev(Some(remainder));
    }
    block.set_next(Some(remainder));
    block.set_size(size);

    trace!(
      "split {:#x}: {} used, {} free at {:#x}",
      block.addr(),
      size,
      remainder_size,
      remainder.addr()
    );
  }

  /// Allocates at least `size` bytes.
  ///
  /// Returns `Ok(None)` for `size == 0`. The memory is not zeroed.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Result<Option<NonNull<u8>>> {
    if size == 0 {
      return Ok(None);
    }

    let out_of_memory = HeapError::OutOfMemory { requested: size };
    let requested = align!(size).ok_or(out_of_memory)?;
    let block = self.find_free_block(requested).ok_or(out_of_memory)?;

    if should_split(block.size(), requested) {
      Self::split(block, requested);
    }
    block.set_state(BlockState::Used);

    trace!(
      "allocate {} -> {:#x} ({} bytes)",
      size,
      block.payload().as_ptr() as usize,
      block.size()
    );

    Ok(Some(block.payload()))
  }

  /// Absorbs every free block directly following `block`.
  fn coalesce(block: Block) {
    while let Some(next) = block.next() {
      if !next.is_free() {
        break;
      }

      let after = next.next();
      block.set_size(block.size() + HEADER_SIZE + next.size());
      block.set_next(after);
      if let Some(after) = after {
        after.set_prev(Some(block));
      }

      trace!("merge {:#x} into {:#x}", next.addr(), block.addr());
    }
  }

  /// Releases a block obtained from [`Heap::allocate`] and merges it with
  /// free neighbours. `None` is ignored.
  ///
  /// Pointers that are misaligned or outside the heap are rejected before
  /// their header is read; any other pointer whose block is not in use
  /// (a double free, for one) fails with [`HeapError::InvalidFree`].
  ///
  /// # Safety
  ///
  /// A pointer inside the heap must be one returned by `allocate` on this
  /// heap. Other interior pointers are not detected reliably.
  pub unsafe fn free(
    &mut self,
    ptr: Option<NonNull<u8>>,
  ) -> Result<()> {
    let Some(ptr) = ptr else {
      return Ok(());
    };

    let addr = ptr.as_ptr() as usize;
    let invalid = HeapError::InvalidFree { addr };

    if !is_aligned(addr) || addr < self.start + HEADER_SIZE || addr >= self.end {
      return Err(invalid);
    }

    let block = unsafe { Block::from_payload(ptr) };
    if block.state() != BlockState::Used {
      return Err(invalid);
    }

    block.set_state(BlockState::Free);
    trace!("free {:#x} ({} bytes)", addr, block.size());

    Self::coalesce(block);
    if let Some(prev) = block.prev() {
      if prev.is_free() {
        Self::coalesce(prev);
      }
    }

    Ok(())
  }

  /// First block of the heap, at its aligned start.
  pub fn head(&self) -> &BlockHeader {
    // SAFETY: bounded by the borrow of `self`.
    unsafe { self.head.header() }
  }

  /// Headers in address order.
  pub fn blocks(&self) -> Blocks<'_> {
    Blocks {
      next: Some(self.head()),
    }
  }

  /// Total payload bytes of all free blocks.
  pub fn remaining(&self) -> usize {
    self.blocks().filter(|b| b.is_free()).map(BlockHeader::size).sum()
  }

  /// Aligned byte range managed by this heap.
  pub fn bounds(&self) -> Range<usize> {
    self.start..self.end
  }
}

impl fmt::Debug for Heap {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.debug_list().entries(self.blocks()).finish()
  }
}

/// Iterator returned by [`Heap::blocks`].
pub struct Blocks<'a> {
  next: Option<&'a BlockHeader>,
}

impl<'a> Iterator for Blocks<'a> {
  type Item = &'a BlockHeader;

  fn next(&mut self) -> Option<Self::Item> {
    let current = self.next?;
    self.next = current.next();
    Some(current)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{config::ALIGN, testing::arena};

  fn heap_in(memory: &mut [u128]) -> Heap {
    let range = memory.as_mut_ptr_range();
    unsafe { Heap::init(range.start.cast(), range.end.cast()) }.unwrap()
  }

  fn assert_invariants(heap: &Heap) {
    let bounds = heap.bounds();
    assert_eq!(heap.head().addr(), bounds.start);

    let mut prev: Option<&BlockHeader> = None;
    for block in heap.blocks() {
      assert_eq!(block.size() % ALIGN, 0);
      assert_eq!(block.prev().map(BlockHeader::addr), prev.map(BlockHeader::addr));
      if let Some(p) = prev {
        assert_eq!(p.payload_addr() + p.size(), block.addr());
        assert!(!(p.is_free() && block.is_free()), "adjacent free blocks");
      }
      prev = Some(block);
    }

    let tail = prev.unwrap();
    assert_eq!(tail.payload_addr() + tail.size(), bounds.end);
  }

  #[test]
  fn init_installs_single_free_block() {
    let mut memory = arena(4096);
    let heap = heap_in(&mut memory);

    let head = heap.head();
    assert_eq!(head.addr(), memory.as_ptr() as usize);
    assert_eq!(head.state(), BlockState::Free);
    assert_eq!(head.size(), 4096 - HEADER_SIZE);
    assert!(head.next().is_none());
    assert!(head.prev().is_none());
    assert_eq!(heap.remaining(), 4096 - HEADER_SIZE);
  }

  #[test]
  fn init_rejects_inverted_and_empty_ranges() {
    let mut memory = arena(256);
    let start = memory.as_mut_ptr().cast::<u8>();
    let limit = start.wrapping_add(256);

    let err = unsafe { Heap::init(limit, start) }.unwrap_err();
    assert_eq!(
      err,
      HeapError::InvalidRange {
        start: limit as usize,
        limit: start as usize
      }
    );
    assert!(matches!(
      unsafe { Heap::init(start, start) },
      Err(HeapError::InvalidRange { .. })
    ));
    assert!(matches!(
      unsafe { Heap::init(core::ptr::null_mut(), limit) },
      Err(HeapError::InvalidRange { .. })
    ));
  }

  #[test]
  fn init_rejects_span_without_room_for_a_header() {
    let mut memory = arena(256);
    let start = memory.as_mut_ptr().cast::<u8>();

    assert!(matches!(
      unsafe { Heap::init(start, start.wrapping_add(HEADER_SIZE - 1)) },
      Err(HeapError::RangeTooSmall { .. })
    ));
    // Both bounds shrink once aligned.
    assert!(matches!(
      unsafe { Heap::init(start.wrapping_add(1), start.wrapping_add(HEADER_SIZE + 1)) },
      Err(HeapError::RangeTooSmall { .. })
    ));
    // Aligned start lands past the aligned end.
    assert!(matches!(
      unsafe { Heap::init(start.wrapping_add(1), start.wrapping_add(3)) },
      Err(HeapError::RangeTooSmall { .. })
    ));
  }

  #[test]
  fn init_accepts_header_only_span() {
    let mut memory = arena(256);
    let start = memory.as_mut_ptr().cast::<u8>();

    let mut heap = unsafe { Heap::init(start, start.wrapping_add(HEADER_SIZE)) }.unwrap();
    assert_eq!(heap.head().size(), 0);
    assert_eq!(
      heap.allocate(1),
      Err(HeapError::OutOfMemory { requested: 1 })
    );
  }

  #[test]
  fn init_aligns_unaligned_bounds() {
    let mut memory = arena(1024);
    let base = memory.as_mut_ptr().cast::<u8>();

    let heap = unsafe { Heap::init(base.wrapping_add(3), base.wrapping_add(1000)) }.unwrap();

    let base = base as usize;
    assert_eq!(heap.bounds(), (base + ALIGN)..align_down(base + 1000));
    assert_eq!(heap.head().addr(), base + ALIGN);
    assert_eq!(heap.head().size(), align_down(base + 1000) - (base + ALIGN) - HEADER_SIZE);
    assert_invariants(&heap);
  }

  #[test]
  fn allocate_zero_is_empty_and_leaves_list_alone() {
    let mut memory = arena(1024);
    let mut heap = heap_in(&mut memory);
    let before = heap.head().info();

    assert_eq!(heap.allocate(0), Ok(None));
    assert_eq!(heap.head().info(), before);
    assert!(heap.head().next().is_none());
  }

  #[test]
  fn allocation_sizes_are_rounded_to_alignment() {
    let mut memory = arena(8192);
    let mut heap = heap_in(&mut memory);

    for n in 1..=(3 * ALIGN + 1) {
      let ptr = heap.allocate(n).unwrap().unwrap();
      assert!(is_aligned(ptr.as_ptr() as usize));

      let header = heap.blocks().find(|b| b.payload_addr() == ptr.as_ptr() as usize).unwrap();
      assert_eq!(header.state(), BlockState::Used);
      assert_eq!(header.size() % ALIGN, 0);
      assert!(header.size() >= n);
      assert_invariants(&heap);

      unsafe { heap.free(Some(ptr)) }.unwrap();
    }
  }

  #[test]
  fn consecutive_allocations_are_adjacent() {
    let mut memory = arena(4096);
    let mut heap = heap_in(&mut memory);

    let a = heap.allocate(128).unwrap().unwrap().as_ptr() as usize;
    let b = heap.allocate(128).unwrap().unwrap().as_ptr() as usize;

    assert_eq!(a, heap.bounds().start + HEADER_SIZE);
    assert_eq!(b, a + 128 + HEADER_SIZE);

    let states: Vec<_> = heap.blocks().map(|b| (b.size(), b.state())).collect();
    assert_eq!(
      states,
      vec![
        (128, BlockState::Used),
        (128, BlockState::Used),
        (4096 - 3 * HEADER_SIZE - 256, BlockState::Free),
      ]
    );
    assert_invariants(&heap);
  }

  #[test]
  fn first_fit_prefers_the_earliest_block() {
    let mut memory = arena(4096);
    let mut heap = heap_in(&mut memory);

    let a = heap.allocate(64).unwrap();
    let _b = heap.allocate(64).unwrap();
    let c = heap.allocate(64).unwrap();
    let _d = heap.allocate(64).unwrap();

    unsafe {
      heap.free(c).unwrap();
      heap.free(a).unwrap();
    }
    assert_invariants(&heap);

    assert_eq!(heap.allocate(64).unwrap(), a);
    assert_eq!(heap.allocate(64).unwrap(), c);
    assert_invariants(&heap);
  }

  #[test]
  fn exhausted_heap_reports_out_of_memory() {
    let mut memory = arena(1024);
    let mut heap = heap_in(&mut memory);

    assert_eq!(
      heap.allocate(1024),
      Err(HeapError::OutOfMemory { requested: 1024 })
    );
    assert_eq!(
      heap.allocate(usize::MAX),
      Err(HeapError::OutOfMemory { requested: usize::MAX })
    );

    let whole = heap.allocate(1024 - HEADER_SIZE).unwrap();
    assert!(whole.is_some());
    assert_eq!(heap.allocate(1), Err(HeapError::OutOfMemory { requested: 1 }));
    assert_eq!(heap.remaining(), 0);
  }

  #[test]
  fn freeing_nothing_is_a_no_op() {
    let mut memory = arena(1024);
    let mut heap = heap_in(&mut memory);
    let before = heap.head().info();

    assert_eq!(unsafe { heap.free(None) }, Ok(()));
    assert_eq!(heap.head().info(), before);
  }

  #[test]
  fn double_free_is_rejected() {
    let mut memory = arena(1024);
    let mut heap = heap_in(&mut memory);

    let ptr = heap.allocate(128).unwrap();
    unsafe { heap.free(ptr) }.unwrap();

    let addr = ptr.unwrap().as_ptr() as usize;
    assert_eq!(unsafe { heap.free(ptr) }, Err(HeapError::InvalidFree { addr }));
    assert_invariants(&heap);
  }

  #[test]
  fn pointers_outside_the_heap_or_misaligned_are_rejected() {
    let mut memory = arena(1024);
    let mut other = arena(64);
    let mut heap = heap_in(&mut memory);
    let ptr = heap.allocate(128).unwrap().unwrap();

    let misaligned = unsafe { ptr.add(8) };
    assert!(matches!(
      unsafe { heap.free(Some(misaligned)) },
      Err(HeapError::InvalidFree { .. })
    ));

    let foreign = NonNull::new(other.as_mut_ptr().cast::<u8>()).unwrap();
    assert!(matches!(
      unsafe { heap.free(Some(foreign)) },
      Err(HeapError::InvalidFree { .. })
    ));

    // The block is still live and can be released normally.
    assert_eq!(unsafe { heap.free(Some(ptr)) }, Ok(()));
  }

  #[test]
  fn small_remainder_stays_inside_the_block() {
    let n = 64;

    for slack in [0, ALIGN] {
      let mut memory = arena(HEADER_SIZE + n + HEADER_SIZE + slack);
      let mut heap = heap_in(&mut memory);
      let initial = heap.head().size();
      assert!(initial <= n + HEADER_SIZE + ALIGN);

      heap.allocate(n).unwrap().unwrap();

      assert_eq!(heap.head().state(), BlockState::Used);
      assert_eq!(heap.head().size(), initial);
      assert!(heap.head().next().is_none());
    }
  }

  #[test]
  fn large_remainder_is_split_off() {
    let n = 64;
    let mut memory = arena(HEADER_SIZE + n + HEADER_SIZE + 2 * ALIGN);
    let mut heap = heap_in(&mut memory);

    heap.allocate(n).unwrap().unwrap();

    let head = heap.head();
    assert_eq!(head.size(), n);
    let rest = head.next().unwrap();
    assert_eq!(rest.state(), BlockState::Free);
    assert_eq!(rest.size(), 2 * ALIGN);
    assert_invariants(&heap);
  }

  #[test]
  fn round_trip_restores_initial_block() {
    let mut memory = arena(4096);
    let mut heap = heap_in(&mut memory);
    let initial = heap.head().info();

    let ptr = heap.allocate(100).unwrap();
    unsafe { heap.free(ptr) }.unwrap();

    assert_eq!(heap.head().info(), initial);
    assert!(heap.head().next().is_none());
  }

  #[test]
  fn every_free_order_merges_back_to_one_block() {
    let orders = [
      [0, 1, 2],
      [0, 2, 1],
      [1, 0, 2],
      [1, 2, 0],
      [2, 0, 1],
      [2, 1, 0],
    ];

    for order in orders {
      let mut memory = arena(4096);
      let mut heap = heap_in(&mut memory);
      let initial = heap.head().info();

      let ptrs = [
        heap.allocate(128).unwrap(),
        heap.allocate(128).unwrap(),
        heap.allocate(128).unwrap(),
      ];

      for i in order {
        unsafe { heap.free(ptrs[i]) }.unwrap();
        assert_invariants(&heap);
      }

      assert_eq!(heap.head().info(), initial, "order {:?}", order);
      assert!(heap.head().next().is_none());
    }
  }

  #[test]
  fn freeing_a_middle_block_merges_both_neighbours() {
    let mut memory = arena(4096);
    let mut heap = heap_in(&mut memory);

    let a = heap.allocate(128).unwrap();
    let b = heap.allocate(128).unwrap();
    let c = heap.allocate(128).unwrap();
    let _d = heap.allocate(128).unwrap();

    unsafe {
      heap.free(a).unwrap();
      heap.free(c).unwrap();
      heap.free(b).unwrap();
    }

    let blocks: Vec<_> = heap.blocks().map(|b| (b.size(), b.state())).collect();
    assert_eq!(blocks[0], (3 * 128 + 2 * HEADER_SIZE, BlockState::Free));
    assert_eq!(blocks[1], (128, BlockState::Used));
    assert_eq!(blocks[2].1, BlockState::Free);
    assert_eq!(blocks.len(), 3);
    assert_invariants(&heap);
  }

  #[test]
  fn remaining_counts_free_payload_only() {
    let mut memory = arena(4096);
    let mut heap = heap_in(&mut memory);

    let a = heap.allocate(128).unwrap();
    assert_eq!(heap.remaining(), 4096 - 2 * HEADER_SIZE - 128);

    let _b = heap.allocate(128).unwrap();
    unsafe { heap.free(a) }.unwrap();
    assert_eq!(heap.remaining(), 128 + 4096 - 3 * HEADER_SIZE - 256);
  }
}
