//! Compile-time heap configuration.
//!
//! A freestanding allocator has no environment to read settings from, so
//! every tunable is a constant fixed at build time.

use core::mem;

use static_assertions::{const_assert, const_assert_eq};

use crate::block::BlockHeader;

/// Boundary every block address and block size is rounded to.
///
/// At least the pointer width, 16 bytes otherwise.
pub const ALIGN: usize = if mem::size_of::<usize>() > 16 {
  mem::size_of::<usize>()
} else {
  16
};

/// Bytes of metadata in front of every block's payload.
pub const HEADER_SIZE: usize = mem::size_of::<BlockHeader>();

const_assert!(ALIGN.is_power_of_two());
const_assert_eq!(HEADER_SIZE % ALIGN, 0);
const_assert!(mem::align_of::<BlockHeader>() <= ALIGN);

/// Whether a free block of `block_size` bytes is split when `requested`
/// bytes are carved from it: the remainder must still hold a header and
/// more than one alignment unit of payload.
pub const fn should_split(
  block_size: usize,
  requested: usize,
) -> bool {
  block_size > requested + HEADER_SIZE + ALIGN
}
