//! # kheap - A Freestanding Kernel Heap
//!
//! This crate provides a **first-fit heap allocator** for bare-metal kernels.
//! It manages one contiguous memory range handed over at boot, needs neither
//! an operating system nor `std`, and reports every failure as a typed
//! [`HeapError`].
//!
//! ## Overview
//!
//! The heap is an address-ordered, doubly linked list of blocks. Every block
//! starts with a header; the pointer handed to callers is the first byte
//! after it:
//!
//! ```text
//!   Heap after a few allocations:
//!
//!   start                                                               end
//!   ┌────────┬──────────┬────────┬──────────┬────────┬────────────────────┐
//!   │ header │  used    │ header │  used    │ header │       free         │
//!   │ size=a │  a bytes │ size=b │  b bytes │ size=c │      c bytes       │
//!   └────────┴──────────┴────────┴──────────┴────────┴────────────────────┘
//!            ▲                   ▲
//!            └── returned        └── returned
//!
//!   Blocks touch each other: header + size always reaches the next header.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   kheap
//!   ├── align      - Alignment macro and helpers (align!, align_up, align_down)
//!   ├── block      - Block header layout and the handle that walks it
//!   ├── config     - Compile-time constants (ALIGN, HEADER_SIZE)
//!   ├── error      - HeapError and the coarse ErrorKind codes
//!   ├── fatal      - FatalSink boundary for halting on errors
//!   ├── heap       - Heap: init / allocate / free / introspection
//!   └── locked     - LockedHeap: spin-locked wrapper and GlobalAlloc
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use kheap::{Heap, HeapError};
//!
//! let mut memory = vec![0u128; 4096 / 16];
//! let range = memory.as_mut_ptr_range();
//!
//! let mut heap = unsafe { Heap::init(range.start.cast(), range.end.cast()) }?;
//!
//! let ptr = heap.allocate(128)?;
//! assert!(ptr.is_some());
//!
//! unsafe { heap.free(ptr) }?;
//! assert!(heap.head().next().is_none());
//! # Ok::<(), HeapError>(())
//! ```
//!
//! ## How It Works
//!
//! Allocation walks the list from the head and takes the first free block
//! that is large enough. When the leftover would still hold a header plus
//! more than one alignment unit, the block is split:
//!
//! ```text
//!   allocate(n) on a large free block:
//!
//!   ┌────────┬───────────────────────────────────────────┐
//!   │ header │                 free                      │
//!   └────────┴───────────────────────────────────────────┘
//!                         │
//!                         ▼
//!   ┌────────┬─────────┬────────┬────────────────────────┐
//!   │ header │  used   │ header │        free            │
//!   │ size=n │ n bytes │  new   │                        │
//!   └────────┴─────────┴────────┴────────────────────────┘
//! ```
//!
//! Freeing marks the block free, absorbs every free block after it, then
//! lets a free predecessor absorb the result. Two free blocks are never
//! left next to each other.
//!
//! ## Failures
//!
//! | Error                       | Raised by  | Meaning                        |
//! |-----------------------------|------------|--------------------------------|
//! | `InvalidRange`              | `init`     | `limit <= start`               |
//! | `RangeTooSmall`             | `init`     | no room for a single header    |
//! | `OutOfMemory`               | `allocate` | no free block is large enough  |
//! | `InvalidFree`               | `free`     | block not in use, bad pointer  |
//!
//! None of them is recoverable. Callers pass them to a [`FatalSink`], which
//! reports and halts. `allocate(0)` and `free(None)` are not errors.
//!
//! ## Limitations
//!
//! - **Single range**: the heap never grows and never returns memory
//! - **Fixed alignment**: every block is aligned to [`ALIGN`]
//! - **No interrupt safety**: handlers must not allocate or free
//! - **Linear scans**: allocation and free cost O(blocks)

#![cfg_attr(not(test), no_std)]

pub mod align;
mod block;
mod config;
mod error;
mod fatal;
mod heap;
mod locked;
#[cfg(test)]
mod testing;

pub use block::{BlockHeader, BlockInfo, BlockState};
pub use config::{ALIGN, HEADER_SIZE};
pub use error::{ErrorKind, HeapError, Result};
pub use fatal::{FatalSink, OrHalt, PanicSink, report};
pub use heap::{Blocks, Heap};
pub use locked::LockedHeap;
