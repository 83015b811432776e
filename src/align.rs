use crate::config::ALIGN;

/// Rounds a size or address up to the heap alignment, `None` on overflow.
///
/// # Examples
///
/// ```rust
/// use kheap::{ALIGN, align};
///
/// assert_eq!(align!(1), Some(ALIGN));
/// assert_eq!(align!(ALIGN), Some(ALIGN));
/// assert_eq!(align!(ALIGN + 1), Some(2 * ALIGN));
/// assert_eq!(align!(usize::MAX), None);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    $crate::align::align_up($value)
  };
}

/// Rounds `value` up to the next multiple of [`ALIGN`], or `None` on overflow.
pub const fn align_up(value: usize) -> Option<usize> {
  match value.checked_add(ALIGN - 1) {
    Some(v) => Some(v & !(ALIGN - 1)),
    None => None,
  }
}

/// Rounds `value` down to the previous multiple of [`ALIGN`].
pub const fn align_down(value: usize) -> usize {
  value & !(ALIGN - 1)
}

pub const fn is_aligned(value: usize) -> bool {
  value & (ALIGN - 1) == 0
}
