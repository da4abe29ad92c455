/// Alignment unit of every block size and payload offset.
pub const ALIGNMENT: usize = 16;

/// Rounds the given size up to the next multiple of [`ALIGNMENT`].
///
/// Overflows for sizes within `ALIGNMENT` of `usize::MAX`; use
/// [`checked_align`] when the input comes from a caller.
///
/// # Examples
///
/// ```rust
/// use segalloc::align;
///
/// assert_eq!(align!(1), 16);
/// assert_eq!(align!(16), 16);
/// assert_eq!(align!(17), 32);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    ($value + $crate::align::ALIGNMENT - 1) & !($crate::align::ALIGNMENT - 1)
  };
}

/// Like [`align!`] but returns `None` instead of wrapping around.
pub fn checked_align(value: usize) -> Option<usize> {
  value
    .checked_add(ALIGNMENT - 1)
    .map(|v| v & !(ALIGNMENT - 1))
}

pub fn is_aligned(value: usize) -> bool {
  value & (ALIGNMENT - 1) == 0
}
