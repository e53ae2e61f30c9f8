/// Payload alignment in bytes. Every block size is a multiple of this.
pub const ALIGNMENT: usize = 8;

/// Rounds the given value up to the next multiple of [`ALIGNMENT`].
///
/// The caller is responsible for making sure the addition cannot overflow;
/// use [`aligned_size`] for untrusted sizes.
///
/// # Examples
///
/// ```rust
/// use tagalloc::align;
///
/// assert_eq!(align!(13), 16);
/// assert_eq!(align!(16), 16);
/// assert_eq!(align!(1), 8);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    ($value + $crate::align::ALIGNMENT - 1) & !($crate::align::ALIGNMENT - 1)
  };
}

/// Rounds `size` up to the next multiple of [`ALIGNMENT`], or `None` when the
/// rounded value does not fit in a `usize`.
pub const fn aligned_size(size: usize) -> Option<usize> {
  if size % ALIGNMENT == 0 {
    return Some(size);
  }
  match size.checked_add(ALIGNMENT - size % ALIGNMENT) {
    Some(rounded) => Some(rounded),
    None => None,
  }
}
