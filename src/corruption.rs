//! Heap metadata corruption and the fail-fast policy around it.

use std::{error, fmt};

use libc::{STDERR_FILENO, c_void};

/// Ways heap metadata can be found inconsistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corruption {
  /// `block.next.prev != block` while unlinking.
  NextLink,
  /// `block.prev.next != block` while unlinking.
  PrevLink,
  /// A neighbor's header and footer disagree on its size.
  BoundaryTag,
  /// A block reaches past the region, so the blocks do not tile it exactly.
  Gap,
  /// A block's free flag disagrees with its free-list membership.
  FreeListMismatch,
}

impl Corruption {
  pub const fn message(self) -> &'static str {
    match self {
      Corruption::NextLink => {
        "Corrupted heap detected: Next block's prev pointer does not point back to current block."
      }
      Corruption::PrevLink => {
        "Corrupted heap detected: Prev block's next pointer does not point back to current block."
      }
      Corruption::BoundaryTag => {
        "Corrupted heap detected: Neighbor block's header and footer do not match."
      }
      Corruption::Gap => "Corrupted heap detected: Blocks do not tile the heap region.",
      Corruption::FreeListMismatch => {
        "Corrupted heap detected: Free flag disagrees with free list membership."
      }
    }
  }
}

impl fmt::Display for Corruption {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.write_str(self.message())
  }
}

impl error::Error for Corruption {}

/// Reports `corruption` on standard error and aborts the process.
///
/// Nothing here allocates: the heap it would allocate from is the one that
/// just failed validation.
#[cold]
pub fn abort(corruption: Corruption) -> ! {
  let message = corruption.message();

  unsafe {
    libc::write(
      STDERR_FILENO,
      message.as_ptr() as *const c_void,
      message.len(),
    );
    libc::write(STDERR_FILENO, b"\n".as_ptr() as *const c_void, 1);
    libc::abort()
  }
}
