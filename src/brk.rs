//! The "move the break pointer" primitive the heap grows through.

use std::{error, fmt, ptr};

use libc::{c_void, intptr_t, sbrk};

use crate::align::ALIGNMENT;

/// Reasons the break could not be moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakError {
  /// The underlying region cannot grow any further.
  Exhausted,
  /// The increment does not fit the primitive's signed argument.
  TooLarge,
}

impl fmt::Display for BreakError {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match self {
      BreakError::Exhausted => f.write_str("heap region exhausted"),
      BreakError::TooLarge => f.write_str("heap increment too large"),
    }
  }
}

impl error::Error for BreakError {}

/// A linear, never-shrinking memory region whose end can be moved forward.
pub trait Break {
  /// Moves the end of the region forward by `increment` bytes and returns
  /// the previous end.
  ///
  /// # Safety
  ///
  /// The caller must own every byte handed out; nothing else may rely on the
  /// region ending where it used to.
  unsafe fn extend(
    &mut self,
    increment: usize,
  ) -> Result<*mut u8, BreakError>;

  /// Returns the current end of the region without growing it.
  ///
  /// Implementations return `usize::MAX as *mut u8` when the end cannot be
  /// queried.
  fn top(&self) -> *mut u8;
}

/// The process data segment, moved with `sbrk(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sbrk;

impl Break for Sbrk {
  unsafe fn extend(
    &mut self,
    increment: usize,
  ) -> Result<*mut u8, BreakError> {
    if increment > isize::MAX as usize {
      return Err(BreakError::TooLarge);
    }

    let address = unsafe { sbrk(increment as intptr_t) };

    if address == usize::MAX as *mut c_void {
      return Err(BreakError::Exhausted);
    }

    Ok(address as *mut u8)
  }

  fn top(&self) -> *mut u8 {
    // SAFETY: a zero increment only queries the break.
    unsafe { sbrk(0) as *mut u8 }
  }
}

/// A fixed-capacity region owned by this value.
///
/// Behaves like the process break but never touches it, so several heaps
/// can live side by side. Used by the tests and wherever a bounded heap is
/// wanted.
pub struct Arena {
  base: *mut u64,
  words: usize,
  brk: usize,
}

impl Arena {
  /// Creates an arena able to grow up to `capacity` bytes (rounded up to
  /// [`ALIGNMENT`]).
  pub fn with_capacity(capacity: usize) -> Self {
    let words = crate::align!(capacity) / ALIGNMENT;
    let memory: Box<[u64]> = vec![0u64; words].into_boxed_slice();

    Self {
      base: Box::into_raw(memory) as *mut u64,
      words,
      brk: 0,
    }
  }

  /// Total bytes the arena can hand out.
  pub fn capacity(&self) -> usize {
    self.words * ALIGNMENT
  }

  /// Bytes already handed out.
  pub fn used(&self) -> usize {
    self.brk
  }

  fn base(&self) -> *mut u8 {
    self.base as *mut u8
  }
}

impl Drop for Arena {
  fn drop(&mut self) {
    let memory = ptr::slice_from_raw_parts_mut(self.base, self.words);
    // SAFETY: `base`/`words` come from the boxed slice built in `with_capacity`.
    drop(unsafe { Box::from_raw(memory) });
  }
}

impl Break for Arena {
  unsafe fn extend(
    &mut self,
    increment: usize,
  ) -> Result<*mut u8, BreakError> {
    let end = self.brk.checked_add(increment).ok_or(BreakError::TooLarge)?;

    if end > self.capacity() {
      return Err(BreakError::Exhausted);
    }

    let previous = self.top();
    self.brk = end;

    Ok(previous)
  }

  fn top(&self) -> *mut u8 {
    self.base().wrapping_add(self.brk)
  }
}

impl fmt::Debug for Arena {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.debug_struct("Arena")
      .field("base", &self.base())
      .field("used", &self.brk)
      .field("capacity", &self.capacity())
      .finish()
  }
}

/// Sentinel returned by [`Break::top`] when the end cannot be queried.
pub(crate) fn is_failure(address: *mut u8) -> bool {
  address.is_null() || address == usize::MAX as *mut u8
}
