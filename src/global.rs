//! The process-wide heap on top of the real program break.

use std::{
  alloc::{GlobalAlloc, Layout},
  cell::UnsafeCell,
  ptr,
};

use crate::{
  align::ALIGNMENT,
  brk::Sbrk,
  heap::{Heap, HeapStats},
};

/// A [`Heap`] over `sbrk(2)`, usable as `#[global_allocator]`.
///
/// There is no locking: every call must come from one thread at a time, and
/// no other code may move the program break while the heap is in use.
///
/// ```rust,ignore
/// use tagalloc::BrkAllocator;
///
/// #[global_allocator]
/// static GLOBAL: BrkAllocator = BrkAllocator::new();
/// ```
pub struct BrkAllocator {
  heap: UnsafeCell<Heap<Sbrk>>,
}

// SAFETY: callers uphold the single-threaded discipline documented above.
unsafe impl Sync for BrkAllocator {}

impl BrkAllocator {
  pub const fn new() -> Self {
    Self {
      heap: UnsafeCell::new(Heap::new(Sbrk)),
    }
  }

  /// # Safety
  ///
  /// No other call into this allocator may be running.
  #[allow(clippy::mut_from_ref)]
  unsafe fn heap(&self) -> &mut Heap<Sbrk> {
    unsafe { &mut *self.heap.get() }
  }

  /// # Safety
  ///
  /// See [`Heap::allocate`].
  pub unsafe fn allocate(
    &self,
    size: usize,
  ) -> *mut u8 {
    unsafe { self.heap().allocate(size) }
  }

  /// # Safety
  ///
  /// See [`Heap::zero_allocate`].
  pub unsafe fn zero_allocate(
    &self,
    count: usize,
    elem_size: usize,
  ) -> *mut u8 {
    unsafe { self.heap().zero_allocate(count, elem_size) }
  }

  /// # Safety
  ///
  /// See [`Heap::release`].
  pub unsafe fn release(
    &self,
    payload: *mut u8,
  ) {
    unsafe { self.heap().release(payload) }
  }

  /// # Safety
  ///
  /// See [`Heap::resize`].
  pub unsafe fn resize(
    &self,
    payload: *mut u8,
    new_size: usize,
  ) -> *mut u8 {
    unsafe { self.heap().resize(payload, new_size) }
  }

  /// Snapshot of the heap. Computed without allocating.
  pub fn stats(&self) -> HeapStats {
    unsafe { self.heap().stats() }
  }
}

impl Default for BrkAllocator {
  fn default() -> Self {
    Self::new()
  }
}

unsafe impl GlobalAlloc for BrkAllocator {
  unsafe fn alloc(
    &self,
    layout: Layout,
  ) -> *mut u8 {
    if layout.align() > ALIGNMENT {
      return ptr::null_mut();
    }

    unsafe { self.allocate(layout.size()) }
  }

  unsafe fn alloc_zeroed(
    &self,
    layout: Layout,
  ) -> *mut u8 {
    if layout.align() > ALIGNMENT {
      return ptr::null_mut();
    }

    unsafe { self.zero_allocate(1, layout.size()) }
  }

  unsafe fn dealloc(
    &self,
    ptr: *mut u8,
    _layout: Layout,
  ) {
    unsafe { self.release(ptr) }
  }

  unsafe fn realloc(
    &self,
    ptr: *mut u8,
    layout: Layout,
    new_size: usize,
  ) -> *mut u8 {
    if layout.align() > ALIGNMENT {
      return ptr::null_mut();
    }

    unsafe { self.resize(ptr, new_size) }
  }
}

/// `malloc`, `calloc`, `realloc` and `free` backed by one [`BrkAllocator`].
#[cfg(feature = "c-abi")]
mod c_abi {
  use libc::{c_void, size_t};

  use super::BrkAllocator;

  static ALLOCATOR: BrkAllocator = BrkAllocator::new();

  #[unsafe(no_mangle)]
  pub unsafe extern "C" fn malloc(size: size_t) -> *mut c_void {
    unsafe { ALLOCATOR.allocate(size) as *mut c_void }
  }

  #[unsafe(no_mangle)]
  pub unsafe extern "C" fn calloc(
    count: size_t,
    size: size_t,
  ) -> *mut c_void {
    unsafe { ALLOCATOR.zero_allocate(count, size) as *mut c_void }
  }

  #[unsafe(no_mangle)]
  pub unsafe extern "C" fn realloc(
    ptr: *mut c_void,
    size: size_t,
  ) -> *mut c_void {
    unsafe { ALLOCATOR.resize(ptr as *mut u8, size) as *mut c_void }
  }

  #[unsafe(no_mangle)]
  pub unsafe extern "C" fn free(ptr: *mut c_void) {
    unsafe { ALLOCATOR.release(ptr as *mut u8) }
  }
}
