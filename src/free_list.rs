//! Unordered, intrusive, doubly-linked list of free blocks.
//!
//! Links live inside the block headers themselves. New entries go to the
//! head, so the most recently freed block is found first.

use std::ptr;

use crate::{
  block::Block,
  corruption::{self, Corruption},
};

pub struct FreeList {
  head: *mut Block,
}

impl FreeList {
  pub const fn new() -> Self {
    Self {
      head: ptr::null_mut(),
    }
  }

  /// Marks `block` free and pushes it at the head.
  ///
  /// # Safety
  ///
  /// `block` must be a valid header that is not already linked.
  pub unsafe fn insert(
    &mut self,
    block: *mut Block,
  ) {
    unsafe {
      (*block).set_free(true);
      (*block).prev = ptr::null_mut();
      (*block).next = self.head;

      if !self.head.is_null() {
        (*self.head).prev = block;
      }
    }

    self.head = block;
  }

  /// Unlinks `block` and marks it allocated.
  ///
  /// Blocks that are not on the list are left untouched. Broken links around
  /// `block` abort the process.
  ///
  /// # Safety
  ///
  /// Every block on the list must be a valid header.
  pub unsafe fn remove(
    &mut self,
    block: *mut Block,
  ) {
    if !self.contains(block) {
      return;
    }

    unsafe {
      let next = (*block).next;
      let prev = (*block).prev;

      if !next.is_null() && (*next).prev != block {
        corruption::abort(Corruption::NextLink);
      }
      if !prev.is_null() && (*prev).next != block {
        corruption::abort(Corruption::PrevLink);
      }

      (*block).set_free(false);

      if self.head == block {
        self.head = next;
      }
      if !next.is_null() {
        (*next).prev = prev;
      }
      if !prev.is_null() {
        (*prev).next = next;
      }

      (*block).next = ptr::null_mut();
      (*block).prev = ptr::null_mut();
    }
  }

  /// Returns the first block with at least `size` payload bytes, or null.
  pub fn find_first_fit(
    &self,
    size: usize,
  ) -> *mut Block {
    self
      .iter()
      .find(|&block| unsafe { (*block).size >= size })
      .unwrap_or(ptr::null_mut())
  }

  pub fn contains(
    &self,
    block: *mut Block,
  ) -> bool {
    self.iter().any(|current| current == block)
  }

  /// Walks the list from the head.
  ///
  /// The list only ever holds headers handed to [`FreeList::insert`], which
  /// the caller promised were valid.
  pub fn iter(&self) -> Iter {
    Iter {
      current: self.head,
    }
  }
}

impl Default for FreeList {
  fn default() -> Self {
    Self::new()
  }
}

pub struct Iter {
  current: *mut Block,
}

impl Iterator for Iter {
  type Item = *mut Block;

  fn next(&mut self) -> Option<Self::Item> {
    if self.current.is_null() {
      return None;
    }

    let block = self.current;
    self.current = unsafe { (*block).next };

    Some(block)
  }
}
