//! Merging a free block with free physical neighbors.

use log::trace;

use crate::{
  block::{Block, OVERHEAD},
  brk::Break,
  heap::Heap,
};

impl<B: Break> Heap<B> {
  /// Merges `block` with its successor, then with its predecessor.
  ///
  /// One merge per direction: after absorbing the successor, the block that
  /// now follows is not looked at again.
  ///
  /// # Safety
  ///
  /// `block` must be a free block of this heap.
  pub(crate) unsafe fn coalesce(
    &mut self,
    block: *mut Block,
  ) {
    unsafe {
      self.coalesce_next(block);
      self.coalesce_prev(block);
    }
  }

  /// # Safety
  ///
  /// `block` must be a free block of this heap.
  pub(crate) unsafe fn coalesce_next(
    &mut self,
    block: *mut Block,
  ) {
    unsafe {
      let Some(next) = self.region.next_of(block) else {
        return;
      };

      if !(*next).is_free() {
        return;
      }

      trace!("merging {:?} with next {:?}", block, next);

      self.free.remove(block);
      self.free.remove(next);

      (*block).size += OVERHEAD + (*next).size;
      Block::set_footer(block);

      self.free.insert(block);
    }
  }

  /// # Safety
  ///
  /// `block` must be a free block of this heap.
  pub(crate) unsafe fn coalesce_prev(
    &mut self,
    block: *mut Block,
  ) {
    unsafe {
      let Some(prev) = self.region.prev_of(block) else {
        return;
      };

      if !(*prev).is_free() {
        return;
      }

      trace!("merging {:?} into prev {:?}", block, prev);

      self.free.remove(block);
      self.free.remove(prev);

      (*prev).size += OVERHEAD + (*block).size;
      Block::set_footer(prev);

      self.free.insert(prev);
    }
  }
}
