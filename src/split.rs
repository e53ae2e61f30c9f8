//! Carving a right-sized block out of an oversized free one.

use log::trace;

use crate::{
  block::{Block, MIN_SPLIT, OVERHEAD},
  brk::Break,
  heap::Heap,
};

impl<B: Break> Heap<B> {
  /// Takes `block` off the free list as an allocation of `size` bytes.
  ///
  /// When the leftover can hold a header, a footer and 8 payload bytes, it
  /// becomes a new free block right after `block`, merged forward with a
  /// free successor. Otherwise `block` is handed out whole.
  ///
  /// # Safety
  ///
  /// `block` must be a free block of this heap with at least `size` bytes.
  pub(crate) unsafe fn split(
    &mut self,
    block: *mut Block,
    size: usize,
  ) {
    unsafe {
      let leftover = (*block).size - size;

      self.free.remove(block);
      (*block).set_free(false);

      if leftover < MIN_SPLIT {
        return;
      }

      (*block).size = size;
      Block::set_footer(block);

      let remainder = Block::write(Block::end(block), leftover - OVERHEAD, true);

      trace!("split {:?} into {} + {} bytes", block, size, (*remainder).size);

      self.free.insert(remainder);
      self.coalesce_next(remainder);
    }
  }
}

#[cfg(test)]
mod tests {
  use crate::{
    Heap,
    block::{Block, OVERHEAD},
    brk::Arena,
  };

  #[test]
  fn test_split_then_reuse_remainder() {
    let mut heap = Heap::new(Arena::with_capacity(4096));

    unsafe {
      let a = heap.allocate(64);
      heap.release(a);

      let b = heap.allocate(16);
      assert_eq!(b, a);
      assert_eq!(heap.usable_size(b), 16);

      let free: Vec<_> = heap.free_blocks().collect();
      assert_eq!(free.len(), 1);
      assert_eq!(free[0].size, 64 - 16 - OVERHEAD);
      assert_eq!(free[0].payload, b.add(16 + OVERHEAD));

      let c = heap.allocate(64 - 16 - OVERHEAD);
      assert_eq!(c, free[0].payload);
      assert_eq!(heap.free_blocks().count(), 0);
      assert_eq!(heap.check(), Ok(()));
    }
  }

  #[test]
  fn test_small_leftover_is_not_split() {
    let mut heap = Heap::new(Arena::with_capacity(4096));

    unsafe {
      // The leftover is exactly OVERHEAD bytes: no room for a payload.
      let size = 24 + OVERHEAD;
      let a = heap.allocate(size);
      heap.release(a);

      let b = heap.allocate(24);
      assert_eq!(b, a);
      assert_eq!(heap.usable_size(b), size);
      assert_eq!(heap.free_blocks().count(), 0);
      assert_eq!(heap.check(), Ok(()));
    }
  }

  #[test]
  fn test_smallest_worthwhile_leftover_is_split() {
    let mut heap = Heap::new(Arena::with_capacity(4096));

    unsafe {
      let a = heap.allocate(24 + OVERHEAD + 8);
      heap.release(a);

      let b = heap.allocate(24);
      assert_eq!(heap.usable_size(b), 24);

      let free: Vec<_> = heap.free_blocks().collect();
      assert_eq!(free.len(), 1);
      assert_eq!(free[0].size, 8);
    }
  }

  #[test]
  fn test_remainder_merges_with_free_successor() {
    let mut heap = Heap::new(Arena::with_capacity(4096));

    unsafe {
      let a = heap.allocate(128);
      let b = heap.allocate(32);
      let _guard = heap.allocate(8);

      // Free both without merging, so the list is a -> b with a and b
      // physically adjacent.
      heap.free.insert(Block::from_payload(b));
      heap.free.insert(Block::from_payload(a));

      let c = heap.allocate(16);
      assert_eq!(c, a);

      let free: Vec<_> = heap.free_blocks().collect();
      assert_eq!(free.len(), 1);
      assert_eq!(free[0].payload, a.add(16 + OVERHEAD));
      assert_eq!(free[0].size, (128 - 16 - OVERHEAD) + OVERHEAD + 32);
      assert_eq!(heap.check(), Ok(()));
    }
  }
}
