//! The allocator context: one region plus the free list threaded through it.

use std::ptr;

use log::{debug, trace};

use crate::{
  align::aligned_size,
  block::{Block, OVERHEAD},
  brk::{Break, BreakError},
  corruption::Corruption,
  free_list::FreeList,
  region::Region,
};

/// A boundary-tag, explicit free-list heap growing through `B`.
///
/// Single-threaded: nothing here synchronizes, and every operation takes
/// `&mut self`.
pub struct Heap<B: Break> {
  pub(crate) region: Region<B>,
  pub(crate) free: FreeList,
}

/// One physical block, as reported by [`Heap::blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  pub payload: *mut u8,
  pub size: usize,
  pub is_free: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
  pub blocks: usize,
  pub free_blocks: usize,
  /// Payload bytes in free blocks.
  pub free_bytes: usize,
  /// Payload bytes in allocated blocks.
  pub used_bytes: usize,
  /// Bytes between the region start and top, metadata included.
  pub region_bytes: usize,
}

impl<B: Break> Heap<B> {
  pub const fn new(brk: B) -> Self {
    Self {
      region: Region::new(brk),
      free: FreeList::new(),
    }
  }

  /// The break primitive backing this heap.
  pub fn brk(&self) -> &B {
    self.region.brk()
  }

  /// Allocates at least `size` bytes, 8-byte aligned.
  ///
  /// Returns null for a zero size or when the region cannot grow.
  ///
  /// # Safety
  ///
  /// No other reference into this heap's memory may be live while the
  /// metadata is rewritten.
  pub unsafe fn allocate(
    &mut self,
    size: usize,
  ) -> *mut u8 {
    if size == 0 {
      return ptr::null_mut();
    }

    let Some(size) = aligned_size(size) else {
      return ptr::null_mut();
    };

    unsafe {
      let block = self.free.find_first_fit(size);

      if !block.is_null() {
        trace!("reusing free block {:?} ({} bytes) for {}", block, (*block).size, size);
        self.split(block, size);
        return Block::payload(block);
      }

      match self.grow(size) {
        Ok(block) => Block::payload(block),
        Err(err) => {
          debug!("allocation of {} bytes failed: {}", size, err);
          ptr::null_mut()
        }
      }
    }
  }

  /// Allocates a zero-filled array of `count` elements of `elem_size` bytes.
  ///
  /// Returns null when either argument is zero, when the product overflows,
  /// or when the allocation fails.
  ///
  /// # Safety
  ///
  /// See [`Heap::allocate`].
  pub unsafe fn zero_allocate(
    &mut self,
    count: usize,
    elem_size: usize,
  ) -> *mut u8 {
    if count == 0 || elem_size == 0 {
      return ptr::null_mut();
    }

    let Some(total) = count.checked_mul(elem_size) else {
      return ptr::null_mut();
    };

    unsafe {
      let payload = self.allocate(total);

      if payload.is_null() {
        return payload;
      }

      ptr::write_bytes(payload, 0, self.usable_size(payload));

      payload
    }
  }

  /// Returns the block owning `payload` to the free list and merges it with
  /// free physical neighbors. Null is ignored.
  ///
  /// # Safety
  ///
  /// `payload` must be null or a live pointer returned by this heap.
  pub unsafe fn release(
    &mut self,
    payload: *mut u8,
  ) {
    if payload.is_null() {
      return;
    }

    unsafe {
      let block = Block::from_payload(payload);
      trace!("releasing {:?} ({} bytes)", payload, (*block).size);

      self.free.insert(block);
      self.coalesce(block);
    }
  }

  /// Resizes the allocation at `payload` to at least `new_size` bytes.
  ///
  /// A null `payload` allocates, a zero `new_size` releases and returns
  /// null. Shrinking keeps the block as is. Growing first tries to absorb a
  /// free right-hand neighbor, then falls back to allocate, copy, release.
  /// On failure null is returned and the old block is untouched.
  ///
  /// # Safety
  ///
  /// `payload` must be null or a live pointer returned by this heap.
  pub unsafe fn resize(
    &mut self,
    payload: *mut u8,
    new_size: usize,
  ) -> *mut u8 {
    if payload.is_null() {
      return unsafe { self.allocate(new_size) };
    }

    if new_size == 0 {
      unsafe { self.release(payload) };
      return ptr::null_mut();
    }

    let Some(aligned) = aligned_size(new_size) else {
      return ptr::null_mut();
    };

    unsafe {
      let block = Block::from_payload(payload);
      let old_size = (*block).size;

      if aligned <= old_size {
        return payload;
      }

      if self.grow_in_place(block, aligned) {
        trace!("resized {:?} in place to {} bytes", payload, (*block).size);
        return payload;
      }

      let moved = self.allocate(new_size);

      if moved.is_null() {
        return moved;
      }

      ptr::copy_nonoverlapping(payload, moved, old_size.min(aligned));
      self.release(payload);

      trace!("moved {:?} to {:?} for {} bytes", payload, moved, aligned);

      moved
    }
  }

  /// Payload bytes available at `payload`, at least what was requested.
  ///
  /// # Safety
  ///
  /// `payload` must be a live pointer returned by this heap.
  pub unsafe fn usable_size(
    &self,
    payload: *mut u8,
  ) -> usize {
    unsafe { (*Block::from_payload(payload)).size }
  }

  /// Walks every block in address order.
  ///
  /// Stops early at the first block whose metadata does not check out; use
  /// [`Heap::check`] to find out why.
  pub fn blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
    let mut cursor = self.region.first().ok().flatten();

    std::iter::from_fn(move || {
      let block = cursor?;
      cursor = unsafe { self.region.try_next_of(block) }.ok().flatten();
      Some(unsafe { info(block) })
    })
  }

  /// Walks the free list from its head.
  pub fn free_blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
    self.free.iter().map(|block| unsafe { info(block) })
  }

  pub fn stats(&self) -> HeapStats {
    let mut stats = HeapStats {
      region_bytes: self.region.len(),
      ..HeapStats::default()
    };

    for block in self.blocks() {
      stats.blocks += 1;

      if block.is_free {
        stats.free_blocks += 1;
        stats.free_bytes += block.size;
      } else {
        stats.used_bytes += block.size;
      }
    }

    stats
  }

  /// Verifies that the blocks tile the region, every header matches its
  /// footer, the free-list links are mutual and a block is on the free list
  /// exactly when it is marked free.
  pub fn check(&self) -> Result<(), Corruption> {
    let mut marked_free = 0;
    let mut cursor = self.region.first()?;

    while let Some(block) = cursor {
      let is_free = unsafe { (*block).is_free() };

      if is_free != self.free.contains(block) {
        return Err(Corruption::FreeListMismatch);
      }
      if is_free {
        marked_free += 1;
      }

      cursor = unsafe { self.region.try_next_of(block)? };
    }

    let mut listed = 0;
    let mut previous = ptr::null_mut();

    for block in self.free.iter() {
      let (next, prev) = unsafe { ((*block).next, (*block).prev) };

      // The head has no predecessor; every other entry points back at the
      // one the walk just left, whose `next` led here.
      if prev != previous {
        return Err(Corruption::PrevLink);
      }
      if !next.is_null() && unsafe { (*next).prev } != block {
        return Err(Corruption::NextLink);
      }

      previous = block;

      listed += 1;

      if listed > marked_free {
        return Err(Corruption::FreeListMismatch);
      }
    }

    if listed != marked_free {
      return Err(Corruption::FreeListMismatch);
    }

    Ok(())
  }

  /// Extends the region by exactly one fresh allocated block of `size`.
  unsafe fn grow(
    &mut self,
    size: usize,
  ) -> Result<*mut Block, BreakError> {
    let total = size.checked_add(OVERHEAD).ok_or(BreakError::TooLarge)?;

    self.region.init()?;

    unsafe {
      let address = self.region.extend(total)?;
      Ok(Block::write(address, size, false))
    }
  }

  /// Absorbs the free block right after `block` if that reaches `size`.
  unsafe fn grow_in_place(
    &mut self,
    block: *mut Block,
    size: usize,
  ) -> bool {
    unsafe {
      let Some(next) = self.region.next_of(block) else {
        return false;
      };

      if !(*next).is_free() {
        return false;
      }

      let combined = (*block).size + OVERHEAD + (*next).size;

      if combined < size {
        return false;
      }

      self.free.remove(next);
      (*block).size = combined;
      Block::set_footer(block);

      true
    }
  }
}

unsafe fn info(block: *mut Block) -> BlockInfo {
  unsafe {
    BlockInfo {
      payload: Block::payload(block),
      size: (*block).size,
      is_free: (*block).is_free(),
    }
  }
}

#[cfg(test)]
mod tests {
  use std::{alloc::Layout, mem};

  use super::*;
  use crate::{align, align::ALIGNMENT, block::HEADER_SIZE, brk::Arena};

  fn heap() -> Heap<Arena> {
    Heap::new(Arena::with_capacity(1 << 16))
  }

  /// Deterministic xorshift so failures reproduce.
  struct Rng(u64);

  impl Rng {
    fn next(&mut self) -> u64 {
      self.0 ^= self.0 << 13;
      self.0 ^= self.0 >> 7;
      self.0 ^= self.0 << 17;
      self.0
    }

    fn below(
      &mut self,
      bound: usize,
    ) -> usize {
      (self.next() % bound as u64) as usize
    }
  }

  #[test]
  fn test_alloc() {
    let mut heap = heap();

    unsafe {
      let first_addr = heap.allocate(mem::size_of::<u64>()) as *mut u64;

      *first_addr = 3u64;

      assert_eq!(*first_addr, 3);

      let size: usize = 6;

      let second_addr = heap.allocate(Layout::array::<u16>(size).unwrap().size()) as *mut u16;

      for i in 0..size {
        *(second_addr.add(i)) = (i + 1) as u16;
      }

      assert_eq!(*first_addr, 3);

      for i in 0..size {
        assert_eq!((i + 1) as u16, *(second_addr.add(i)))
      }

      heap.release(first_addr as *mut u8);

      let third_addr = heap.allocate(mem::size_of::<u32>()) as *mut u32;

      assert_eq!(first_addr as *mut u32, third_addr);

      heap.release(third_addr as *mut u8);

      let fourth_addr = heap.allocate(mem::size_of::<[u64; 2]>()) as *mut [u64; 2];

      *fourth_addr = [25, 0];

      assert!(fourth_addr as usize > third_addr as usize);
      assert_eq!(fourth_addr as usize % ALIGNMENT, 0);

      assert_eq!(*fourth_addr, [25, 0]);
      assert_eq!(heap.check(), Ok(()));
    }
  }

  #[test]
  fn test_sizes_round_up_to_alignment() {
    let mut heap = heap();

    for size in 1..=200 {
      unsafe {
        let payload = heap.allocate(size);

        assert!(!payload.is_null());
        assert_eq!(payload as usize % ALIGNMENT, 0);
        assert_eq!(heap.usable_size(payload), align!(size));
      }
    }
  }

  #[test]
  fn test_zero_sizes_return_null() {
    let mut heap = heap();

    unsafe {
      assert!(heap.allocate(0).is_null());

      for k in [1, 8, 1000, usize::MAX] {
        assert!(heap.zero_allocate(0, k).is_null());
        assert!(heap.zero_allocate(k, 0).is_null());
      }
    }

    assert_eq!(heap.stats(), HeapStats::default());
    assert!(!heap.region.is_initialized());
  }

  #[test]
  fn test_zero_allocate_overflow_returns_null() {
    let mut heap = heap();
    let half = usize::MAX / 2 + 1;

    let pairs = [
      (usize::MAX, 2),
      (2, half),
      (half, 2),
      (usize::MAX / 3 + 1, 3),
      (1 << (usize::BITS / 2), 1 << (usize::BITS / 2)),
      (usize::MAX, usize::MAX),
    ];

    for (count, elem_size) in pairs {
      assert!(count.checked_mul(elem_size).is_none());
      assert!(unsafe { heap.zero_allocate(count, elem_size) }.is_null());
    }

    assert_eq!(heap.brk().used(), 0);
  }

  #[test]
  fn test_zero_allocate_clears_reused_memory() {
    let mut heap = heap();

    unsafe {
      let dirty = heap.allocate(64);
      ptr::write_bytes(dirty, 0xAB, 64);
      heap.release(dirty);

      let clean = heap.zero_allocate(8, 8);
      assert_eq!(clean, dirty);

      let bytes = std::slice::from_raw_parts(clean, heap.usable_size(clean));
      assert!(bytes.iter().all(|&byte| byte == 0));
    }
  }

  #[test]
  fn test_zero_allocate_fresh_memory() {
    let mut heap = heap();

    unsafe {
      let payload = heap.zero_allocate(3, 7);
      assert_eq!(heap.usable_size(payload), 24);

      let bytes = std::slice::from_raw_parts(payload, 24);
      assert!(bytes.iter().all(|&byte| byte == 0));
    }
  }

  #[test]
  fn test_release_null_is_noop() {
    let mut heap = heap();

    unsafe {
      let a = heap.allocate(8);
      heap.release(ptr::null_mut());

      assert_eq!(heap.free_blocks().count(), 0);
      assert_eq!(heap.usable_size(a), 8);
    }
  }

  #[test]
  fn test_basic_reuse() {
    let mut heap = heap();

    unsafe {
      let a = heap.allocate(16);
      heap.release(a);
      let b = heap.allocate(16);

      assert_eq!(b, a);
      assert_eq!(heap.stats().blocks, 1);
    }
  }

  #[test]
  fn test_first_fit_prefers_most_recently_freed() {
    let mut heap = heap();

    unsafe {
      let a = heap.allocate(32);
      let _g1 = heap.allocate(8);
      let b = heap.allocate(32);
      let _g2 = heap.allocate(8);

      heap.release(a);
      heap.release(b);

      assert_eq!(heap.allocate(32), b);
      assert_eq!(heap.allocate(32), a);
    }
  }

  #[test]
  fn test_resize_null_allocates() {
    let mut heap = heap();

    unsafe {
      let payload = heap.resize(ptr::null_mut(), 20);

      assert!(!payload.is_null());
      assert_eq!(heap.usable_size(payload), 24);
    }
  }

  #[test]
  fn test_resize_to_zero_releases() {
    let mut heap = heap();

    unsafe {
      let a = heap.allocate(16);

      assert!(heap.resize(a, 0).is_null());

      let free: Vec<_> = heap.free_blocks().collect();
      assert_eq!(free.len(), 1);
      assert_eq!(free[0].payload, a);
    }
  }

  #[test]
  fn test_resize_smaller_keeps_pointer() {
    let mut heap = heap();

    unsafe {
      let a = heap.allocate(64);

      assert_eq!(heap.resize(a, 64), a);
      assert_eq!(heap.resize(a, 60), a);
      assert_eq!(heap.resize(a, 1), a);
      assert_eq!(heap.usable_size(a), 64);
      assert_eq!(heap.free_blocks().count(), 0);
    }
  }

  #[test]
  fn test_resize_grows_into_free_neighbor() {
    let mut heap = heap();

    unsafe {
      let a = heap.allocate(16);
      let b = heap.allocate(32);
      let _guard = heap.allocate(8);

      for i in 0..16 {
        *a.add(i) = i as u8;
      }

      heap.release(b);

      let grown = heap.resize(a, 40);

      assert_eq!(grown, a);
      assert_eq!(heap.usable_size(a), 16 + OVERHEAD + 32);
      assert_eq!(heap.free_blocks().count(), 0);

      for i in 0..16 {
        assert_eq!(*a.add(i), i as u8);
      }

      assert_eq!(heap.check(), Ok(()));
    }
  }

  #[test]
  fn test_resize_moves_when_neighbor_too_small() {
    let mut heap = heap();

    unsafe {
      let a = heap.allocate(16);
      let b = heap.allocate(8);
      let _guard = heap.allocate(8);

      heap.release(b);

      // 16 + OVERHEAD + 8 is not enough.
      let moved = heap.resize(a, 16 + OVERHEAD + 16);

      assert_ne!(moved, a);
      assert_eq!(heap.check(), Ok(()));

      // a merged with b on release.
      let free: Vec<_> = heap.free_blocks().collect();
      assert_eq!(free.len(), 1);
      assert_eq!(free[0].payload, a);
      assert_eq!(free[0].size, 16 + OVERHEAD + 8);
    }
  }

  #[test]
  fn test_resize_fallback() {
    let mut heap = heap();

    unsafe {
      let a = heap.allocate(8);
      let _x = heap.allocate(8);

      (a as *mut u64).write(0x1122_3344_5566_7788);

      let moved = heap.resize(a, 64);

      assert!(!moved.is_null());
      assert_ne!(moved, a);
      assert_eq!((moved as *mut u64).read(), 0x1122_3344_5566_7788);

      assert_eq!(heap.allocate(8), a);
    }
  }

  #[test]
  fn test_resize_preserves_content() {
    for in_place in [true, false] {
      let mut heap = heap();

      unsafe {
        let a = heap.allocate(24);
        let neighbor = heap.allocate(if in_place { 256 } else { 8 });
        let _guard = heap.allocate(8);

        for i in 0..24 {
          *a.add(i) = (i * 7) as u8;
        }

        if in_place {
          heap.release(neighbor);
        }

        let resized = heap.resize(a, 100);

        assert_eq!(resized == a, in_place);
        assert!(heap.usable_size(resized) >= 100);

        for i in 0..24 {
          assert_eq!(*resized.add(i), (i * 7) as u8);
        }
      }
    }
  }

  #[test]
  fn test_unaligned_break_is_padded() {
    let mut arena = Arena::with_capacity(1024);
    let base = arena.top();

    // Leave the break three bytes past an aligned address.
    unsafe { arena.extend(3).unwrap() };

    let mut heap = Heap::new(arena);

    unsafe {
      let a = heap.allocate(16);
      let b = heap.allocate(8);

      assert_eq!(a, base.add(ALIGNMENT + HEADER_SIZE));
      assert_eq!(a as usize % ALIGNMENT, 0);
      assert_eq!(b as usize % ALIGNMENT, 0);
      assert_eq!(heap.brk().used(), ALIGNMENT + 24 + 2 * OVERHEAD);
      assert_eq!(heap.stats().region_bytes, 24 + 2 * OVERHEAD);

      heap.release(a);
      heap.release(b);

      assert_eq!(heap.check(), Ok(()));
      assert_eq!(heap.blocks().count(), 1);
    }
  }

  #[test]
  fn test_exhaustion_returns_null_and_keeps_state() {
    let mut heap = Heap::new(Arena::with_capacity(4 * (16 + OVERHEAD)));

    unsafe {
      let a = heap.allocate(16);
      let _x = heap.allocate(16);
      ptr::write_bytes(a, 0x5A, 16);

      let before = heap.stats();

      assert!(heap.allocate(1024).is_null());
      assert!(heap.zero_allocate(64, 16).is_null());
      assert!(heap.resize(a, 1024).is_null());
      assert!(heap.allocate(usize::MAX).is_null());

      assert_eq!(heap.stats(), before);
      assert_eq!(heap.usable_size(a), 16);
      assert!(std::slice::from_raw_parts(a, 16).iter().all(|&byte| byte == 0x5A));
      assert_eq!(heap.check(), Ok(()));

      // What is left still fits exactly.
      assert!(!heap.allocate(16).is_null());
      assert!(!heap.allocate(16).is_null());
      assert!(heap.allocate(8).is_null());
    }
  }

  #[test]
  fn test_live_blocks_never_overlap() {
    let mut heap = Heap::new(Arena::with_capacity(1 << 20));
    let mut rng = Rng(0x2545_F491_4F6C_DD1D);
    let mut live: Vec<(*mut u8, usize, u8)> = Vec::new();

    for step in 0..2000 {
      unsafe {
        if live.is_empty() || rng.below(10) < 6 {
          let size = 1 + rng.below(200);
          let payload = heap.allocate(size);
          assert!(!payload.is_null());

          let tag = step as u8;
          ptr::write_bytes(payload, tag, size);
          live.push((payload, size, tag));
        } else {
          let (payload, size, tag) = live.swap_remove(rng.below(live.len()));

          let bytes = std::slice::from_raw_parts(payload, size);
          assert!(bytes.iter().all(|&byte| byte == tag), "step {step}");

          heap.release(payload);
        }

        let mut spans: Vec<(usize, usize)> = live
          .iter()
          .map(|&(payload, _, _)| {
            (payload as usize, payload as usize + heap.usable_size(payload))
          })
          .collect();
        spans.sort_unstable();

        for pair in spans.windows(2) {
          assert!(pair[0].1 <= pair[1].0, "step {step}: {:?}", pair);
        }
      }

      if step % 100 == 0 {
        assert_eq!(heap.check(), Ok(()));
      }
    }

    for (payload, _, _) in live.drain(..) {
      unsafe { heap.release(payload) };
    }

    let stats = heap.stats();
    assert_eq!(stats.blocks, 1);
    assert_eq!(stats.free_bytes + OVERHEAD, stats.region_bytes);
  }

  #[test]
  fn test_stats_and_walk() {
    let mut heap = heap();

    unsafe {
      let a = heap.allocate(8);
      let b = heap.allocate(16);
      let _c = heap.allocate(24);
      heap.release(b);

      let blocks: Vec<_> = heap.blocks().collect();
      assert_eq!(blocks.len(), 3);
      assert_eq!(blocks[0], BlockInfo {
        payload: a,
        size: 8,
        is_free: false,
      });
      assert!(blocks[1].is_free);

      assert_eq!(heap.stats(), HeapStats {
        blocks: 3,
        free_blocks: 1,
        free_bytes: 16,
        used_bytes: 32,
        region_bytes: 48 + 3 * OVERHEAD,
      });
    }
  }

  #[test]
  fn test_check_reports_flag_mismatch() {
    let mut heap = heap();

    unsafe {
      let a = heap.allocate(8);
      let _b = heap.allocate(8);

      (*Block::from_payload(a)).set_free(true);
      assert_eq!(heap.check(), Err(Corruption::FreeListMismatch));

      (*Block::from_payload(a)).set_free(false);
      assert_eq!(heap.check(), Ok(()));

      (*Block::footer(Block::from_payload(a))).size = 16;
      assert_eq!(heap.check(), Err(Corruption::BoundaryTag));
    }
  }

  #[test]
  fn test_check_reports_broken_back_links() {
    let mut heap = heap();

    unsafe {
      let a = heap.allocate(8);
      let _g1 = heap.allocate(8);
      let b = heap.allocate(8);
      let _g2 = heap.allocate(8);
      let c = heap.allocate(8);
      let _g3 = heap.allocate(8);

      heap.release(a);
      heap.release(b);
      heap.release(c);
      assert_eq!(heap.check(), Ok(()));

      // Free list is c -> b -> a.
      let (a, b, c) = (
        Block::from_payload(a),
        Block::from_payload(b),
        Block::from_payload(c),
      );

      // The head claims a predecessor.
      (*c).prev = a;
      assert_eq!(heap.check(), Err(Corruption::PrevLink));
      (*c).prev = ptr::null_mut();
      assert_eq!(heap.check(), Ok(()));

      // The tail points back at the head instead of its real predecessor.
      (*a).prev = c;
      assert_eq!(heap.check(), Err(Corruption::NextLink));
      (*a).prev = b;
      assert_eq!(heap.check(), Ok(()));
    }
  }
}
