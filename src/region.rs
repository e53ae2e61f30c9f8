//! The single linear region every block lives in.
//!
//! `[start, top)` is tiled by blocks with no gaps, so the physical neighbors
//! of a block are found by pointer arithmetic alone. Those lookups are the
//! only place raw addresses are trusted, and they validate what they find.

use std::ptr;

use log::debug;

use crate::{
  align,
  block::{Block, FOOTER_SIZE, Footer, OVERHEAD},
  brk::{self, Break, BreakError},
  corruption::{self, Corruption},
};

pub struct Region<B: Break> {
  brk: B,
  start: *mut u8,
  top: *mut u8,
}

impl<B: Break> Region<B> {
  pub const fn new(brk: B) -> Self {
    Self {
      brk,
      start: ptr::null_mut(),
      top: ptr::null_mut(),
    }
  }

  pub fn brk(&self) -> &B {
    &self.brk
  }

  pub fn is_initialized(&self) -> bool {
    !self.start.is_null()
  }

  /// Bytes currently tiled by blocks.
  pub fn len(&self) -> usize {
    self.top as usize - self.start as usize
  }

  /// Records where the region begins. Does nothing once it has succeeded.
  ///
  /// If the initial end is not aligned, the region first grows by the
  /// padding so the first header (and so every payload) is aligned.
  pub fn init(&mut self) -> Result<(), BreakError> {
    if self.is_initialized() {
      return Ok(());
    }

    let top = self.brk.top();

    if brk::is_failure(top) {
      return Err(BreakError::Exhausted);
    }

    let padding = align!(top as usize) - top as usize;

    if padding > 0 {
      unsafe { self.brk.extend(padding)? };
    }

    self.start = top.wrapping_add(padding);
    self.top = self.brk.top();

    debug!("heap region starts at {:?}", self.start);

    Ok(())
  }

  /// Grows the region by `increment` bytes, returning the previous end.
  ///
  /// # Safety
  ///
  /// The region must be initialized, and the caller must turn the new bytes
  /// into a block before anything walks the region.
  pub unsafe fn extend(
    &mut self,
    increment: usize,
  ) -> Result<*mut u8, BreakError> {
    let previous = unsafe { self.brk.extend(increment)? };
    self.top = self.brk.top();

    debug!("heap extended by {} bytes, top = {:?}", increment, self.top);

    Ok(previous)
  }

  /// The block at `start`, if any.
  pub fn first(&self) -> Result<Option<*mut Block>, Corruption> {
    if !self.is_initialized() {
      return Ok(None);
    }

    unsafe { self.block_at(self.start) }
  }

  /// The block physically following `block`, or `None` at the top.
  ///
  /// # Safety
  ///
  /// `block` must be a block of this region with a trustworthy header.
  pub unsafe fn try_next_of(
    &self,
    block: *mut Block,
  ) -> Result<Option<*mut Block>, Corruption> {
    let offset = OVERHEAD
      .checked_add(unsafe { (*block).size })
      .ok_or(Corruption::Gap)?;

    if offset > self.top as usize - block as usize {
      return Err(Corruption::Gap);
    }

    unsafe { self.block_at((block as *mut u8).add(offset)) }
  }

  /// The block physically preceding `block`, or `None` for the first block.
  ///
  /// # Safety
  ///
  /// `block` must be a block of this region.
  pub unsafe fn try_prev_of(
    &self,
    block: *mut Block,
  ) -> Result<Option<*mut Block>, Corruption> {
    let address = block as *mut u8;

    if address == self.start {
      return Ok(None);
    }

    let room = address as usize - self.start as usize;

    if room < OVERHEAD {
      return Err(Corruption::Gap);
    }

    let size = unsafe { (*(address.sub(FOOTER_SIZE) as *mut Footer)).size };
    let offset = OVERHEAD.checked_add(size).ok_or(Corruption::BoundaryTag)?;

    if offset > room {
      return Err(Corruption::BoundaryTag);
    }

    let prev = unsafe { address.sub(offset) as *mut Block };

    if unsafe { (*prev).size } != size {
      return Err(Corruption::BoundaryTag);
    }

    Ok(Some(prev))
  }

  /// [`Region::try_next_of`], aborting on corruption.
  ///
  /// # Safety
  ///
  /// See [`Region::try_next_of`].
  pub unsafe fn next_of(
    &self,
    block: *mut Block,
  ) -> Option<*mut Block> {
    match unsafe { self.try_next_of(block) } {
      Ok(next) => next,
      Err(corruption) => corruption::abort(corruption),
    }
  }

  /// [`Region::try_prev_of`], aborting on corruption.
  ///
  /// # Safety
  ///
  /// See [`Region::try_prev_of`].
  pub unsafe fn prev_of(
    &self,
    block: *mut Block,
  ) -> Option<*mut Block> {
    match unsafe { self.try_prev_of(block) } {
      Ok(prev) => prev,
      Err(corruption) => corruption::abort(corruption),
    }
  }

  /// Reads the block starting at `address`, checking it fits below `top`
  /// and that its header and footer agree.
  unsafe fn block_at(
    &self,
    address: *mut u8,
  ) -> Result<Option<*mut Block>, Corruption> {
    if address == self.top {
      return Ok(None);
    }

    let room = self.top as usize - address as usize;

    if room < OVERHEAD {
      return Err(Corruption::Gap);
    }

    let block = address as *mut Block;
    let size = unsafe { (*block).size };

    if size > room - OVERHEAD {
      return Err(Corruption::Gap);
    }

    if !unsafe { Block::is_consistent(block) } {
      return Err(Corruption::BoundaryTag);
    }

    Ok(Some(block))
  }
}
