//! Boundary-tag block layout.
//!
//! ```text
//!   ┌──────────────────────────┬──────────────────────┬────────────┐
//!   │ Block (header)           │ payload              │ Footer     │
//!   │ size | free    | next    │ size bytes           │ size       │
//!   │      |         | prev    │                      │            │
//!   └──────────────────────────┴──────────────────────┴────────────┘
//!                              ▲
//!                              └── pointer handed to the caller
//! ```
//!
//! Everything here is plain pointer arithmetic; bounds are checked by
//! [`Region`](crate::region::Region).

use std::{mem, ptr};

use crate::align::ALIGNMENT;

#[repr(C, align(8))]
pub struct Block {
  /// Payload bytes, always a multiple of [`ALIGNMENT`].
  pub size: usize,
  /// Zero while allocated, anything else means free.
  free: usize,
  /// Free-list links. Stale while the block is allocated.
  pub next: *mut Block,
  pub prev: *mut Block,
}

#[repr(C, align(8))]
pub struct Footer {
  pub size: usize,
}

pub const HEADER_SIZE: usize = mem::size_of::<Block>();
pub const FOOTER_SIZE: usize = mem::size_of::<Footer>();

/// Bytes of metadata around every payload.
pub const OVERHEAD: usize = HEADER_SIZE + FOOTER_SIZE;

/// Smallest leftover worth carving into its own free block.
pub const MIN_SPLIT: usize = OVERHEAD + ALIGNMENT;

const _: () = assert!(HEADER_SIZE % ALIGNMENT == 0);
const _: () = assert!(FOOTER_SIZE % ALIGNMENT == 0);

impl Block {
  /// Writes a fresh, unlinked record with a matching footer at `address`.
  ///
  /// # Safety
  ///
  /// `address` must be aligned and valid for `OVERHEAD + size` bytes.
  pub unsafe fn write(
    address: *mut u8,
    size: usize,
    is_free: bool,
  ) -> *mut Block {
    let block = address as *mut Block;

    unsafe {
      block.write(Block {
        size,
        free: is_free as usize,
        next: ptr::null_mut(),
        prev: ptr::null_mut(),
      });
      Block::set_footer(block);
    }

    block
  }

  /// # Safety
  ///
  /// `payload` must have been returned by the allocator for a live block.
  pub unsafe fn from_payload(payload: *mut u8) -> *mut Block {
    unsafe { payload.sub(HEADER_SIZE) as *mut Block }
  }

  /// # Safety
  ///
  /// `block` must point to a block header.
  pub unsafe fn payload(block: *mut Block) -> *mut u8 {
    unsafe { (block as *mut u8).add(HEADER_SIZE) }
  }

  /// # Safety
  ///
  /// `block` must point to a block header with a trustworthy `size`.
  pub unsafe fn footer(block: *mut Block) -> *mut Footer {
    unsafe { Block::payload(block).add((*block).size) as *mut Footer }
  }

  pub fn is_free(&self) -> bool {
    self.free != 0
  }

  pub fn set_free(
    &mut self,
    is_free: bool,
  ) {
    self.free = is_free as usize;
  }

  /// Copies the header size into the footer.
  ///
  /// # Safety
  ///
  /// Same as [`Block::footer`].
  pub unsafe fn set_footer(block: *mut Block) {
    unsafe {
      (*Block::footer(block)).size = (*block).size;
    }
  }

  /// Address right past the footer, where the physical successor starts.
  ///
  /// # Safety
  ///
  /// Same as [`Block::footer`].
  pub unsafe fn end(block: *mut Block) -> *mut u8 {
    unsafe { (Block::footer(block) as *mut u8).add(FOOTER_SIZE) }
  }

  /// Whether header and footer agree on the payload size.
  ///
  /// # Safety
  ///
  /// Same as [`Block::footer`].
  pub unsafe fn is_consistent(block: *mut Block) -> bool {
    unsafe { (*Block::footer(block)).size == (*block).size }
  }
}
