//! # tagalloc - A Boundary-Tag Free-List Allocator
//!
//! This crate provides a drop-in replacement for `malloc`, `calloc`,
//! `realloc` and `free` backed by one growable memory region, extended with
//! the `sbrk` system call.
//!
//! ## Overview
//!
//! Every block carries its size twice, in a header before the payload and a
//! footer after it. Free blocks are linked into an unordered doubly-linked
//! list that lives inside their own headers:
//!
//! ```text
//!   HEAP MEMORY (start .. top)
//!
//!   ┌────┬──────────┬──┬────┬──────┬──┬────┬───────────────┬──┐
//!   │ H  │  used    │F │ H  │ free │F │ H  │     free      │F │
//!   └────┴──────────┴──┴────┴──────┴──┴────┴───────────────┴──┘
//!                        ▲  │                ▲  │
//!                        │  └── next ────────┼──┘
//!   free list head ──────┼───────────────────┘
//!                        └────── prev ───────┘
//!
//!   H = header (size, free, next, prev)   F = footer (size)
//! ```
//!
//! - **Allocation** walks the free list and takes the first block that is
//!   large enough (first fit). Oversized blocks are split and the remainder
//!   goes back on the list. With no fit, the region grows by exactly one
//!   block.
//! - **Release** puts the block at the head of the list and merges it with a
//!   free successor, then with a free predecessor. The footer of the block
//!   in front is what makes the backward step possible.
//! - **Resize** grows in place into a free successor when it can, and
//!   otherwise moves the data.
//!
//! ## Crate Structure
//!
//! ```text
//!   tagalloc
//!   ├── align       - ALIGNMENT, align! and aligned_size
//!   ├── brk         - Break trait, Sbrk (program break), Arena (fixed buffer)
//!   ├── region      - Region bounds and validated neighbor lookups (internal)
//!   ├── block       - Header/footer layout (internal)
//!   ├── free_list   - Intrusive free list (internal)
//!   ├── coalesce    - Merging with neighbors (internal)
//!   ├── split       - Carving oversized blocks (internal)
//!   ├── heap        - Heap: allocate, zero_allocate, release, resize
//!   ├── corruption  - Corruption kinds and the abort path
//!   └── global      - BrkAllocator (GlobalAlloc, optional C ABI)
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use tagalloc::{Arena, Heap};
//!
//! let mut heap = Heap::new(Arena::with_capacity(4096));
//!
//! unsafe {
//!     let ptr = heap.allocate(16) as *mut u64;
//!     *ptr = 42;
//!     assert_eq!(*ptr, 42);
//!
//!     heap.release(ptr as *mut u8);
//!
//!     // The freed block is handed out again.
//!     assert_eq!(heap.allocate(16), ptr as *mut u8);
//! }
//! ```
//!
//! To replace the allocator of a whole Rust program, install
//! [`BrkAllocator`] as `#[global_allocator]`. Building with the `c-abi`
//! feature also exports `malloc`, `calloc`, `realloc` and `free` from the
//! shared library, so it can be preloaded into C programs.
//!
//! ## Corruption
//!
//! Before unlinking a free block the allocator checks that its neighbors
//! link back to it, and before trusting a physical neighbor it checks the
//! neighbor's header against its footer. A failed check prints a message to
//! standard error and aborts the process.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: No synchronization primitives
//! - **Grow only**: Memory is never returned to the OS
//! - **8-byte alignment**: Larger alignments are refused
//! - **Exclusive break**: Nothing else may move the program break under a
//!   [`BrkAllocator`]
//!
//! ## Logging
//!
//! Heap growth is logged at `debug` level and block operations at `trace`
//! level through the `log` facade. A logger that allocates must not be used
//! while [`BrkAllocator`] is the global allocator.
//!
//! ## Safety
//!
//! This crate is inherently unsafe as it deals with raw memory management.
//! All allocation and release operations require `unsafe` blocks.

pub mod align;
mod block;
pub mod brk;
mod coalesce;
pub mod corruption;
mod free_list;
pub mod global;
mod heap;
mod region;
mod split;

pub use block::{FOOTER_SIZE, HEADER_SIZE, OVERHEAD};
pub use brk::{Arena, Break, BreakError, Sbrk};
pub use corruption::Corruption;
pub use global::BrkAllocator;
pub use heap::{BlockInfo, Heap, HeapStats};
