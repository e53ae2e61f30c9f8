use std::{io::Read, ptr};

use libc::sbrk;
use tagalloc::{BrkAllocator, OVERHEAD};

// Everything this program allocates, including what `println!` needs, goes
// through the same heap, so nothing else moves the program break.
#[global_allocator]
static GLOBAL: BrkAllocator = BrkAllocator::new();

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap`, `htop`,
/// `gdb`, or just visually track how allocations change the program break.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints the current program break using `sbrk(0)` and the heap summary.
unsafe fn print_heap(label: &str) {
  let stats = GLOBAL.stats();
  let brk = unsafe { sbrk(0) };

  println!(
    "[{}] PID = {}, program break = {:?}, blocks = {} ({} free), used = {} B, free = {} B",
    label,
    std::process::id(),
    brk,
    stats.blocks,
    stats.free_blocks,
    stats.used_bytes,
    stats.free_bytes,
  );
}

fn main() {
  unsafe {
    print_heap("start");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 1) Allocate 16 bytes, release them, and ask again: same block.
    // --------------------------------------------------------------------
    let first = GLOBAL.allocate(16);
    (first as *mut u64).write(0xDEADBEEF);
    GLOBAL.release(first);
    let again = GLOBAL.allocate(16);
    println!(
      "\n[1] allocate(16) = {:?}, after release allocate(16) = {:?} (reused: {})",
      first,
      again,
      first == again
    );
    print_heap("1");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 2) Split: free a 64-byte block and take 16 bytes out of it.
    // --------------------------------------------------------------------
    let big = GLOBAL.allocate(64);
    let _fence = GLOBAL.allocate(8);
    GLOBAL.release(big);
    let small = GLOBAL.allocate(16);
    println!(
      "\n[2] 64-byte block at {:?} split: 16 bytes at {:?}, {} bytes left over",
      big,
      small,
      64 - 16 - OVERHEAD
    );
    print_heap("2");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 3) Coalesce: release two neighbors, they become one free block.
    // --------------------------------------------------------------------
    let left = GLOBAL.allocate(32);
    let right = GLOBAL.allocate(32);
    let _fence = GLOBAL.allocate(8);
    GLOBAL.release(right);
    GLOBAL.release(left);
    println!(
      "\n[3] released {:?} and {:?}; one free block of {} bytes expected",
      left,
      right,
      32 + 32 + OVERHEAD
    );
    print_heap("3");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 4) Resize: an 8-byte block fenced by another one has to move.
    // --------------------------------------------------------------------
    let cell = GLOBAL.allocate(8);
    let _fence = GLOBAL.allocate(8);
    ptr::write_bytes(cell, 0xAB, 8);
    let moved = GLOBAL.resize(cell, 64);
    println!(
      "\n[4] resize({:?}, 64) = {:?}, first byte = 0x{:X}",
      cell,
      moved,
      moved.read()
    );
    print_heap("4");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 5) Zeroed array allocation.
    // --------------------------------------------------------------------
    let zeroed = GLOBAL.zero_allocate(16, 4) as *mut u32;
    let sum: u32 = (0..16).map(|i| zeroed.add(i).read()).sum();
    println!("\n[5] zero_allocate(16, 4) = {:?}, sum of elements = {}", zeroed, sum);
    print_heap("5");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 6) A large block grows the break; releasing it does not shrink it.
    // --------------------------------------------------------------------
    let large = GLOBAL.allocate(64 * 1024);
    print_heap("after large alloc");
    GLOBAL.release(large);
    print_heap("after large release");

    println!("\n[6] End of example. The region only grows; the OS reclaims it at exit.");
  }
}
