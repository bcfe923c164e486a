use std::{io::Read, ptr};

use segalloc::{Heap, HeapConfig, SbrkRegion};
use tracing_subscriber::EnvFilter;

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap`, `htop`,
/// `gdb`, or just watch how the program break moves as the heap grows.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints the current program break using `sbrk(0)`.
fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    SbrkRegion::program_break(),
  );
}

fn print_heap(heap: &Heap<SbrkRegion>) {
  for (offset, kind) in heap.blocks() {
    println!("    {offset:>6}: {kind:?}");
  }
  match heap.check() {
    Ok(stats) => println!(
      "    {} blocks, {} bytes free, extent {}",
      stats.blocks(),
      stats.free_bytes,
      stats.extent
    ),
    Err(err) => println!("    heap inconsistent: {err}"),
  }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_writer(std::io::stderr)
    .init();

  print_program_break("start");

  // The heap sits on top of the real program break. Its first extension
  // lays down the sentinels plus one chunk.
  let mut heap = Heap::init(SbrkRegion::new()?, HeapConfig::from_env()?)?;
  print_program_break("after init");
  print_heap(&heap);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 1) Allocate 100 bytes. The first chunk is split: 112 bytes are
  //    handed out and the rest goes back into a size class.
  // --------------------------------------------------------------------
  let first = heap.allocate(100)?;
  println!("\n[1] allocate(100) = {:?}", first);
  unsafe { ptr::write_bytes(first.as_ptr(), 0xAB, 100) };
  print_heap(&heap);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 2) Allocate 4000 bytes. Nothing free is large enough, so the heap
  //    grows and the program break moves.
  // --------------------------------------------------------------------
  print_program_break("before large alloc");
  let second = heap.allocate(4000)?;
  println!("\n[2] allocate(4000) = {:?}", second);
  print_program_break("after large alloc");
  print_heap(&heap);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 3) Release the first block. It merges with the free remainder next
  //    to it.
  // --------------------------------------------------------------------
  unsafe { heap.release(first.as_ptr()) };
  println!("\n[3] release({:?})", first);
  print_heap(&heap);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 4) Allocate 90 bytes and check whether the freed block is reused.
  // --------------------------------------------------------------------
  let third = heap.allocate(90)?;
  println!("\n[4] allocate(90) = {:?}", third);
  println!(
    "[4] third == first? {}",
    if third == first {
      "Yes, it reused the freed block"
    } else {
      "No, it allocated somewhere else"
    }
  );
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 5) Grow the 90-byte block in place and then past its capacity.
  // --------------------------------------------------------------------
  let same = unsafe { heap.resize(third.as_ptr(), 100)? };
  println!("\n[5] resize(third, 100) = {:?} (in place)", same);
  let moved = unsafe { heap.resize(third.as_ptr(), 1000)? };
  println!("[5] resize(third, 1000) = {:?}", moved);
  print_heap(&heap);

  // --------------------------------------------------------------------
  // 6) End of demo. The heap never shrinks the break; the OS reclaims
  //    everything when the process exits.
  // --------------------------------------------------------------------
  println!("\n[6] End of example. Process will exit and the OS will reclaim all memory.");
  Ok(())
}
