//! # segalloc - A Segregated-Fit Heap Allocator
//!
//! This crate provides a **segregated free-list allocator** with boundary-tag
//! coalescing, managing a single contiguous region that grows on demand,
//! either a private `mmap` arena or the process's program break (`sbrk`).
//!
//! ## Overview
//!
//! ```text
//!   Heap Layout:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                          MANAGED REGION                              │
//!   │                                                                      │
//!   │  ┌───┬──────┬─────────┬──────┬──────────────┬──────┬──────────┬───┐  │
//!   │  │ P │  A1  │  free   │  A2  │      A3      │  A4  │   free   │ E │  │
//!   │  └───┴──────┴─────────┴──────┴──────────────┴──────┴──────────┴───┘  │
//!   │    ▲             │                                      │        ▲   │
//!   │    │             └──────────────┐      ┌────────────────┘        │   │
//!   │  prologue                       ▼      ▼                    epilogue │
//!   │                        size classes 0 .. 14                          │
//!   │                  (address-ordered doubly linked lists)               │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   Free blocks are indexed by size class and merged with free neighbours
//!   the moment they are released.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   segalloc
//!   ├── align      - Alignment macros (align!, align_to!)
//!   ├── block      - Boundary tags, links and the free/allocated block view
//!   ├── region     - Raw memory providers (ArenaRegion, SbrkRegion)
//!   ├── freelist   - Size classes and first-fit search
//!   ├── heap       - Heap: allocate / release / resize
//!   ├── check      - Heap walk and consistency checker
//!   ├── config     - Tunables, optionally read from the environment
//!   ├── error      - Error types
//!   └── trace      - Allocation trace parser and replayer
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use segalloc::Heap;
//!
//! let mut heap = Heap::new()?;
//!
//! let ptr = heap.allocate(64)?;
//! unsafe {
//!   ptr.as_ptr().write_bytes(0xAB, 64);
//!
//!   let ptr = heap.resize(ptr.as_ptr(), 256)?.unwrap();
//!   assert_eq!(*ptr.as_ptr().add(63), 0xAB);
//!
//!   heap.release(ptr.as_ptr());
//! }
//!
//! heap.check()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## How It Works
//!
//! Every block carries a header and a footer word holding its size and an
//! allocated bit:
//!
//! ```text
//!   ┌────────┬─────────────────────────────────┬────────┐
//!   │ size|a │             payload             │ size|a │
//!   └────────┴─────────────────────────────────┴────────┘
//!            ▲
//!            └── Pointer returned to user (8-byte aligned)
//! ```
//!
//! - **allocate** rounds the request up, scans the size classes from the
//!   matching one upward for the first block that fits, and splits off the
//!   remainder when it is at least 16 bytes. On a miss the region grows by
//!   at least one chunk.
//! - **release** marks the block free, indexes it and merges it with free
//!   physical neighbours, found in O(1) through the boundary tags.
//! - **resize** keeps the block when it is already large enough and
//!   otherwise moves the payload into a fresh block.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: a [`Heap`] is plain mutable state with no
//!   synchronization.
//! - **Never shrinks**: memory is not handed back to the region.
//! - **No misuse detection**: releasing a pointer twice, or one this heap
//!   did not hand out, is undefined (foreign pointers outside the region
//!   panic).
//!
//! ## Safety
//!
//! `release`, `resize` and `usable_size` take raw pointers and are
//! `unsafe`; everything above the [`block`] accessors works on offsets into
//! the region.

pub mod align;
pub mod block;
pub mod check;
pub mod config;
pub mod error;
pub mod freelist;
pub mod heap;
pub mod region;
pub mod trace;

pub use block::BlockKind;
pub use check::HeapStats;
pub use config::HeapConfig;
pub use error::{AllocError, CheckError, ConfigError, InitError, ParseError, RegionError, ReplayError};
pub use heap::Heap;
pub use region::{ArenaRegion, Region, SbrkRegion};
