//! Heap walking and consistency checking.

use crate::{
  block::{BlockKind, DSIZE, MIN_BLOCK},
  error::CheckError,
  freelist::{NUM_CLASSES, class_of},
  heap::{Heap, SENTINEL_OVERHEAD},
  region::Region,
};

/// Totals gathered by [`Heap::check`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
  pub extent: usize,
  pub allocated_blocks: usize,
  pub allocated_bytes: usize,
  pub free_blocks: usize,
  pub free_bytes: usize,
  pub largest_free: usize,
}

impl HeapStats {
  pub fn blocks(&self) -> usize {
    self.allocated_blocks + self.free_blocks
  }
}

impl<R: Region> Heap<R> {
  /// Every block between the sentinels, in address order, as
  /// `(payload offset, kind)`.
  pub fn blocks(&self) -> impl Iterator<Item = (usize, BlockKind)> + '_ {
    let first = self.mem.next_block(self.prologue);
    std::iter::successors(Some(first), move |&bp| Some(self.mem.next_block(bp)))
      .take_while(move |&bp| self.mem.size(bp) != 0)
      .map(move |bp| (bp, self.mem.kind(bp)))
  }

  /// Verifies the heap's structural invariants:
  ///
  /// - sentinels are intact and every block lies inside the region,
  /// - sizes and payloads are double-word aligned,
  /// - headers agree with footers,
  /// - no two free blocks are adjacent,
  /// - the blocks exactly cover the region minus the sentinels,
  /// - every free block is linked, once, into the class its size maps to,
  ///   and each class is in address order.
  pub fn check(&self) -> Result<HeapStats, CheckError> {
    let mem = &self.mem;
    let extent = mem.extent();

    let prologue = mem.header(self.prologue);
    if !prologue.allocated || prologue.size != DSIZE || mem.footer(self.prologue) != prologue {
      return Err(CheckError::BadPrologue {
        offset: self.prologue,
      });
    }

    let mut stats = HeapStats {
      extent,
      ..HeapStats::default()
    };
    let mut spanned = 0;
    let mut prev_free: Option<usize> = None;
    let mut bp = mem.next_block(self.prologue);

    loop {
      if bp > extent {
        return Err(CheckError::OutOfBounds { offset: bp });
      }

      let tag = mem.header(bp);
      if tag.size == 0 {
        if !tag.allocated || bp != extent {
          return Err(CheckError::BadEpilogue { offset: bp });
        }
        break;
      }

      if bp % DSIZE != 0 || tag.size % DSIZE != 0 || tag.size < MIN_BLOCK {
        return Err(CheckError::Misaligned {
          offset: bp,
          size: tag.size,
        });
      }
      if bp + tag.size > extent {
        return Err(CheckError::OutOfBounds { offset: bp });
      }
      if mem.footer(bp) != tag {
        return Err(CheckError::TagMismatch { offset: bp });
      }

      if tag.allocated {
        stats.allocated_blocks += 1;
        stats.allocated_bytes += tag.size;
        prev_free = None;
      } else {
        if let Some(first) = prev_free {
          return Err(CheckError::AdjacentFree { first, second: bp });
        }
        stats.free_blocks += 1;
        stats.free_bytes += tag.size;
        stats.largest_free = stats.largest_free.max(tag.size);
        prev_free = Some(bp);
      }

      spanned += tag.size;
      bp += tag.size;
    }

    let expected = extent - (self.prologue - DSIZE) - SENTINEL_OVERHEAD;
    if spanned != expected {
      return Err(CheckError::Conservation { spanned, expected });
    }

    let indexed = self.check_classes(stats.free_blocks)?;
    if indexed != stats.free_blocks {
      return Err(CheckError::IndexMismatch {
        walked: stats.free_blocks,
        indexed,
      });
    }

    Ok(stats)
  }

  /// Walks every class list and returns how many blocks they hold in total.
  fn check_classes(
    &self,
    walked: usize,
  ) -> Result<usize, CheckError> {
    let mem = &self.mem;
    let mut indexed = 0;

    for class in 0..NUM_CLASSES {
      let mut prev: Option<usize> = None;
      let mut link = self.classes.head(class);

      while let Some(bp) = link {
        if bp < MIN_BLOCK || bp % DSIZE != 0 || bp + DSIZE > mem.extent() {
          return Err(CheckError::BrokenLinks { class, offset: bp });
        }

        indexed += 1;
        if indexed > walked {
          return Err(CheckError::IndexMismatch { walked, indexed });
        }

        match mem.kind(bp) {
          BlockKind::Allocated { .. } => {
            return Err(CheckError::AllocatedInList { offset: bp, class });
          }
          BlockKind::Free { size, prev: back, next } => {
            let expected = class_of(size);
            if expected != class {
              return Err(CheckError::WrongClass {
                offset: bp,
                found: class,
                expected,
              });
            }
            if prev.is_some_and(|prev| prev >= bp) {
              return Err(CheckError::Unordered { class, offset: bp });
            }
            if back != prev {
              return Err(CheckError::BrokenLinks { class, offset: bp });
            }
            prev = Some(bp);
            link = next;
          }
        }
      }

      if self.classes.tail(class) != prev {
        return Err(CheckError::BrokenLinks {
          class,
          offset: prev.unwrap_or(0),
        });
      }
    }

    Ok(indexed)
  }
}
