//! Segregated free lists.
//!
//! ```text
//!   class  sizes             head                          tail
//!   ─────  ───────────────   ─────┐                      ┌─────
//!     0    [16, 32)               ▼                      ▼
//!     1    [32, 64)          ┌──────┐ ⇄ ┌──────┐ ⇄ ┌──────┐
//!     2    [64, 128)         │ 0x40 │   │ 0x1a8│   │ 0x730│   (address order)
//!    ...                     └──────┘   └──────┘   └──────┘
//!    14    [262144, ∞)
//! ```
//!
//! Links live inside the free blocks themselves (see [`crate::block`]); the
//! table only stores each class's head and tail offsets.

use crate::block::{MIN_BLOCK, Memory};

/// Number of size classes.
pub const NUM_CLASSES: usize = 15;

/// Maps a block size to its class: class `i` holds sizes in
/// `[16 << i, 32 << i)`, and the last class takes everything from 256 KiB.
///
/// The table starts at the minimum block size. A table starting at zero
/// would leave class 0 (`[0, 16)`) permanently empty and move the catch-all
/// down to 128 KiB; blocks between 128 and 256 KiB get their own class here
/// instead.
pub fn class_of(size: usize) -> usize {
  let mut bound = MIN_BLOCK << 1;

  for index in 0..NUM_CLASSES - 1 {
    if size < bound {
      return index;
    }
    bound <<= 1;
  }

  NUM_CLASSES - 1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct List {
  head: Option<usize>,
  tail: Option<usize>,
}

/// Heads and tails of every class's address-ordered, doubly linked list.
pub(crate) struct SizeClasses {
  lists: [List; NUM_CLASSES],
}

impl SizeClasses {
  pub fn new() -> Self {
    Self {
      lists: [List {
        head: None,
        tail: None,
      }; NUM_CLASSES],
    }
  }

  pub fn head(
    &self,
    class: usize,
  ) -> Option<usize> {
    self.lists[class].head
  }

  pub fn tail(
    &self,
    class: usize,
  ) -> Option<usize> {
    self.lists[class].tail
  }

  /// Links the free block at `bp` into its class, keeping address order.
  pub fn insert(
    &mut self,
    mem: &mut Memory,
    bp: usize,
  ) {
    let list = &mut self.lists[class_of(mem.size(bp))];

    let (Some(head), Some(tail)) = (list.head, list.tail) else {
      mem.set_prev_link(bp, None);
      mem.set_next_link(bp, None);
      list.head = Some(bp);
      list.tail = Some(bp);
      return;
    };

    if bp < head {
      mem.set_prev_link(bp, None);
      mem.set_next_link(bp, Some(head));
      mem.set_prev_link(head, Some(bp));
      list.head = Some(bp);
    } else if bp > tail {
      mem.set_next_link(tail, Some(bp));
      mem.set_prev_link(bp, Some(tail));
      mem.set_next_link(bp, None);
      list.tail = Some(bp);
    } else {
      // head < bp < tail, so a successor above bp always exists.
      let mut curr = head;
      while let Some(next) = mem.next_link(curr).filter(|&next| next < bp) {
        curr = next;
      }
      let next = mem.next_link(curr);

      if let Some(next) = next {
        mem.set_prev_link(next, Some(bp));
      }
      mem.set_next_link(curr, Some(bp));
      mem.set_next_link(bp, next);
      mem.set_prev_link(bp, Some(curr));
    }
  }

  /// Unlinks the free block at `bp` from its class. The block's header must
  /// still carry the size it was inserted with.
  pub fn remove(
    &mut self,
    mem: &mut Memory,
    bp: usize,
  ) {
    let list = &mut self.lists[class_of(mem.size(bp))];
    let prev = mem.prev_link(bp);
    let next = mem.next_link(bp);

    match prev {
      Some(prev) => mem.set_next_link(prev, next),
      None => list.head = next,
    }
    match next {
      Some(next) => mem.set_prev_link(next, prev),
      None => list.tail = prev,
    }
  }

  /// First fit: the lowest-addressed block of at least `size` bytes in the
  /// first class, from `size`'s own upward, that has one.
  pub fn find_fit(
    &self,
    mem: &Memory,
    size: usize,
  ) -> Option<usize> {
    (class_of(size)..NUM_CLASSES).find_map(|class| {
      self
        .iter(mem, class)
        .find(|&bp| mem.size(bp) >= size)
    })
  }

  /// Walks one class from head to tail.
  pub fn iter<'a>(
    &self,
    mem: &'a Memory,
    class: usize,
  ) -> impl Iterator<Item = usize> + 'a {
    std::iter::successors(self.lists[class].head, move |&bp| mem.next_link(bp))
  }
}

#[cfg(test)]
mod tests {
  use std::ptr::NonNull;

  use super::*;
  use crate::block::Tag;

  struct Fixture {
    _buf: Vec<u64>,
    mem: Memory,
    classes: SizeClasses,
  }

  impl Fixture {
    fn new() -> Self {
      let mut buf = vec![0u64; 512];
      let mem = Memory::new(NonNull::new(buf.as_mut_ptr().cast()).unwrap(), buf.len() * 8);
      Self {
        _buf: buf,
        mem,
        classes: SizeClasses::new(),
      }
    }

    fn free_block(
      &mut self,
      bp: usize,
      size: usize,
    ) {
      self.mem.set_tags(bp, Tag::free(size));
      self.classes.insert(&mut self.mem, bp);
    }

    fn class(
      &self,
      class: usize,
    ) -> Vec<usize> {
      self.classes.iter(&self.mem, class).collect()
    }
  }

  #[test]
  fn classes_double_from_the_minimum_block() {
    assert_eq!(class_of(16), 0);
    assert_eq!(class_of(24), 0);
    assert_eq!(class_of(32), 1);
    assert_eq!(class_of(63), 1);
    assert_eq!(class_of(64), 2);
    assert_eq!(class_of(112), 2);
    assert_eq!(class_of(256), 4);
    assert_eq!(class_of(4008), 7);
    assert_eq!(class_of(32 << 13), NUM_CLASSES - 1);
    assert_eq!(class_of(usize::MAX), NUM_CLASSES - 1);
  }

  #[test]
  fn insert_keeps_address_order() {
    let mut fx = Fixture::new();

    // All 32-byte blocks land in class 1; insert out of order to hit the
    // empty, new-tail, new-head and middle cases.
    fx.free_block(400, 32);
    fx.free_block(800, 32);
    fx.free_block(96, 32);
    fx.free_block(600, 32);
    fx.free_block(200, 32);

    assert_eq!(fx.class(1), vec![96, 200, 400, 600, 800]);
    assert_eq!(fx.classes.head(1), Some(96));
    assert_eq!(fx.classes.tail(1), Some(800));
    assert_eq!(fx.mem.prev_link(600), Some(400));
    assert_eq!(fx.mem.prev_link(96), None);
    assert_eq!(fx.mem.next_link(800), None);
  }

  #[test]
  fn remove_fixes_neighbours_and_ends() {
    let mut fx = Fixture::new();
    for bp in [96, 200, 400, 600] {
      fx.free_block(bp, 32);
    }

    fx.classes.remove(&mut fx.mem, 200);
    assert_eq!(fx.class(1), vec![96, 400, 600]);
    assert_eq!(fx.mem.prev_link(400), Some(96));

    fx.classes.remove(&mut fx.mem, 96);
    assert_eq!(fx.classes.head(1), Some(400));
    assert_eq!(fx.mem.prev_link(400), None);

    fx.classes.remove(&mut fx.mem, 600);
    assert_eq!(fx.classes.tail(1), Some(400));

    fx.classes.remove(&mut fx.mem, 400);
    assert_eq!(fx.classes.head(1), None);
    assert_eq!(fx.classes.tail(1), None);
  }

  #[test]
  fn find_fit_scans_upward_first_fit() {
    let mut fx = Fixture::new();
    fx.free_block(1000, 40); // class 1
    fx.free_block(100, 56); // class 1, lower address
    fx.free_block(2000, 256); // class 4

    // Lowest address with enough room wins within a class.
    assert_eq!(fx.classes.find_fit(&fx.mem, 40), Some(100));
    assert_eq!(fx.classes.find_fit(&fx.mem, 56), Some(100));
    // Nothing in class 1 is big enough, so move up.
    assert_eq!(fx.classes.find_fit(&fx.mem, 64), Some(2000));
    assert_eq!(fx.classes.find_fit(&fx.mem, 264), None);
  }
}
