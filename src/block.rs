//! In-band block layout.
//!
//! ```text
//!   Allocated block:
//!   ┌────────┬──────────────────────────────┬────────┐
//!   │ header │          payload             │ footer │
//!   │ size|1 │                              │ size|1 │
//!   └────────┴──────────────────────────────┴────────┘
//!            ▲
//!            └── bp (payload offset, what callers see)
//!
//!   Free block:
//!   ┌────────┬──────────┬──────────┬───────┬────────┐
//!   │ header │   prev   │   next   │  ...  │ footer │
//!   │ size|0 │ (offset) │ (offset) │       │ size|0 │
//!   └────────┴──────────┴──────────┴───────┴────────┘
//! ```
//!
//! Tags and links are 4-byte words. Every block is addressed by the offset
//! of its payload from the region base; links hold such offsets, with 0
//! meaning "none" (offset 0 is alignment padding and never a payload).

use std::ptr::NonNull;

/// Tag and link word size.
pub const WSIZE: usize = 4;
/// Double word; the alignment unit for sizes and payloads.
pub const DSIZE: usize = 8;
/// Header plus footer.
pub const OVERHEAD: usize = DSIZE;
/// Header, two links, footer.
pub const MIN_BLOCK: usize = 2 * DSIZE;
/// Largest size a boundary tag can hold.
pub const MAX_BLOCK: usize = (u32::MAX as usize) & !(DSIZE - 1);
/// Largest extent a heap may span. Offsets below it fit a link word, and
/// no block inside it can outgrow a tag.
pub const MAX_EXTENT: usize = MAX_BLOCK;

const ALLOC_BIT: u32 = 0x1;
const SIZE_MASK: u32 = !0x7;
const NIL: u32 = 0;

/// A decoded boundary tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag {
  pub size: usize,
  pub allocated: bool,
}

impl Tag {
  pub fn free(size: usize) -> Self {
    Self {
      size,
      allocated: false,
    }
  }

  pub fn allocated(size: usize) -> Self {
    Self {
      size,
      allocated: true,
    }
  }

  fn pack(self) -> u32 {
    debug_assert!(self.size % DSIZE == 0 && self.size <= MAX_BLOCK);
    self.size as u32 | if self.allocated { ALLOC_BIT } else { 0 }
  }

  fn unpack(word: u32) -> Self {
    Self {
      size: (word & SIZE_MASK) as usize,
      allocated: word & ALLOC_BIT != 0,
    }
  }
}

/// What a block holds, as selected by its header's allocation flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
  Free {
    size: usize,
    prev: Option<usize>,
    next: Option<usize>,
  },
  Allocated {
    size: usize,
  },
}

impl BlockKind {
  pub fn size(&self) -> usize {
    match *self {
      BlockKind::Free { size, .. } | BlockKind::Allocated { size } => size,
    }
  }

  pub fn is_free(&self) -> bool {
    matches!(self, BlockKind::Free { .. })
  }
}

/// Offset-addressed view over the managed bytes.
///
/// All reinterpretation of raw heap memory happens here. Every access is
/// bounds-checked against the current extent, so a corrupted size or link
/// panics instead of wandering outside the region.
pub(crate) struct Memory {
  base: NonNull<u8>,
  extent: usize,
}

impl Memory {
  pub fn new(
    base: NonNull<u8>,
    extent: usize,
  ) -> Self {
    Self { base, extent }
  }

  pub fn extent(&self) -> usize {
    self.extent
  }

  pub fn set_extent(
    &mut self,
    extent: usize,
  ) {
    self.extent = extent;
  }

  fn get(
    &self,
    at: usize,
  ) -> u32 {
    assert!(
      at % WSIZE == 0 && at + WSIZE <= self.extent,
      "heap word {at} outside 0..{}",
      self.extent
    );
    unsafe { self.base.as_ptr().add(at).cast::<u32>().read() }
  }

  fn put(
    &mut self,
    at: usize,
    word: u32,
  ) {
    assert!(
      at % WSIZE == 0 && at + WSIZE <= self.extent,
      "heap word {at} outside 0..{}",
      self.extent
    );
    unsafe { self.base.as_ptr().add(at).cast::<u32>().write(word) }
  }

  pub fn tag_at(
    &self,
    at: usize,
  ) -> Tag {
    Tag::unpack(self.get(at))
  }

  pub fn put_tag(
    &mut self,
    at: usize,
    tag: Tag,
  ) {
    self.put(at, tag.pack());
  }

  pub fn header(
    &self,
    bp: usize,
  ) -> Tag {
    self.tag_at(bp - WSIZE)
  }

  pub fn footer(
    &self,
    bp: usize,
  ) -> Tag {
    self.tag_at(bp + self.header(bp).size - DSIZE)
  }

  /// Writes both tags of the block at `bp`; the footer lands `tag.size`
  /// bytes past the header.
  pub fn set_tags(
    &mut self,
    bp: usize,
    tag: Tag,
  ) {
    self.put_tag(bp - WSIZE, tag);
    self.put_tag(bp + tag.size - DSIZE, tag);
  }

  pub fn size(
    &self,
    bp: usize,
  ) -> usize {
    self.header(bp).size
  }

  pub fn is_allocated(
    &self,
    bp: usize,
  ) -> bool {
    self.header(bp).allocated
  }

  pub fn next_block(
    &self,
    bp: usize,
  ) -> usize {
    bp + self.size(bp)
  }

  /// Reads the physical predecessor's footer, which always exists thanks to
  /// the prologue.
  pub fn prev_block(
    &self,
    bp: usize,
  ) -> usize {
    bp - self.tag_at(bp - DSIZE).size
  }

  pub fn prev_link(
    &self,
    bp: usize,
  ) -> Option<usize> {
    decode_link(self.get(bp))
  }

  pub fn next_link(
    &self,
    bp: usize,
  ) -> Option<usize> {
    decode_link(self.get(bp + WSIZE))
  }

  pub fn set_prev_link(
    &mut self,
    bp: usize,
    prev: Option<usize>,
  ) {
    self.put(bp, encode_link(prev));
  }

  pub fn set_next_link(
    &mut self,
    bp: usize,
    next: Option<usize>,
  ) {
    self.put(bp + WSIZE, encode_link(next));
  }

  pub fn kind(
    &self,
    bp: usize,
  ) -> BlockKind {
    let tag = self.header(bp);
    if tag.allocated {
      BlockKind::Allocated { size: tag.size }
    } else {
      BlockKind::Free {
        size: tag.size,
        prev: self.prev_link(bp),
        next: self.next_link(bp),
      }
    }
  }

  pub fn ptr(
    &self,
    bp: usize,
  ) -> NonNull<u8> {
    debug_assert!(bp < self.extent);
    unsafe { self.base.add(bp) }
  }

  /// Maps a payload pointer back to its offset. Pointers outside the
  /// region are a contract violation and panic.
  pub fn offset_of(
    &self,
    ptr: *const u8,
  ) -> usize {
    let base = self.base.as_ptr() as usize;
    let addr = ptr as usize;
    assert!(
      addr >= base + MIN_BLOCK && addr < base + self.extent && (addr - base) % DSIZE == 0,
      "pointer {ptr:?} was not handed out by this heap"
    );
    addr - base
  }
}

fn encode_link(link: Option<usize>) -> u32 {
  match link {
    Some(bp) => {
      debug_assert!(bp != 0 && bp <= u32::MAX as usize);
      bp as u32
    }
    None => NIL,
  }
}

fn decode_link(word: u32) -> Option<usize> {
  if word == NIL { None } else { Some(word as usize) }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn memory(words: &mut [u64]) -> Memory {
    let extent = words.len() * 8;
    Memory::new(NonNull::new(words.as_mut_ptr().cast()).unwrap(), extent)
  }

  #[test]
  fn tag_packs_size_and_flag() {
    let mut buf = [0u64; 8];
    let mut mem = memory(&mut buf);

    mem.put_tag(4, Tag::allocated(48));
    mem.put_tag(8, Tag::free(16));

    assert_eq!(mem.get(4), 48 | 1);
    assert_eq!(mem.tag_at(4), Tag::allocated(48));
    assert_eq!(mem.tag_at(8), Tag::free(16));
  }

  #[test]
  fn boundary_tags_locate_neighbours() {
    let mut buf = [0u64; 16];
    let mut mem = memory(&mut buf);

    // Two adjacent blocks starting at payload offsets 16 and 40.
    mem.set_tags(16, Tag::allocated(24));
    mem.set_tags(40, Tag::free(32));

    assert_eq!(mem.next_block(16), 40);
    assert_eq!(mem.prev_block(40), 16);
    assert_eq!(mem.footer(40), Tag::free(32));
    assert!(mem.is_allocated(16));
    assert!(!mem.is_allocated(40));
  }

  #[test]
  fn links_round_trip_through_payload() {
    let mut buf = [0u64; 16];
    let mut mem = memory(&mut buf);

    mem.set_tags(16, Tag::free(32));
    mem.set_prev_link(16, None);
    mem.set_next_link(16, Some(88));

    assert_eq!(
      mem.kind(16),
      BlockKind::Free {
        size: 32,
        prev: None,
        next: Some(88),
      }
    );

    mem.set_tags(16, Tag::allocated(32));
    assert_eq!(mem.kind(16), BlockKind::Allocated { size: 32 });
  }

  #[test]
  #[should_panic(expected = "outside")]
  fn access_past_extent_panics() {
    let mut buf = [0u64; 2];
    let mem = memory(&mut buf);
    mem.get(16);
  }
}
