use std::{cmp, ptr, ptr::NonNull};

use tracing::{debug, trace, warn};

use crate::{
  align,
  block::{DSIZE, MAX_BLOCK, MAX_EXTENT, MIN_BLOCK, Memory, OVERHEAD, Tag, WSIZE},
  config::HeapConfig,
  error::{AllocError, InitError, RegionError},
  freelist::SizeClasses,
  region::{ArenaRegion, Region},
};

/// Bytes taken by the padding word, the prologue and the epilogue header.
pub const SENTINEL_OVERHEAD: usize = 4 * WSIZE;

/// A segregated-fit heap over a growable [`Region`].
///
/// ```text
///   0      4          8          12         16
///   ┌──────┬──────────┬──────────┬──────────┬─────────────── ─ ─ ┬──────────┐
///   │ pad  │ prologue │ prologue │  header  │ first block...      │ epilogue │
///   │      │  8 | 1   │  8 | 1   │          │                     │  0 | 1   │
///   └──────┴──────────┴──────────┴──────────┴─────────────── ─ ─ ┴──────────┘
/// ```
///
/// The prologue and epilogue are permanently allocated, so neighbour lookups
/// never leave the region and coalescing stops at its edges.
///
/// A `Heap` is single-threaded state: every operation runs to completion
/// and nothing here is synchronized. Pointers handed out stay valid until
/// they are released or the heap (and with it the region) is dropped.
pub struct Heap<R: Region = ArenaRegion> {
  region: R,
  pub(crate) mem: Memory,
  pub(crate) classes: SizeClasses,
  pub(crate) prologue: usize,
  chunk_size: usize,
}

impl Heap<ArenaRegion> {
  /// Builds a heap over a fresh 20 MiB arena with default settings.
  pub fn new() -> Result<Self, AllocError> {
    Self::with_config(HeapConfig::default())
  }

  /// Builds a heap over a fresh arena sized by `config`.
  pub fn with_config(config: HeapConfig) -> Result<Self, AllocError> {
    let region = ArenaRegion::new(config.arena_capacity).map_err(|source| AllocError::Capacity {
      requested: config.arena_capacity,
      source,
    })?;
    Self::init(region, config)
  }

  /// Like [`with_config`](Heap::with_config), with settings read from the
  /// environment.
  pub fn from_env() -> Result<Self, InitError> {
    let config = HeapConfig::from_env()?;
    Ok(Self::with_config(config)?)
  }
}

impl<R: Region> Heap<R> {
  /// Lays down the sentinels in an empty `region` and performs the first
  /// extension.
  pub fn init(
    mut region: R,
    config: HeapConfig,
  ) -> Result<Self, AllocError> {
    let chunk_size = align!(config.chunk_size.clamp(MIN_BLOCK, MAX_EXTENT));
    let address = region.base().as_ptr() as usize;
    if address % DSIZE != 0 {
      return Err(AllocError::Misaligned { address });
    }

    let start = grow(&mut region, SENTINEL_OVERHEAD)?;
    if start % DSIZE != 0 {
      return Err(AllocError::Misaligned {
        address: address + start,
      });
    }

    let mut mem = Memory::new(region.base(), region.len());
    mem.put_tag(start, Tag::allocated(0));
    mem.put_tag(start + WSIZE, Tag::allocated(DSIZE));
    mem.put_tag(start + 2 * WSIZE, Tag::allocated(DSIZE));
    mem.put_tag(start + 3 * WSIZE, Tag::allocated(0));

    let mut heap = Self {
      region,
      mem,
      classes: SizeClasses::new(),
      prologue: start + DSIZE,
      chunk_size,
    };

    debug!(base = address, chunk_size, "heap initialized");

    heap.extend(heap.chunk_size)?;
    Ok(heap)
  }

  pub fn region(&self) -> &R {
    &self.region
  }

  /// Bytes of region the heap currently spans.
  pub fn extent(&self) -> usize {
    self.mem.extent()
  }

  pub fn chunk_size(&self) -> usize {
    self.chunk_size
  }

  /// Returns a pointer to at least `size` writable bytes, 8-byte aligned.
  ///
  /// A zero-byte request still yields a distinct minimum block. Fails only
  /// when the region cannot grow.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    let asize = adjusted_size(size)?;

    let bp = match self.classes.find_fit(&self.mem, asize) {
      Some(bp) => bp,
      None => self.extend(cmp::max(asize, self.chunk_size))?,
    };

    self.place(bp, asize);
    Ok(self.mem.ptr(bp))
  }

  /// Allocates `count * size` zero-filled bytes.
  pub fn zeroed_allocate(
    &mut self,
    count: usize,
    size: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    let bytes = count
      .checked_mul(size)
      .ok_or(AllocError::Overflow { count, size })?;

    let ptr = self.allocate(bytes)?;
    unsafe { ptr::write_bytes(ptr.as_ptr(), 0, bytes) };
    Ok(ptr)
  }

  /// Gives a block back to the heap. Null is ignored.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or a pointer returned by this heap that has not been
  /// released since. The payload must not be used afterwards.
  pub unsafe fn release(
    &mut self,
    ptr: *mut u8,
  ) {
    if ptr.is_null() {
      return;
    }

    let bp = self.mem.offset_of(ptr);
    let tag = self.mem.header(bp);
    debug_assert!(tag.allocated, "double release of block at offset {bp}");

    self.mem.set_tags(bp, Tag::free(tag.size));
    self.classes.insert(&mut self.mem, bp);
    self.coalesce(bp);
  }

  /// Resizes the block at `ptr` to hold `size` bytes.
  ///
  /// * `size == 0` releases the block and returns `None`.
  /// * a null `ptr` behaves like [`allocate`](Heap::allocate).
  /// * if the block already holds `size` bytes it is returned unchanged; it
  ///   is never shrunk or split.
  /// * otherwise a new block is allocated, the old payload copied over and
  ///   the old block released. On failure the old block is left untouched.
  ///
  /// # Safety
  ///
  /// Same contract as [`release`](Heap::release).
  pub unsafe fn resize(
    &mut self,
    ptr: *mut u8,
    size: usize,
  ) -> Result<Option<NonNull<u8>>, AllocError> {
    if size == 0 {
      unsafe { self.release(ptr) };
      return Ok(None);
    }

    let Some(old) = NonNull::new(ptr) else {
      return self.allocate(size).map(Some);
    };

    let bp = self.mem.offset_of(ptr);
    let old_size = self.mem.size(bp);
    let asize = size
      .checked_add(OVERHEAD)
      .filter(|&bytes| bytes <= MAX_BLOCK)
      .map(|bytes| align!(bytes))
      .ok_or(AllocError::TooLarge { size })?;

    if old_size >= asize {
      self.mem.set_tags(bp, Tag::allocated(old_size));
      return Ok(Some(old));
    }

    let new = self.allocate(size)?;
    let copied = cmp::min(old_size - OVERHEAD, size);
    unsafe {
      ptr::copy_nonoverlapping(old.as_ptr(), new.as_ptr(), copied);
      self.release(ptr);
    }

    Ok(Some(new))
  }

  /// Bytes the caller may use in the block at `ptr`.
  ///
  /// # Safety
  ///
  /// `ptr` must be a live pointer returned by this heap.
  pub unsafe fn usable_size(
    &self,
    ptr: *const u8,
  ) -> usize {
    self.mem.size(self.mem.offset_of(ptr)) - OVERHEAD
  }

  /// Grows the region by `bytes` (rounded to the double-word unit) and
  /// indexes the new space as one free block whose header replaces the old
  /// epilogue.
  ///
  /// The heap never spans more than [`MAX_EXTENT`] bytes, whatever the
  /// region could still provide.
  fn extend(
    &mut self,
    bytes: usize,
  ) -> Result<usize, AllocError> {
    let bytes = align!(bytes);
    let old_extent = self.mem.extent();

    let available = MAX_EXTENT - old_extent;
    if bytes > available {
      warn!(requested = bytes, available, "heap reached its largest extent");
      return Err(AllocError::Capacity {
        requested: bytes,
        source: RegionError::Exhausted {
          requested: bytes,
          available,
        },
      });
    }

    let bp = grow(&mut self.region, bytes)?;
    debug_assert_eq!(bp, old_extent, "region grew non-contiguously");
    self.mem.set_extent(self.region.len());

    self.mem.set_tags(bp, Tag::free(bytes));
    self.mem.put_tag(bp + bytes - WSIZE, Tag::allocated(0));
    self.classes.insert(&mut self.mem, bp);

    debug!(bytes, old_extent, new_extent = self.mem.extent(), "heap extended");
    Ok(bp)
  }

  /// Turns the free block at `bp` into an allocated block of `asize` bytes,
  /// splitting off the remainder when it can stand as a block of its own.
  fn place(
    &mut self,
    bp: usize,
    asize: usize,
  ) {
    let csize = self.mem.size(bp);
    self.classes.remove(&mut self.mem, bp);

    if csize - asize >= MIN_BLOCK {
      self.mem.set_tags(bp, Tag::allocated(asize));
      let rest = self.mem.next_block(bp);
      self.mem.set_tags(rest, Tag::free(csize - asize));
      self.classes.insert(&mut self.mem, rest);
      trace!(bp, asize, remainder = csize - asize, "split");
    } else {
      self.mem.set_tags(bp, Tag::allocated(csize));
    }
  }

  /// Merges the just-freed, already indexed block at `bp` with whichever
  /// physical neighbours are free. Returns the merged block.
  fn coalesce(
    &mut self,
    bp: usize,
  ) -> usize {
    let prev = self.mem.prev_block(bp);
    let next = self.mem.next_block(bp);
    let start = if self.mem.is_allocated(prev) { bp } else { prev };
    let end = if self.mem.is_allocated(next) {
      next
    } else {
      self.mem.next_block(next)
    };

    if start == bp && end == next {
      return bp;
    }

    let mut part = start;
    while part < end {
      let after = self.mem.next_block(part);
      self.classes.remove(&mut self.mem, part);
      part = after;
    }

    self.mem.set_tags(start, Tag::free(end - start));
    self.classes.insert(&mut self.mem, start);
    trace!(start, size = end - start, "coalesced");
    start
  }
}

/// Block size for a request of `size` payload bytes: overhead added, rounded
/// to the double-word unit, never below the minimum block.
fn adjusted_size(size: usize) -> Result<usize, AllocError> {
  if size <= DSIZE {
    return Ok(MIN_BLOCK);
  }

  size
    .checked_add(OVERHEAD + DSIZE - 1)
    .map(|bytes| bytes & !(DSIZE - 1))
    .filter(|&bytes| bytes <= MAX_BLOCK)
    .ok_or(AllocError::TooLarge { size })
}

fn grow<R: Region>(
  region: &mut R,
  bytes: usize,
) -> Result<usize, AllocError> {
  region.extend(bytes).map_err(|source: RegionError| {
    warn!(requested = bytes, %source, "region refused to grow");
    AllocError::Capacity {
      requested: bytes,
      source,
    }
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{block::BlockKind, freelist::class_of};

  fn heap() -> Heap {
    Heap::with_config(HeapConfig {
      chunk_size: 256,
      arena_capacity: 1 << 20,
    })
    .unwrap()
  }

  #[test]
  fn adjusted_sizes() {
    assert_eq!(adjusted_size(0), Ok(16));
    assert_eq!(adjusted_size(8), Ok(16));
    assert_eq!(adjusted_size(9), Ok(24));
    assert_eq!(adjusted_size(100), Ok(112));
    assert_eq!(adjusted_size(4000), Ok(4008));
    assert_eq!(adjusted_size(usize::MAX), Err(AllocError::TooLarge { size: usize::MAX }));
  }

  #[test]
  fn init_lays_down_sentinels_and_one_free_chunk() {
    let heap = heap();

    assert_eq!(heap.extent(), SENTINEL_OVERHEAD + 256);
    assert_eq!(heap.mem.header(heap.prologue), Tag::allocated(DSIZE));
    assert_eq!(heap.mem.footer(heap.prologue), Tag::allocated(DSIZE));

    let first = heap.mem.next_block(heap.prologue);
    assert_eq!(first, 16);
    assert_eq!(
      heap.mem.kind(first),
      BlockKind::Free {
        size: 256,
        prev: None,
        next: None,
      }
    );
    assert_eq!(heap.classes.head(class_of(256)), Some(first));
    assert_eq!(heap.mem.header(heap.extent()), Tag::allocated(0));
  }

  #[test]
  fn place_splits_large_remainders() {
    let mut heap = heap();

    let p = heap.allocate(100).unwrap();
    let bp = heap.mem.offset_of(p.as_ptr());

    assert_eq!(heap.mem.kind(bp), BlockKind::Allocated { size: 112 });
    let rest = heap.mem.next_block(bp);
    assert_eq!(heap.mem.size(rest), 144);
    assert!(!heap.mem.is_allocated(rest));
    assert_eq!(heap.classes.head(class_of(144)), Some(rest));
  }

  #[test]
  fn place_keeps_small_remainders_inside_the_block() {
    let mut heap = heap();

    // 256 - 248 = 8 bytes left over: too small to stand alone.
    let p = heap.allocate(240).unwrap();
    let bp = heap.mem.offset_of(p.as_ptr());

    assert_eq!(heap.mem.size(bp), 256);
    assert_eq!(heap.mem.header(heap.mem.next_block(bp)), Tag::allocated(0));
  }

  #[test]
  fn extension_replaces_the_epilogue() {
    let mut heap = heap();
    let before = heap.extent();

    let p = heap.allocate(4000).unwrap();
    let bp = heap.mem.offset_of(p.as_ptr());

    assert_eq!(bp, before);
    assert_eq!(heap.extent(), before + 4008);
    assert_eq!(heap.mem.size(bp), 4008);
    assert_eq!(heap.mem.header(heap.extent()), Tag::allocated(0));
  }

  #[test]
  fn coalesce_covers_all_four_cases() {
    let mut heap = heap();
    // Four 64-byte blocks exactly fill the first chunk.
    let ptrs: Vec<_> = (0..4).map(|_| heap.allocate(56).unwrap()).collect();
    let bps: Vec<_> = ptrs.iter().map(|p| heap.mem.offset_of(p.as_ptr())).collect();
    assert_eq!(heap.mem.next_block(bps[3]), heap.extent());

    unsafe {
      // Neither neighbour free.
      heap.release(ptrs[0].as_ptr());
      heap.release(ptrs[2].as_ptr());
      assert_eq!(heap.mem.size(bps[0]), 64);
      assert_eq!(heap.mem.size(bps[2]), 64);

      // Both neighbours free.
      heap.release(ptrs[1].as_ptr());
      assert_eq!(heap.mem.kind(bps[0]).size(), 192);

      // Predecessor free.
      heap.release(ptrs[3].as_ptr());
      assert_eq!(heap.mem.kind(bps[0]).size(), 256);
      assert_eq!(heap.classes.head(class_of(256)), Some(bps[0]));
    }

    // The same carve-up comes back from the merged block.
    let again: Vec<_> = (0..4).map(|_| heap.allocate(56).unwrap()).collect();
    assert_eq!(again, ptrs);

    unsafe {
      // Successor free.
      heap.release(ptrs[3].as_ptr());
      heap.release(ptrs[2].as_ptr());
    }
    assert_eq!(heap.mem.kind(bps[2]).size(), 128);
    assert!(heap.check().is_ok());
  }

  #[test]
  fn zero_byte_requests_get_distinct_blocks() {
    let mut heap = heap();

    let a = heap.allocate(0).unwrap();
    let b = heap.allocate(0).unwrap();

    assert_ne!(a, b);
    unsafe {
      assert_eq!(heap.usable_size(a.as_ptr()), 8);
    }
  }

  #[test]
  fn capacity_errors_propagate() {
    let mut heap = heap();

    let err = heap.allocate(2 << 20).unwrap_err();
    assert!(matches!(err, AllocError::Capacity { .. }));

    // The heap is still usable afterwards.
    assert!(heap.allocate(64).is_ok());
    assert!(heap.check().is_ok());
  }

  #[test]
  fn zeroed_allocate_clears_reused_memory() {
    let mut heap = heap();

    unsafe {
      let dirty = heap.allocate(64).unwrap();
      ptr::write_bytes(dirty.as_ptr(), 0xFF, 64);
      heap.release(dirty.as_ptr());

      let clean = heap.zeroed_allocate(8, 8).unwrap();
      assert_eq!(clean, dirty);
      assert!(std::slice::from_raw_parts(clean.as_ptr(), 64).iter().all(|&b| b == 0));
    }

    assert_eq!(
      heap.zeroed_allocate(usize::MAX, 2),
      Err(AllocError::Overflow {
        count: usize::MAX,
        size: 2,
      })
    );
  }

  #[test]
  #[cfg(target_pointer_width = "64")]
  fn growth_stops_at_the_largest_extent() {
    // Untouched pages of the reservation cost nothing.
    let mut heap = Heap::with_config(HeapConfig {
      chunk_size: 1008,
      arena_capacity: 6 << 30,
    })
    .unwrap();

    let _big = heap.allocate(0xF000_0000).unwrap();
    let err = heap.allocate(0x4000_0000).unwrap_err();
    assert!(matches!(
      err,
      AllocError::Capacity {
        source: RegionError::Exhausted { .. },
        ..
      }
    ));
    assert!(heap.extent() <= MAX_EXTENT);

    // The first chunk sits at a low offset and is still linked correctly.
    let a = heap.allocate(1000).unwrap();
    let _b = heap.allocate(1000).unwrap();
    let _c = heap.allocate(8).unwrap();
    assert_eq!(heap.mem.offset_of(a.as_ptr()), 16);
    unsafe { heap.release(a.as_ptr()) };

    // `a` plus the remainder split off behind `_c`.
    let stats = heap.check().unwrap();
    assert_eq!(stats.free_blocks, 2);
    assert!(stats.extent <= MAX_EXTENT);
  }

  /// An arena whose base, or first grant, is knocked off the double-word
  /// unit.
  struct SkewedRegion {
    arena: ArenaRegion,
    base_skew: usize,
    lead: usize,
  }

  impl Region for SkewedRegion {
    fn base(&self) -> NonNull<u8> {
      unsafe { self.arena.base().add(self.base_skew) }
    }

    fn len(&self) -> usize {
      self.arena.len()
    }

    fn extend(
      &mut self,
      bytes: usize,
    ) -> Result<usize, RegionError> {
      if self.arena.is_empty() && self.lead != 0 {
        self.arena.extend(self.lead)?;
      }
      self.arena.extend(bytes)
    }
  }

  fn skewed(
    base_skew: usize,
    lead: usize,
  ) -> (SkewedRegion, usize) {
    let arena = ArenaRegion::new(1 << 16).unwrap();
    let base = arena.base().as_ptr() as usize;
    let region = SkewedRegion {
      arena,
      base_skew,
      lead,
    };
    (region, base)
  }

  #[test]
  fn misaligned_base_is_rejected() {
    let (region, base) = skewed(4, 0);

    assert_eq!(
      Heap::init(region, HeapConfig::default()).err(),
      Some(AllocError::Misaligned { address: base + 4 })
    );
  }

  #[test]
  fn misaligned_first_grant_is_rejected() {
    let (region, base) = skewed(0, 4);

    assert_eq!(
      Heap::init(region, HeapConfig::default()).err(),
      Some(AllocError::Misaligned { address: base + 4 })
    );
  }

  #[test]
  #[should_panic(expected = "not handed out")]
  fn foreign_pointers_are_rejected() {
    let mut heap = heap();
    let mut local = 0u64;
    unsafe { heap.release((&raw mut local).cast()) };
  }
}
