//! Raw memory providers.
//!
//! A [`Region`] is a contiguous, append-only run of bytes. The heap asks it
//! to grow and never gives memory back.
//!
//! ```text
//!   base                         base + len          capacity / break limit
//!   ┌──────────────────────────────┬─────────────────────────┐
//!   │        granted bytes         │   not yet granted       │
//!   └──────────────────────────────┴─────────────────────────┘
//!                                  ▲
//!                                  └── extend(n) returns this offset
//! ```

use std::ptr::{self, NonNull};

use libc::{c_void, intptr_t, sbrk};

use crate::error::RegionError;

/// Contract for the memory underneath a [`Heap`](crate::Heap).
pub trait Region {
  /// Start of the region. Must not change over the region's lifetime.
  fn base(&self) -> NonNull<u8>;

  /// Bytes granted so far.
  fn len(&self) -> usize;

  /// Grows the region by `bytes` and returns the offset of the new space,
  /// which is always the previous [`len`](Region::len).
  fn extend(
    &mut self,
    bytes: usize,
  ) -> Result<usize, RegionError>;

  fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// Default reservation for [`ArenaRegion`]: 20 MiB.
pub const DEFAULT_ARENA_CAPACITY: usize = 20 * (1 << 20);

/// A fixed reservation of anonymous memory with a private break.
///
/// The whole capacity is mapped up front with `MAP_NORESERVE`, so untouched
/// pages cost nothing; [`extend`](Region::extend) only moves the break.
pub struct ArenaRegion {
  base: NonNull<u8>,
  brk: usize,
  capacity: usize,
  mapped: usize,
}

impl ArenaRegion {
  pub fn new(capacity: usize) -> Result<Self, RegionError> {
    let page = page_size();
    let mapped = crate::align_to!(capacity.max(1), page);

    let result = unsafe {
      libc::mmap(
        ptr::null_mut(),
        mapped,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
        -1,
        0,
      )
    };

    if result == libc::MAP_FAILED {
      return Err(RegionError::MapFailed {
        size: mapped,
        errno: std::io::Error::last_os_error().raw_os_error().unwrap_or(0),
      });
    }

    let base = NonNull::new(result.cast::<u8>()).ok_or(RegionError::MapFailed {
      size: mapped,
      errno: 0,
    })?;

    Ok(Self {
      base,
      brk: 0,
      capacity,
      mapped,
    })
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }
}

impl Region for ArenaRegion {
  fn base(&self) -> NonNull<u8> {
    self.base
  }

  fn len(&self) -> usize {
    self.brk
  }

  fn extend(
    &mut self,
    bytes: usize,
  ) -> Result<usize, RegionError> {
    let available = self.capacity - self.brk;
    if bytes > available {
      return Err(RegionError::Exhausted {
        requested: bytes,
        available,
      });
    }

    let old = self.brk;
    self.brk += bytes;
    Ok(old)
  }
}

impl Drop for ArenaRegion {
  fn drop(&mut self) {
    unsafe {
      libc::munmap(self.base.as_ptr().cast::<c_void>(), self.mapped);
    }
  }
}

/// The process's program break, grown with `sbrk(2)`.
///
/// Anything else in the process that moves the break (the system allocator
/// included) breaks contiguity; that is detected on the next extension and
/// reported as [`RegionError::NotContiguous`].
pub struct SbrkRegion {
  base: NonNull<u8>,
  len: usize,
}

impl SbrkRegion {
  /// Anchors the region at the current break, padding it up to the
  /// double-word unit if needed.
  pub fn new() -> Result<Self, RegionError> {
    let start = unsafe { sbrk(0) } as usize;
    let pad = crate::align!(start) - start;

    if pad != 0 {
      let got = unsafe { sbrk(pad as intptr_t) };
      if got == usize::MAX as *mut c_void {
        return Err(RegionError::Exhausted {
          requested: pad,
          available: 0,
        });
      }
      if got as usize != start {
        return Err(RegionError::NotContiguous {
          expected: start,
          actual: got as usize,
        });
      }
    }

    let base = NonNull::new((start + pad) as *mut u8).ok_or(RegionError::Exhausted {
      requested: pad,
      available: 0,
    })?;

    Ok(Self { base, len: 0 })
  }

  /// The current program break, as reported by `sbrk(0)`.
  pub fn program_break() -> *mut c_void {
    unsafe { sbrk(0) }
  }
}

impl Region for SbrkRegion {
  fn base(&self) -> NonNull<u8> {
    self.base
  }

  fn len(&self) -> usize {
    self.len
  }

  fn extend(
    &mut self,
    bytes: usize,
  ) -> Result<usize, RegionError> {
    let increment = intptr_t::try_from(bytes).map_err(|_| RegionError::Exhausted {
      requested: bytes,
      available: 0,
    })?;

    let expected = self.base.as_ptr() as usize + self.len;
    let address = unsafe { sbrk(increment) };

    if address == usize::MAX as *mut c_void {
      return Err(RegionError::Exhausted {
        requested: bytes,
        available: 0,
      });
    }

    if address as usize != expected {
      // Give the bytes back; they are not adjacent to ours.
      unsafe { sbrk(-increment) };
      return Err(RegionError::NotContiguous {
        expected,
        actual: address as usize,
      });
    }

    let old = self.len;
    self.len += bytes;
    Ok(old)
  }
}

fn page_size() -> usize {
  let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
  if size > 0 { size as usize } else { 4096 }
}
