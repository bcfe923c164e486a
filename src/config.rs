use crate::{
  block::{DSIZE, MAX_EXTENT, MIN_BLOCK},
  error::ConfigError,
  region::DEFAULT_ARENA_CAPACITY,
};

/// Default growth increment: small requests are rounded up to this many
/// bytes when the heap has to grow.
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 8;

pub const CHUNK_SIZE_VAR: &str = "SEGALLOC_CHUNK_SIZE";
pub const ARENA_CAPACITY_VAR: &str = "SEGALLOC_ARENA_CAPACITY";

/// Heap tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
  /// Minimum number of bytes requested from the region per extension.
  pub chunk_size: usize,
  /// Reservation size when the heap owns an
  /// [`ArenaRegion`](crate::region::ArenaRegion).
  pub arena_capacity: usize,
}

impl Default for HeapConfig {
  fn default() -> Self {
    Self {
      chunk_size: DEFAULT_CHUNK_SIZE,
      arena_capacity: DEFAULT_ARENA_CAPACITY,
    }
  }
}

impl HeapConfig {
  /// Reads overrides from `SEGALLOC_CHUNK_SIZE` and `SEGALLOC_ARENA_CAPACITY`.
  pub fn from_env() -> Result<Self, ConfigError> {
    Self::from_lookup(|key| std::env::var(key).ok())
  }

  /// Builds a config from an arbitrary key lookup, falling back to the
  /// defaults for missing keys.
  pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
  where
    F: Fn(&'static str) -> Option<String>,
  {
    let mut config = Self::default();

    if let Some(value) = lookup(CHUNK_SIZE_VAR) {
      config.chunk_size = parse_bytes(CHUNK_SIZE_VAR, &value)?;
    }
    if let Some(value) = lookup(ARENA_CAPACITY_VAR) {
      config.arena_capacity = parse_bytes(ARENA_CAPACITY_VAR, &value)?;
    }

    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.chunk_size < MIN_BLOCK || self.chunk_size > MAX_EXTENT || self.chunk_size % DSIZE != 0 {
      return Err(ConfigError::ChunkSize(self.chunk_size));
    }
    if self.arena_capacity == 0 {
      return Err(ConfigError::ZeroCapacity);
    }
    if self.arena_capacity > MAX_EXTENT {
      return Err(ConfigError::CapacityTooLarge(self.arena_capacity));
    }
    Ok(())
  }
}

fn parse_bytes(
  key: &'static str,
  value: &str,
) -> Result<usize, ConfigError> {
  value.trim().parse().map_err(|_| ConfigError::NotANumber {
    key,
    value: value.to_owned(),
  })
}
