use thiserror::Error;

/// Failures reported by a [`Region`](crate::region::Region) provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegionError {
  #[error("region exhausted: {requested} bytes requested, {available} available")]
  Exhausted { requested: usize, available: usize },

  #[error("mmap of {size} bytes failed (errno {errno})")]
  MapFailed { size: usize, errno: i32 },

  #[error("program break moved by another party: expected {expected:#x}, found {actual:#x}")]
  NotContiguous { expected: usize, actual: usize },
}

/// Failures surfaced by the public heap operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
  /// The region provider refused to grow. Retrying without releasing
  /// memory fails the same way.
  #[error("heap cannot grow by {requested} bytes")]
  Capacity {
    requested: usize,
    #[source]
    source: RegionError,
  },

  #[error("region delivered memory at {address:#x}, which is not double-word aligned")]
  Misaligned { address: usize },

  #[error("request of {size} bytes does not fit in a block")]
  TooLarge { size: usize },

  #[error("zeroed allocation of {count} x {size} bytes overflows")]
  Overflow { count: usize, size: usize },
}

/// Invariant violations found by [`Heap::check`](crate::Heap::check).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckError {
  #[error("bad prologue at offset {offset}")]
  BadPrologue { offset: usize },

  #[error("bad epilogue at offset {offset}")]
  BadEpilogue { offset: usize },

  #[error("block at offset {offset} is not double-word aligned (size {size})")]
  Misaligned { offset: usize, size: usize },

  #[error("block at offset {offset} runs past the heap end")]
  OutOfBounds { offset: usize },

  #[error("header and footer of block at offset {offset} disagree")]
  TagMismatch { offset: usize },

  #[error("free blocks at offsets {first} and {second} are adjacent")]
  AdjacentFree { first: usize, second: usize },

  #[error("block at offset {offset} sits in class {found}, expected class {expected}")]
  WrongClass {
    offset: usize,
    found: usize,
    expected: usize,
  },

  #[error("class {class} is not in address order at offset {offset}")]
  Unordered { class: usize, offset: usize },

  #[error("allocated block at offset {offset} is linked into class {class}")]
  AllocatedInList { offset: usize, class: usize },

  #[error("class {class} has broken links at offset {offset}")]
  BrokenLinks { class: usize, offset: usize },

  #[error("{walked} free blocks in the heap but {indexed} in the size classes")]
  IndexMismatch { walked: usize, indexed: usize },

  #[error("blocks span {spanned} bytes but the heap holds {expected}")]
  Conservation { spanned: usize, expected: usize },
}

/// Malformed trace input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
  #[error("trace ended before the {0} header field")]
  MissingHeader(&'static str),

  #[error("line {line}: invalid number {text:?}")]
  InvalidNumber { line: usize, text: String },

  #[error("line {line}: unknown operation {text:?}")]
  UnknownOp { line: usize, text: String },

  #[error("line {line}: id {id} is outside 0..{num_ids}")]
  IdOutOfRange { line: usize, id: usize, num_ids: usize },

  #[error("header announces {expected} operations but the trace holds {found}")]
  OpCount { expected: usize, found: usize },
}

/// Failures while replaying a trace against a heap.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplayError {
  #[error("op {op}: {source}")]
  Alloc {
    op: usize,
    #[source]
    source: AllocError,
  },

  #[error("op {op}: payload of id {id} was overwritten at byte {byte}")]
  Corrupted { op: usize, id: usize, byte: usize },

  #[error("op {op}: id {id} is not live")]
  NotLive { op: usize, id: usize },

  #[error("op {op}: heap inconsistent: {source}")]
  Check {
    op: usize,
    #[source]
    source: CheckError,
  },
}

/// Rejected configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
  #[error("{key}: {value:?} is not a byte count")]
  NotANumber { key: &'static str, value: String },

  #[error("chunk size {0} must be a multiple of 8, at least 16 and below 4 GiB")]
  ChunkSize(usize),

  #[error("arena capacity must be nonzero")]
  ZeroCapacity,

  #[error("arena capacity {0} exceeds the largest heap extent")]
  CapacityTooLarge(usize),
}

/// Errors from [`Heap::from_env`](crate::Heap::from_env).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InitError {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error(transparent)]
  Alloc(#[from] AllocError),
}
