//! Allocation traces: parsing and replay.
//!
//! The format is the classic allocator-lab one: four header lines followed
//! by one operation per line.
//!
//! ```text
//!   20000        suggested heap size (informational)
//!   2            number of distinct ids
//!   4            number of operations
//!   1            weight (informational)
//!   a 0 512      allocate 512 bytes as id 0
//!   a 1 128
//!   r 0 640      resize id 0 to 640 bytes
//!   f 1          release id 1
//! ```

use std::{ptr::NonNull, slice, str::FromStr};

use tracing::debug;

use crate::{
  error::{ParseError, ReplayError},
  heap::Heap,
  region::Region,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceOp {
  Alloc { id: usize, size: usize },
  Free { id: usize },
  Realloc { id: usize, size: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trace {
  pub suggested_heap: usize,
  pub num_ids: usize,
  pub weight: usize,
  pub ops: Vec<TraceOp>,
}

impl FromStr for Trace {
  type Err = ParseError;

  fn from_str(text: &str) -> Result<Self, Self::Err> {
    let mut lines = text
      .lines()
      .enumerate()
      .map(|(index, line)| (index + 1, line.trim()))
      .filter(|(_, line)| !line.is_empty());

    let mut header = |field: &'static str| -> Result<usize, ParseError> {
      let (line, text) = lines.next().ok_or(ParseError::MissingHeader(field))?;
      number(line, text)
    };

    let suggested_heap = header("heap size")?;
    let num_ids = header("id count")?;
    let num_ops = header("op count")?;
    let weight = header("weight")?;

    let ops = lines
      .map(|(line, text)| parse_op(line, text, num_ids))
      .collect::<Result<Vec<_>, _>>()?;

    if ops.len() != num_ops {
      return Err(ParseError::OpCount {
        expected: num_ops,
        found: ops.len(),
      });
    }

    Ok(Self {
      suggested_heap,
      num_ids,
      weight,
      ops,
    })
  }
}

fn number(
  line: usize,
  text: &str,
) -> Result<usize, ParseError> {
  text.parse().map_err(|_| ParseError::InvalidNumber {
    line,
    text: text.to_owned(),
  })
}

fn parse_op(
  line: usize,
  text: &str,
  num_ids: usize,
) -> Result<TraceOp, ParseError> {
  let mut fields = text.split_whitespace();
  let kind = fields.next().unwrap_or_default();
  let mut next = || number(line, fields.next().unwrap_or_default());

  let op = match kind {
    "a" => TraceOp::Alloc {
      id: next()?,
      size: next()?,
    },
    "r" => TraceOp::Realloc {
      id: next()?,
      size: next()?,
    },
    "f" => TraceOp::Free { id: next()? },
    _ => {
      return Err(ParseError::UnknownOp {
        line,
        text: text.to_owned(),
      });
    }
  };

  if fields.next().is_some() {
    return Err(ParseError::UnknownOp {
      line,
      text: text.to_owned(),
    });
  }

  let (TraceOp::Alloc { id, .. } | TraceOp::Realloc { id, .. } | TraceOp::Free { id }) = op;
  if id >= num_ids {
    return Err(ParseError::IdOutOfRange { line, id, num_ids });
  }

  Ok(op)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayOptions {
  /// Run [`Heap::check`] after every operation.
  pub check_every_op: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
  pub ops: usize,
  /// Largest total of live requested bytes at any point.
  pub peak_payload: usize,
  /// Heap extent after the last operation.
  pub extent: usize,
}

impl ReplayStats {
  /// Peak live payload over the final heap extent.
  pub fn utilization(&self) -> f64 {
    if self.extent == 0 {
      0.0
    } else {
      self.peak_payload as f64 / self.extent as f64
    }
  }
}

/// Runs `trace` against `heap`.
///
/// Each payload is filled with a byte pattern derived from its id; the
/// pattern is verified before the block is released and after it is
/// resized, so any overlap between blocks or clobbered metadata shows up as
/// [`ReplayError::Corrupted`].
pub fn replay<R: Region>(
  heap: &mut Heap<R>,
  trace: &Trace,
  options: ReplayOptions,
) -> Result<ReplayStats, ReplayError> {
  let mut live: Vec<Option<(NonNull<u8>, usize)>> = vec![None; trace.num_ids];
  let mut payload = 0usize;
  let mut stats = ReplayStats::default();

  for (op, &trace_op) in trace.ops.iter().enumerate() {
    match trace_op {
      TraceOp::Alloc { id, size } => {
        if let Some((ptr, old)) = live[id].take() {
          verify(op, id, ptr, old)?;
          unsafe { heap.release(ptr.as_ptr()) };
          payload -= old;
        }

        let ptr = heap
          .allocate(size)
          .map_err(|source| ReplayError::Alloc { op, source })?;
        fill(id, ptr, size);
        live[id] = Some((ptr, size));
        payload += size;
      }
      TraceOp::Free { id } => {
        let (ptr, size) = live[id].take().ok_or(ReplayError::NotLive { op, id })?;
        verify(op, id, ptr, size)?;
        unsafe { heap.release(ptr.as_ptr()) };
        payload -= size;
      }
      TraceOp::Realloc { id, size } => {
        let (ptr, old) = live[id].ok_or(ReplayError::NotLive { op, id })?;
        verify(op, id, ptr, old)?;

        let resized = unsafe { heap.resize(ptr.as_ptr(), size) }
          .map_err(|source| ReplayError::Alloc { op, source })?;
        payload -= old;
        live[id] = None;

        if let Some(new) = resized {
          verify(op, id, new, old.min(size))?;
          fill(id, new, size);
          live[id] = Some((new, size));
          payload += size;
        }
      }
    }

    stats.peak_payload = stats.peak_payload.max(payload);
    if options.check_every_op {
      heap
        .check()
        .map_err(|source| ReplayError::Check { op, source })?;
    }
  }

  stats.ops = trace.ops.len();
  stats.extent = heap.extent();
  debug!(
    ops = stats.ops,
    peak_payload = stats.peak_payload,
    extent = stats.extent,
    "trace replayed"
  );
  Ok(stats)
}

fn pattern(
  id: usize,
  index: usize,
) -> u8 {
  (id.wrapping_mul(131).wrapping_add(index) % 251) as u8
}

fn fill(
  id: usize,
  ptr: NonNull<u8>,
  len: usize,
) {
  let bytes = unsafe { slice::from_raw_parts_mut(ptr.as_ptr(), len) };
  for (index, byte) in bytes.iter_mut().enumerate() {
    *byte = pattern(id, index);
  }
}

fn verify(
  op: usize,
  id: usize,
  ptr: NonNull<u8>,
  len: usize,
) -> Result<(), ReplayError> {
  let bytes = unsafe { slice::from_raw_parts(ptr.as_ptr(), len) };
  match bytes.iter().enumerate().find(|&(index, &byte)| byte != pattern(id, index)) {
    Some((byte, _)) => Err(ReplayError::Corrupted { op, id, byte }),
    None => Ok(()),
  }
}
