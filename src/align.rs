/// Rounds `value` up to the next multiple of `align`, which must be a power of two.
///
/// # Examples
///
/// ```rust
/// use segalloc::align_to;
///
/// assert_eq!(align_to!(13, 8), 16);
/// assert_eq!(align_to!(4096, 4096), 4096);
/// assert_eq!(align_to!(1, 4096), 4096);
/// ```
#[macro_export]
macro_rules! align_to {
  ($value:expr, $align:expr) => {
    ($value + $align - 1) & !($align - 1)
  };
}

/// Rounds `value` up to the heap's double-word unit (8 bytes).
///
/// Every block size and every payload offset in the heap is a multiple of
/// this unit.
///
/// # Examples
///
/// ```rust
/// use segalloc::align;
///
/// assert_eq!(align!(0), 0);
/// assert_eq!(align!(1), 8);
/// assert_eq!(align!(108), 112);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    $crate::align_to!($value, $crate::block::DSIZE)
  };
}

#[cfg(test)]
mod tests {
  use crate::block::DSIZE;

  #[test]
  fn test_align() {
    let mut alignments = Vec::new();

    for i in 0..10 {
      let sizes = (DSIZE * i + 1)..=(DSIZE * (i + 1));

      let expected_alignment = DSIZE * (i + 1);

      alignments.push((sizes, expected_alignment));
    }

    for (sizes, expected) in alignments {
      for size in sizes {
        assert_eq!(expected, align!(size));
      }
    }
  }

  #[test]
  fn test_align_to_page() {
    assert_eq!(align_to!(0usize, 4096usize), 0);
    assert_eq!(align_to!(4095usize, 4096usize), 4096);
    assert_eq!(align_to!(4097usize, 4096usize), 8192);
  }
}
