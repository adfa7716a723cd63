//! Integer helpers shared by the geometry computations.
//!
//! All of the canvas arithmetic works on `u32` coordinates that are
//! guaranteed to fit once divided, so the helpers widen to `u64`
//! internally instead of checking for overflow at every call site.

/// `ceil(a / b)`. `b` must be non-zero.
#[inline]
pub fn ceil_div(a: u32, b: u32) -> u32 {
  ((a as u64 + b as u64 - 1) / b as u64) as u32
}

/// `ceil(a / 2^b)`.
#[inline]
pub fn ceil_div_pow2(a: u32, b: u32) -> u32 {
  ((a as u64 + (1u64 << b) - 1) >> b) as u32
}

/// `ceil(a / 2^b)` for signed values.
#[inline]
pub fn int_ceil_div_pow2(a: i64, b: u32) -> i64 {
  (a + (1i64 << b) - 1) >> b
}

/// `floor(a / 2^b)`.
#[inline]
pub fn floor_div_pow2(a: u32, b: u32) -> u32 {
  a >> b
}

/// Smallest power of two >= `a`, expressed as an exponent.
#[inline]
pub fn floor_log2(a: u32) -> u32 {
  debug_assert!(a > 0);
  31 - a.leading_zeros()
}

/// Number of bits needed to represent `a`.
#[inline]
pub fn num_bits(a: u32) -> u32 {
  if a == 0 {
    0
  } else {
    floor_log2(a) + 1
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn ceil_div_rounds_up() {
    assert_eq!(ceil_div(0, 3), 0);
    assert_eq!(ceil_div(1, 3), 1);
    assert_eq!(ceil_div(3, 3), 1);
    assert_eq!(ceil_div(4, 3), 2);
    assert_eq!(ceil_div(u32::MAX, 1), u32::MAX);
  }

  #[test]
  fn pow2_division() {
    assert_eq!(ceil_div_pow2(65, 6), 2);
    assert_eq!(ceil_div_pow2(64, 6), 1);
    assert_eq!(floor_div_pow2(65, 6), 1);
    assert_eq!(int_ceil_div_pow2(-3, 1), -1);
    assert_eq!(int_ceil_div_pow2(3, 1), 2);
  }

  #[test]
  fn log2() {
    assert_eq!(floor_log2(1), 0);
    assert_eq!(floor_log2(64), 6);
    assert_eq!(floor_log2(65), 6);
    assert_eq!(num_bits(0), 0);
    assert_eq!(num_bits(255), 8);
  }
}
