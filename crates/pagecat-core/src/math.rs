//! Integer helpers for alignment arithmetic.
//!
//! Pure functions; no I/O. Overflow is reported as `None` rather than
//! wrapping so callers can fall back to a smaller size.

/// Greatest common divisor (Euclid). `gcd(0, 0) == 0`.
#[must_use]
pub const fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

/// Least common multiple, computed as `a / gcd(a, b) * b`.
///
/// Returns `Some(0)` when either operand is zero and `None` on overflow.
#[must_use]
pub const fn lcm(a: usize, b: usize) -> Option<usize> {
    if a == 0 || b == 0 {
        return Some(0);
    }
    (a / gcd(a, b)).checked_mul(b)
}

/// True for 1, 2, 4, 8, ... (zero is not a power of two).
#[must_use]
pub const fn is_power_of_two(n: usize) -> bool {
    n != 0 && (n & (n - 1)) == 0
}
