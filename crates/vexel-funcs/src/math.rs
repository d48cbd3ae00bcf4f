//! Scalar math builtins.
//!
//! Everything here maps one or more scalar lanes to a scalar and is lifted
//! over vectors lane-by-lane by the evaluator.

use std::f64::consts::PI;

/// Radians → degrees: `deg(angle)`
pub fn deg(angle: f64) -> f64 {
    angle * (180.0 / PI)
}

/// Degrees → radians: `rad(angle)`
pub fn rad(angle: f64) -> f64 {
    angle * (PI / 180.0)
}

/// Cosine of an angle in degrees: `cosd(x)`
pub fn cosd(x: f64) -> f64 {
    rad(x).cos()
}

/// Sine of an angle in degrees: `sind(x)`
pub fn sind(x: f64) -> f64 {
    rad(x).sin()
}

/// Tangent of an angle in degrees: `tand(x)`
pub fn tand(x: f64) -> f64 {
    rad(x).tan()
}

/// Arc cosine in degrees: `acosd(x)`
pub fn acosd(x: f64) -> f64 {
    deg(x.acos())
}

/// Arc sine in degrees: `asind(x)`
pub fn asind(x: f64) -> f64 {
    deg(x.asin())
}

/// Arc tangent in degrees: `atand(x)`
pub fn atand(x: f64) -> f64 {
    deg(x.atan())
}

/// Two-argument arc tangent in degrees: `atan2d(y, x)`
pub fn atan2d(y: f64, x: f64) -> f64 {
    deg(y.atan2(x))
}

/// Clamp into a range: `clamp(x, lo, hi)`
pub fn clamp(x: f64, lo: f64, hi: f64) -> f64 {
    if x < lo {
        lo
    } else if x > hi {
        hi
    } else {
        x
    }
}

/// Round half away from zero: `round(x)`
pub fn round(x: f64) -> f64 {
    if x < 0.0 {
        (x - 0.5).ceil()
    } else {
        (x + 0.5).floor()
    }
}

/// Larger of two values: `max(a, b)`
pub fn max(a: f64, b: f64) -> f64 {
    if a > b {
        a
    } else {
        b
    }
}

/// Smaller of two values: `min(a, b)`
pub fn min(a: f64, b: f64) -> f64 {
    if a < b {
        a
    } else {
        b
    }
}

/// `invert(x)` → `1 - x`
pub fn invert(x: f64) -> f64 {
    1.0 - x
}

/// `hypot(x, y)` — length of the 2D vector `(x, y)`
pub fn hypot(x: f64, y: f64) -> f64 {
    (x * x + y * y).sqrt()
}

/// C-style remainder, truncated toward zero: `fmod(a, b)`. Unlike the `%`
/// operator this keeps the sign of `a` and yields NaN for a zero divisor.
pub fn fmod(a: f64, b: f64) -> f64 {
    a % b
}

/// Wrap an index into an inclusive integer range: `cycle(index, lo, hi)`
pub fn cycle(index: f64, lo: f64, hi: f64) -> f64 {
    let lo = lo.trunc();
    let span = hi.trunc() - lo + 1.0;
    if span <= 0.0 {
        return lo;
    }
    let offset = (index.trunc() - lo) % span;
    lo + if offset < 0.0 { offset + span } else { offset }
}

/// Deterministic scatter in `[0, 1)` from any number of seeds: `hash(...)`
pub fn hash(args: &[f64]) -> f64 {
    let mut h: u64 = 0x9e37_79b9_7f4a_7c15;
    for &a in args {
        h ^= a.to_bits();
        h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
        h ^= h >> 33;
        h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
        h ^= h >> 33;
    }
    (h >> 11) as f64 / (1u64 << 53) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degree_conversions_round_trip() {
        assert!((deg(PI) - 180.0).abs() < 1e-9);
        assert!((rad(180.0) - PI).abs() < 1e-12);
        assert!((cosd(60.0) - 0.5).abs() < 1e-12);
        assert!((sind(30.0) - 0.5).abs() < 1e-12);
        assert!((atan2d(1.0, 1.0) - 45.0).abs() < 1e-12);
    }

    #[test]
    fn clamp_and_round() {
        assert_eq!(clamp(5.0, 0.0, 10.0), 5.0);
        assert_eq!(clamp(-5.0, 0.0, 10.0), 0.0);
        assert_eq!(clamp(15.0, 0.0, 10.0), 10.0);
        assert_eq!(round(0.5), 1.0);
        assert_eq!(round(-0.5), -1.0);
        assert_eq!(round(2.4), 2.0);
    }

    #[test]
    fn fmod_truncates_toward_zero() {
        assert_eq!(fmod(7.0, 3.0), 1.0);
        assert_eq!(fmod(-7.0, 3.0), -1.0);
        assert_eq!(fmod(7.5, 2.0), 1.5);
        assert!(fmod(7.0, 0.0).is_nan());
    }

    #[test]
    fn cycle_wraps_both_directions() {
        assert_eq!(cycle(7.0, 0.0, 4.0), 2.0);
        assert_eq!(cycle(-1.0, 0.0, 4.0), 4.0);
        assert_eq!(cycle(3.0, 2.0, 2.0), 2.0);
    }

    #[test]
    fn hash_is_deterministic_and_unit_ranged() {
        let a = hash(&[1.0, 2.0, 3.0]);
        let b = hash(&[1.0, 2.0, 3.0]);
        assert_eq!(a, b);
        assert!((0.0..1.0).contains(&a));
        assert_ne!(hash(&[1.0]), hash(&[2.0]));
    }
}
