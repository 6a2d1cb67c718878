//! Scalar helpers for interpolation and angles
//!
//! Angles are in radians. Functions are generic over `num_traits::Float` so they serve both `f32`
//! and `f64` callers.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::{Float, FloatConst};

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Linearly interpolate `value` from the `from` range onto the `to` range. Values outside `from`
/// extrapolate.
pub fn lin_map<T: Float>(from: (T, T), to: (T, T), value: T) -> T {
    let frac = (value - from.0) / (from.1 - from.0);
    to.0 + frac * (to.1 - to.0)
}

/// Limit `value` to `[min, max]`.
pub fn clamp<T: Float>(value: &T, min: &T, max: &T) -> T {
    value.max(*min).min(*max)
}

/// Shortest signed rotation taking angle `a` onto angle `b`, positive counter-clockwise.
pub fn get_ang_dist_2pi<T: Float + FloatConst>(a: T, b: T) -> T {
    let backward = rem_euclid(a - b, tau());
    let forward = rem_euclid(b - a, tau());

    match backward < forward {
        true => -backward,
        false => forward,
    }
}

/// Non-negative remainder of `lhs / rhs`.
///
/// Round-off may give `rhs.abs()` itself when `lhs` is a tiny negative number.
pub fn rem_euclid<T: Float>(lhs: T, rhs: T) -> T {
    match lhs % rhs {
        r if r < T::zero() => r + rhs.abs(),
        r => r,
    }
}

/// Wrap an angle into `[0, 2pi)`.
pub fn wrap_2pi<T: Float + FloatConst>(angle: T) -> T {
    match rem_euclid(angle, tau()) {
        r if r >= tau() => T::zero(),
        r => r,
    }
}

/// Wrap an angle into `(-pi, pi]`.
pub fn wrap_pi<T: Float + FloatConst>(angle: T) -> T {
    match wrap_2pi(angle) {
        r if r > T::PI() => r - tau(),
        r => r,
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn tau<T: Float + FloatConst>() -> T {
    T::PI() + T::PI()
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
