//! Trajectory segments and waypoints
//!
//! All lengths along a segment (arc lengths, `s`) are measured in the XY plane. The Z component of
//! each point is carried along and interpolated but never affects progress.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::{Isometry3, Point3, Vector2, Vector3};
use serde::Serialize;

use super::TrajError;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Pieces shorter than this are treated as repeated points
const MIN_PIECE_LENGTH_M: f64 = 1e-9;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A non-empty polyline the robot should drive along.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TrajSegment {
    points_m: Vec<Vector3<f64>>,

    /// How closely the robot's heading must match the segment's
    heading_tolerance_rad: f64,
}

/// A single point the robot should reach, with the tolerances it must be reached within.
#[derive(Debug, Copy, Clone, Serialize, PartialEq)]
pub struct Waypoint {
    pub position_m: Vector3<f64>,

    pub heading_rad: f64,

    pub position_tolerance_m: f64,

    pub heading_tolerance_rad: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl TrajSegment {
    /// Create a new segment, checking that it contains at least one finite point.
    pub fn new(
        points_m: Vec<Vector3<f64>>,
        heading_tolerance_rad: f64,
    ) -> Result<Self, TrajError> {
        if points_m.is_empty() {
            return Err(TrajError::EmptySegment);
        }

        if let Some(i) = points_m
            .iter()
            .position(|p| !p.iter().all(|v| v.is_finite()))
        {
            return Err(TrajError::NonFinitePoint(i));
        }

        if !heading_tolerance_rad.is_finite() || heading_tolerance_rad < 0.0 {
            return Err(TrajError::InvalidTolerance(heading_tolerance_rad));
        }

        Ok(Self {
            points_m,
            heading_tolerance_rad,
        })
    }

    /// Create a straight segment between two points, with points spaced no more than
    /// `separation_m` apart. Both ends are included.
    pub fn direct(
        start_m: Vector3<f64>,
        end_m: Vector3<f64>,
        separation_m: f64,
        heading_tolerance_rad: f64,
    ) -> Result<Self, TrajError> {
        if !separation_m.is_finite() || separation_m <= 0.0 {
            return Err(TrajError::InvalidSeparation(separation_m));
        }

        let num_pieces = ((end_m - start_m).norm() / separation_m).ceil().max(1.0) as usize;

        let points = (0..=num_pieces)
            .map(|i| start_m + (end_m - start_m) * (i as f64 / num_pieces as f64))
            .collect();

        Self::new(points, heading_tolerance_rad)
    }

    pub fn points_m(&self) -> &[Vector3<f64>] {
        &self.points_m
    }

    pub fn heading_tolerance_rad(&self) -> f64 {
        self.heading_tolerance_rad
    }

    pub fn first(&self) -> &Vector3<f64> {
        &self.points_m[0]
    }

    pub fn last(&self) -> &Vector3<f64> {
        &self.points_m[self.points_m.len() - 1]
    }

    /// Planar length of the whole segment.
    pub fn length_m(&self) -> f64 {
        self.points_m
            .windows(2)
            .map(|w| (w[1] - w[0]).xy().norm())
            .sum()
    }

    /// Return a copy of this segment with every point transformed by `tf`.
    pub fn transformed(&self, tf: &Isometry3<f64>) -> Self {
        Self {
            points_m: self
                .points_m
                .iter()
                .map(|p| (tf * Point3::from(*p)).coords)
                .collect(),
            heading_tolerance_rad: self.heading_tolerance_rad,
        }
    }

    /// Point at arc length `s`, clamped to the ends of the segment.
    pub fn point_at(&self, s: f64) -> Vector3<f64> {
        match self.piece_at(s) {
            Some((i, dist, len)) => {
                let a = self.points_m[i];
                let b = self.points_m[i + 1];
                a + (b - a) * (dist / len).min(1.0)
            }
            None => *self.first(),
        }
    }

    /// Heading of the piece of the segment at arc length `s`.
    ///
    /// A segment with no length has no direction, in which case zero is returned.
    pub fn heading_at(&self, s: f64) -> f64 {
        match self.piece_at(s) {
            Some((i, _, _)) => {
                let d = (self.points_m[i + 1] - self.points_m[i]).xy();
                d.y.atan2(d.x)
            }
            None => 0.0,
        }
    }

    /// Find the arc length of the point on the segment closest to `position_m`, not going back
    /// beyond `from_s`.
    pub fn project(&self, position_m: &Vector2<f64>, from_s: f64) -> f64 {
        let from_s = from_s.max(0.0).min(self.length_m());

        let mut best_s = from_s;
        let mut best_dist = (position_m - self.point_at(from_s).xy()).norm();

        let mut start_s = 0.0;
        for w in self.points_m.windows(2) {
            let a = w[0].xy();
            let piece = w[1].xy() - a;
            let len = piece.norm();
            let end_s = start_s + len;

            if len > MIN_PIECE_LENGTH_M && end_s >= from_s {
                let t = ((position_m - a).dot(&piece) / (len * len)).max(0.0).min(1.0);
                let s = (start_s + t * len).max(from_s);
                let dist = (position_m - (a + piece * ((s - start_s) / len))).norm();

                if dist < best_dist {
                    best_dist = dist;
                    best_s = s;
                }
            }

            start_s = end_s;
        }

        best_s
    }

    /// Locate the piece containing arc length `s`.
    ///
    /// Returns the index of the piece's first point, the distance into the piece, and the piece's
    /// length. Positions beyond the end belong to the last piece with any length. `None` if the
    /// segment has no length at all.
    fn piece_at(&self, s: f64) -> Option<(usize, f64, f64)> {
        let mut start_s = 0.0;
        let mut last = None;

        for (i, w) in self.points_m.windows(2).enumerate() {
            let len = (w[1] - w[0]).xy().norm();
            if len <= MIN_PIECE_LENGTH_M {
                continue;
            }

            if s < start_s + len {
                return Some((i, (s - start_s).max(0.0), len));
            }

            last = Some((i, len, len));
            start_s += len;
        }

        last
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
