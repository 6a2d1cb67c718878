//! # Localisation types
//!
//! The controller does not localise the robot itself, it is given transforms from the robot body
//! centre into the map and trajectory frames. This module provides the [`Pose`] type used to pass
//! those transforms around in a more readable form.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector2, Vector3};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The pose (position and attitude) of the robot body in some parent frame.
///
/// A pose built from the `body_center2map` transform is the pose of the body in the map frame.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Pose {
    /// The position in the parent frame
    pub position_m: Vector3<f64>,

    /// The attitude of the body in the parent frame. This quaternion rotates a vector from the
    /// body frame into the parent frame.
    pub attitude_q: UnitQuaternion<f64>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Pose {
    pub fn new(position_m: Vector3<f64>, attitude_q: UnitQuaternion<f64>) -> Self {
        Self {
            position_m,
            attitude_q,
        }
    }

    /// Create a planar pose at the given position with the given heading about +Z.
    pub fn from_xy_heading(x_m: f64, y_m: f64, heading_rad: f64) -> Self {
        Self {
            position_m: Vector3::new(x_m, y_m, 0.0),
            attitude_q: UnitQuaternion::from_euler_angles(0.0, 0.0, heading_rad),
        }
    }

    /// Build a pose from a body-to-parent transform.
    pub fn from_isometry(iso: &Isometry3<f64>) -> Self {
        Self {
            position_m: iso.translation.vector,
            attitude_q: iso.rotation,
        }
    }

    /// Convert the pose into a body-to-parent transform.
    pub fn to_isometry(&self) -> Isometry3<f64> {
        Isometry3::from_parts(Translation3::from(self.position_m), self.attitude_q)
    }

    /// Return the heading (angle to the positive parent X axis, about +Z) in radians.
    ///
    /// Heading is given in the range [-pi, pi].
    pub fn get_heading(&self) -> f64 {
        self.attitude_q.euler_angles().2
    }

    /// Return the planar (XY) component of the position.
    pub fn position2(&self) -> Vector2<f64> {
        self.position_m.xy()
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
