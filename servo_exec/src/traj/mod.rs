//! # Trajectory module
//!
//! The global trajectory is handed to the controller as a sequence of segments, each of which is
//! a polyline of points in the global trajectory frame. Segments are queued and followed one at a
//! time. While following, the controller continuously resolves the direction it should drive in,
//! which is the heading towards a target point some distance ahead of the robot on the current
//! segment.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod drive_dir;
pub mod follower;
pub mod queue;
pub mod segment;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

pub use drive_dir::*;
pub use follower::*;
pub use queue::*;
pub use segment::*;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors which can occur when building trajectory segments.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TrajError {
    #[error("A trajectory segment must contain at least one point")]
    EmptySegment,

    #[error("Point {0} of the segment is not finite")]
    NonFinitePoint(usize),

    #[error("Invalid heading tolerance {0}, must be finite and not negative")]
    InvalidTolerance(f64),

    #[error("Invalid point separation {0}, must be finite and greater than zero")]
    InvalidSeparation(f64),
}
