//! Segment follower
//!
//! Tracks the robot's progress along a single trajectory segment and picks a target point a fixed
//! arc length ahead of it. Progress only ever increases, so a robot which drifts backwards keeps
//! its target instead of being pulled back along the segment.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use super::TrajSegment;
use crate::loc::Pose;
use util::maths::wrap_pi;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Progress within this distance of the end of the segment counts as being at the end
const END_PROGRESS_EPSILON_M: f64 = 1e-6;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters of segment following and drive direction resolution.
#[derive(Debug, Clone, Deserialize)]
pub struct FollowerParams {
    /// Position tolerance given to targets while driving along a segment
    pub running_position_tolerance_m: f64,

    /// Position tolerance given to the final point of the final segment
    pub end_position_tolerance_m: f64,

    /// The end of a segment counts as reached once the robot is closer than this to its last
    /// point
    pub end_reached_distance_m: f64,

    /// Largest heading error accepted on the first step along a new segment
    pub initial_stability_limit_rad: f64,
}

/// The point on the segment the robot is currently aiming for.
#[derive(Debug, Copy, Clone, Serialize, PartialEq)]
pub struct CurvePoint {
    pub position_m: Vector3<f64>,

    /// Heading of the segment at this point
    pub heading_rad: f64,
}

pub struct SegmentFollower {
    params: FollowerParams,

    /// Arc length of the target point ahead of the robot's projected position
    forward_length_m: f64,

    segment: Option<TrajSegment>,

    /// Arc length along the segment the robot has reached
    progress_s: f64,

    first_step: bool,

    curve_point: Option<CurvePoint>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum FollowStatus {
    /// No segment is set.
    NoSegment,

    /// Following the segment, the curve point is ahead of the robot.
    Running,

    /// The robot is at (or beyond) the end of the segment, the curve point is its last point.
    ReachedEnd,

    /// On the first step of a new segment the robot's heading was too far from the segment's.
    InitialStabilityFailed,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl SegmentFollower {
    pub fn new(params: FollowerParams, forward_length_m: f64) -> Self {
        Self {
            params,
            forward_length_m,
            segment: None,
            progress_s: 0.0,
            first_step: true,
            curve_point: None,
        }
    }

    pub fn set_forward_length(&mut self, forward_length_m: f64) {
        self.forward_length_m = forward_length_m;
    }

    /// Start following a new segment from its beginning.
    pub fn set_segment(&mut self, segment: TrajSegment) {
        self.segment = Some(segment);
        self.progress_s = 0.0;
        self.first_step = true;
        self.curve_point = None;
    }

    pub fn remove_segment(&mut self) {
        self.segment = None;
        self.progress_s = 0.0;
        self.first_step = true;
        self.curve_point = None;
    }

    pub fn segment(&self) -> Option<&TrajSegment> {
        self.segment.as_ref()
    }

    pub fn has_segment(&self) -> bool {
        self.segment.is_some()
    }

    pub fn progress_s(&self) -> f64 {
        self.progress_s
    }

    /// The target point chosen by the last call to [`SegmentFollower::traverse`].
    pub fn curve_point(&self) -> Option<CurvePoint> {
        self.curve_point
    }

    /// Advance along the segment given the robot's pose in the segment's frame.
    pub fn traverse(&mut self, pose: &Pose) -> FollowStatus {
        let segment = match &self.segment {
            Some(s) => s,
            None => return FollowStatus::NoSegment,
        };

        let length_m = segment.length_m();
        let position = pose.position2();

        self.progress_s = segment.project(&position, self.progress_s);

        let dist_to_end = (position - segment.last().xy()).norm();

        if self.progress_s >= length_m - END_PROGRESS_EPSILON_M
            || dist_to_end <= self.params.end_reached_distance_m
        {
            self.progress_s = length_m;
            self.curve_point = Some(CurvePoint {
                position_m: *segment.last(),
                heading_rad: segment.heading_at(length_m),
            });
            return FollowStatus::ReachedEnd;
        }

        let target_s = (self.progress_s + self.forward_length_m).min(length_m);
        self.curve_point = Some(CurvePoint {
            position_m: segment.point_at(target_s),
            heading_rad: segment.heading_at(target_s),
        });

        if self.first_step {
            self.first_step = false;

            let heading_error = wrap_pi(pose.get_heading() - segment.heading_at(self.progress_s));
            if heading_error.abs() > self.params.initial_stability_limit_rad {
                return FollowStatus::InitialStabilityFailed;
            }
        }

        FollowStatus::Running
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
