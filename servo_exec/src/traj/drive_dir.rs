//! Drive direction resolution
//!
//! Owns the segment queue and the follower. Each time a new robot position is available the
//! follower is advanced, moving on through the queue as segments are finished, and the heading
//! from the robot towards the follower's target is computed in the map frame.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::{info, warn};
use nalgebra::{Isometry3, Point3, Vector2, Vector3};
use serde::Serialize;

use super::*;
use crate::loc::Pose;
use util::maths::clamp;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Below this planar distance to the target there is no meaningful direction to drive in
const MIN_TARGET_DISTANCE_M: f64 = 1e-9;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

pub struct DriveDirResolver {
    params: FollowerParams,

    queue: TrajQueue,

    follower: SegmentFollower,

    /// Heading towards the current target in the map frame, if known
    heading_rad: Option<f64>,

    /// Latched once the end of the last segment has been reached
    reached_end: bool,
}

/// The output of a single drive direction resolution.
#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub struct DriveDir {
    pub status: DriveStatus,

    /// The point the robot should drive to, in the global trajectory frame
    pub target: Option<Waypoint>,

    /// Heading towards the target in the map frame
    pub heading_rad: Option<f64>,

    /// True only on the resolution in which the end of the trajectory was first reached
    pub newly_reached_end: bool,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum DriveStatus {
    /// There is no segment to follow.
    NoTrajectory,

    /// Driving towards a target on the current segment.
    Running,

    /// The final point of the final segment has been reached.
    ReachedEnd,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl DriveDirResolver {
    /// Create a new resolver. The follower's target is placed `forward_length_m` ahead of the
    /// robot along the current segment.
    pub fn new(params: FollowerParams, forward_length_m: f64) -> Self {
        Self {
            follower: SegmentFollower::new(params.clone(), forward_length_m),
            params,
            queue: TrajQueue::new(),
            heading_rad: None,
            reached_end: false,
        }
    }

    /// Drop the trajectory and every derived value.
    pub fn reset(&mut self) {
        self.queue.clear();
        self.follower.remove_segment();
        self.heading_rad = None;
        self.reached_end = false;
    }

    /// Replace the global trajectory.
    ///
    /// The current segment and heading are invalidated, no heading will be available until the
    /// next call to [`DriveDirResolver::resolve`]. Returns true if there is anything to follow.
    pub fn replace(&mut self, segments: Vec<TrajSegment>) -> bool {
        self.reset();
        self.queue.replace(segments);

        match self.queue.take_next() {
            Some(s) => {
                self.follower.set_segment(s);
                true
            }
            None => false,
        }
    }

    /// The latest heading towards the target, if known.
    pub fn heading(&self) -> Option<f64> {
        self.heading_rad
    }

    pub fn has_trajectory(&self) -> bool {
        self.follower.has_segment()
    }

    /// Number of segments waiting behind the current one.
    pub fn num_queued(&self) -> usize {
        self.queue.len()
    }

    /// Advance along the trajectory and compute the new drive direction.
    ///
    /// `body2global_traj` places the robot in the frame of the global trajectory, `body2map` in
    /// the map frame.
    pub fn resolve(
        &mut self,
        body2global_traj: &Isometry3<f64>,
        body2map: &Isometry3<f64>,
    ) -> DriveDir {
        let pose = Pose::from_isometry(body2global_traj);

        // Each finished segment pops one from the queue, so this is bounded by the queue length
        let mut num_advances = self.queue.len();

        loop {
            match self.follower.traverse(&pose) {
                FollowStatus::NoSegment => {
                    self.heading_rad = None;
                    return DriveDir {
                        status: DriveStatus::NoTrajectory,
                        target: None,
                        heading_rad: None,
                        newly_reached_end: false,
                    };
                }
                FollowStatus::ReachedEnd => {
                    if num_advances > 0 {
                        if let Some(next) = self.queue.take_next() {
                            num_advances -= 1;
                            info!(
                                "Segment finished, following next segment ({} remaining)",
                                self.queue.len()
                            );
                            self.follower.set_segment(next);
                            continue;
                        }
                    }

                    return self.end_reached();
                }
                FollowStatus::InitialStabilityFailed => {
                    warn!("Robot heading is far from the direction of the new segment");
                    break;
                }
                FollowStatus::Running => break,
            }
        }

        self.reached_end = false;

        let target = self.target(self.params.running_position_tolerance_m);
        self.heading_rad = target
            .and_then(|t| heading_to_target(body2map, body2global_traj, &t.position_m));

        DriveDir {
            status: DriveStatus::Running,
            target,
            heading_rad: self.heading_rad,
            newly_reached_end: false,
        }
    }

    fn end_reached(&mut self) -> DriveDir {
        let newly_reached_end = !self.reached_end;
        self.reached_end = true;
        self.heading_rad = None;

        DriveDir {
            status: DriveStatus::ReachedEnd,
            target: self.target(self.params.end_position_tolerance_m),
            heading_rad: None,
            newly_reached_end,
        }
    }

    fn target(&self, position_tolerance_m: f64) -> Option<Waypoint> {
        let heading_tolerance_rad = self
            .follower
            .segment()
            .map(|s| s.heading_tolerance_rad())
            .unwrap_or_default();

        self.follower.curve_point().map(|c| Waypoint {
            position_m: c.position_m,
            heading_rad: c.heading_rad,
            position_tolerance_m,
            heading_tolerance_rad,
        })
    }
}

/// Heading in the map frame from the robot towards a target given in the global trajectory frame.
///
/// The heading is positive counter-clockwise from the map's +X axis, in the range (-pi, pi].
/// Returns `None` if the target is (in the XY plane) on top of the robot.
pub fn heading_to_target(
    body2map: &Isometry3<f64>,
    body2global_traj: &Isometry3<f64>,
    target_m: &Vector3<f64>,
) -> Option<f64> {
    let global_traj2map = body2map * body2global_traj.inverse();
    let target_map = global_traj2map * Point3::from(*target_m);

    let diff = target_map.coords - body2map.translation.vector;
    let planar = Vector2::new(diff.x, diff.y);
    let norm = planar.norm();

    if !norm.is_finite() || norm < MIN_TARGET_DISTANCE_M {
        return None;
    }

    let unit = planar / norm;
    let mut heading = clamp(&unit.dot(&Vector2::x()), &-1.0, &1.0).acos();
    if unit.y < 0.0 {
        heading = -heading;
    }

    Some(heading)
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
