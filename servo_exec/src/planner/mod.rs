//! # Local planner
//!
//! The controller does not plan itself. It hands the current traversability grid, the robot's
//! pose and the direction it wants to drive in to a [`LocalPlanner`], and passes the planner's
//! trajectory on unchanged. The planner is also expected to report why it could not plan.

// ------------------------------------------------------------------------------------------------
// MODS
// ------------------------------------------------------------------------------------------------

/// Debug data produced by planners and its consistency with the produced trajectory
pub mod debug;

/// Reference planner choosing directions from a set of angular windows
pub mod window;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use nalgebra::Isometry3;
use serde::Serialize;

use crate::{loc::Pose, map::TravGrid, traj::TrajSegment};

pub use debug::*;
pub use window::{WindowPlanner, WindowPlannerParams};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Everything a planner is given for a single planning request.
#[derive(Debug, Clone)]
pub struct PlanRequest {
    /// Pose of the robot body in the map frame
    pub pose: Pose,

    /// Direction the robot should head in, in the map frame
    pub heading_rad: f64,

    /// How far ahead of the robot the planned trajectory should reach
    pub horizon_m: f64,

    /// Transform from the map frame into the frame the trajectory must be expressed in
    pub map2trajectory: Isometry3<f64>,

    /// Trajectories shorter than this are not a solution
    pub min_trajectory_length_m: f64,

    pub allow_backwards: bool,
}

#[derive(Debug, Clone)]
pub struct PlanResult {
    pub status: PlanStatus,

    /// The planned trajectory in the trajectory frame. May be empty when no solution was found.
    pub trajectory: Vec<TrajSegment>,

    /// Optional debug data, positions are in the map frame
    pub debug: Option<PlanDebug>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum PlanStatus {
    TrajectoryOk,

    /// No trajectory of the minimum length could be found.
    NoSolution,

    /// A trajectory was found, but it crosses cells of unknown traversability.
    TrajectoryThroughUnknown,
}

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A local planner which can be driven by the servo controller.
pub trait LocalPlanner {
    fn plan(&mut self, grid: &TravGrid, request: &PlanRequest) -> PlanResult;
}

impl<P: LocalPlanner + ?Sized> LocalPlanner for Box<P> {
    fn plan(&mut self, grid: &TravGrid, request: &PlanRequest) -> PlanResult {
        (**self).plan(grid, request)
    }
}
