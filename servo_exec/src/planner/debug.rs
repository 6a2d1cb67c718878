//! Planner debug data
//!
//! Planners may record one [`DebugStep`] per expansion and the search tree they built. The steps
//! are matched against the waypoints of the trajectory actually produced, which catches planners
//! whose debug output has drifted away from their real behaviour.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use nalgebra::Vector3;
use serde::Serialize;

use crate::loc::Pose;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Largest distance between a waypoint and a debug step for them to be the same point
const MATCH_DISTANCE_M: f64 = 1e-6;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Debug data recorded by the planner during a single expansion.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DebugStep {
    /// Pose the expansion started from, in the map frame
    pub pose: Pose,

    /// Direction chosen for this step
    pub direction_rad: f64,

    /// The (start, end) windows of directions which were allowed, in the map frame
    pub windows: Vec<(f64, f64)>,
}

/// A node of a flattened search tree.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TreeNode {
    pub node_id: usize,
    pub pose: Pose,
    pub cost: f64,
    pub heuristic: f64,
    pub direction_rad: f64,
    pub position_tolerance_m: f64,
    pub heading_tolerance_rad: f64,
    pub children: Vec<usize>,
}

/// The search tree built by the planner.
#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct SearchTree {
    pub nodes: Vec<TreeNode>,

    /// Pose of the tree's frame in the map frame
    pub tree2map: Pose,

    /// The node the returned trajectory ends at
    pub final_node: Option<usize>,
}

/// Debug data returned alongside a plan.
#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct PlanDebug {
    pub steps: Vec<DebugStep>,

    pub tree: Option<SearchTree>,

    /// End points of the horizon line, in the map frame
    pub horizon_m: Option<[Vector3<f64>; 2]>,
}

/// Debug artefacts of a single planning cycle of the controller.
#[derive(Debug, Clone, Serialize)]
pub struct FollowingDebug {
    pub planning_time_s: f64,

    pub horizon_m: Option<[Vector3<f64>; 2]>,

    pub tree: Option<SearchTree>,

    /// The debug steps matching the waypoints of the produced trajectory, in order
    pub steps: Vec<DebugStep>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum DebugMismatch {
    #[error("Waypoint {index} at {position:?} has no matching debug step")]
    UnmatchedWaypoint {
        index: usize,
        position: Vector3<f64>,
    },
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Find the debug step for each waypoint of a trajectory (given in the map frame).
///
/// Every waypoint except the last must match the position of some step. The last waypoint is the
/// point the final expansion led to, which has no step of its own.
pub fn match_debug_steps(
    waypoints_m: &[Vector3<f64>],
    steps: &[DebugStep],
) -> Result<Vec<DebugStep>, DebugMismatch> {
    let mut matched = Vec::with_capacity(waypoints_m.len());

    for (i, wp) in waypoints_m.iter().enumerate() {
        match steps
            .iter()
            .find(|s| (s.pose.position_m - wp).norm() <= MATCH_DISTANCE_M)
        {
            Some(s) => matched.push(s.clone()),
            None if i + 1 == waypoints_m.len() => (),
            None => {
                return Err(DebugMismatch::UnmatchedWaypoint {
                    index: i,
                    position: *wp,
                })
            }
        }
    }

    Ok(matched)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
