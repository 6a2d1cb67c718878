//! Servo control module state

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::Serialize;
use std::fmt;

// Internal
use crate::{
    map::{MapError, MapStatus},
    planner::{DebugMismatch, FollowingDebug, PlanStatus},
    sweep::SweepState,
    tf_gate::TfError,
    traj::{DriveStatus, TrajSegment, Waypoint},
};
use util::params;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Consecutive planning failures of each kind.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct FailureCounters {
    pub no_solution: u32,
    pub unknown_terrain: u32,
}

/// All the bookkeeping of the controller between cycles.
#[derive(Debug, Clone, Default)]
pub struct ServoState {
    pub mode: ServoMode,

    pub counters: FailureCounters,

    /// Time of the last plan which returned a trajectory on known terrain
    pub last_successful_plan_s: Option<f64>,

    /// Whether the map ahead has been checked since the last planning outcome
    pub consistency_checked: bool,

    /// Number of times the planner has been called since the last start
    pub num_plans: u64,

    /// Whether the trajectory source has delivered anything since the last start
    pub trajectory_received: bool,
}

/// The status report containing what happened during a single cycle.
///
/// The report is flat so it can be archived directly as a CSV row.
#[derive(Debug, Default, Clone, Serialize)]
pub struct StatusReport {
    pub time_s: f64,

    /// Name of the mode at the end of the cycle
    pub mode: &'static str,

    /// True if all required transforms had been seen
    pub gate_open: bool,

    pub map_status: Option<MapStatus>,

    pub drive_status: Option<DriveStatus>,

    /// Heading towards the target in the map frame
    pub heading_rad: Option<f64>,

    /// Set if the map consistency was checked this cycle
    pub map_consistent: Option<bool>,

    pub consistency_mean_probability: Option<f64>,

    pub sweep_state: Option<SweepState>,

    /// True if a new sweep was requested this cycle
    pub sweep_triggered: bool,

    pub plan_status: Option<PlanStatus>,

    pub planning_time_s: Option<f64>,

    pub no_solution_count: u32,

    pub unknown_terrain_count: u32,

    /// True if an empty trajectory was output to stop the robot
    pub stop_issued: bool,
}

/// Everything the controller outputs in one cycle.
#[derive(Debug, Clone)]
pub struct ServoOutput {
    /// The trajectory to write, if any is written this cycle. An empty trajectory stops the
    /// robot.
    pub trajectory: Option<Vec<TrajSegment>>,

    /// The target point on the global trajectory, in the global trajectory frame
    pub target: Option<Waypoint>,

    pub mode: ServoMode,

    pub debug: Option<FollowingDebug>,

    pub report: StatusReport,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// The possible modes of execution of ServoCtrl.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum ServoMode {
    /// Not started, or stopped
    Off,

    Running,

    /// The end of the global trajectory has been reached
    ReachedEndOfTrajectory,

    /// Planning failed too many times in a row, no more plans are made until restarted
    Faulted(FaultKind),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum FaultKind {
    NoSolution,
    TrajectoryThroughUnknown,
}

/// Potential errors that can occur during processing of the module.
#[derive(Debug, thiserror::Error)]
pub enum ServoError {
    #[error("Could not load parameters: {0}")]
    ParamLoadError(params::LoadError),

    #[error("Invalid parameter {name}: {reason}")]
    InvalidParam { name: &'static str, reason: String },

    #[error("The controller has not been started")]
    NotStarted,

    #[error("The controller is already running")]
    AlreadyStarted,

    #[error("Transform error: {0}")]
    TfError(TfError),

    #[error("Map error: {0}")]
    MapError(MapError),

    #[error("Planner debug data does not match the planned trajectory: {0}")]
    DebugDataMismatch(DebugMismatch),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl FailureCounters {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Record a plan with no solution, returning the new consecutive count.
    pub fn record_no_solution(&mut self) -> u32 {
        self.unknown_terrain = 0;
        self.no_solution = self.no_solution.saturating_add(1);
        self.no_solution
    }

    /// Record a plan through unknown terrain, returning the new consecutive count.
    pub fn record_unknown_terrain(&mut self) -> u32 {
        self.no_solution = 0;
        self.unknown_terrain = self.unknown_terrain.saturating_add(1);
        self.unknown_terrain
    }
}

impl ServoMode {
    pub fn name(&self) -> &'static str {
        match self {
            ServoMode::Off => "Off",
            ServoMode::Running => "Running",
            ServoMode::ReachedEndOfTrajectory => "ReachedEndOfTrajectory",
            ServoMode::Faulted(FaultKind::NoSolution) => "FaultedNoSolution",
            ServoMode::Faulted(FaultKind::TrajectoryThroughUnknown) => {
                "FaultedTrajectoryThroughUnknown"
            }
        }
    }
}

impl Default for ServoMode {
    fn default() -> Self {
        ServoMode::Off
    }
}

impl fmt::Display for ServoMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl ServoOutput {
    pub(crate) fn new(time_s: f64, mode: ServoMode) -> Self {
        Self {
            trajectory: None,
            target: None,
            mode,
            debug: None,
            report: StatusReport {
                time_s,
                mode: mode.name(),
                ..Default::default()
            },
        }
    }

    /// An output containing only a stop command.
    pub(crate) fn stopped(time_s: f64, mode: ServoMode) -> Self {
        let mut out = Self::new(time_s, mode);
        out.set_stop();
        out
    }

    pub(crate) fn set_stop(&mut self) {
        self.trajectory = Some(vec![]);
        self.report.stop_issued = true;
    }

    /// True if this output commands the robot to stop.
    pub fn is_stop(&self) -> bool {
        matches!(&self.trajectory, Some(t) if t.is_empty())
    }
}

impl From<TfError> for ServoError {
    fn from(e: TfError) -> Self {
        ServoError::TfError(e)
    }
}

impl From<MapError> for ServoError {
    fn from(e: MapError) -> Self {
        ServoError::MapError(e)
    }
}

impl From<DebugMismatch> for ServoError {
    fn from(e: DebugMismatch) -> Self {
        ServoError::DebugDataMismatch(e)
    }
}

impl From<params::LoadError> for ServoError {
    fn from(e: params::LoadError) -> Self {
        ServoError::ParamLoadError(e)
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_counters_saturate_and_reset_each_other() {
        let mut c = FailureCounters::default();
        assert_eq!(c.record_no_solution(), 1);
        assert_eq!(c.record_no_solution(), 2);
        assert_eq!(c.record_unknown_terrain(), 1);
        assert_eq!(c.no_solution, 0);

        c.unknown_terrain = u32::MAX;
        assert_eq!(c.record_unknown_terrain(), u32::MAX);

        c.reset();
        assert_eq!(c, FailureCounters::default());
    }
}
