//! Servo control parameters

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::Deserialize;

// Internal
use super::ServoError;
use crate::{sweep::SweepParams, traj::FollowerParams};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for servo control
#[derive(Deserialize, Debug, Clone)]
pub struct Params {
    /// Minimum time between a successful plan and the next planning attempt
    pub replanning_delay_s: f64,

    /// Distance ahead of the robot checked for map consistency. Also the side length of the
    /// checked region.
    pub consistency_forward_distance_m: f64,

    /// Mean drive probability the region ahead must reach for the map to be consistent
    pub min_drive_probability: f64,

    /// Number of consecutive plans without a solution tolerated before faulting
    pub fail_count: u32,

    /// Number of consecutive plans through unknown terrain tolerated before faulting
    pub unknown_retry_count: u32,

    /// If false, exceeding either failure count is only logged and planning carries on
    pub allow_fault: bool,

    /// How far ahead the planner plans, also the distance of the target point along the
    /// global trajectory
    pub search_horizon_m: f64,

    /// Planned trajectories shorter than this are not accepted by the planner
    pub min_trajectory_length_m: f64,

    pub allow_backwards_driving: bool,

    pub follower: FollowerParams,

    pub sweep: SweepParams,

    #[serde(default)]
    pub debug: DebugParams,
}

/// Which debug artefacts to produce.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct DebugParams {
    /// Output the planner's search tree
    #[serde(default)]
    pub output_tree: bool,

    /// Output the horizon line
    #[serde(default)]
    pub output_horizon: bool,

    /// Check that the planner's debug steps match the trajectory it produced
    #[serde(default)]
    pub check_steps: bool,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Params {
    /// Check that the parameters describe a usable controller.
    pub fn validate(&self) -> Result<(), ServoError> {
        check_non_negative("replanning_delay_s", self.replanning_delay_s)?;
        check_positive(
            "consistency_forward_distance_m",
            self.consistency_forward_distance_m,
        )?;
        check_positive("search_horizon_m", self.search_horizon_m)?;
        check_non_negative("min_trajectory_length_m", self.min_trajectory_length_m)?;
        check_non_negative(
            "follower.running_position_tolerance_m",
            self.follower.running_position_tolerance_m,
        )?;
        check_non_negative(
            "follower.end_position_tolerance_m",
            self.follower.end_position_tolerance_m,
        )?;
        check_non_negative(
            "follower.end_reached_distance_m",
            self.follower.end_reached_distance_m,
        )?;
        check_non_negative(
            "follower.initial_stability_limit_rad",
            self.follower.initial_stability_limit_rad,
        )?;
        check_non_negative("sweep.bound_tolerance_rad", self.sweep.bound_tolerance_rad)?;
        check_non_negative("sweep.min_movement_rad", self.sweep.min_movement_rad)?;

        if !(0.0..=1.0).contains(&self.min_drive_probability) {
            return Err(ServoError::InvalidParam {
                name: "min_drive_probability",
                reason: format!("{} is not in [0, 1]", self.min_drive_probability),
            });
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn check_positive(name: &'static str, value: f64) -> Result<(), ServoError> {
    match value.is_finite() && value > 0.0 {
        true => Ok(()),
        false => Err(ServoError::InvalidParam {
            name,
            reason: format!("{} must be finite and greater than zero", value),
        }),
    }
}

fn check_non_negative(name: &'static str, value: f64) -> Result<(), ServoError> {
    match value.is_finite() && value >= 0.0 {
        true => Ok(()),
        false => Err(ServoError::InvalidParam {
            name,
            reason: format!("{} must be finite and not negative", value),
        }),
    }
}
