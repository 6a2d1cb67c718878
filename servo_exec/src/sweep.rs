//! # Sweep tracking
//!
//! The traversability map is built from a sensor mounted on a tilting joint which continually
//! sweeps between its minimum and maximum angle. When the map ahead looks wrong, the controller
//! waits for one complete fresh sweep before planning again, so the map has been rebuilt from new
//! data.
//!
//! The tracker learns the bounds of the joint's motion from the samples it is fed. A bound is
//! fixed once the joint reverses direction close to it. After a sweep is triggered the tracker
//! waits for the joint to reach its maximum angle, then for it to travel down to its minimum,
//! at which point the sweep is done.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A single reading of the tilting joint.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq)]
pub struct SweepSample {
    pub time_s: f64,
    pub angle_rad: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweepParams {
    /// How close to a bound the joint must be to count as having reached it
    pub bound_tolerance_rad: f64,

    /// Motion smaller than this between samples is ignored when detecting direction changes
    pub min_movement_rad: f64,
}

pub struct SweepTracker {
    params: SweepParams,

    state: SweepState,

    min_angle_rad: Option<f64>,
    max_angle_rad: Option<f64>,

    min_fixed: bool,
    max_fixed: bool,

    /// Angle of the last sample which moved the joint significantly
    last_angle_rad: Option<f64>,

    last_direction: Option<Direction>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum SweepState {
    /// No sweep has been requested.
    Untracked,

    /// A sweep was requested, waiting for the joint to reach its maximum.
    WaitingForStart,

    /// The joint has reached its maximum, waiting for it to reach its minimum.
    Started,

    /// A full sweep has completed since it was requested.
    Done,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A source of joint samples. Every sample received since the last poll is returned, in order.
pub trait SweepSource {
    fn poll_sweep_samples(&mut self) -> Vec<SweepSample>;
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SweepTracker {
    pub fn new(params: SweepParams) -> Self {
        Self {
            params,
            state: SweepState::Untracked,
            min_angle_rad: None,
            max_angle_rad: None,
            min_fixed: false,
            max_fixed: false,
            last_angle_rad: None,
            last_direction: None,
        }
    }

    /// Forget the learned bounds and go back to `Untracked`.
    pub fn reset(&mut self) {
        self.state = SweepState::Untracked;
        self.min_angle_rad = None;
        self.max_angle_rad = None;
        self.min_fixed = false;
        self.max_fixed = false;
        self.last_angle_rad = None;
        self.last_direction = None;
    }

    pub fn state(&self) -> SweepState {
        self.state
    }

    /// True once both the minimum and maximum angles are known.
    pub fn bounds_known(&self) -> bool {
        self.min_fixed && self.max_fixed
    }

    /// The learned (min, max) angles of the joint.
    pub fn bounds(&self) -> Option<(f64, f64)> {
        match (self.min_angle_rad, self.max_angle_rad) {
            (Some(min), Some(max)) if self.bounds_known() => Some((min, max)),
            _ => None,
        }
    }

    /// Request a fresh sweep.
    ///
    /// Has no effect while a sweep is already being tracked.
    pub fn trigger(&mut self) {
        match self.state {
            SweepState::Untracked | SweepState::Done => {
                info!("Triggering new sweep");
                self.state = SweepState::WaitingForStart;
            }
            SweepState::WaitingForStart | SweepState::Started => {
                debug!("Sweep already in progress, trigger ignored")
            }
        }
    }

    /// True unless a requested sweep has not yet completed.
    pub fn are_sweeps_done(&self) -> bool {
        matches!(self.state, SweepState::Untracked | SweepState::Done)
    }

    /// Acknowledge a completed sweep.
    pub fn consume(&mut self) {
        if self.state == SweepState::Done {
            self.state = SweepState::Untracked;
        }
    }

    /// Feed a new joint sample.
    ///
    /// At most one state transition happens per sample.
    pub fn update(&mut self, sample: &SweepSample) {
        let angle = sample.angle_rad;

        if !angle.is_finite() {
            warn!("Ignoring non-finite sweep sample at {:.3} s", sample.time_s);
            return;
        }

        self.update_direction(angle);

        self.min_angle_rad = Some(self.min_angle_rad.map_or(angle, |m| m.min(angle)));
        self.max_angle_rad = Some(self.max_angle_rad.map_or(angle, |m| m.max(angle)));

        self.step(angle);
    }

    /// Detect reversals of the joint, fixing a bound when one happens close to it.
    fn update_direction(&mut self, angle: f64) {
        let last = match self.last_angle_rad {
            Some(l) => l,
            None => {
                self.last_angle_rad = Some(angle);
                return;
            }
        };

        let delta = angle - last;
        if delta.abs() <= self.params.min_movement_rad {
            return;
        }

        let direction = match delta > 0.0 {
            true => Direction::Up,
            false => Direction::Down,
        };

        if let Some(last_direction) = self.last_direction {
            if last_direction != direction {
                self.on_reversal(last_direction, last);
            }
        }

        self.last_direction = Some(direction);
        self.last_angle_rad = Some(angle);
    }

    fn on_reversal(&mut self, previous: Direction, at_angle_rad: f64) {
        let tol = self.params.bound_tolerance_rad;

        match previous {
            Direction::Up => {
                if !self.max_fixed && self.near(self.max_angle_rad, at_angle_rad, tol) {
                    debug!("Sweep maximum fixed at {:.4} rad", at_angle_rad);
                    self.max_fixed = true;
                }
            }
            Direction::Down => {
                if !self.min_fixed && self.near(self.min_angle_rad, at_angle_rad, tol) {
                    debug!("Sweep minimum fixed at {:.4} rad", at_angle_rad);
                    self.min_fixed = true;
                }
            }
        }
    }

    fn near(&self, bound: Option<f64>, angle: f64, tol: f64) -> bool {
        bound.map_or(false, |b| (b - angle).abs() <= tol)
    }

    fn step(&mut self, angle: f64) {
        let (min, max) = match self.bounds() {
            Some(b) => b,
            None => return,
        };
        let tol = self.params.bound_tolerance_rad;

        match self.state {
            SweepState::WaitingForStart if angle >= max - tol => {
                debug!("Sweep started");
                self.state = SweepState::Started;
            }
            SweepState::Started if angle <= min + tol => {
                info!("Sweep done");
                self.state = SweepState::Done;
            }
            _ => (),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
