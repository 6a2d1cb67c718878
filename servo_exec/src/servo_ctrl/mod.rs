//! # Servo control module
//!
//! Servo control keeps the robot moving along the global trajectory by periodically asking a
//! local planner for a short trajectory through the current traversability map. It is run once
//! per cycle by calling [`ServoCtrl::tick`], which performs, in order:
//!
//!  1. Draining the sweep samples into the sweep tracker.
//!  1. Pulling the required transforms. Nothing else happens until all have been seen.
//!  1. Resolving the drive direction towards the target point on the global trajectory.
//!  1. Polling for a new map and global trajectory. A missing input stops the robot.
//!  1. Rate limiting planning by the replanning delay.
//!  1. Checking the map ahead of the robot, requesting a new sweep if it looks wrong, and waiting
//!     for any requested sweep to complete.
//!  1. Planning, and counting consecutive failures of each kind. Too many failures in a row fault
//!     the controller, after which it only outputs stop commands until restarted.
//!
//! Whenever the controller cannot safely command motion it outputs an empty trajectory.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod params;
pub mod state;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{debug, error, info, warn};
use nalgebra::{Isometry3, Point3, Vector3};
use std::time::Instant;

// Internal
pub use params::{DebugParams, Params};
pub use state::*;

use crate::{
    consistency::ConsistencyChecker,
    map::{MapIngestor, MapSource, MapStatus, TravGrid},
    planner::{match_debug_steps, FollowingDebug, LocalPlanner, PlanRequest, PlanResult, PlanStatus},
    poll::Poll,
    sweep::{SweepSource, SweepState, SweepTracker},
    tf_gate::{
        TransformGate, TransformProvider, BODY_CENTER2GLOBAL_TRAJECTORY, BODY_CENTER2MAP,
        BODY_CENTER2TRAJECTORY,
    },
    traj::{DriveDirResolver, DriveStatus, TrajSource},
    loc::Pose,
};
use util::{params as param_loader, time::std_duration_to_micros};

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// Every input the controller reads during a cycle.
pub trait ServoSources: TransformProvider + MapSource + TrajSource + SweepSource {
    /// True if something is consuming the trajectory output. Without a consumer the controller
    /// does not plan.
    fn output_connected(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

pub struct ServoCtrl<P: LocalPlanner> {
    params: Params,

    planner: P,

    gate: TransformGate,

    map: MapIngestor,

    drive_dir: DriveDirResolver,

    consistency: ConsistencyChecker,

    sweep: SweepTracker,

    state: ServoState,

    /// Time of the latest cycle
    last_time_s: f64,
}

/// Outcome of polling the global trajectory source.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum TrajPoll {
    NoData,
    Unchanged,
    NewData,
    NewEmpty,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl<P: LocalPlanner> ServoCtrl<P> {
    /// Create a new controller. The controller is `Off` until started.
    pub fn configure(params: Params, planner: P) -> Result<Self, ServoError> {
        params.validate()?;

        Ok(Self {
            gate: TransformGate::default(),
            map: MapIngestor::new(),
            drive_dir: DriveDirResolver::new(params.follower.clone(), params.search_horizon_m),
            consistency: ConsistencyChecker::new(
                params.consistency_forward_distance_m,
                params.min_drive_probability,
            ),
            sweep: SweepTracker::new(params.sweep.clone()),
            state: ServoState::default(),
            last_time_s: 0.0,
            params,
            planner,
        })
    }

    /// Load the parameters from the given file and create the controller.
    pub fn from_params_file(params_path: &str, planner: P) -> Result<Self, ServoError> {
        let params: Params = param_loader::load(params_path)?;
        Self::configure(params, planner)
    }

    /// Start the controller, resetting everything it has learned.
    pub fn start(&mut self) -> Result<(), ServoError> {
        if self.state.mode != ServoMode::Off {
            return Err(ServoError::AlreadyStarted);
        }

        self.gate.reset();
        self.map.reset();
        self.drive_dir.reset();
        self.sweep.reset();
        self.state = ServoState {
            mode: ServoMode::Running,
            ..Default::default()
        };

        info!("Servo control started");

        Ok(())
    }

    /// Stop the controller, returning the stop command to send to the robot.
    pub fn stop(&mut self) -> ServoOutput {
        info!("Write empty trajectory to stop the robot");
        self.state.mode = ServoMode::Off;

        ServoOutput::stopped(self.last_time_s, ServoMode::Off)
    }

    pub fn mode(&self) -> ServoMode {
        self.state.mode
    }

    pub fn state(&self) -> &ServoState {
        &self.state
    }

    pub fn sweep_state(&self) -> SweepState {
        self.sweep.state()
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn planner(&self) -> &P {
        &self.planner
    }

    /// The current traversability grid, if one has been received.
    pub fn grid(&self) -> Option<std::sync::Arc<TravGrid>> {
        self.map.grid()
    }

    /// Run a single cycle of the controller.
    ///
    /// Any error is fatal for the current activation: the controller goes `Off` and must be
    /// started again.
    pub fn tick<S: ServoSources + ?Sized>(
        &mut self,
        time_s: f64,
        sources: &mut S,
    ) -> Result<ServoOutput, ServoError> {
        if self.state.mode == ServoMode::Off {
            return Err(ServoError::NotStarted);
        }

        self.last_time_s = time_s;
        let mut out = ServoOutput::new(time_s, self.state.mode);

        // Mode execution
        let result = match self.state.mode {
            ServoMode::Faulted(_) => self.mode_faulted(sources, &mut out),
            _ => self.mode_running(time_s, sources, &mut out),
        };

        if let Err(e) = result {
            error!("Fatal error in servo control, stopping: {}", e);
            self.state.mode = ServoMode::Off;
            return Err(e);
        }

        out.mode = self.state.mode;
        out.report.mode = self.state.mode.name();
        out.report.heading_rad = self.drive_dir.heading();
        out.report.sweep_state = Some(self.sweep.state());
        out.report.no_solution_count = self.state.counters.no_solution;
        out.report.unknown_terrain_count = self.state.counters.unknown_terrain;

        Ok(out)
    }

    fn mode_faulted<S: ServoSources + ?Sized>(
        &mut self,
        sources: &mut S,
        out: &mut ServoOutput,
    ) -> Result<(), ServoError> {
        self.drain_sweep_samples(sources);
        out.set_stop();
        Ok(())
    }

    fn drain_sweep_samples<S: SweepSource + ?Sized>(&mut self, sources: &mut S) {
        for sample in sources.poll_sweep_samples() {
            self.sweep.update(&sample);
        }
    }

    fn mode_running<S: ServoSources + ?Sized>(
        &mut self,
        time_s: f64,
        sources: &mut S,
        out: &mut ServoOutput,
    ) -> Result<(), ServoError> {
        self.drain_sweep_samples(sources);

        let updated = self.gate.pull(sources, time_s)?;
        out.report.gate_open = self.gate.all_required_seen();
        if !out.report.gate_open {
            debug!("Waiting for needed transformations");
            return Ok(());
        }

        if updated.iter().any(|n| n == BODY_CENTER2GLOBAL_TRAJECTORY) {
            self.update_drive_dir(out)?;
        }

        let map_status = self.map.poll(sources)?;
        out.report.map_status = Some(map_status);

        let traj_status = self.poll_global_trajectory(sources);

        if map_status == MapStatus::NoData || traj_status == TrajPoll::NoData {
            debug!(
                "Missing input (map: {:?}, trajectory: {:?}), stopping",
                map_status, traj_status
            );
            out.set_stop();
            return Ok(());
        }

        if traj_status == TrajPoll::NewEmpty {
            out.set_stop();
            return Ok(());
        }

        if !sources.output_connected() {
            debug!("Trajectory output not connected, not planning");
            out.set_stop();
            return Ok(());
        }

        if self.state.mode == ServoMode::ReachedEndOfTrajectory {
            out.set_stop();
            return Ok(());
        }

        if let Some(last) = self.state.last_successful_plan_s {
            if time_s - last < self.params.replanning_delay_s {
                return Ok(());
            }
        }

        let grid = match self.map.grid() {
            Some(g) => g,
            None => return Ok(()),
        };
        let body2map = self.gate.try_get(BODY_CENTER2MAP)?;

        if !self.state.consistency_checked {
            let report = self.consistency.check(
                &grid,
                &body2map.translation.vector,
                self.drive_dir.heading(),
            );
            self.state.consistency_checked = true;
            out.report.map_consistent = Some(report.consistent);
            out.report.consistency_mean_probability = report.mean_probability;

            if !report.consistent {
                info!("Map is not consistent ahead of the robot, waiting for a new sweep");
                self.trigger_sweep(out);
            }
        }

        if !self.sweep.are_sweeps_done() {
            debug!("Waiting for sweep to finish");
            return Ok(());
        }

        let heading_rad = match self.drive_dir.heading() {
            Some(h) => h,
            None => {
                debug!("No heading towards the trajectory yet, not planning");
                return Ok(());
            }
        };

        self.sweep.consume();

        self.plan(time_s, &grid, &body2map, heading_rad, out)
    }

    /// Advance the drive direction and update the mode from it.
    fn update_drive_dir(&mut self, out: &mut ServoOutput) -> Result<(), ServoError> {
        let body2global = self.gate.try_get(BODY_CENTER2GLOBAL_TRAJECTORY)?;
        let body2map = self.gate.try_get(BODY_CENTER2MAP)?;

        let drive_dir = self.drive_dir.resolve(&body2global, &body2map);
        out.target = drive_dir.target;
        out.report.drive_status = Some(drive_dir.status);

        if drive_dir.newly_reached_end {
            info!("Reached the end of the trajectory");
        } else if let Some(h) = drive_dir.heading_rad {
            debug!("Heading towards target: {:.3} rad", h);
        }

        match drive_dir.status {
            DriveStatus::ReachedEnd if self.state.mode == ServoMode::Running => {
                self.state.mode = ServoMode::ReachedEndOfTrajectory;
            }
            DriveStatus::Running if self.state.mode == ServoMode::ReachedEndOfTrajectory => {
                self.state.mode = ServoMode::Running;
            }
            _ => (),
        }

        Ok(())
    }

    fn poll_global_trajectory<S: TrajSource + ?Sized>(&mut self, sources: &mut S) -> TrajPoll {
        match sources.poll_trajectory() {
            Poll::NoData => TrajPoll::NoData,
            // Anything the source delivered before the last start has been dropped
            Poll::OldData if !self.state.trajectory_received => TrajPoll::NoData,
            Poll::OldData => TrajPoll::Unchanged,
            Poll::NewData(segments) if segments.is_empty() => {
                info!("Received empty trajectory, stopping");
                self.state.trajectory_received = true;
                self.drive_dir.replace(segments);
                TrajPoll::NewEmpty
            }
            Poll::NewData(segments) => {
                info!("Received new trajectory of {} segments", segments.len());
                self.drive_dir.replace(segments);
                self.state.trajectory_received = true;

                if self.state.mode == ServoMode::ReachedEndOfTrajectory {
                    self.state.mode = ServoMode::Running;
                }

                TrajPoll::NewData
            }
        }
    }

    fn trigger_sweep(&mut self, out: &mut ServoOutput) {
        self.sweep.trigger();
        out.report.sweep_triggered = true;
    }

    /// Run the planner and interpret its outcome.
    fn plan(
        &mut self,
        time_s: f64,
        grid: &TravGrid,
        body2map: &Isometry3<f64>,
        heading_rad: f64,
        out: &mut ServoOutput,
    ) -> Result<(), ServoError> {
        let body2traj = self.gate.try_get(BODY_CENTER2TRAJECTORY)?;

        let request = PlanRequest {
            pose: Pose::from_isometry(body2map),
            heading_rad,
            horizon_m: self.params.search_horizon_m,
            map2trajectory: body2traj * body2map.inverse(),
            min_trajectory_length_m: self.params.min_trajectory_length_m,
            allow_backwards: self.params.allow_backwards_driving,
        };

        info!("Planning towards heading {:.3} rad", heading_rad);

        let start = Instant::now();
        let result = self.planner.plan(grid, &request);
        let elapsed = start.elapsed();

        self.state.num_plans += 1;
        debug!("Planner took {:.0} us", std_duration_to_micros(elapsed));

        let planning_time_s = elapsed.as_secs_f64();
        out.report.plan_status = Some(result.status);
        out.report.planning_time_s = Some(planning_time_s);

        out.debug = self.debug_output(&result, &request, planning_time_s)?;

        // The planner's trajectory is always valid, failures carry an empty one
        out.trajectory = Some(result.trajectory);

        match result.status {
            PlanStatus::TrajectoryOk => {
                self.state.counters.reset();
                self.state.last_successful_plan_s = Some(time_s);
            }
            PlanStatus::TrajectoryThroughUnknown => {
                let count = self.state.counters.record_unknown_terrain();
                warn!("Planned trajectory leads through unknown terrain ({} in a row)", count);
                self.trigger_sweep(out);

                if count > self.params.unknown_retry_count {
                    self.escalate(FaultKind::TrajectoryThroughUnknown, out);
                }
            }
            PlanStatus::NoSolution => {
                let count = self.state.counters.record_no_solution();
                warn!("Planner found no solution ({} in a row)", count);
                self.trigger_sweep(out);

                if count > self.params.fail_count {
                    self.escalate(FaultKind::NoSolution, out);
                }
            }
        }

        if !matches!(self.state.mode, ServoMode::Faulted(_)) {
            self.state.consistency_checked = false;
        }

        Ok(())
    }

    fn escalate(&mut self, kind: FaultKind, out: &mut ServoOutput) {
        match self.params.allow_fault {
            true => {
                error!("Too many planning failures in a row ({:?}), faulting", kind);
                self.state.mode = ServoMode::Faulted(kind);
                out.set_stop();
            }
            false => {
                error!(
                    "Too many planning failures in a row ({:?}), faulting is disabled so \
                     planning continues",
                    kind
                );
            }
        }
    }

    /// Build the debug artefacts of a planning cycle, checking the planner's debug steps against
    /// the trajectory if requested.
    fn debug_output(
        &self,
        result: &PlanResult,
        request: &PlanRequest,
        planning_time_s: f64,
    ) -> Result<Option<FollowingDebug>, ServoError> {
        let switches = &self.params.debug;
        if !(switches.output_tree || switches.output_horizon || switches.check_steps) {
            return Ok(None);
        }

        let plan_debug = match &result.debug {
            Some(d) => d,
            None => return Ok(None),
        };

        let steps = match switches.check_steps {
            true => {
                let traj2map = request.map2trajectory.inverse();
                let points: Vec<Vector3<f64>> = result
                    .trajectory
                    .iter()
                    .flat_map(|s| s.points_m().iter())
                    .map(|p| (traj2map * Point3::from(*p)).coords)
                    .collect();

                match_debug_steps(&points, &plan_debug.steps)?
            }
            false => vec![],
        };

        Ok(Some(FollowingDebug {
            planning_time_s,
            horizon_m: match switches.output_horizon {
                true => plan_debug.horizon_m,
                false => None,
            },
            tree: match switches.output_tree {
                true => plan_debug.tree.clone(),
                false => None,
            },
            steps,
        }))
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        map::MapMsg,
        planner::{DebugStep, PlanDebug},
        sweep::{SweepParams, SweepSample},
        tf_gate::TfStatus,
        traj::{FollowerParams, TrajSegment},
    };
    use nalgebra::Vector2;
    use std::collections::{HashSet, VecDeque};

    // -----------------------------------------------------------------------
    // MOCKS
    // -----------------------------------------------------------------------

    struct MockSources {
        pose: Isometry3<f64>,
        missing: HashSet<&'static str>,
        broken: Option<&'static str>,

        pending_map: Option<MapMsg>,
        map_sent: bool,
        map_lost: bool,

        pending_traj: Option<Vec<TrajSegment>>,
        traj_sent: bool,

        sweep_time_s: f64,
        connected: bool,
    }

    impl MockSources {
        /// Robot at `(x, 0)` facing +X, a drivable map and a straight trajectory along +X.
        fn new(x: f64) -> Self {
            let grid = TravGrid::from_elem(0.5, (40, 40), Vector2::new(-5.0, -10.0), 1.0).unwrap();

            Self {
                pose: Pose::from_xy_heading(x, 0.0, 0.0).to_isometry(),
                missing: HashSet::new(),
                broken: None,
                pending_map: Some(MapMsg::from_grid(&grid)),
                map_sent: false,
                map_lost: false,
                pending_traj: Some(vec![straight(0.0, 10.0)]),
                traj_sent: false,
                sweep_time_s: 0.0,
                connected: true,
            }
        }
    }

    fn straight(from_x: f64, to_x: f64) -> TrajSegment {
        TrajSegment::new(
            vec![Vector3::new(from_x, 0.0, 0.0), Vector3::new(to_x, 0.0, 0.0)],
            0.1,
        )
        .unwrap()
    }

    impl TransformProvider for MockSources {
        fn resolve(&mut self, name: &str, _time_s: f64) -> TfStatus {
            if self.broken == Some(name) {
                TfStatus::Unresolvable("frame missing from the tree".into())
            } else if self.missing.contains(name) {
                TfStatus::NotYetAvailable
            } else {
                TfStatus::Available(self.pose)
            }
        }
    }

    impl MapSource for MockSources {
        fn poll_map(&mut self) -> Poll<MapMsg> {
            if self.map_lost {
                return Poll::NoData;
            }
            match self.pending_map.take() {
                Some(m) => {
                    self.map_sent = true;
                    Poll::NewData(m)
                }
                None if self.map_sent => Poll::OldData,
                None => Poll::NoData,
            }
        }
    }

    impl TrajSource for MockSources {
        fn poll_trajectory(&mut self) -> Poll<Vec<TrajSegment>> {
            match self.pending_traj.take() {
                Some(t) => {
                    self.traj_sent = true;
                    Poll::NewData(t)
                }
                None if self.traj_sent => Poll::OldData,
                None => Poll::NoData,
            }
        }
    }

    impl SweepSource for MockSources {
        /// One full oscillation of the joint between -1 and 1 every cycle
        fn poll_sweep_samples(&mut self) -> Vec<SweepSample> {
            [0.0, 1.0, 0.0, -1.0, 0.0]
                .iter()
                .map(|a| {
                    self.sweep_time_s += 0.01;
                    SweepSample {
                        time_s: self.sweep_time_s,
                        angle_rad: *a,
                    }
                })
                .collect()
        }
    }

    impl ServoSources for MockSources {
        fn output_connected(&self) -> bool {
            self.connected
        }
    }

    /// Planner returning scripted outcomes, then succeeding forever.
    #[derive(Default)]
    struct ScriptedPlanner {
        outcomes: VecDeque<PlanStatus>,
        debug: Option<PlanDebug>,
        num_calls: usize,
    }

    impl ScriptedPlanner {
        fn new(outcomes: &[PlanStatus]) -> Self {
            Self {
                outcomes: outcomes.iter().copied().collect(),
                ..Default::default()
            }
        }
    }

    impl LocalPlanner for ScriptedPlanner {
        fn plan(&mut self, _grid: &TravGrid, request: &PlanRequest) -> PlanResult {
            self.num_calls += 1;
            let status = self.outcomes.pop_front().unwrap_or(PlanStatus::TrajectoryOk);

            let start = request.pose.position_m;
            let trajectory = match status {
                PlanStatus::NoSolution => vec![],
                _ => vec![TrajSegment::new(
                    vec![start, start + Vector3::new(1.0, 0.0, 0.0)],
                    0.1,
                )
                .unwrap()
                .transformed(&request.map2trajectory)],
            };

            PlanResult {
                status,
                trajectory,
                debug: self.debug.clone(),
            }
        }
    }

    fn params() -> Params {
        Params {
            replanning_delay_s: 0.0,
            consistency_forward_distance_m: 1.0,
            min_drive_probability: 0.5,
            fail_count: 2,
            unknown_retry_count: 2,
            allow_fault: true,
            search_horizon_m: 2.0,
            min_trajectory_length_m: 0.5,
            allow_backwards_driving: false,
            follower: FollowerParams {
                running_position_tolerance_m: 0.5,
                end_position_tolerance_m: 0.01,
                end_reached_distance_m: 0.05,
                initial_stability_limit_rad: std::f64::consts::PI,
            },
            sweep: SweepParams {
                bound_tolerance_rad: 0.02,
                min_movement_rad: 1e-4,
            },
            debug: DebugParams::default(),
        }
    }

    fn started(params: Params, planner: ScriptedPlanner) -> ServoCtrl<ScriptedPlanner> {
        let mut ctrl = ServoCtrl::configure(params, planner).unwrap();
        ctrl.start().unwrap();
        ctrl
    }

    /// Tick number `k` happens at `k / 4` seconds.
    fn tick(
        ctrl: &mut ServoCtrl<ScriptedPlanner>,
        k: u32,
        sources: &mut MockSources,
    ) -> ServoOutput {
        ctrl.tick(k as f64 * 0.25, sources).unwrap()
    }

    // -----------------------------------------------------------------------
    // LIFECYCLE
    // -----------------------------------------------------------------------

    #[test]
    fn test_lifecycle() {
        let mut bad = params();
        bad.search_horizon_m = -1.0;
        assert!(matches!(
            ServoCtrl::configure(bad, ScriptedPlanner::default()),
            Err(ServoError::InvalidParam {
                name: "search_horizon_m",
                ..
            })
        ));

        let mut ctrl = ServoCtrl::configure(params(), ScriptedPlanner::default()).unwrap();
        let mut sources = MockSources::new(0.0);

        assert_eq!(ctrl.mode(), ServoMode::Off);
        assert!(matches!(ctrl.tick(0.0, &mut sources), Err(ServoError::NotStarted)));

        ctrl.start().unwrap();
        assert!(matches!(ctrl.start(), Err(ServoError::AlreadyStarted)));
        assert_eq!(ctrl.mode(), ServoMode::Running);

        let out = ctrl.stop();
        assert!(out.is_stop());
        assert_eq!(ctrl.mode(), ServoMode::Off);
        ctrl.start().unwrap();
    }

    #[test]
    fn test_first_plan() {
        let mut ctrl = started(params(), ScriptedPlanner::default());
        let mut sources = MockSources::new(0.0);

        // No heading yet on the first cycle, so the map cannot be consistent and a sweep is
        // requested
        let out = tick(&mut ctrl, 1, &mut sources);
        assert!(out.trajectory.is_none());
        assert_eq!(out.report.map_consistent, Some(false));
        assert!(out.report.sweep_triggered);
        assert_eq!(ctrl.planner().num_calls, 0);

        // The sweep completes during the next cycle and planning happens
        let out = tick(&mut ctrl, 2, &mut sources);
        assert_eq!(ctrl.planner().num_calls, 1);
        assert_eq!(out.report.plan_status, Some(PlanStatus::TrajectoryOk));
        assert_eq!(out.trajectory.unwrap().len(), 1);
        assert_eq!(out.report.heading_rad, Some(0.0));
        assert_eq!(
            out.target.unwrap().position_m,
            Vector3::new(2.0, 0.0, 0.0)
        );
        assert_eq!(ctrl.sweep_state(), SweepState::Untracked);
    }

    // -----------------------------------------------------------------------
    // GATING AND STOPPING
    // -----------------------------------------------------------------------

    #[test]
    fn test_gate_closure() {
        let mut ctrl = started(params(), ScriptedPlanner::default());
        let mut sources = MockSources::new(0.0);
        sources.missing.insert(BODY_CENTER2TRAJECTORY);
        sources.map_lost = true;

        // Not even the missing map leads to an output while the gate is closed
        for k in 1..5 {
            let out = tick(&mut ctrl, k, &mut sources);
            assert!(out.trajectory.is_none());
            assert!(!out.report.gate_open);
        }
        assert_eq!(ctrl.planner().num_calls, 0);

        sources.missing.clear();
        let out = tick(&mut ctrl, 5, &mut sources);
        assert!(out.report.gate_open);
        assert!(out.is_stop());
    }

    #[test]
    fn test_stop_on_missing_input() {
        let mut ctrl = started(params(), ScriptedPlanner::default());
        let mut sources = MockSources::new(0.0);
        sources.pending_traj = None;

        // No trajectory ever received
        assert!(tick(&mut ctrl, 1, &mut sources).is_stop());

        sources.pending_traj = Some(vec![straight(0.0, 10.0)]);
        tick(&mut ctrl, 2, &mut sources);
        tick(&mut ctrl, 3, &mut sources);
        assert_eq!(ctrl.planner().num_calls, 1);

        // Map lost
        sources.map_lost = true;
        let out = tick(&mut ctrl, 4, &mut sources);
        assert!(out.is_stop());
        assert_eq!(ctrl.planner().num_calls, 1);
    }

    #[test]
    fn test_stop_after_restart_without_new_trajectory() {
        let mut ctrl = started(params(), ScriptedPlanner::default());
        let mut sources = MockSources::new(0.0);

        tick(&mut ctrl, 1, &mut sources);
        tick(&mut ctrl, 2, &mut sources);
        assert_eq!(ctrl.planner().num_calls, 1);

        ctrl.stop();
        ctrl.start().unwrap();

        // A fresh map arrives but the trajectory source only has the one from before the restart
        let grid = TravGrid::from_elem(0.5, (40, 40), Vector2::new(-5.0, -10.0), 1.0).unwrap();
        sources.pending_map = Some(MapMsg::from_grid(&grid));

        for k in 3..6 {
            let out = tick(&mut ctrl, k, &mut sources);
            assert_eq!(out.report.map_status, Some(MapStatus::NewData));
            assert!(out.is_stop());
            sources.pending_map = Some(MapMsg::from_grid(&grid));
        }
        assert_eq!(ctrl.planner().num_calls, 1);

        // Planning resumes once the trajectory is sent again
        sources.pending_traj = Some(vec![straight(0.0, 10.0)]);
        tick(&mut ctrl, 6, &mut sources);
        tick(&mut ctrl, 7, &mut sources);
        assert_eq!(ctrl.planner().num_calls, 2);
    }

    #[test]
    fn test_no_consumer() {
        let mut ctrl = started(params(), ScriptedPlanner::default());
        let mut sources = MockSources::new(0.0);
        sources.connected = false;

        for k in 1..5 {
            assert!(tick(&mut ctrl, k, &mut sources).is_stop());
        }
        assert_eq!(ctrl.planner().num_calls, 0);
        assert_eq!(ctrl.mode(), ServoMode::Running);
    }

    #[test]
    fn test_replanning_delay() {
        let mut p = params();
        p.replanning_delay_s = 1.0;
        let mut ctrl = started(p, ScriptedPlanner::default());
        let mut sources = MockSources::new(0.0);

        tick(&mut ctrl, 1, &mut sources);
        tick(&mut ctrl, 2, &mut sources);
        assert_eq!(ctrl.planner().num_calls, 1);

        // Last success at 0.5 s, next plan no earlier than 1.5 s
        for k in 3..6 {
            assert!(tick(&mut ctrl, k, &mut sources).trajectory.is_none());
        }
        assert_eq!(ctrl.planner().num_calls, 1);

        tick(&mut ctrl, 6, &mut sources);
        assert_eq!(ctrl.planner().num_calls, 2);
    }

    // -----------------------------------------------------------------------
    // FAILURE ESCALATION
    // -----------------------------------------------------------------------

    #[test]
    fn test_fault_after_threshold() {
        use PlanStatus::NoSolution;

        let planner = ScriptedPlanner::new(&[NoSolution, NoSolution, NoSolution]);
        let mut ctrl = started(params(), planner);
        let mut sources = MockSources::new(0.0);

        tick(&mut ctrl, 1, &mut sources);

        // Each failure requests a sweep, which completes during the next cycle
        let out = tick(&mut ctrl, 2, &mut sources);
        assert!(out.is_stop());
        assert!(out.report.sweep_triggered);
        assert_eq!(out.report.no_solution_count, 1);

        tick(&mut ctrl, 3, &mut sources);
        assert_eq!(ctrl.mode(), ServoMode::Running);
        assert_eq!(ctrl.state().counters.no_solution, 2);

        let out = tick(&mut ctrl, 4, &mut sources);
        assert_eq!(ctrl.mode(), ServoMode::Faulted(FaultKind::NoSolution));
        assert_eq!(out.mode, ServoMode::Faulted(FaultKind::NoSolution));
        assert!(out.is_stop());
        assert_eq!(ctrl.planner().num_calls, 3);

        // Faulted: stop every cycle, no more plans
        for k in 5..10 {
            assert!(tick(&mut ctrl, k, &mut sources).is_stop());
        }
        assert_eq!(ctrl.planner().num_calls, 3);

        // Sweep samples keep being tracked while faulted
        let faulted_sweep_time_s = sources.sweep_time_s;
        tick(&mut ctrl, 10, &mut sources);
        assert!(sources.sweep_time_s > faulted_sweep_time_s);
        assert_eq!(ctrl.sweep_state(), SweepState::Done);

        // Restarting clears the fault
        ctrl.stop();
        ctrl.start().unwrap();
        assert_eq!(ctrl.state().counters, FailureCounters::default());
    }

    #[test]
    fn test_unknown_terrain_fault() {
        use PlanStatus::TrajectoryThroughUnknown as Unknown;

        let planner = ScriptedPlanner::new(&[Unknown, Unknown, Unknown]);
        let mut ctrl = started(params(), planner);
        let mut sources = MockSources::new(0.0);

        for k in 1..4 {
            let out = tick(&mut ctrl, k, &mut sources);
            assert_eq!(ctrl.mode(), ServoMode::Running);
            if k > 1 {
                // The trajectory through unknown terrain is still output
                assert_eq!(out.trajectory.unwrap().len(), 1);
            }
        }

        tick(&mut ctrl, 4, &mut sources);
        assert_eq!(
            ctrl.mode(),
            ServoMode::Faulted(FaultKind::TrajectoryThroughUnknown)
        );
    }

    #[test]
    fn test_counters_reset_on_success() {
        use PlanStatus::{NoSolution, TrajectoryOk};

        let planner = ScriptedPlanner::new(&[NoSolution, NoSolution, TrajectoryOk, NoSolution]);
        let mut ctrl = started(params(), planner);
        let mut sources = MockSources::new(0.0);

        for k in 1..10 {
            tick(&mut ctrl, k, &mut sources);
            assert_eq!(ctrl.mode(), ServoMode::Running);
        }
        assert!(ctrl.planner().num_calls >= 4);
    }

    #[test]
    fn test_fault_suppressed() {
        let planner = ScriptedPlanner::new(&[PlanStatus::NoSolution; 6]);
        let mut p = params();
        p.allow_fault = false;
        let mut ctrl = started(p, planner);
        let mut sources = MockSources::new(0.0);

        for k in 1..8 {
            tick(&mut ctrl, k, &mut sources);
        }
        assert_eq!(ctrl.mode(), ServoMode::Running);
        assert_eq!(ctrl.planner().num_calls, 6);
        assert_eq!(ctrl.state().counters.no_solution, 6);
    }

    // -----------------------------------------------------------------------
    // TRAJECTORY HANDLING
    // -----------------------------------------------------------------------

    #[test]
    fn test_end_of_trajectory_is_idempotent() {
        let mut ctrl = started(params(), ScriptedPlanner::default());
        let mut sources = MockSources::new(10.0);

        tick(&mut ctrl, 1, &mut sources);

        let first = tick(&mut ctrl, 2, &mut sources);
        assert_eq!(ctrl.mode(), ServoMode::ReachedEndOfTrajectory);
        assert!(first.is_stop());
        let target = first.target.unwrap();
        assert_eq!(target.position_m, Vector3::new(10.0, 0.0, 0.0));
        assert_eq!(target.position_tolerance_m, 0.01);

        let sweep_state = ctrl.sweep_state();
        for k in 3..8 {
            let out = tick(&mut ctrl, k, &mut sources);
            assert_eq!(out.mode, ServoMode::ReachedEndOfTrajectory);
            assert!(out.is_stop());
            assert_eq!(out.target, first.target);
            assert_eq!(ctrl.sweep_state(), sweep_state);
        }
        assert_eq!(ctrl.planner().num_calls, 0);

        // A new trajectory replaces the old one wholesale and driving resumes
        sources.pending_traj = Some(vec![straight(10.0, 20.0)]);
        tick(&mut ctrl, 8, &mut sources);
        assert_eq!(ctrl.mode(), ServoMode::Running);

        let out = tick(&mut ctrl, 9, &mut sources);
        assert_eq!(ctrl.planner().num_calls, 1);
        assert_eq!(
            out.target.unwrap().position_m,
            Vector3::new(12.0, 0.0, 0.0)
        );
    }

    #[test]
    fn test_empty_trajectory_stops() {
        let mut ctrl = started(params(), ScriptedPlanner::default());
        let mut sources = MockSources::new(0.0);

        tick(&mut ctrl, 1, &mut sources);
        tick(&mut ctrl, 2, &mut sources);
        assert_eq!(ctrl.planner().num_calls, 1);

        sources.pending_traj = Some(vec![]);
        assert!(tick(&mut ctrl, 3, &mut sources).is_stop());

        // Nothing to follow, so no heading and no more plans
        for k in 4..8 {
            let out = tick(&mut ctrl, k, &mut sources);
            assert!(out.report.heading_rad.is_none());
        }
        assert_eq!(ctrl.planner().num_calls, 1);
    }

    // -----------------------------------------------------------------------
    // FATAL ERRORS
    // -----------------------------------------------------------------------

    #[test]
    fn test_unresolvable_transform_is_fatal() {
        let mut ctrl = started(params(), ScriptedPlanner::default());
        let mut sources = MockSources::new(0.0);
        sources.broken = Some(BODY_CENTER2MAP);

        assert!(matches!(
            ctrl.tick(0.0, &mut sources),
            Err(ServoError::TfError(_))
        ));
        assert_eq!(ctrl.mode(), ServoMode::Off);
        assert!(matches!(
            ctrl.tick(0.1, &mut sources),
            Err(ServoError::NotStarted)
        ));
    }

    #[test]
    fn test_map_topology_is_fatal() {
        let mut ctrl = started(params(), ScriptedPlanner::default());
        let mut sources = MockSources::new(0.0);

        let mut msg = sources.pending_map.take().unwrap();
        msg.items.push(msg.items[0].clone());
        sources.pending_map = Some(msg);

        assert!(matches!(
            ctrl.tick(0.0, &mut sources),
            Err(ServoError::MapError(crate::map::MapError::MultipleTravGrids(2)))
        ));
        assert_eq!(ctrl.mode(), ServoMode::Off);
    }

    #[test]
    fn test_debug_data() {
        let step = |x: f64| DebugStep {
            pose: Pose::from_xy_heading(x, 0.0, 0.0),
            direction_rad: 0.0,
            windows: vec![],
        };

        let mut p = params();
        p.debug = DebugParams {
            output_tree: true,
            output_horizon: false,
            check_steps: true,
        };

        // Steps matching the trajectory produced by the scripted planner
        let mut planner = ScriptedPlanner::default();
        planner.debug = Some(PlanDebug {
            steps: vec![step(0.0)],
            ..Default::default()
        });
        let mut ctrl = started(p.clone(), planner);
        let mut sources = MockSources::new(0.0);
        tick(&mut ctrl, 1, &mut sources);
        let out = tick(&mut ctrl, 2, &mut sources);
        let debug = out.debug.unwrap();
        assert_eq!(debug.steps.len(), 1);
        assert!(debug.tree.is_none());
        assert!(debug.horizon_m.is_none());

        // Steps which do not match
        let mut planner = ScriptedPlanner::default();
        planner.debug = Some(PlanDebug {
            steps: vec![step(0.5)],
            ..Default::default()
        });
        let mut ctrl = started(p, planner);
        let mut sources = MockSources::new(0.0);
        tick(&mut ctrl, 1, &mut sources);
        assert!(matches!(
            ctrl.tick(0.5, &mut sources),
            Err(ServoError::DebugDataMismatch(_))
        ));
        assert_eq!(ctrl.mode(), ServoMode::Off);
    }
}
