//! Angular window planner
//!
//! A simple reference planner. From the robot's pose it repeatedly chooses, among a fixed set of
//! angular windows relative to its current heading, the direction closest to the goal heading,
//! and steps forward along it. The robot is treated as omnidirectional, so after each step it
//! faces the chosen direction. The grid is sampled along every step: untraversable cells stop the
//! expansion, unknown cells are crossed but reported.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, trace};
use nalgebra::{Vector2, Vector3};
use ordered_float::NotNan;
use serde::Deserialize;
use std::f64::consts::PI;

use super::*;
use crate::traj::TrajSegment;
use util::{
    maths::{get_ang_dist_2pi, wrap_2pi},
    params,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Remaining horizon below this is considered covered
const HORIZON_EPSILON_M: f64 = 1e-9;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct WindowPlannerParams {
    /// Flat list of `[from, to]` pairs of allowed directions relative to the robot's heading
    pub angular_windows: Vec<f64>,

    /// Length of a single expansion
    pub step_length_m: f64,

    /// Cells with a drive probability below this are not traversable
    pub obstacle_probability: f64,

    /// Cells with a drive probability within `unknown_tolerance` of this are unknown
    pub unknown_probability: f64,
    pub unknown_tolerance: f64,

    /// Tolerances given to the planned segment and to the tree nodes
    pub position_tolerance_m: f64,
    pub heading_tolerance_rad: f64,
}

pub struct WindowPlanner {
    params: WindowPlannerParams,

    /// Windows as (from, to) pairs relative to the heading
    windows: Vec<(f64, f64)>,
}

/// Outcome of sampling the grid along a single step.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum StepClass {
    Free,
    Unknown,
    Blocked,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum WindowPlannerError {
    #[error("Could not load parameters: {0}")]
    ParamLoadError(params::LoadError),

    #[error("Angular windows must be given as pairs, got {0} values")]
    OddWindowList(usize),

    #[error("Invalid step length {0}, must be finite and greater than zero")]
    InvalidStepLength(f64),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl WindowPlanner {
    pub fn new(params: WindowPlannerParams) -> Result<Self, WindowPlannerError> {
        if params.angular_windows.len() % 2 != 0 {
            return Err(WindowPlannerError::OddWindowList(
                params.angular_windows.len(),
            ));
        }

        if !params.step_length_m.is_finite() || params.step_length_m <= 0.0 {
            return Err(WindowPlannerError::InvalidStepLength(params.step_length_m));
        }

        let windows = params
            .angular_windows
            .chunks(2)
            .map(|c| (c[0], c[1]))
            .collect();

        Ok(Self { params, windows })
    }

    /// Load the parameters from the given file and create the planner.
    pub fn from_params_file(path: &str) -> Result<Self, WindowPlannerError> {
        let params = params::load(path).map_err(WindowPlannerError::ParamLoadError)?;
        Self::new(params)
    }

    /// Allowed directions at the given heading, as (from, to) pairs wrapped into [0, 2pi).
    ///
    /// A window whose `from` is greater than its `to` wraps through zero.
    pub fn allowed_windows(&self, heading_rad: f64, allow_backwards: bool) -> Vec<(f64, f64)> {
        let mut windows: Vec<(f64, f64)> = self
            .windows
            .iter()
            .map(|(f, t)| (wrap_2pi(f + heading_rad), wrap_2pi(t + heading_rad)))
            .collect();

        if allow_backwards {
            let mirrored: Vec<(f64, f64)> = windows
                .iter()
                .map(|(f, t)| (wrap_2pi(f + PI), wrap_2pi(t + PI)))
                .collect();
            windows.extend(mirrored);
        }

        windows
    }

    /// The allowed direction closest to the goal heading, or `None` if there are no windows.
    pub fn choose_direction(windows: &[(f64, f64)], goal_rad: f64) -> Option<f64> {
        let goal = wrap_2pi(goal_rad);

        let inside = windows.iter().any(|&(from, to)| match from <= to {
            true => from <= goal && goal <= to,
            false => goal >= from || goal <= to,
        });
        if inside {
            return Some(goal);
        }

        windows
            .iter()
            .flat_map(|&(from, to)| vec![from, to])
            .filter_map(|edge| {
                NotNan::new(get_ang_dist_2pi(goal, edge).abs())
                    .ok()
                    .map(|d| (d, edge))
            })
            .min_by_key(|(d, _)| *d)
            .map(|(_, edge)| edge)
    }

    /// Sample the grid between two points.
    fn classify_step(&self, grid: &TravGrid, from: &Vector2<f64>, to: &Vector2<f64>) -> StepClass {
        let length = (to - from).norm();
        let num_samples = ((2.0 * length / grid.cell_size_m()).ceil() as usize).max(1);

        let mut class = StepClass::Free;

        for i in 1..=num_samples {
            let point = from + (to - from) * (i as f64 / num_samples as f64);

            match grid.get_position(&point) {
                Some(p) if (p - self.params.unknown_probability).abs() <= self.params.unknown_tolerance => {
                    class = StepClass::Unknown
                }
                Some(p) if p < self.params.obstacle_probability => return StepClass::Blocked,
                Some(_) => (),
                None => class = StepClass::Unknown,
            }
        }

        class
    }

    fn horizon_line(&self, request: &PlanRequest) -> [Vector3<f64>; 2] {
        let (sin, cos) = request.heading_rad.sin_cos();
        let centre = request.pose.position_m + Vector3::new(cos, sin, 0.0) * request.horizon_m;
        let half = Vector3::new(-sin, cos, 0.0) * request.horizon_m;

        [centre - half, centre + half]
    }
}

impl LocalPlanner for WindowPlanner {
    fn plan(&mut self, grid: &TravGrid, request: &PlanRequest) -> PlanResult {
        let start = request.pose.position_m;
        let mut position = start;
        let mut heading = request.pose.get_heading();
        let mut travelled_m = 0.0;
        let mut through_unknown = false;

        let mut points = vec![start];
        let mut steps = vec![];
        let mut tree = SearchTree {
            nodes: vec![TreeNode {
                node_id: 0,
                pose: request.pose,
                cost: 0.0,
                heuristic: request.horizon_m,
                direction_rad: heading,
                position_tolerance_m: self.params.position_tolerance_m,
                heading_tolerance_rad: self.params.heading_tolerance_rad,
                children: vec![],
            }],
            tree2map: Pose::default(),
            final_node: None,
        };

        while request.horizon_m - travelled_m > HORIZON_EPSILON_M {
            let windows = self.allowed_windows(heading, request.allow_backwards);

            let direction = match Self::choose_direction(&windows, request.heading_rad) {
                Some(d) => d,
                None => {
                    debug!("No allowed direction");
                    break;
                }
            };

            let step_m = self.params.step_length_m.min(request.horizon_m - travelled_m);
            let (sin, cos) = direction.sin_cos();
            let next = position + Vector3::new(cos, sin, 0.0) * step_m;

            match self.classify_step(grid, &position.xy(), &next.xy()) {
                StepClass::Blocked => {
                    trace!("Step towards {:.3} rad blocked after {:.2} m", direction, travelled_m);
                    break;
                }
                StepClass::Unknown => through_unknown = true,
                StepClass::Free => (),
            }

            steps.push(DebugStep {
                pose: Pose::new(position, nalgebra::UnitQuaternion::from_euler_angles(0.0, 0.0, heading)),
                direction_rad: direction,
                windows,
            });

            travelled_m += step_m;

            let parent = tree.nodes.len() - 1;
            let node_id = tree.nodes.len();
            tree.nodes[parent].children.push(node_id);
            tree.nodes.push(TreeNode {
                node_id,
                pose: Pose::from_xy_heading(next.x, next.y, direction),
                cost: travelled_m,
                heuristic: request.horizon_m - travelled_m,
                direction_rad: direction,
                position_tolerance_m: self.params.position_tolerance_m,
                heading_tolerance_rad: self.params.heading_tolerance_rad,
                children: vec![],
            });

            position = next;
            heading = direction;
            points.push(next);
        }

        let status = if travelled_m < request.min_trajectory_length_m || points.len() < 2 {
            PlanStatus::NoSolution
        } else if through_unknown {
            PlanStatus::TrajectoryThroughUnknown
        } else {
            PlanStatus::TrajectoryOk
        };

        debug!(
            "Window planner covered {:.2} of {:.2} m in {} steps: {:?}",
            travelled_m,
            request.horizon_m,
            steps.len(),
            status
        );

        let trajectory = match status {
            PlanStatus::NoSolution => vec![],
            _ => match TrajSegment::new(points, self.params.heading_tolerance_rad) {
                Ok(s) => vec![s.transformed(&request.map2trajectory)],
                Err(_) => vec![],
            },
        };

        if status != PlanStatus::NoSolution {
            tree.final_node = Some(tree.nodes.len() - 1);
        }

        PlanResult {
            status,
            trajectory,
            debug: Some(PlanDebug {
                steps,
                tree: Some(tree),
                horizon_m: Some(self.horizon_line(request)),
            }),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use nalgebra::{Isometry3, Point3};
    use std::f64::consts::FRAC_PI_2;

    pub(crate) fn params() -> WindowPlannerParams {
        WindowPlannerParams {
            angular_windows: vec![-0.5, 0.5],
            step_length_m: 0.5,
            obstacle_probability: 0.3,
            unknown_probability: 0.5,
            unknown_tolerance: 0.01,
            position_tolerance_m: 0.2,
            heading_tolerance_rad: 0.3,
        }
    }

    fn request(heading_rad: f64, horizon_m: f64, min_length_m: f64) -> PlanRequest {
        PlanRequest {
            pose: Pose::from_xy_heading(0.0, 0.0, 0.0),
            heading_rad,
            horizon_m,
            map2trajectory: Isometry3::identity(),
            min_trajectory_length_m: min_length_m,
            allow_backwards: false,
        }
    }

    /// 4 m x 4 m grid from (-1, -1)
    fn grid<F: Fn(Vector2<f64>) -> f64>(f: F) -> TravGrid {
        TravGrid::from_fn(0.1, (40, 40), Vector2::new(-1.0, -1.0), f).unwrap()
    }

    #[test]
    fn test_new() {
        let mut p = params();
        p.angular_windows = vec![0.1, 0.2, 0.3];
        assert!(matches!(
            WindowPlanner::new(p),
            Err(WindowPlannerError::OddWindowList(3))
        ));

        let mut p = params();
        p.step_length_m = 0.0;
        assert!(WindowPlanner::new(p).is_err());
    }

    #[test]
    fn test_window_wrapping_and_choice() {
        let planner = WindowPlanner::new(params()).unwrap();

        let windows = planner.allowed_windows(0.0, false);
        assert_eq!(windows.len(), 1);
        assert!((windows[0].0 - (2.0 * PI - 0.5)).abs() < 1e-12);
        assert!((windows[0].1 - 0.5).abs() < 1e-12);

        // Inside the wrapping window
        assert_eq!(WindowPlanner::choose_direction(&windows, 0.2), Some(0.2));
        assert!((WindowPlanner::choose_direction(&windows, -0.2).unwrap() - wrap_2pi(-0.2)).abs() < 1e-12);

        // Outside, the closest edge is chosen
        assert_eq!(WindowPlanner::choose_direction(&windows, 2.0), Some(windows[0].1));
        assert_eq!(WindowPlanner::choose_direction(&windows, -2.0), Some(windows[0].0));

        // Backwards adds the mirrored window
        let windows = planner.allowed_windows(0.0, true);
        assert_eq!(windows.len(), 2);
        assert!((WindowPlanner::choose_direction(&windows, PI).unwrap() - PI).abs() < 1e-12);

        assert_eq!(WindowPlanner::choose_direction(&[], 1.0), None);
    }

    #[test]
    fn test_open_field() {
        let mut planner = WindowPlanner::new(params()).unwrap();
        let mut req = request(0.0, 2.0, 1.0);
        req.map2trajectory = Isometry3::translation(1.0, 0.0, 0.0);

        let result = planner.plan(&grid(|_| 0.9), &req);

        assert_eq!(result.status, PlanStatus::TrajectoryOk);
        assert_eq!(result.trajectory.len(), 1);
        let points = result.trajectory[0].points_m();
        assert_eq!(points.len(), 5);
        assert!((points[0] - Vector3::new(1.0, 0.0, 0.0)).norm() < 1e-12);
        assert!((points[4] - Vector3::new(3.0, 0.0, 0.0)).norm() < 1e-12);

        // Debug steps match the trajectory once brought back into the map frame
        let debug = result.debug.unwrap();
        assert_eq!(debug.steps.len(), 4);
        let inv = req.map2trajectory.inverse();
        let map_points: Vec<Vector3<f64>> = points
            .iter()
            .map(|p| (inv * Point3::from(*p)).coords)
            .collect();
        assert_eq!(match_debug_steps(&map_points, &debug.steps).unwrap().len(), 4);

        let tree = debug.tree.unwrap();
        assert_eq!(tree.nodes.len(), 5);
        assert_eq!(tree.final_node, Some(4));
        assert_eq!(tree.nodes[0].children, vec![1]);
    }

    #[test]
    fn test_turns_towards_goal() {
        let mut planner = WindowPlanner::new(params()).unwrap();
        let result = planner.plan(&grid(|_| 0.9), &request(FRAC_PI_2, 2.0, 1.0));

        assert_eq!(result.status, PlanStatus::TrajectoryOk);
        let steps = result.debug.unwrap().steps;
        assert!((steps[0].direction_rad - 0.5).abs() < 1e-12);
        assert!((steps[1].direction_rad - 1.0).abs() < 1e-12);
        assert!((steps[3].direction_rad - FRAC_PI_2).abs() < 1e-12);
    }

    #[test]
    fn test_blocked_and_unknown() {
        let mut planner = WindowPlanner::new(params()).unwrap();

        // Wall ahead stops the expansion short of the minimum length
        let walled = grid(|p| if p.x > 1.2 { 0.0 } else { 0.9 });
        let result = planner.plan(&walled, &request(0.0, 3.0, 1.5));
        assert_eq!(result.status, PlanStatus::NoSolution);
        assert!(result.trajectory.is_empty());

        // Long enough before the wall
        let result = planner.plan(&walled, &request(0.0, 3.0, 0.8));
        assert_eq!(result.status, PlanStatus::TrajectoryOk);

        // Crossing unknown cells still gives a trajectory
        let unknown = grid(|p| if p.x > 0.7 && p.x < 1.0 { 0.5 } else { 0.9 });
        let result = planner.plan(&unknown, &request(0.0, 2.0, 1.0));
        assert_eq!(result.status, PlanStatus::TrajectoryThroughUnknown);
        assert_eq!(result.trajectory.len(), 1);
    }
}
