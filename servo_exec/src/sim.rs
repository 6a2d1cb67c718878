//! # Simulated world
//!
//! A self-contained world which provides every input of the servo controller, so it can be run
//! and tested without a robot. The world contains:
//!
//! - A traversability field made from Perlin noise, with a well traversable corridor along the
//!   global path. The published map only contains the cells the robot has seen, all others are
//!   at the unknown probability.
//! - A tilting joint sweeping sinusoidally between two angles, sampled at a fixed rate.
//! - A kinematic robot which drives along the last trajectory output by the controller at a
//!   constant speed.
//! - The body transforms, derived from the robot's pose, which only become available after a
//!   start delay.
//!
//! The map and global trajectory frames are the same. The frame planned trajectories are
//! expressed in is offset from the map frame.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, info};
use nalgebra::{Isometry3, Point3, Vector2, Vector3};
use ndarray::Array2;
use noise::{NoiseFn, Perlin};
use serde::Deserialize;
use std::f64::consts::TAU;

use crate::{
    loc::Pose,
    map::{MapError, MapItem, MapMsg, MapSource, TravGrid, TravLayer},
    poll::Poll,
    servo_ctrl::{ServoOutput, ServoSources},
    sweep::{SweepSample, SweepSource},
    tf_gate::{
        TfStatus, TransformProvider, BODY_CENTER2GLOBAL_TRAJECTORY, BODY_CENTER2MAP,
        BODY_CENTER2TRAJECTORY,
    },
    traj::{TrajError, TrajSegment, TrajSource},
};
use util::maths::{clamp, lin_map};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Points of the driven trajectory closer than this to the robot count as reached
const REACHED_POINT_DISTANCE_M: f64 = 1e-9;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SimParams {
    /// Time before which no transform is available
    pub start_delay_s: f64,

    /// Whether anything consumes the controller's trajectory output
    pub output_connected: bool,

    /// Offset of the planned trajectory frame's origin in the map frame
    pub trajectory_frame_offset_m: [f64; 2],

    pub map: SimMapParams,

    pub tilt: SimTiltParams,

    pub robot: SimRobotParams,

    pub path: SimPathParams,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimMapParams {
    pub cell_size_m: f64,
    pub num_cells: [usize; 2],
    pub origin_m: [f64; 2],

    pub perlin_scale: f64,
    pub perlin_offset: [f64; 2],

    /// Cells closer than this to the global path are set to `corridor_probability`
    pub corridor_half_width_m: f64,
    pub corridor_probability: f64,

    /// Cells closer than this to the robot are seen
    pub sensor_range_m: f64,

    /// Probability of unseen cells in the published map
    pub unknown_probability: f64,

    /// Time between two published maps
    pub update_period_s: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimTiltParams {
    pub min_angle_rad: f64,
    pub max_angle_rad: f64,
    pub period_s: f64,
    pub sample_rate_hz: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimRobotParams {
    /// `[x, y, heading]` of the robot in the map frame at the start
    pub start_pose: [f64; 3],

    pub speed_ms: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimPathParams {
    /// Corners of the global path, each consecutive pair becoming one segment
    pub waypoints_m: Vec<[f64; 2]>,

    pub point_separation_m: f64,

    pub heading_tolerance_rad: f64,
}

pub struct SimWorld {
    params: SimParams,

    time_s: f64,

    robot: Pose,

    /// The real traversability of the world
    truth: TravGrid,

    /// Cells the robot has seen
    seen: Array2<bool>,

    map2traj: Isometry3<f64>,

    path: Vec<TrajSegment>,
    path_published: bool,

    last_map_s: Option<f64>,

    num_samples: u64,

    /// The trajectory being driven, in the map frame
    driven_m: Vec<Vector3<f64>>,
    driven_index: usize,

    distance_travelled_m: f64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("Invalid simulation parameter {0}")]
    InvalidParam(&'static str),

    #[error("Could not build the world map: {0}")]
    MapError(MapError),

    #[error("Could not build the global path: {0}")]
    TrajError(TrajError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SimWorld {
    pub fn new(params: SimParams) -> Result<Self, SimError> {
        if params.path.waypoints_m.len() < 2 {
            return Err(SimError::InvalidParam("path.waypoints_m"));
        }
        if !(params.tilt.period_s > 0.0) {
            return Err(SimError::InvalidParam("tilt.period_s"));
        }
        if !(params.tilt.sample_rate_hz > 0.0) {
            return Err(SimError::InvalidParam("tilt.sample_rate_hz"));
        }
        if !(params.map.update_period_s >= 0.0) {
            return Err(SimError::InvalidParam("map.update_period_s"));
        }

        let path = params
            .path
            .waypoints_m
            .windows(2)
            .map(|w| {
                TrajSegment::direct(
                    Vector3::new(w[0][0], w[0][1], 0.0),
                    Vector3::new(w[1][0], w[1][1], 0.0),
                    params.path.point_separation_m,
                    params.path.heading_tolerance_rad,
                )
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(SimError::TrajError)?;

        let truth = Self::generate_truth(&params).map_err(SimError::MapError)?;

        let [x, y, heading] = params.robot.start_pose;
        let [ox, oy] = params.trajectory_frame_offset_m;

        let mut world = Self {
            seen: Array2::from_elem(truth.num_cells(), false),
            truth,
            time_s: 0.0,
            robot: Pose::from_xy_heading(x, y, heading),
            map2traj: Isometry3::translation(ox, oy, 0.0),
            path,
            path_published: false,
            last_map_s: None,
            num_samples: 0,
            driven_m: vec![],
            driven_index: 0,
            distance_travelled_m: 0.0,
            params,
        };
        world.look();

        info!(
            "Simulated world created, {} path segments, robot at ({:.2}, {:.2})",
            world.path.len(),
            x,
            y
        );

        Ok(world)
    }

    /// Perlin noise everywhere except along the path.
    fn generate_truth(params: &SimParams) -> Result<TravGrid, MapError> {
        let perlin = Perlin::new();
        let map = &params.map;
        let waypoints: Vec<Vector2<f64>> = params
            .path
            .waypoints_m
            .iter()
            .map(|w| Vector2::new(w[0], w[1]))
            .collect();

        TravGrid::from_fn(
            map.cell_size_m,
            (map.num_cells[0], map.num_cells[1]),
            Vector2::new(map.origin_m[0], map.origin_m[1]),
            |pos| {
                if distance_to_polyline(&pos, &waypoints) <= map.corridor_half_width_m {
                    return map.corridor_probability;
                }

                let n = perlin.get([
                    pos.x * map.perlin_scale + map.perlin_offset[0],
                    pos.y * map.perlin_scale + map.perlin_offset[1],
                ]);
                clamp(&lin_map((-1.0, 1.0), (0.0, 1.0), n), &0.0, &1.0)
            },
        )
    }

    pub fn time_s(&self) -> f64 {
        self.time_s
    }

    pub fn robot_pose(&self) -> Pose {
        self.robot
    }

    pub fn truth(&self) -> &TravGrid {
        &self.truth
    }

    pub fn distance_travelled_m(&self) -> f64 {
        self.distance_travelled_m
    }

    /// Planar distance from the robot to the final point of the global path.
    pub fn distance_to_goal_m(&self) -> f64 {
        match self.params.path.waypoints_m.last() {
            Some(g) => (Vector2::new(g[0], g[1]) - self.robot.position2()).norm(),
            None => 0.0,
        }
    }

    /// Use the controller's output, starting to drive any new trajectory it contains.
    pub fn apply_output(&mut self, output: &ServoOutput) {
        let trajectory = match &output.trajectory {
            Some(t) => t,
            None => return,
        };

        let traj2map = self.map2traj.inverse();
        self.driven_m = trajectory
            .iter()
            .flat_map(|s| s.points_m().iter())
            .map(|p| (traj2map * Point3::from(*p)).coords)
            .collect();
        self.driven_index = 0;

        match self.driven_m.is_empty() {
            true => debug!("Stop command received at {:.2} s", self.time_s),
            false => debug!(
                "Driving new trajectory of {} points at {:.2} s",
                self.driven_m.len(),
                self.time_s
            ),
        }
    }

    /// Move the world forward in time.
    pub fn advance(&mut self, dt_s: f64) {
        self.time_s += dt_s;
        self.drive(dt_s);
        self.look();
    }

    /// Move the robot along the driven trajectory, facing the way it moves.
    fn drive(&mut self, dt_s: f64) {
        let budget = self.params.robot.speed_ms * dt_s;
        let mut remaining = budget;
        let mut position = self.robot.position2();
        let mut heading = self.robot.get_heading();

        while remaining > 0.0 {
            let target = match self.driven_m.get(self.driven_index) {
                Some(t) => t.xy(),
                None => break,
            };

            let to_target = target - position;
            let dist = to_target.norm();

            if dist > REACHED_POINT_DISTANCE_M {
                heading = to_target.y.atan2(to_target.x);
            }

            if dist <= remaining {
                position = target;
                remaining -= dist;
                self.driven_index += 1;
            } else {
                position += to_target * (remaining / dist);
                remaining = 0.0;
            }
        }

        self.distance_travelled_m += budget - remaining;
        self.robot = Pose::from_xy_heading(position.x, position.y, heading);
    }

    /// Mark every cell within sensor range as seen.
    fn look(&mut self) {
        let position = self.robot.position2();
        let range = self.params.map.sensor_range_m;
        let truth = &self.truth;

        for ((x, y), seen) in self.seen.indexed_iter_mut() {
            if *seen {
                continue;
            }
            if let Some(centre) = truth.cell_position((x, y)) {
                *seen = (centre - position).norm() <= range;
            }
        }
    }

    /// The map as currently known by the robot.
    pub fn known_map(&self) -> MapMsg {
        let unknown = self.params.map.unknown_probability;
        let truth = self.truth.data();
        let data = Array2::from_shape_fn(self.truth.num_cells(), |c| match self.seen[c] {
            true => truth[c],
            false => unknown,
        });

        MapMsg {
            items: vec![MapItem::Traversability(TravLayer {
                cell_size_m: self.truth.cell_size_m(),
                frame_m: Some(self.truth.origin_m()),
                data,
            })],
        }
    }

    fn tilt_angle(&self, time_s: f64) -> f64 {
        let tilt = &self.params.tilt;
        let mid = 0.5 * (tilt.max_angle_rad + tilt.min_angle_rad);
        let amplitude = 0.5 * (tilt.max_angle_rad - tilt.min_angle_rad);

        mid + amplitude * (TAU * time_s / tilt.period_s).sin()
    }
}

impl TransformProvider for SimWorld {
    fn resolve(&mut self, name: &str, time_s: f64) -> TfStatus {
        if time_s < self.params.start_delay_s {
            return TfStatus::NotYetAvailable;
        }

        let body2map = self.robot.to_isometry();

        match name {
            BODY_CENTER2MAP | BODY_CENTER2GLOBAL_TRAJECTORY => TfStatus::Available(body2map),
            BODY_CENTER2TRAJECTORY => TfStatus::Available(self.map2traj * body2map),
            other => TfStatus::Unresolvable(format!("unknown frame {}", other)),
        }
    }
}

impl MapSource for SimWorld {
    fn poll_map(&mut self) -> Poll<MapMsg> {
        let due = match self.last_map_s {
            Some(t) => self.time_s - t >= self.params.map.update_period_s,
            None => true,
        };

        match due {
            true => {
                self.last_map_s = Some(self.time_s);
                Poll::NewData(self.known_map())
            }
            false => Poll::OldData,
        }
    }
}

impl TrajSource for SimWorld {
    fn poll_trajectory(&mut self) -> Poll<Vec<TrajSegment>> {
        match self.path_published {
            true => Poll::OldData,
            false => {
                self.path_published = true;
                Poll::NewData(self.path.clone())
            }
        }
    }
}

impl SweepSource for SimWorld {
    fn poll_sweep_samples(&mut self) -> Vec<SweepSample> {
        let mut samples = vec![];

        loop {
            let time_s = self.num_samples as f64 / self.params.tilt.sample_rate_hz;
            if time_s > self.time_s {
                break;
            }

            samples.push(SweepSample {
                time_s,
                angle_rad: self.tilt_angle(time_s),
            });
            self.num_samples += 1;
        }

        samples
    }
}

impl ServoSources for SimWorld {
    fn output_connected(&self) -> bool {
        self.params.output_connected
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Planar distance from a point to the closest point of a polyline.
fn distance_to_polyline(point: &Vector2<f64>, corners: &[Vector2<f64>]) -> f64 {
    if corners.len() == 1 {
        return (point - corners[0]).norm();
    }

    corners
        .windows(2)
        .map(|w| {
            let along = w[1] - w[0];
            let len_sq = along.norm_squared();
            let t = match len_sq > 0.0 {
                true => clamp(&((point - w[0]).dot(&along) / len_sq), &0.0, &1.0),
                false => 0.0,
            };
            (point - (w[0] + along * t)).norm()
        })
        .fold(f64::INFINITY, f64::min)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::{
        servo_ctrl::ServoMode,
        sweep::{SweepParams, SweepTracker},
    };

    pub(crate) fn params() -> SimParams {
        SimParams {
            start_delay_s: 0.5,
            output_connected: true,
            trajectory_frame_offset_m: [1.0, -2.0],
            map: SimMapParams {
                cell_size_m: 0.25,
                num_cells: [80, 40],
                origin_m: [-5.0, -5.0],
                perlin_scale: 0.3,
                perlin_offset: [0.0, 0.0],
                corridor_half_width_m: 1.5,
                corridor_probability: 0.9,
                sensor_range_m: 4.0,
                unknown_probability: 0.5,
                update_period_s: 0.5,
            },
            tilt: SimTiltParams {
                min_angle_rad: -0.4,
                max_angle_rad: 0.4,
                period_s: 2.0,
                sample_rate_hz: 50.0,
            },
            robot: SimRobotParams {
                start_pose: [0.0, 0.0, 0.0],
                speed_ms: 0.5,
            },
            path: SimPathParams {
                waypoints_m: vec![[0.0, 0.0], [10.0, 0.0]],
                point_separation_m: 0.5,
                heading_tolerance_rad: 0.3,
            },
        }
    }

    #[test]
    fn test_distance_to_polyline() {
        let corners = vec![Vector2::new(0.0, 0.0), Vector2::new(4.0, 0.0), Vector2::new(4.0, 4.0)];

        assert!((distance_to_polyline(&Vector2::new(2.0, 1.0), &corners) - 1.0).abs() < 1e-12);
        assert!((distance_to_polyline(&Vector2::new(5.0, 2.0), &corners) - 1.0).abs() < 1e-12);
        assert!((distance_to_polyline(&Vector2::new(-3.0, 4.0), &corners) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_params() {
        let mut p = params();
        p.path.waypoints_m.truncate(1);
        assert!(matches!(
            SimWorld::new(p),
            Err(SimError::InvalidParam("path.waypoints_m"))
        ));

        let mut p = params();
        p.tilt.sample_rate_hz = 0.0;
        assert!(SimWorld::new(p).is_err());
    }

    #[test]
    fn test_transforms_after_delay() {
        let mut world = SimWorld::new(params()).unwrap();

        assert_eq!(world.resolve(BODY_CENTER2MAP, 0.2), TfStatus::NotYetAvailable);

        match world.resolve(BODY_CENTER2TRAJECTORY, 0.5) {
            TfStatus::Available(tf) => {
                assert_eq!(tf.translation.vector, Vector3::new(1.0, -2.0, 0.0))
            }
            s => panic!("Expected transform, got {:?}", s),
        }

        assert!(matches!(
            world.resolve("camera2map", 1.0),
            TfStatus::Unresolvable(_)
        ));
    }

    #[test]
    fn test_path_published_once() {
        let mut world = SimWorld::new(params()).unwrap();

        match world.poll_trajectory() {
            Poll::NewData(segments) => {
                assert_eq!(segments.len(), 1);
                assert!((segments[0].length_m() - 10.0).abs() < 1e-9);
            }
            p => panic!("Expected the path, got {:?}", p),
        }
        assert_eq!(world.poll_trajectory(), Poll::OldData);
    }

    #[test]
    fn test_map_is_seen_around_robot() {
        let mut world = SimWorld::new(params()).unwrap();

        let grid = match world.poll_map() {
            Poll::NewData(msg) => msg.into_trav_grid().unwrap(),
            p => panic!("Expected a map, got {:?}", p),
        };

        // In the corridor next to the robot
        assert_eq!(grid.get_position(&Vector2::new(0.1, 0.1)), Some(0.9));

        // Far along the corridor and not yet seen
        assert_eq!(grid.get_position(&Vector2::new(9.1, 0.1)), Some(0.5));

        // Maps are published periodically
        assert!(matches!(world.poll_map(), Poll::OldData));
        world.advance(0.5);
        assert!(matches!(world.poll_map(), Poll::NewData(_)));
    }

    #[test]
    fn test_sweep_samples_cover_bounds() {
        let mut world = SimWorld::new(params()).unwrap();
        let mut tracker = SweepTracker::new(SweepParams {
            bound_tolerance_rad: 0.02,
            min_movement_rad: 1e-4,
        });

        for _ in 0..40 {
            world.advance(0.1);
            for s in world.poll_sweep_samples() {
                assert!(s.angle_rad >= -0.4 - 1e-9 && s.angle_rad <= 0.4 + 1e-9);
                tracker.update(&s);
            }
        }

        // About 4 s at 50 Hz
        assert!(world.num_samples >= 200 && world.num_samples <= 201);

        let (min, max) = tracker.bounds().unwrap();
        assert!((min + 0.4).abs() < 1e-3);
        assert!((max - 0.4).abs() < 1e-3);
    }

    #[test]
    fn test_robot_follows_output() {
        let mut world = SimWorld::new(params()).unwrap();

        // One metre along +Y in the map frame, given in the offset trajectory frame
        let segment = TrajSegment::new(
            vec![Vector3::new(1.0, -2.0, 0.0), Vector3::new(1.0, -1.0, 0.0)],
            0.1,
        )
        .unwrap();

        let mut output = ServoOutput::new(0.0, ServoMode::Running);
        output.trajectory = Some(vec![segment]);
        world.apply_output(&output);

        world.advance(1.0);
        let pose = world.robot_pose();
        assert!((pose.position_m - Vector3::new(0.0, 0.5, 0.0)).norm() < 1e-9);
        assert!((pose.get_heading() - std::f64::consts::FRAC_PI_2).abs() < 1e-9);

        // Stopping keeps the robot where it is
        world.apply_output(&ServoOutput::stopped(1.0, ServoMode::Running));
        world.advance(1.0);
        assert!((world.robot_pose().position_m - pose.position_m).norm() < 1e-9);
        assert!((world.distance_travelled_m() - 0.5).abs() < 1e-9);

        // Reaching the end of the trajectory stops the robot too
        world.apply_output(&output);
        world.advance(4.0);
        assert!((world.robot_pose().position_m - Vector3::new(0.0, 1.0, 0.0)).norm() < 1e-9);
    }
}
