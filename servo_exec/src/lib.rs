//! # Corridor servoing library.
//!
//! This library implements the decision core of the corridor servoing controller, which keeps a
//! robot moving along a queue of global trajectory segments by repeatedly planning short local
//! trajectories through a traversability map. It also allows the binary and benchmarks to access
//! the items defined inside the crate.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Localisation types - the pose of the robot body in a frame
pub mod loc;

/// Newest-wins flow status returned by data sources
pub mod poll;

/// Transform gate - holds back processing until all required transforms have been seen
pub mod tf_gate;

/// Map module - traversability grid and the ingestion of new maps
pub mod map;

/// Trajectory module - segments, the segment queue, the follower and drive direction resolution
pub mod traj;

/// Consistency check of the map ahead of the robot
pub mod consistency;

/// Tracking of the tilting sensor's sweeps
pub mod sweep;

/// Local planner interface, debug data, and a reference angular window planner
pub mod planner;

/// Servo control module - the replanning state machine
pub mod servo_ctrl;

/// Simulated world - provides every data source the controller needs without any hardware
pub mod sim;
