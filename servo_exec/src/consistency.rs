//! # Map consistency check
//!
//! Before planning, the controller checks that the map agrees with the robot being able to drive
//! forwards. A square region one forward distance ahead of the robot, in the direction it wants
//! to drive, is sampled from the traversability grid. If the mean drive probability of the cells
//! in that region is too low the map is considered inconsistent and a fresh sensor sweep is
//! requested.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::debug;
use nalgebra::Vector3;
use serde::Serialize;

use crate::map::TravGrid;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Checks the drive probability of the region ahead of the robot.
#[derive(Debug, Clone)]
pub struct ConsistencyChecker {
    /// Distance from the robot to the centre of the checked region, also the region's side length
    pub ahead_distance_m: f64,

    /// Mean probability required for the region to count as drivable
    pub min_probability: f64,
}

/// Result of a single consistency check.
#[derive(Debug, Copy, Clone, Serialize, PartialEq)]
pub struct ConsistencyReport {
    pub consistent: bool,

    /// Number of cells whose centre was inside the region
    pub num_cells: usize,

    /// Mean drive probability of those cells
    pub mean_probability: Option<f64>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ConsistencyChecker {
    pub fn new(ahead_distance_m: f64, min_probability: f64) -> Self {
        Self {
            ahead_distance_m,
            min_probability,
        }
    }

    /// Check the region ahead of a robot at `position_m` (map frame) driving along `heading_rad`.
    ///
    /// Without a heading there is no "ahead", so the map is never consistent. A region containing
    /// no cell centres is also inconsistent.
    pub fn check(
        &self,
        grid: &TravGrid,
        position_m: &Vector3<f64>,
        heading_rad: Option<f64>,
    ) -> ConsistencyReport {
        let heading_rad = match heading_rad {
            Some(h) => h,
            None => {
                debug!("No heading, map cannot be checked");
                return ConsistencyReport {
                    consistent: false,
                    num_cells: 0,
                    mean_probability: None,
                };
            }
        };

        let (sin, cos) = heading_rad.sin_cos();
        let centre = position_m.xy() + self.ahead_distance_m * nalgebra::Vector2::new(cos, sin);

        let mut sum = 0.0;
        let mut num_cells = 0;
        grid.for_each_in_rect(
            &centre,
            heading_rad,
            self.ahead_distance_m,
            self.ahead_distance_m,
            |_, p| {
                sum += p;
                num_cells += 1;
            },
        );

        let mean_probability = match num_cells {
            0 => None,
            n => Some(sum / n as f64),
        };

        let consistent = match mean_probability {
            Some(m) => m >= self.min_probability,
            None => false,
        };

        debug!(
            "Map consistency: {} cells ahead, mean probability {:?}, consistent: {}",
            num_cells, mean_probability, consistent
        );

        ConsistencyReport {
            consistent,
            num_cells,
            mean_probability,
        }
    }
}

/// Convenience form of [`ConsistencyChecker::check`] returning only the verdict.
pub fn is_consistent(
    grid: &TravGrid,
    ahead_distance_m: f64,
    position_m: &Vector3<f64>,
    heading_rad: Option<f64>,
    min_probability: f64,
) -> bool {
    ConsistencyChecker::new(ahead_distance_m, min_probability)
        .check(grid, position_m, heading_rad)
        .consistent
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
