//! # Map
//!
//! This module implements the [`TravGrid`] type, a grid of drive probabilities over the map frame,
//! and the [`MapIngestor`] which accepts new map messages, validates them, and swaps them in as
//! the current grid.

// ------------------------------------------------------------------------------------------------
// MODS
// ------------------------------------------------------------------------------------------------

/// Implements the [`TravGrid`] type
mod trav_grid;

/// Implements the [`MapIngestor`] and the map message types
mod ingestor;

// ------------------------------------------------------------------------------------------------
// EXPORTS
// ------------------------------------------------------------------------------------------------

pub use ingestor::{MapIngestor, MapItem, MapMsg, MapSource, MapStatus, TravLayer};
pub use trav_grid::TravGrid;

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors which can occur while building or ingesting a map.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum MapError {
    #[error("The map does not contain a traversability grid")]
    NoTravGrid,

    #[error("The map contains {0} traversability grids, expected exactly one")]
    MultipleTravGrids(usize),

    #[error("The traversability grid has no frame attached")]
    NoGridFrame,

    #[error("Invalid cell size {0}, must be finite and greater than zero")]
    InvalidCellSize(f64),

    #[error("The traversability grid contains no cells")]
    EmptyGrid,

    #[error("Cell ({0}, {1}) has invalid drive probability {2}")]
    InvalidProbability(usize, usize, f64),
}
