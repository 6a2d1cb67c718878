//! # Map ingestion
//!
//! Maps arrive as messages which may carry several items. Exactly one of them must be a
//! traversability layer with a frame attached, anything else is a fatal topology error.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, info};
use nalgebra::Vector2;
use ndarray::Array2;
use std::sync::Arc;

use super::{MapError, TravGrid};
use crate::poll::Poll;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A map message as produced by the mapping system.
#[derive(Debug, Clone, Default)]
pub struct MapMsg {
    pub items: Vec<MapItem>,
}

/// The traversability layer carried by a map message.
#[derive(Debug, Clone)]
pub struct TravLayer {
    pub cell_size_m: f64,

    /// Position of the grid's lower corner in the map frame. A layer without a frame cannot be
    /// placed in the map and is rejected.
    pub frame_m: Option<Vector2<f64>>,

    /// Drive probabilities indexed `[x, y]`
    pub data: Array2<f64>,
}

/// Keeps the current traversability grid and tracks whether it changed this cycle.
#[derive(Debug, Default)]
pub struct MapIngestor {
    grid: Option<Arc<TravGrid>>,

    /// True only during the cycle in which a new grid was accepted
    fresh: bool,

    num_updates: u64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum MapItem {
    Traversability(TravLayer),

    /// Any other item the mapping system publishes, ignored here
    Other { name: String },
}

/// Outcome of polling the map source.
#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Serialize)]
pub enum MapStatus {
    /// No map has ever been received.
    NoData,

    /// A new map was received and is now the current grid.
    NewData,

    /// The current grid is unchanged since the last poll.
    Unchanged,
}

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A newest-wins source of map messages.
pub trait MapSource {
    fn poll_map(&mut self) -> Poll<MapMsg>;
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MapMsg {
    /// Create a message carrying a single framed traversability layer.
    pub fn from_grid(grid: &TravGrid) -> Self {
        Self {
            items: vec![MapItem::Traversability(TravLayer {
                cell_size_m: grid.cell_size_m(),
                frame_m: Some(grid.origin_m()),
                data: grid.data().clone(),
            })],
        }
    }

    /// Extract the single traversability grid from the message.
    pub fn into_trav_grid(self) -> Result<TravGrid, MapError> {
        let mut layers: Vec<TravLayer> = self
            .items
            .into_iter()
            .filter_map(|i| match i {
                MapItem::Traversability(l) => Some(l),
                MapItem::Other { name } => {
                    debug!("Ignoring map item {}", name);
                    None
                }
            })
            .collect();

        match layers.len() {
            0 => return Err(MapError::NoTravGrid),
            1 => (),
            n => return Err(MapError::MultipleTravGrids(n)),
        }

        let layer = layers.remove(0);

        let origin_m = layer.frame_m.ok_or(MapError::NoGridFrame)?;

        TravGrid::new(layer.cell_size_m, origin_m, layer.data)
    }
}

impl MapIngestor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the current grid.
    pub fn reset(&mut self) {
        self.grid = None;
        self.fresh = false;
    }

    /// Poll the source for a new map, swapping it in if one is available.
    ///
    /// A message with a bad topology or invalid contents is returned as an error and leaves the
    /// current grid untouched.
    pub fn poll<S: MapSource + ?Sized>(&mut self, source: &mut S) -> Result<MapStatus, MapError> {
        self.fresh = false;

        match source.poll_map() {
            Poll::NoData => Ok(MapStatus::NoData),
            Poll::OldData => match self.grid {
                Some(_) => Ok(MapStatus::Unchanged),
                None => Ok(MapStatus::NoData),
            },
            Poll::NewData(msg) => {
                self.ingest(msg)?;
                Ok(MapStatus::NewData)
            }
        }
    }

    /// Validate a message and make its grid the current one.
    pub fn ingest(&mut self, msg: MapMsg) -> Result<(), MapError> {
        let grid = msg.into_trav_grid()?;

        let (nx, ny) = grid.num_cells();
        debug!(
            "New traversability grid, {} x {} cells of {} m",
            nx,
            ny,
            grid.cell_size_m()
        );

        if self.grid.is_none() {
            info!("First traversability map received");
        }

        self.grid = Some(Arc::new(grid));
        self.fresh = true;
        self.num_updates += 1;

        Ok(())
    }

    /// The current grid. Readers get a shared handle, so swapping in a new grid never disturbs
    /// a reader still holding the old one.
    pub fn grid(&self) -> Option<Arc<TravGrid>> {
        self.grid.clone()
    }

    /// True if the grid was replaced during the latest poll.
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    pub fn num_updates(&self) -> u64 {
        self.num_updates
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::VecDeque;

    struct Scripted(VecDeque<Poll<MapMsg>>);

    impl MapSource for Scripted {
        fn poll_map(&mut self) -> Poll<MapMsg> {
            self.0.pop_front().unwrap_or(Poll::OldData)
        }
    }

    fn layer(frame: Option<Vector2<f64>>) -> MapItem {
        MapItem::Traversability(TravLayer {
            cell_size_m: 0.1,
            frame_m: frame,
            data: Array2::from_elem((5, 5), 0.8),
        })
    }

    #[test]
    fn test_topology_errors() {
        let none = MapMsg {
            items: vec![MapItem::Other { name: "elevation".into() }],
        };
        assert_eq!(none.into_trav_grid(), Err(MapError::NoTravGrid));

        let two = MapMsg {
            items: vec![layer(Some(Vector2::zeros())), layer(Some(Vector2::zeros()))],
        };
        assert_eq!(two.into_trav_grid(), Err(MapError::MultipleTravGrids(2)));

        let no_frame = MapMsg {
            items: vec![layer(None)],
        };
        assert_eq!(no_frame.into_trav_grid(), Err(MapError::NoGridFrame));

        let ok = MapMsg {
            items: vec![
                MapItem::Other { name: "elevation".into() },
                layer(Some(Vector2::new(1.0, 2.0))),
            ],
        };
        let grid = ok.into_trav_grid().unwrap();
        assert_eq!(grid.origin_m(), Vector2::new(1.0, 2.0));
        assert_eq!(grid.num_cells(), (5, 5));
    }

    #[test]
    fn test_poll() {
        let mut source = Scripted(VecDeque::from(vec![
            Poll::NoData,
            Poll::NewData(MapMsg {
                items: vec![layer(Some(Vector2::zeros()))],
            }),
            Poll::OldData,
            Poll::NewData(MapMsg { items: vec![] }),
        ]));
        let mut ingestor = MapIngestor::new();

        assert_eq!(ingestor.poll(&mut source), Ok(MapStatus::NoData));
        assert!(ingestor.grid().is_none());

        assert_eq!(ingestor.poll(&mut source), Ok(MapStatus::NewData));
        assert!(ingestor.is_fresh());
        let held = ingestor.grid().unwrap();

        // Freshness only lasts one poll
        assert_eq!(ingestor.poll(&mut source), Ok(MapStatus::Unchanged));
        assert!(!ingestor.is_fresh());

        // A bad message is an error and the old grid survives
        assert_eq!(ingestor.poll(&mut source), Err(MapError::NoTravGrid));
        assert!(Arc::ptr_eq(&held, &ingestor.grid().unwrap()));
        assert_eq!(ingestor.num_updates(), 1);
    }
}
