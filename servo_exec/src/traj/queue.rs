//! Queue of global trajectory segments waiting to be followed

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::collections::VecDeque;

use super::TrajSegment;
use crate::poll::Poll;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// FIFO of trajectory segments. Receiving a new global trajectory replaces the whole queue.
#[derive(Debug, Clone, Default)]
pub struct TrajQueue {
    segments: VecDeque<TrajSegment>,
}

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// A newest-wins source of global trajectories.
///
/// An empty trajectory is a valid message and means the robot must stop.
pub trait TrajSource {
    fn poll_trajectory(&mut self) -> Poll<Vec<TrajSegment>>;
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl TrajQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard any queued segments and queue the given ones in order.
    pub fn replace(&mut self, segments: Vec<TrajSegment>) {
        self.segments = segments.into();
    }

    /// Remove and return the front segment, or `None` if the queue is empty.
    pub fn take_next(&mut self) -> Option<TrajSegment> {
        self.segments.pop_front()
    }

    pub fn clear(&mut self) {
        self.segments.clear()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
