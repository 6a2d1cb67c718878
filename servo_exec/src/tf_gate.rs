//! # Transform gate
//!
//! Nothing in the controller can run until the positions of the robot in the map and trajectory
//! frames are known. The gate records the latest value of every transform pulled from the
//! transform provider, and only reports itself as open once every required transform has been
//! observed at least once. Once open, the gate stays open until it is reset.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::{debug, info};
use nalgebra::Isometry3;
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Transform from the robot body centre into the map frame.
pub const BODY_CENTER2MAP: &str = "body_center2map";

/// Transform from the robot body centre into the frame planned trajectories are expressed in.
pub const BODY_CENTER2TRAJECTORY: &str = "body_center2trajectory";

/// Transform from the robot body centre into the frame of the global trajectory.
pub const BODY_CENTER2GLOBAL_TRAJECTORY: &str = "body_center2global_trajectory";

/// All transforms the controller requires before doing anything.
pub const REQUIRED_TRANSFORMS: [&str; 3] = [
    BODY_CENTER2MAP,
    BODY_CENTER2TRAJECTORY,
    BODY_CENTER2GLOBAL_TRAJECTORY,
];

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Records the latest value of each transform and whether all required ones have been seen.
#[derive(Debug, Clone)]
pub struct TransformGate {
    required: Vec<String>,

    latest: HashMap<String, Isometry3<f64>>,

    /// Latched once all required transforms have been seen
    open: bool,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Result of asking a transform provider for a transform at a given time.
#[derive(Debug, Clone, PartialEq)]
pub enum TfStatus {
    /// The transform is known at the requested time.
    Available(Isometry3<f64>),

    /// The transform is not known yet, but may become available later.
    NotYetAvailable,

    /// The transform stack cannot ever resolve this transform. The string describes why.
    Unresolvable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum TfError {
    #[error("Fatal error in the transformation stack, cannot resolve {name}: {reason}")]
    Unresolvable { name: String, reason: String },

    #[error("Transform {0} has not been observed yet")]
    NotObserved(String),
}

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// A source of named body-to-frame transforms.
pub trait TransformProvider {
    /// Resolve the named transform at the given time.
    fn resolve(&mut self, name: &str, time_s: f64) -> TfStatus;
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl TransformGate {
    /// Create a new closed gate requiring the given transforms.
    pub fn new(required: &[&str]) -> Self {
        Self {
            required: required.iter().map(|s| s.to_string()).collect(),
            latest: HashMap::new(),
            open: required.is_empty(),
        }
    }

    /// Forget every observed transform and close the gate.
    pub fn reset(&mut self) {
        self.latest.clear();
        self.open = self.required.is_empty();
    }

    /// Record a new value of a transform.
    ///
    /// Transforms which are not required are still recorded but never affect whether the gate is
    /// open.
    pub fn observe(&mut self, name: &str, tf: Isometry3<f64>) {
        self.latest.insert(name.to_string(), tf);

        if !self.open && self.required.iter().all(|r| self.latest.contains_key(r)) {
            info!("All required transformations received, gate open");
            self.open = true;
        }
    }

    /// Returns true once every required transform has been observed at least once.
    pub fn all_required_seen(&self) -> bool {
        self.open
    }

    /// Get the latest value of a transform, if it has been observed.
    pub fn get(&self, name: &str) -> Option<&Isometry3<f64>> {
        self.latest.get(name)
    }

    /// Get the latest value of a transform, or an error if it has not been observed.
    pub fn try_get(&self, name: &str) -> Result<Isometry3<f64>, TfError> {
        self.latest
            .get(name)
            .copied()
            .ok_or_else(|| TfError::NotObserved(name.to_string()))
    }

    /// Pull every required transform from the provider at the given time.
    ///
    /// Transforms which are not yet available keep their previous value. Returns the names of the
    /// transforms which were updated, or an error if any transform cannot be resolved.
    pub fn pull<T: TransformProvider + ?Sized>(
        &mut self,
        provider: &mut T,
        time_s: f64,
    ) -> Result<Vec<String>, TfError> {
        let mut updated = vec![];

        for i in 0..self.required.len() {
            let name = self.required[i].clone();

            match provider.resolve(&name, time_s) {
                TfStatus::Available(tf) => {
                    self.observe(&name, tf);
                    updated.push(name);
                }
                TfStatus::NotYetAvailable => {
                    debug!("Transform {} not yet available at {:.3} s", name, time_s)
                }
                TfStatus::Unresolvable(reason) => {
                    return Err(TfError::Unresolvable { name, reason })
                }
            }
        }

        Ok(updated)
    }
}

impl Default for TransformGate {
    fn default() -> Self {
        Self::new(&REQUIRED_TRANSFORMS)
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use nalgebra::Vector3;

    struct FixedProvider {
        available: Vec<&'static str>,
        broken: Option<&'static str>,
    }

    impl TransformProvider for FixedProvider {
        fn resolve(&mut self, name: &str, _time_s: f64) -> TfStatus {
            if self.broken == Some(name) {
                TfStatus::Unresolvable("no chain between frames".into())
            } else if self.available.contains(&name) {
                TfStatus::Available(Isometry3::translation(1.0, 0.0, 0.0))
            } else {
                TfStatus::NotYetAvailable
            }
        }
    }

    #[test]
    fn test_gate_opens_only_when_all_seen() {
        let mut gate = TransformGate::default();
        assert!(!gate.all_required_seen());

        gate.observe(BODY_CENTER2MAP, Isometry3::identity());
        gate.observe("some_other_frame", Isometry3::identity());
        gate.observe(BODY_CENTER2TRAJECTORY, Isometry3::identity());
        assert!(!gate.all_required_seen());

        gate.observe(BODY_CENTER2GLOBAL_TRAJECTORY, Isometry3::identity());
        assert!(gate.all_required_seen());

        // Latest value wins
        gate.observe(BODY_CENTER2MAP, Isometry3::translation(0.0, 2.0, 0.0));
        assert_eq!(
            gate.get(BODY_CENTER2MAP).unwrap().translation.vector,
            Vector3::new(0.0, 2.0, 0.0)
        );

        gate.reset();
        assert!(!gate.all_required_seen());
        assert!(gate.try_get(BODY_CENTER2MAP).is_err());
    }

    #[test]
    fn test_pull() {
        let mut gate = TransformGate::default();
        let mut provider = FixedProvider {
            available: vec![BODY_CENTER2MAP, BODY_CENTER2TRAJECTORY],
            broken: None,
        };

        assert_eq!(gate.pull(&mut provider, 0.0).unwrap().len(), 2);
        assert!(!gate.all_required_seen());

        provider.available.push(BODY_CENTER2GLOBAL_TRAJECTORY);
        let updated = gate.pull(&mut provider, 0.1).unwrap();
        assert_eq!(updated.len(), 3);
        assert!(updated.iter().any(|n| n == BODY_CENTER2GLOBAL_TRAJECTORY));
        assert!(gate.all_required_seen());

        // Losing a transform later keeps the last value and the gate open
        provider.available = vec![];
        assert!(gate.pull(&mut provider, 0.2).unwrap().is_empty());
        assert!(gate.all_required_seen());
        assert!(gate.try_get(BODY_CENTER2GLOBAL_TRAJECTORY).is_ok());

        provider.broken = Some(BODY_CENTER2TRAJECTORY);
        match gate.pull(&mut provider, 0.3) {
            Err(TfError::Unresolvable { name, .. }) => assert_eq!(name, BODY_CENTER2TRAJECTORY),
            r => panic!("Expected unresolvable error, got {:?}", r),
        }
    }
}
