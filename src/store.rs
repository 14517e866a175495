//! The append-only log of decoded measurements.

use std::sync::Mutex;

use crate::measurement::GlucoseMeasurement;

/// An append-only, arrival-ordered log of [`GlucoseMeasurement`]s.
///
/// The store is shared between the session's event-dispatch path and any
/// number of readers (typically behind an `Arc`). Reads return snapshots, so
/// iterating one is safe while further measurements are appended. There is
/// no removal; the log lives as long as the session's consumer keeps it.
#[derive(Debug, Default)]
pub struct MeasurementStore {
    measurements: Mutex<Vec<GlucoseMeasurement>>,
}

impl MeasurementStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a measurement and returns its position in the log.
    pub fn append(&self, measurement: GlucoseMeasurement) -> usize {
        let mut measurements = self.lock();
        measurements.push(measurement);
        measurements.len() - 1
    }

    /// Returns a snapshot of all measurements in arrival order.
    pub fn all(&self) -> Vec<GlucoseMeasurement> {
        self.lock().clone()
    }

    /// Returns the number of measurements appended so far.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<GlucoseMeasurement>> {
        // A panic while holding the guard cannot leave the Vec in a broken
        // state, so poisoning is ignored.
        self.measurements.lock().unwrap_or_else(|e| e.into_inner())
    }
}
