//! Per-store cost accumulators for benchmark drivers.
//!
//! The counters live on the `Db` object rather than in process globals, so
//! two stores in one process never share them. Drivers update once per
//! completed batch, not per operation, keeping contention negligible.

use std::sync::Mutex;
use std::time::Duration;

/// Accumulated read/write workload costs.
#[derive(Debug, Default)]
pub struct Telemetry {
    /// Total time spent in read batches.
    read_cost: Mutex<Duration>,

    /// Total time spent in write batches.
    write_cost: Mutex<Duration>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the elapsed time of one completed read batch.
    pub fn add_read_cost(&self, elapsed: Duration) {
        if let Ok(mut cost) = self.read_cost.lock() {
            *cost += elapsed;
        }
    }

    /// Add the elapsed time of one completed write batch.
    pub fn add_write_cost(&self, elapsed: Duration) {
        if let Ok(mut cost) = self.write_cost.lock() {
            *cost += elapsed;
        }
    }

    /// Total accumulated read cost.
    pub fn read_cost(&self) -> Duration {
        self.read_cost.lock().map(|c| *c).unwrap_or_default()
    }

    /// Total accumulated write cost.
    pub fn write_cost(&self) -> Duration {
        self.write_cost.lock().map(|c| *c).unwrap_or_default()
    }
}
