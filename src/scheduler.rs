//! Host-scheduler seam.
//!
//! The engine only produces [`WorkUnit`]s; queueing, retries, and concurrency
//! limits belong to the host. Units are write-only from the engine's
//! perspective — handed off, never read back.

use crate::error::{GleanerError, GleanerResult};
use crate::plan::WorkUnit;
use async_trait::async_trait;
use std::sync::Mutex;

/// Accepts continuation work units for later execution.
#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn schedule(&self, unit: WorkUnit) -> GleanerResult<()>;
}

/// Collects scheduled units in memory. Test double.
#[derive(Default)]
pub struct RecordingScheduler {
    units: Mutex<Vec<WorkUnit>>,
}

impl RecordingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Units scheduled so far, in hand-off order.
    pub fn scheduled(&self) -> Vec<WorkUnit> {
        self.units.lock().unwrap().clone()
    }
}

#[async_trait]
impl Scheduler for RecordingScheduler {
    async fn schedule(&self, unit: WorkUnit) -> GleanerResult<()> {
        self.units.lock().unwrap().push(unit);
        Ok(())
    }
}

/// Streams units to stdout as JSON lines; the CLI's stand-in for a host.
pub struct StdoutScheduler;

#[async_trait]
impl Scheduler for StdoutScheduler {
    async fn schedule(&self, unit: WorkUnit) -> GleanerResult<()> {
        let line = serde_json::to_string(&unit)
            .map_err(|e| GleanerError::Schedule(format!("unit serialization failed: {e}")))?;
        println!("{line}");
        Ok(())
    }
}
