// Copyright 2026 Gleaner Contributors
// SPDX-License-Identifier: Apache-2.0

//! Engine event bus — typed events from every component.
//!
//! The bus is a `tokio::sync::broadcast` channel carrying [`EngineEvent`]
//! values. Monitoring consumers (the host scheduler's dashboard, log sinks)
//! subscribe independently; with no subscribers events are silently dropped.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Every event the engine emits. Serialized to JSON for external consumers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    // ── Materialization ───────────────────
    /// A materialization wait started on a subtree.
    MaterializeStarted { handler: String },
    /// The completion predicate was satisfied.
    ContentSettled { handler: String, elapsed_ms: u64 },
    /// The subtree root had no children; resolved to "no data".
    MaterializeEmpty { handler: String },

    // ── Extraction ────────────────────────
    /// A record batch finished assembly.
    RecordsAssembled {
        handler: String,
        records: usize,
        failed: usize,
    },
    /// A single record was dropped because a required field was missing.
    RecordSkipped {
        handler: String,
        field: String,
        selector: String,
    },

    // ── Validation ────────────────────────
    /// An assembled result failed its outbound schema. The result is still
    /// delivered; this event exists for structure-drift monitoring.
    OutputMismatch {
        handler: String,
        errors: Vec<String>,
    },

    // ── Planning ──────────────────────────
    /// Continuation work units were handed to the host scheduler.
    ContinuationPlanned {
        handler: String,
        units: usize,
        mode: String,
    },

    // ── Unit lifecycle ────────────────────
    /// An anti-automation challenge was detected; the unit aborted.
    Blocked { handler: String, reason: String },
}

impl EngineEvent {
    /// The handler this event belongs to.
    pub fn handler(&self) -> &str {
        match self {
            EngineEvent::MaterializeStarted { handler }
            | EngineEvent::ContentSettled { handler, .. }
            | EngineEvent::MaterializeEmpty { handler }
            | EngineEvent::RecordsAssembled { handler, .. }
            | EngineEvent::RecordSkipped { handler, .. }
            | EngineEvent::OutputMismatch { handler, .. }
            | EngineEvent::ContinuationPlanned { handler, .. }
            | EngineEvent::Blocked { handler, .. } => handler,
        }
    }
}

/// The central event bus.
///
/// Components emit events through this bus; consumers subscribe to receive a
/// stream of all events.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers. Silently ignores if no subscribers.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to receive all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
