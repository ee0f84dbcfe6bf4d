//! Defines the event types broadcast by the Herald engine.
//!
//! Listeners subscribe to these to observe what the dispatcher did on each
//! scan, without touching the store.

use crate::common::EntryId;
use crate::lifecycle::{Trigger, TriggerOutcome};
use chrono::{DateTime, Utc};

/// Everything the dispatcher reports.
#[derive(Debug, Clone, PartialEq)]
pub enum HeraldEvent {
    /// Fired once when the dispatcher loop begins.
    EngineStarted { at: DateTime<Utc> },
    /// Fired once when the engine's `run` loop is about to exit.
    EngineShutdown,
    /// A trigger ran against an entry.
    Triggered {
        id: EntryId,
        trigger: Trigger,
        outcome: TriggerOutcome,
    },
    /// An entry's triggers did not finish within the lookup timeout. Its
    /// work keeps running in the background and the entry is skipped by
    /// later scans until it completes.
    TimedOut { id: EntryId },
    /// The store could not list its entries.
    ScanFailed { reason: String },
}
