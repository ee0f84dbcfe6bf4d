//! # Herald
//!
//! A lifecycle engine for scheduled events posted in chat channels.
//!
//! Herald keeps each event as a [`ScheduleEntry`](entry::ScheduleEntry) and
//! drives it through its lifecycle: announcing its start and end, sending
//! reminders and custom announcements, and renewing it according to its
//! repeat rule or removing it once it is over.
//!
//! ## Core Concepts
//!
//! - **Repeat rule**: A compact bitmask naming weekdays, a day interval, a
//!   minute interval, or a yearly repeat. See [`components::repeat`].
//! - **Triggers**: `start`, `end`, `remind` and `announce` are invoked when
//!   one of an entry's timestamps is due. Each is a no-op when nothing is due.
//! - **Collaborators**: Storage, messaging, lookups and templating sit behind
//!   traits in [`collab`] and are passed into every trigger explicitly.
//! - **Dispatcher**: [`HeraldEngine`](engine::HeraldEngine) polls the store
//!   and fires due triggers, at most one run per entry at a time.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use herald::memory::{collaborators, MemoryPlatform, MemoryStore};
//! use herald::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = HeraldConfig::load(None)?;
//!     let collab = collaborators(Arc::new(MemoryStore::new()), Arc::new(MemoryPlatform::new()));
//!     let engine = HeraldEngine::new(config, collab);
//!
//!     let mut events = engine.subscribe_events();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("{:?}", event);
//!         }
//!     });
//!
//!     // Runs until Ctrl+C.
//!     engine.run().await?;
//!     Ok(())
//! }
//! ```

pub const ENGINE_NAME: &str = "Herald";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod collab;
pub mod common;
pub mod components;
pub mod config;
pub mod engine;
pub mod entry;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod memory;
pub mod record;
pub mod template;

/// A prelude module for easy importing of the most common Herald types.
pub mod prelude {
    pub use crate::collab::Collaborators;
    pub use crate::common::{ChannelRef, EntryId, GuildRef, MessageRef, OverrideId};
    pub use crate::components::repeat::{RepeatRule, WeekdaySet};
    pub use crate::config::{ChannelSettings, HeraldConfig};
    pub use crate::engine::HeraldEngine;
    pub use crate::entry::{QuietToggles, ScheduleEntry};
    pub use crate::error::HeraldError;
    pub use crate::events::HeraldEvent;
    pub use crate::lifecycle::{Transition, Trigger, TriggerContext, TriggerOutcome};
}
