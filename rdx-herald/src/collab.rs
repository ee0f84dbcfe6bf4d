//! Interfaces of the collaborators the core consumes.
//!
//! The core never talks to the chat platform, the database or the templating
//! layer directly. Every lifecycle operation receives these through a
//! [`Collaborators`] bundle. Implementations must be safe for concurrent use,
//! since the dispatcher triggers different entries in parallel.

use crate::common::{ChannelRef, EntryId, GuildRef, MessageRef};
use crate::config::ChannelSettings;
use crate::entry::ScheduleEntry;
use crate::error::{BackingMessageMissing, CollabError};
use crate::record::EntryRecord;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// A located platform message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageHandle {
    pub guild: GuildRef,
    pub channel: ChannelRef,
    pub message: MessageRef,
}

/// Persistent entry storage.
pub trait EntryStore: Send + Sync {
    fn load(&self, id: EntryId) -> Result<Option<EntryRecord>, CollabError>;
    fn save(&self, record: &EntryRecord) -> Result<(), CollabError>;
    fn delete(&self, id: EntryId) -> Result<(), CollabError>;
    /// Every stored entry id; used by the dispatcher's scan.
    fn ids(&self) -> Result<Vec<EntryId>, CollabError>;
}

/// Outbound messaging. Delivery failures are reported once and never retried
/// by the core.
pub trait Messenger: Send + Sync {
    fn send(&self, content: &str, channel: &ChannelRef) -> Result<(), CollabError>;
    fn edit(&self, content: &str, message: &MessageHandle) -> Result<(), CollabError>;
    fn delete(&self, message: &MessageHandle) -> Result<(), CollabError>;
}

/// Lookups against the platform.
pub trait Directory: Send + Sync {
    /// Locates an entry's backing message. Must answer within a bounded time;
    /// anything that cannot be retrieved is reported as missing.
    fn message(
        &self,
        guild: &GuildRef,
        channel: &ChannelRef,
        message: &MessageRef,
    ) -> Result<MessageHandle, BackingMessageMissing>;

    fn channel_by_id(&self, guild: &GuildRef, id: &str) -> Option<ChannelRef>;

    /// Case-insensitive name lookup; several channels may share a name.
    fn channels_by_name(&self, guild: &GuildRef, name: &str) -> Vec<ChannelRef>;
}

/// Message templating and time expression resolution.
pub trait TemplateResolver: Send + Sync {
    /// Renders `template` for `entry`, formatted per its schedule channel's
    /// `settings`.
    fn render(&self, template: &str, entry: &ScheduleEntry, settings: &ChannelSettings) -> String;

    /// Resolves an absolute or entry-relative time expression.
    fn resolve_time_spec(&self, spec: &str, entry: &ScheduleEntry) -> Option<DateTime<Utc>>;
}

/// Renders the content of an entry's backing message.
pub trait DisplayRenderer: Send + Sync {
    fn render(&self, entry: &ScheduleEntry, settings: &ChannelSettings) -> String;
}

/// Everything a lifecycle operation may call out to.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn EntryStore>,
    pub messenger: Arc<dyn Messenger>,
    pub directory: Arc<dyn Directory>,
    pub templates: Arc<dyn TemplateResolver>,
    pub display: Arc<dyn DisplayRenderer>,
}
