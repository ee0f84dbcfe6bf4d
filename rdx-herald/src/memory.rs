//! In-memory collaborators.
//!
//! `MemoryStore` and `MemoryPlatform` implement the collaborator traits over
//! locked maps. The daemon and the shell run on them, and the lifecycle tests
//! use them to observe what a trigger sent, edited or deleted.

use crate::collab::{Collaborators, Directory, EntryStore, MessageHandle, Messenger};
use crate::common::{ChannelRef, EntryId, GuildRef, MessageRef};
use crate::config::ChannelSettings;
use crate::entry::ScheduleEntry;
use crate::error::{BackingMessageMissing, CollabError, HeraldError};
use crate::record::EntryRecord;
use crate::template::{DefaultDisplay, DefaultTemplates};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info};

fn poisoned(collaborator: &'static str) -> CollabError {
    CollabError::new(collaborator, "lock poisoned")
}

/// Entry records keyed by id.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<EntryId, EntryRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The smallest positive id not in use.
    pub fn next_id(&self) -> Result<EntryId, CollabError> {
        let records = self.records.read().map_err(|_| poisoned("store"))?;
        let mut candidate = 1;
        for id in records.keys() {
            if id.0 != candidate {
                break;
            }
            candidate += 1;
        }
        Ok(EntryId(candidate))
    }

    pub fn get(&self, id: EntryId) -> Option<EntryRecord> {
        self.records.read().ok()?.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EntryStore for MemoryStore {
    fn load(&self, id: EntryId) -> Result<Option<EntryRecord>, CollabError> {
        let records = self.records.read().map_err(|_| poisoned("store"))?;
        Ok(records.get(&id).cloned())
    }

    fn save(&self, record: &EntryRecord) -> Result<(), CollabError> {
        let mut records = self.records.write().map_err(|_| poisoned("store"))?;
        records.insert(record.id, record.clone());
        Ok(())
    }

    fn delete(&self, id: EntryId) -> Result<(), CollabError> {
        let mut records = self.records.write().map_err(|_| poisoned("store"))?;
        records.remove(&id);
        Ok(())
    }

    fn ids(&self) -> Result<Vec<EntryId>, CollabError> {
        let records = self.records.read().map_err(|_| poisoned("store"))?;
        Ok(records.keys().copied().collect())
    }
}

/// A message recorded by [`MemoryPlatform`]'s `send`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub channel: ChannelRef,
    pub content: String,
}

#[derive(Debug, Clone)]
struct ChannelInfo {
    guild: GuildRef,
    name: String,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    guild: GuildRef,
    channel: ChannelRef,
    content: String,
}

/// A chat platform held in memory: guild channels, posted messages, and a log
/// of everything sent.
#[derive(Debug, Default)]
pub struct MemoryPlatform {
    channels: RwLock<BTreeMap<ChannelRef, ChannelInfo>>,
    messages: RwLock<HashMap<MessageRef, StoredMessage>>,
    sent: Mutex<Vec<SentMessage>>,
    next_message: AtomicU64,
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a channel in `guild`. Re-adding an id renames it.
    pub fn add_channel(&self, guild: &GuildRef, id: &str, name: &str) -> ChannelRef {
        let channel = ChannelRef::new(id);
        if let Ok(mut channels) = self.channels.write() {
            channels.insert(
                channel.clone(),
                ChannelInfo {
                    guild: guild.clone(),
                    name: name.to_string(),
                },
            );
        }
        channel
    }

    /// Posts a persistent message, such as an entry's display.
    pub fn post(&self, channel: &ChannelRef, content: &str) -> Result<MessageHandle, CollabError> {
        let guild = self
            .channels
            .read()
            .map_err(|_| poisoned("platform"))?
            .get(channel)
            .map(|info| info.guild.clone())
            .ok_or_else(|| CollabError::new("platform", format!("unknown channel {}", channel)))?;
        let message = MessageRef::new((self.next_message.fetch_add(1, Ordering::Relaxed) + 1).to_string());
        self.messages.write().map_err(|_| poisoned("platform"))?.insert(
            message.clone(),
            StoredMessage {
                guild: guild.clone(),
                channel: channel.clone(),
                content: content.to_string(),
            },
        );
        Ok(MessageHandle {
            guild,
            channel: channel.clone(),
            message,
        })
    }

    pub fn message_content(&self, message: &MessageRef) -> Option<String> {
        self.messages
            .read()
            .ok()?
            .get(message)
            .map(|stored| stored.content.clone())
    }

    /// Removes a message as if a user deleted it on the platform.
    pub fn remove_message(&self, message: &MessageRef) -> bool {
        self.messages
            .write()
            .map(|mut messages| messages.remove(message).is_some())
            .unwrap_or(false)
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    /// Drains the sent log.
    pub fn take_sent(&self) -> Vec<SentMessage> {
        self.sent
            .lock()
            .map(|mut sent| std::mem::take(&mut *sent))
            .unwrap_or_default()
    }
}

impl Messenger for MemoryPlatform {
    fn send(&self, content: &str, channel: &ChannelRef) -> Result<(), CollabError> {
        if !self
            .channels
            .read()
            .map_err(|_| poisoned("platform"))?
            .contains_key(channel)
        {
            return Err(CollabError::new("platform", format!("unknown channel {}", channel)));
        }
        debug!("-> #{}: {}", channel, content);
        self.sent.lock().map_err(|_| poisoned("platform"))?.push(SentMessage {
            channel: channel.clone(),
            content: content.to_string(),
        });
        Ok(())
    }

    fn edit(&self, content: &str, handle: &MessageHandle) -> Result<(), CollabError> {
        let mut messages = self.messages.write().map_err(|_| poisoned("platform"))?;
        let stored = messages
            .get_mut(&handle.message)
            .ok_or_else(|| CollabError::new("platform", format!("unknown message {}", handle.message)))?;
        stored.content = content.to_string();
        Ok(())
    }

    fn delete(&self, handle: &MessageHandle) -> Result<(), CollabError> {
        let mut messages = self.messages.write().map_err(|_| poisoned("platform"))?;
        messages
            .remove(&handle.message)
            .map(|_| ())
            .ok_or_else(|| CollabError::new("platform", format!("unknown message {}", handle.message)))
    }
}

impl Directory for MemoryPlatform {
    fn message(
        &self,
        guild: &GuildRef,
        channel: &ChannelRef,
        message: &MessageRef,
    ) -> Result<MessageHandle, BackingMessageMissing> {
        let missing = || BackingMessageMissing {
            channel: channel.clone(),
            message: message.clone(),
        };
        let messages = self.messages.read().map_err(|_| missing())?;
        match messages.get(message) {
            Some(stored) if stored.guild == *guild && stored.channel == *channel => Ok(MessageHandle {
                guild: guild.clone(),
                channel: channel.clone(),
                message: message.clone(),
            }),
            _ => Err(missing()),
        }
    }

    fn channel_by_id(&self, guild: &GuildRef, id: &str) -> Option<ChannelRef> {
        let channels = self.channels.read().ok()?;
        let channel = ChannelRef::new(id);
        channels
            .get(&channel)
            .filter(|info| info.guild == *guild)
            .map(|_| channel)
    }

    fn channels_by_name(&self, guild: &GuildRef, name: &str) -> Vec<ChannelRef> {
        let Ok(channels) = self.channels.read() else {
            return Vec::new();
        };
        let name = name.to_lowercase();
        channels
            .iter()
            .filter(|(_, info)| info.guild == *guild && info.name.to_lowercase() == name)
            .map(|(channel, _)| channel.clone())
            .collect()
    }
}

/// Bundles a store and a platform with the default templates and display.
pub fn collaborators(store: Arc<MemoryStore>, platform: Arc<MemoryPlatform>) -> Collaborators {
    Collaborators {
        store,
        messenger: platform.clone(),
        directory: platform,
        templates: Arc::new(DefaultTemplates),
        display: Arc::new(DefaultDisplay),
    }
}

/// Posts a new entry's display in its channel, assigns the next free id, and
/// stores it.
pub fn publish(
    store: &MemoryStore,
    platform: &MemoryPlatform,
    settings: &ChannelSettings,
    mut entry: ScheduleEntry,
) -> Result<ScheduleEntry, HeraldError> {
    let handle = platform.post(entry.channel(), &entry.describe(settings))?;
    entry.assign_identity(store.next_id()?, handle.message.clone())?;
    store.save(&entry.to_record()?)?;
    platform.edit(&entry.describe(settings), &handle)?;
    info!("Published entry \"{}\" [{:?}]", entry.title(), entry.id());
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record(id: u32) -> EntryRecord {
        let start = Utc.with_ymd_and_hms(2026, 10, 20, 18, 0, 0).unwrap();
        EntryRecord {
            id: EntryId(id),
            message_id: MessageRef::new("1"),
            channel_id: ChannelRef::new("10"),
            guild_id: GuildRef::new("1"),
            external_calendar_id: None,
            title: format!("entry {id}"),
            start,
            end: start,
            comments: Vec::new(),
            repeat: 0,
            reminders: Vec::new(),
            end_reminders: Vec::new(),
            rsvp_members: BTreeMap::new(),
            rsvp_limits: BTreeMap::new(),
            deadline: None,
            url: None,
            image: None,
            thumbnail: None,
            start_disabled: false,
            end_disabled: false,
            reminders_disabled: false,
            has_started: false,
            expire: None,
            announcements: Default::default(),
            announcement_dates: BTreeMap::new(),
            announcement_times: BTreeMap::new(),
            announcement_targets: BTreeMap::new(),
            announcement_messages: BTreeMap::new(),
        }
    }

    #[test]
    fn next_id_fills_gaps() {
        let store = MemoryStore::new();
        assert_eq!(store.next_id().unwrap(), EntryId(1));
        store.save(&record(1)).unwrap();
        store.save(&record(2)).unwrap();
        store.save(&record(4)).unwrap();
        assert_eq!(store.next_id().unwrap(), EntryId(3));
        store.delete(EntryId(1)).unwrap();
        assert_eq!(store.next_id().unwrap(), EntryId(1));
        assert_eq!(store.ids().unwrap(), vec![EntryId(2), EntryId(4)]);
    }

    #[test]
    fn messages_are_located_only_in_their_channel() {
        let platform = MemoryPlatform::new();
        let guild = GuildRef::new("1");
        let schedule = platform.add_channel(&guild, "10", "schedule");
        let other = platform.add_channel(&guild, "11", "other");
        let handle = platform.post(&schedule, "hello").unwrap();

        assert_eq!(platform.message(&guild, &schedule, &handle.message), Ok(handle.clone()));
        assert!(platform.message(&guild, &other, &handle.message).is_err());

        platform.edit("edited", &handle).unwrap();
        assert_eq!(platform.message_content(&handle.message).as_deref(), Some("edited"));

        assert!(platform.remove_message(&handle.message));
        assert!(platform.message(&guild, &schedule, &handle.message).is_err());
        assert!(platform.delete(&handle).is_err());
    }

    #[test]
    fn channel_names_match_without_case() {
        let platform = MemoryPlatform::new();
        let guild = GuildRef::new("1");
        let lounge = platform.add_channel(&guild, "10", "Café-Événements");
        platform.add_channel(&GuildRef::new("2"), "20", "café-événements");

        assert_eq!(platform.channels_by_name(&guild, "CAFÉ-ÉVÉNEMENTS"), vec![lounge]);
        assert!(platform.channels_by_name(&guild, "cafe-evenements").is_empty());
    }

    #[test]
    fn sends_are_logged() {
        let platform = MemoryPlatform::new();
        let guild = GuildRef::new("1");
        let channel = platform.add_channel(&guild, "10", "general");
        platform.send("one", &channel).unwrap();
        assert!(platform.send("two", &ChannelRef::new("99")).is_err());
        assert_eq!(
            platform.take_sent(),
            vec![SentMessage {
                channel,
                content: "one".to_string()
            }]
        );
        assert!(platform.sent().is_empty());
    }
}
