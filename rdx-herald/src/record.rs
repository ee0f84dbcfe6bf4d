//! The persisted form of an entry.
//!
//! `EntryRecord` is what the store reads and writes. Timestamps are kept as
//! UTC instants and re-zoned on load with the schedule channel's time zone.
//! The repeat rule is the integer bitmask, and announcement overrides are
//! kept as the distinct-timestamp set plus one map per field, keyed by the
//! override's entry-local id.

use crate::common::{ChannelRef, EntryId, GuildRef, MessageRef, OverrideId};
use crate::components::reminder::{AnnouncementOverride, AnnouncementOverrides};
use crate::components::repeat::RepeatRule;
use crate::entry::{Presentation, QuietToggles, Rsvp, ScheduleEntry};
use crate::error::EntryError;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryRecord {
    pub id: EntryId,
    pub message_id: MessageRef,
    pub channel_id: ChannelRef,
    pub guild_id: GuildRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_calendar_id: Option<String>,

    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub comments: Vec<String>,
    #[serde(default)]
    pub repeat: u32,

    #[serde(default)]
    pub reminders: Vec<DateTime<Utc>>,
    #[serde(default)]
    pub end_reminders: Vec<DateTime<Utc>>,

    #[serde(default)]
    pub rsvp_members: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub rsvp_limits: BTreeMap<String, u32>,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,

    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,

    #[serde(default)]
    pub start_disabled: bool,
    #[serde(default)]
    pub end_disabled: bool,
    #[serde(default)]
    pub reminders_disabled: bool,

    #[serde(default)]
    pub has_started: bool,
    #[serde(default)]
    pub expire: Option<DateTime<Utc>>,

    #[serde(default)]
    pub announcements: BTreeSet<DateTime<Utc>>,
    #[serde(default)]
    pub announcement_dates: BTreeMap<String, DateTime<Utc>>,
    #[serde(default)]
    pub announcement_times: BTreeMap<String, String>,
    #[serde(default)]
    pub announcement_targets: BTreeMap<String, String>,
    #[serde(default)]
    pub announcement_messages: BTreeMap<String, String>,
}

impl ScheduleEntry {
    /// Converts the entry into its persisted form. Requires an identity.
    pub fn to_record(&self) -> Result<EntryRecord, EntryError> {
        let id = self.id.ok_or(EntryError::MissingIdentity("id"))?;
        let message_id = self
            .message
            .clone()
            .ok_or(EntryError::MissingIdentity("message"))?;

        let mut record = EntryRecord {
            id,
            message_id,
            channel_id: self.channel.clone(),
            guild_id: self.guild.clone(),
            external_calendar_id: self.external_calendar_id.clone(),
            title: self.title.clone(),
            start: self.start.with_timezone(&Utc),
            end: self.end.with_timezone(&Utc),
            comments: self.presentation.comments.clone(),
            repeat: self.repeat.encode(),
            reminders: self.start_reminders.iter().copied().collect(),
            end_reminders: self.end_reminders.iter().copied().collect(),
            rsvp_members: self.rsvp.members.clone(),
            rsvp_limits: self.rsvp.limits.clone(),
            deadline: self.rsvp.deadline.map(|d| d.with_timezone(&Utc)),
            url: self.presentation.title_url.clone(),
            image: self.presentation.image_url.clone(),
            thumbnail: self.presentation.thumbnail_url.clone(),
            start_disabled: self.quiet.start,
            end_disabled: self.quiet.end,
            reminders_disabled: self.quiet.remind,
            has_started: self.has_started,
            expire: self.expire.map(|e| e.with_timezone(&Utc)),
            announcements: self.overrides.due_timestamps().clone(),
            announcement_dates: BTreeMap::new(),
            announcement_times: BTreeMap::new(),
            announcement_targets: BTreeMap::new(),
            announcement_messages: BTreeMap::new(),
        };
        for (override_id, announcement) in self.overrides.iter() {
            let key = override_id.to_string();
            record.announcement_dates.insert(key.clone(), announcement.at);
            record
                .announcement_times
                .insert(key.clone(), announcement.time_spec.clone());
            record
                .announcement_targets
                .insert(key.clone(), announcement.target.clone());
            record
                .announcement_messages
                .insert(key, announcement.message.clone());
        }
        Ok(record)
    }

    /// Rehydrates a stored entry in `zone`.
    ///
    /// Override rows that are incomplete or carry a non-numeric id are dropped
    /// with a warning; the distinct-timestamp set is rebuilt from the rest.
    pub fn from_record(record: EntryRecord, zone: Tz) -> Result<Self, EntryError> {
        let repeat = RepeatRule::decode(record.repeat)?;
        if record.end < record.start {
            return Err(EntryError::EndBeforeStart);
        }

        let mut table = BTreeMap::new();
        for (key, at) in &record.announcement_dates {
            let Ok(raw) = key.parse::<u32>() else {
                warn!("Entry {} has announcement with invalid id \"{}\"", record.id, key);
                continue;
            };
            let (Some(target), Some(message)) = (
                record.announcement_targets.get(key),
                record.announcement_messages.get(key),
            ) else {
                warn!("Entry {} has incomplete announcement {}", record.id, key);
                continue;
            };
            table.insert(
                OverrideId(raw),
                AnnouncementOverride {
                    at: *at,
                    time_spec: record.announcement_times.get(key).cloned().unwrap_or_default(),
                    target: target.clone(),
                    message: message.clone(),
                },
            );
        }

        Ok(ScheduleEntry {
            id: Some(record.id),
            message: Some(record.message_id),
            channel: record.channel_id,
            guild: record.guild_id,
            external_calendar_id: record.external_calendar_id,
            title: record.title,
            start: record.start.with_timezone(&zone),
            end: record.end.with_timezone(&zone),
            expire: record.expire.map(|e| e.with_timezone(&zone)),
            repeat,
            start_reminders: record.reminders.into_iter().collect(),
            end_reminders: record.end_reminders.into_iter().collect(),
            overrides: AnnouncementOverrides::from_table(table),
            rsvp: Rsvp {
                members: record.rsvp_members,
                limits: record.rsvp_limits,
                deadline: record.deadline.map(|d| d.with_timezone(&zone)),
            },
            presentation: Presentation {
                title_url: record.url,
                image_url: record.image,
                thumbnail_url: record.thumbnail,
                comments: record.comments,
            },
            quiet: QuietToggles {
                start: record.start_disabled,
                end: record.end_disabled,
                remind: record.reminders_disabled,
            },
            has_started: record.has_started,
        })
    }
}
