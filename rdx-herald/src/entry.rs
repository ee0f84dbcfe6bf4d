//! The `ScheduleEntry` aggregate.
//!
//! An entry combines identity, timing, the repeat rule, reminder and
//! announcement state, RSVP state and presentation toggles. New entries are
//! assembled with an [`EntryDraft`]; stored entries are rehydrated from an
//! [`EntryRecord`](crate::record::EntryRecord). After that an entry only
//! changes through the lifecycle triggers (see [`crate::lifecycle`]) or
//! through [`ScheduleEntry::update`], which applies a batch of edits
//! atomically and then persists and refreshes the display.

use crate::collab::TemplateResolver;
use crate::common::{ChannelRef, EntryId, GuildRef, MessageRef, OverrideId};
use crate::components::reminder::{regenerate_reminders, AnnouncementOverride, AnnouncementOverrides};
use crate::components::repeat::RepeatRule;
use crate::config::ChannelSettings;
use crate::error::{EntryError, HeraldError, OverrideError};
use crate::lifecycle::TriggerContext;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::collections::{BTreeMap, BTreeSet};

/// Per-entry switches that silence one category of automatic notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QuietToggles {
    pub start: bool,
    pub end: bool,
    pub remind: bool,
}

/// RSVP membership per category, optional capacity limits, and a deadline.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Rsvp {
    pub members: BTreeMap<String, Vec<String>>,
    pub limits: BTreeMap<String, u32>,
    pub deadline: Option<DateTime<Tz>>,
}

impl Rsvp {
    pub fn limit(&self, category: &str) -> Option<u32> {
        self.limits.get(category).copied()
    }

    pub fn members_of(&self, category: &str) -> &[String] {
        self.members.get(category).map(Vec::as_slice).unwrap_or(&[])
    }

    /// A category is full once it has a limit and membership has reached it.
    pub fn is_full(&self, category: &str) -> bool {
        self.limit(category)
            .is_some_and(|limit| self.members_of(category).len() >= limit as usize)
    }
}

/// Links, images and free-text comments shown with an entry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Presentation {
    pub title_url: Option<String>,
    pub image_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub comments: Vec<String>,
}

/// One scheduled event bound to a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleEntry {
    pub(crate) id: Option<EntryId>,
    pub(crate) message: Option<MessageRef>,
    pub(crate) channel: ChannelRef,
    pub(crate) guild: GuildRef,
    pub(crate) external_calendar_id: Option<String>,

    pub(crate) title: String,
    pub(crate) start: DateTime<Tz>,
    pub(crate) end: DateTime<Tz>,
    pub(crate) expire: Option<DateTime<Tz>>,
    pub(crate) repeat: RepeatRule,

    pub(crate) start_reminders: BTreeSet<DateTime<Utc>>,
    pub(crate) end_reminders: BTreeSet<DateTime<Utc>>,
    pub(crate) overrides: AnnouncementOverrides,

    pub(crate) rsvp: Rsvp,
    pub(crate) presentation: Presentation,
    pub(crate) quiet: QuietToggles,

    pub(crate) has_started: bool,
}

impl ScheduleEntry {
    /// Starts a new entry for `channel`. The entry has no identity until
    /// [`ScheduleEntry::assign_identity`] is called.
    pub fn draft(
        channel: ChannelRef,
        guild: GuildRef,
        title: impl Into<String>,
        start: DateTime<Tz>,
        end: DateTime<Tz>,
    ) -> EntryDraft {
        EntryDraft {
            entry: ScheduleEntry {
                id: None,
                message: None,
                channel,
                guild,
                external_calendar_id: None,
                title: title.into(),
                start,
                end,
                expire: None,
                repeat: RepeatRule::None,
                start_reminders: BTreeSet::new(),
                end_reminders: BTreeSet::new(),
                overrides: AnnouncementOverrides::new(),
                rsvp: Rsvp::default(),
                presentation: Presentation::default(),
                quiet: QuietToggles::default(),
                has_started: false,
            },
        }
    }

    /// Binds a new entry to its store id and the message displaying it.
    /// An id can only be assigned once.
    pub fn assign_identity(&mut self, id: EntryId, message: MessageRef) -> Result<(), EntryError> {
        if let Some(existing) = self.id {
            return Err(EntryError::IdentityAssigned(existing));
        }
        self.id = Some(id);
        self.message = Some(message);
        Ok(())
    }

    /// Rebuilds both reminder lists against `reference`.
    pub fn regenerate_reminders(&mut self, settings: &ChannelSettings, reference: DateTime<Utc>) {
        self.start_reminders = regenerate_reminders(reference, &self.start, &settings.reminders);
        self.end_reminders = regenerate_reminders(reference, &self.end, &settings.end_reminders);
    }

    /// Adds an announcement override. The time expression is resolved against
    /// this entry; if it cannot be resolved nothing is stored.
    pub fn add_override(
        &mut self,
        resolver: &dyn TemplateResolver,
        target: impl Into<String>,
        time_spec: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<OverrideId, OverrideError> {
        let time_spec = time_spec.into();
        let at = resolver
            .resolve_time_spec(&time_spec, self)
            .ok_or_else(|| OverrideError::UnresolvableTimeSpec(time_spec.clone()))?;
        self.overrides.insert(AnnouncementOverride {
            at,
            time_spec,
            target: target.into(),
            message: message.into(),
        })
    }

    pub fn remove_override(&mut self, id: OverrideId) -> Option<AnnouncementOverride> {
        self.overrides.remove(id)
    }

    /// Applies a batch of edits, then persists the entry and refreshes its
    /// display.
    ///
    /// Edits run against a copy. If the closure fails, the edited timing
    /// would end before it starts, or the store rejects the copy, the entry is
    /// left untouched. Reminders are regenerated whenever start or end changed.
    pub fn update<F>(&mut self, ctx: &TriggerContext<'_>, edit: F) -> Result<(), HeraldError>
    where
        F: FnOnce(&mut EntryEditor<'_>) -> Result<(), HeraldError>,
    {
        let mut copy = self.clone();
        let retimed = {
            let mut editor = EntryEditor {
                entry: &mut copy,
                resolver: ctx.collab.templates.as_ref(),
                retimed: false,
            };
            edit(&mut editor)?;
            editor.retimed
        };
        if copy.end < copy.start {
            return Err(EntryError::EndBeforeStart.into());
        }
        if retimed {
            copy.regenerate_reminders(ctx.settings, ctx.now);
        }
        copy.save(ctx)?;
        *self = copy;
        if let Ok(handle) = self.backing_message(ctx) {
            self.reload_display(ctx, &handle);
        }
        Ok(())
    }

    pub fn id(&self) -> Option<EntryId> {
        self.id
    }

    pub fn message(&self) -> Option<&MessageRef> {
        self.message.as_ref()
    }

    pub fn channel(&self) -> &ChannelRef {
        &self.channel
    }

    pub fn guild(&self) -> &GuildRef {
        &self.guild
    }

    pub fn external_calendar_id(&self) -> Option<&str> {
        self.external_calendar_id.as_deref()
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn starts_at(&self) -> &DateTime<Tz> {
        &self.start
    }

    pub fn ends_at(&self) -> &DateTime<Tz> {
        &self.end
    }

    pub fn expire(&self) -> Option<&DateTime<Tz>> {
        self.expire.as_ref()
    }

    pub fn repeat_rule(&self) -> RepeatRule {
        self.repeat
    }

    pub fn start_reminders(&self) -> &BTreeSet<DateTime<Utc>> {
        &self.start_reminders
    }

    pub fn end_reminders(&self) -> &BTreeSet<DateTime<Utc>> {
        &self.end_reminders
    }

    pub fn overrides(&self) -> &AnnouncementOverrides {
        &self.overrides
    }

    pub fn rsvp(&self) -> &Rsvp {
        &self.rsvp
    }

    pub fn is_full(&self, category: &str) -> bool {
        self.rsvp.is_full(category)
    }

    pub fn presentation(&self) -> &Presentation {
        &self.presentation
    }

    pub fn comments(&self) -> &[String] {
        &self.presentation.comments
    }

    pub fn quiet(&self) -> QuietToggles {
        self.quiet
    }

    pub fn has_started(&self) -> bool {
        self.has_started
    }

    /// A start equal to the end; such an entry never shows as started.
    pub fn is_instantaneous(&self) -> bool {
        self.start == self.end
    }
}

/// Builder for a new entry.
#[derive(Debug, Clone)]
pub struct EntryDraft {
    entry: ScheduleEntry,
}

impl EntryDraft {
    pub fn repeat(mut self, rule: RepeatRule) -> Self {
        self.entry.repeat = rule;
        self
    }

    pub fn expire(mut self, expire: DateTime<Tz>) -> Self {
        self.entry.expire = Some(expire);
        self
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.entry.presentation.comments.push(comment.into());
        self
    }

    pub fn title_url(mut self, url: impl Into<String>) -> Self {
        self.entry.presentation.title_url = Some(url.into());
        self
    }

    pub fn image_url(mut self, url: impl Into<String>) -> Self {
        self.entry.presentation.image_url = Some(url.into());
        self
    }

    pub fn thumbnail_url(mut self, url: impl Into<String>) -> Self {
        self.entry.presentation.thumbnail_url = Some(url.into());
        self
    }

    pub fn quiet(mut self, quiet: QuietToggles) -> Self {
        self.entry.quiet = quiet;
        self
    }

    pub fn rsvp_limit(mut self, category: impl Into<String>, limit: u32) -> Self {
        self.entry.rsvp.limits.insert(category.into(), limit);
        self
    }

    pub fn rsvp_deadline(mut self, deadline: DateTime<Tz>) -> Self {
        self.entry.rsvp.deadline = Some(deadline);
        self
    }

    pub fn external_calendar_id(mut self, id: impl Into<String>) -> Self {
        self.entry.external_calendar_id = Some(id.into());
        self
    }

    /// Validates the timing and generates the initial reminders.
    pub fn build(self, settings: &ChannelSettings, now: DateTime<Utc>) -> Result<ScheduleEntry, EntryError> {
        let mut entry = self.entry;
        if entry.end < entry.start {
            return Err(EntryError::EndBeforeStart);
        }
        entry.regenerate_reminders(settings, now);
        Ok(entry)
    }
}

/// Named edits applied inside [`ScheduleEntry::update`].
pub struct EntryEditor<'a> {
    entry: &'a mut ScheduleEntry,
    resolver: &'a dyn TemplateResolver,
    retimed: bool,
}

impl EntryEditor<'_> {
    pub fn title(&mut self, title: impl Into<String>) -> &mut Self {
        self.entry.title = title.into();
        self
    }

    /// Moves the entry. Reminders are regenerated when the update commits.
    pub fn reschedule(&mut self, start: DateTime<Tz>, end: DateTime<Tz>) -> &mut Self {
        self.entry.start = start;
        self.entry.end = end;
        self.retimed = true;
        self
    }

    pub fn repeat(&mut self, rule: RepeatRule) -> &mut Self {
        self.entry.repeat = rule;
        self
    }

    pub fn expire(&mut self, expire: Option<DateTime<Tz>>) -> &mut Self {
        self.entry.expire = expire;
        self
    }

    pub fn add_comment(&mut self, comment: impl Into<String>) -> &mut Self {
        self.entry.presentation.comments.push(comment.into());
        self
    }

    /// Removes the comment at a zero-based index, if present.
    pub fn remove_comment(&mut self, index: usize) -> Option<String> {
        (index < self.entry.presentation.comments.len())
            .then(|| self.entry.presentation.comments.remove(index))
    }

    pub fn title_url(&mut self, url: Option<String>) -> &mut Self {
        self.entry.presentation.title_url = url;
        self
    }

    pub fn image_url(&mut self, url: Option<String>) -> &mut Self {
        self.entry.presentation.image_url = url;
        self
    }

    pub fn thumbnail_url(&mut self, url: Option<String>) -> &mut Self {
        self.entry.presentation.thumbnail_url = url;
        self
    }

    pub fn quiet(&mut self, quiet: QuietToggles) -> &mut Self {
        self.entry.quiet = quiet;
        self
    }

    /// Sets or clears the capacity of an RSVP category.
    pub fn rsvp_limit(&mut self, category: impl Into<String>, limit: Option<u32>) -> &mut Self {
        let category = category.into();
        match limit {
            Some(limit) => self.entry.rsvp.limits.insert(category, limit),
            None => self.entry.rsvp.limits.remove(&category),
        };
        self
    }

    pub fn rsvp_members(&mut self, category: impl Into<String>, members: Vec<String>) -> &mut Self {
        self.entry.rsvp.members.insert(category.into(), members);
        self
    }

    pub fn rsvp_deadline(&mut self, deadline: Option<DateTime<Tz>>) -> &mut Self {
        self.entry.rsvp.deadline = deadline;
        self
    }

    pub fn external_calendar_id(&mut self, id: Option<String>) -> &mut Self {
        self.entry.external_calendar_id = id;
        self
    }

    pub fn add_override(
        &mut self,
        target: impl Into<String>,
        time_spec: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<OverrideId, OverrideError> {
        self.entry.add_override(self.resolver, target, time_spec, message)
    }

    pub fn remove_override(&mut self, id: OverrideId) -> bool {
        self.entry.remove_override(id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::DefaultTemplates;
    use chrono::{Duration, TimeZone};
    use chrono_tz::Europe::Berlin;

    fn draft(start_hour: u32, end_hour: u32) -> EntryDraft {
        ScheduleEntry::draft(
            ChannelRef::new("10"),
            GuildRef::new("1"),
            "Raid night",
            Berlin.with_ymd_and_hms(2026, 10, 20, start_hour, 0, 0).unwrap(),
            Berlin.with_ymd_and_hms(2026, 10, 20, end_hour, 0, 0).unwrap(),
        )
    }

    #[test]
    fn build_rejects_end_before_start() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();
        let result = draft(20, 19).build(&ChannelSettings::default(), now);
        assert_eq!(result.unwrap_err(), EntryError::EndBeforeStart);
    }

    #[test]
    fn build_generates_reminders() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();
        let settings = ChannelSettings {
            reminders: vec![60, 10],
            end_reminders: vec![5],
            ..ChannelSettings::default()
        };
        let entry = draft(19, 21).build(&settings, now).unwrap();
        let start_utc = entry.starts_at().with_timezone(&Utc);
        let end_utc = entry.ends_at().with_timezone(&Utc);
        assert_eq!(
            entry.start_reminders().iter().copied().collect::<Vec<_>>(),
            vec![start_utc - Duration::minutes(60), start_utc - Duration::minutes(10)]
        );
        assert_eq!(
            entry.end_reminders().iter().copied().collect::<Vec<_>>(),
            vec![end_utc - Duration::minutes(5)]
        );
    }

    #[test]
    fn identity_is_assigned_once() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();
        let mut entry = draft(19, 21).build(&ChannelSettings::default(), now).unwrap();
        entry.assign_identity(EntryId(4), MessageRef::new("m1")).unwrap();
        assert_eq!(
            entry.assign_identity(EntryId(5), MessageRef::new("m2")),
            Err(EntryError::IdentityAssigned(EntryId(4)))
        );
        assert_eq!(entry.id(), Some(EntryId(4)));
    }

    #[test]
    fn unresolvable_overrides_leave_no_state() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();
        let mut entry = draft(19, 21).build(&ChannelSettings::default(), now).unwrap();
        let result = entry.add_override(&DefaultTemplates, "general", "sometime soon", "hi");
        assert_eq!(
            result,
            Err(OverrideError::UnresolvableTimeSpec("sometime soon".to_string()))
        );
        assert!(entry.overrides().is_empty());
        assert!(entry.overrides().due_timestamps().is_empty());
    }

    #[test]
    fn overrides_resolve_relative_to_the_entry() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();
        let mut entry = draft(19, 21).build(&ChannelSettings::default(), now).unwrap();
        let id = entry
            .add_override(&DefaultTemplates, "general", "start-30m", "soon!")
            .unwrap();
        let stored = entry.overrides().get(id).unwrap();
        assert_eq!(stored.at, entry.starts_at().with_timezone(&Utc) - Duration::minutes(30));
        assert_eq!(stored.time_spec, "start-30m");
    }

    #[test]
    fn rsvp_capacity() {
        let mut rsvp = Rsvp::default();
        assert!(!rsvp.is_full("yes"));
        rsvp.limits.insert("yes".to_string(), 2);
        rsvp.members.insert("yes".to_string(), vec!["a".to_string()]);
        assert!(!rsvp.is_full("yes"));
        rsvp.members.get_mut("yes").unwrap().push("b".to_string());
        assert!(rsvp.is_full("yes"));
        rsvp.limits.insert("maybe".to_string(), 0);
        assert!(rsvp.is_full("maybe"));
    }
}
