//! Lifecycle triggers of a [`ScheduleEntry`].
//!
//! An external dispatcher calls [`ScheduleEntry::fire`] (or one of the
//! individual triggers) when one of the entry's timestamps is due. The flow is
//!
//! ```text
//! Pending --start--> Started --end--> Ended --+--> renewed (Pending, new timing)
//!                                             +--> removed (terminal)
//! ```
//!
//! Reminders and announcement overrides fire independently of that flow.
//!
//! Every trigger is a no-op when nothing is due, so calling one twice is safe.
//! Every trigger is also a no-op when the backing message cannot be located,
//! or is located only after the context's deadline; the entry stays in the
//! store for a later reconciliation pass. Collaborator
//! failures are logged here and never reach the caller.

use crate::collab::{Collaborators, MessageHandle};
use crate::components::delivery::deliver;
use crate::config::{ChannelSettings, HeraldConfig};
use crate::common::ChannelRef;
use crate::entry::ScheduleEntry;
use crate::error::{BackingMessageMissing, EntryError, HeraldError};
use chrono::{DateTime, Utc};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Everything a trigger needs from the outside world, passed explicitly.
#[derive(Clone, Copy)]
pub struct TriggerContext<'a> {
    /// The instant the trigger runs at.
    pub now: DateTime<Utc>,
    /// Settings of the entry's schedule channel.
    pub settings: &'a ChannelSettings,
    /// How late a start or end may run and still be announced.
    pub late_tolerance: chrono::Duration,
    pub collab: &'a Collaborators,
    /// A backing message located after this instant counts as missing.
    pub deadline: Option<Instant>,
}

impl<'a> TriggerContext<'a> {
    pub fn new(
        config: &'a HeraldConfig,
        collab: &'a Collaborators,
        channel: &ChannelRef,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            now,
            settings: config.settings_for(channel),
            late_tolerance: config.late_tolerance(),
            collab,
            deadline: None,
        }
    }

    pub fn with_deadline(self, deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            ..self
        }
    }

    /// Whether the deadline, if any, has passed.
    pub fn expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// The operations a dispatcher can invoke, in the order it checks them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    Start,
    End,
    Remind,
    Announce,
}

impl Trigger {
    pub const ORDER: [Trigger; 4] = [Trigger::Start, Trigger::End, Trigger::Remind, Trigger::Announce];
}

/// What happened to an entry once it ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Moved to its next occurrence.
    Renewed,
    /// Did not repeat and was removed.
    Removed,
    /// Its next occurrence fell at or after the expire bound; removed.
    Expired,
    /// The next occurrence could not be computed; removed.
    Failed,
}

/// Result of one trigger invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// Nothing was due; no side effects.
    NothingDue,
    /// The backing message is gone; no side effects.
    MessageMissing,
    Started { announced: bool },
    Ended { announced: bool, transition: Transition },
    Repeated(Transition),
    Reminded { sent: bool, pruned: usize },
    Announced { fired: usize },
}

impl ScheduleEntry {
    /// Whether `trigger` has something to do at `now`.
    pub fn is_due(&self, trigger: Trigger, now: DateTime<Utc>) -> bool {
        match trigger {
            Trigger::Start => !self.has_started && self.start <= now,
            Trigger::End => self.end <= now && (self.has_started || self.is_instantaneous()),
            Trigger::Remind => self
                .start_reminders
                .iter()
                .chain(self.end_reminders.iter())
                .any(|at| *at <= now),
            Trigger::Announce => self.overrides.has_due(now),
        }
    }

    /// Every trigger due at `now`, in dispatch order.
    pub fn due_triggers(&self, now: DateTime<Utc>) -> Vec<Trigger> {
        Trigger::ORDER
            .into_iter()
            .filter(|trigger| self.is_due(*trigger, now))
            .collect()
    }

    pub fn fire(&mut self, trigger: Trigger, ctx: &TriggerContext<'_>) -> TriggerOutcome {
        match trigger {
            Trigger::Start => self.start(ctx),
            Trigger::End => self.end(ctx),
            Trigger::Remind => self.remind(ctx),
            Trigger::Announce => self.announce(ctx),
        }
    }

    /// Handles the scheduled start.
    ///
    /// An instantaneous entry goes straight to the end path and is never
    /// marked as started.
    pub fn start(&mut self, ctx: &TriggerContext<'_>) -> TriggerOutcome {
        if !self.is_due(Trigger::Start, ctx.now) {
            return TriggerOutcome::NothingDue;
        }
        let Some(handle) = self.located_message(ctx) else {
            return TriggerOutcome::MessageMissing;
        };
        if self.is_instantaneous() {
            debug!("Entry {:?} is instantaneous, skipping to its end", self.id);
            return self.finish(ctx, &handle);
        }

        let announced = self.announce_transition(
            ctx,
            &handle,
            "start",
            self.start.with_timezone(&Utc),
            self.quiet.start,
            &ctx.settings.start_format,
            ctx.settings.start_announce_target.as_deref(),
        );
        self.has_started = true;
        self.persist(ctx);
        self.reload_display(ctx, &handle);
        TriggerOutcome::Started { announced }
    }

    /// Handles the scheduled end, then renews or removes the entry.
    pub fn end(&mut self, ctx: &TriggerContext<'_>) -> TriggerOutcome {
        if !self.is_due(Trigger::End, ctx.now) {
            return TriggerOutcome::NothingDue;
        }
        let Some(handle) = self.located_message(ctx) else {
            return TriggerOutcome::MessageMissing;
        };
        self.finish(ctx, &handle)
    }

    /// Renews or removes the entry without announcing anything.
    pub fn repeat(&mut self, ctx: &TriggerContext<'_>) -> TriggerOutcome {
        let Some(handle) = self.located_message(ctx) else {
            return TriggerOutcome::MessageMissing;
        };
        TriggerOutcome::Repeated(self.renew_or_remove(ctx, &handle))
    }

    /// Sends the reminder and prunes every reminder at or before now, even
    /// when reminders are quiet, so a suppressed reminder never re-fires.
    pub fn remind(&mut self, ctx: &TriggerContext<'_>) -> TriggerOutcome {
        if !self.is_due(Trigger::Remind, ctx.now) {
            return TriggerOutcome::NothingDue;
        }
        let Some(handle) = self.located_message(ctx) else {
            return TriggerOutcome::MessageMissing;
        };

        let mut sent = false;
        if !self.quiet.remind {
            if let Some(target) = ctx.settings.remind_target.as_deref() {
                let content =
                    ctx.collab
                        .templates
                        .render(&ctx.settings.remind_format, self, ctx.settings);
                sent = deliver(ctx.collab, &handle.guild, target, &content) > 0;
                if sent {
                    info!("Sent reminder for \"{}\" [{:?}]", self.title, self.id);
                }
            }
        }

        let before = self.start_reminders.len() + self.end_reminders.len();
        self.start_reminders.retain(|at| *at > ctx.now);
        self.end_reminders.retain(|at| *at > ctx.now);
        let pruned = before - self.start_reminders.len() - self.end_reminders.len();
        self.persist(ctx);
        TriggerOutcome::Reminded { sent, pruned }
    }

    /// Sends every due announcement override and drops it.
    pub fn announce(&mut self, ctx: &TriggerContext<'_>) -> TriggerOutcome {
        if !self.overrides.has_due(ctx.now) {
            return TriggerOutcome::NothingDue;
        }
        let Some(handle) = self.located_message(ctx) else {
            return TriggerOutcome::MessageMissing;
        };

        let due = self.overrides.due_at(ctx.now);
        for id in &due {
            if let Some(announcement) = self.overrides.get(*id) {
                let content = ctx.collab.templates.render(&announcement.message, self, ctx.settings);
                if deliver(ctx.collab, &handle.guild, &announcement.target, &content) > 0 {
                    info!(
                        "Sent special announcement {} for \"{}\" [{:?}]",
                        id, self.title, self.id
                    );
                }
            }
        }
        for id in &due {
            self.overrides.remove(*id);
        }
        self.persist(ctx);
        TriggerOutcome::Announced { fired: due.len() }
    }

    /// Locates the backing message through the directory.
    pub fn backing_message(&self, ctx: &TriggerContext<'_>) -> Result<MessageHandle, HeraldError> {
        let message = self
            .message
            .as_ref()
            .ok_or(EntryError::MissingIdentity("message"))?;
        ctx.collab
            .directory
            .message(&self.guild, &self.channel, message)
            .map_err(HeraldError::from)
    }

    /// Re-renders the backing message.
    pub fn reload_display(&self, ctx: &TriggerContext<'_>, handle: &MessageHandle) {
        let content = ctx.collab.display.render(self, ctx.settings);
        if let Err(e) = ctx.collab.messenger.edit(&content, handle) {
            error!("Failed to refresh display of entry {:?}: {}", self.id, e);
        }
    }

    /// Writes the entry to the store.
    pub fn save(&self, ctx: &TriggerContext<'_>) -> Result<(), HeraldError> {
        let record = self.to_record()?;
        ctx.collab.store.save(&record)?;
        Ok(())
    }

    fn persist(&self, ctx: &TriggerContext<'_>) {
        if let Err(e) = self.save(ctx) {
            error!("Failed to persist entry {:?}: {}", self.id, e);
        }
    }

    fn located_message(&self, ctx: &TriggerContext<'_>) -> Option<MessageHandle> {
        match self.backing_message(ctx) {
            Ok(_) if ctx.expired() => {
                warn!("Lookup of message for entry {:?} finished past its deadline", self.id);
                None
            }
            Ok(handle) => Some(handle),
            Err(HeraldError::MessageMissing(BackingMessageMissing { channel, message })) => {
                debug!(
                    "Message {} of entry {:?} is missing from channel {}",
                    message, self.id, channel
                );
                None
            }
            Err(e) => {
                debug!("Entry {:?} has no backing message: {}", self.id, e);
                None
            }
        }
    }

    fn finish(&mut self, ctx: &TriggerContext<'_>, handle: &MessageHandle) -> TriggerOutcome {
        let announced = self.announce_transition(
            ctx,
            handle,
            "end",
            self.end.with_timezone(&Utc),
            self.quiet.end,
            &ctx.settings.end_format,
            ctx.settings.end_announce_target.as_deref(),
        );
        let transition = self.renew_or_remove(ctx, handle);
        TriggerOutcome::Ended {
            announced,
            transition,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn announce_transition(
        &self,
        ctx: &TriggerContext<'_>,
        handle: &MessageHandle,
        label: &str,
        scheduled: DateTime<Utc>,
        quiet: bool,
        format: &str,
        target: Option<&str>,
    ) -> bool {
        if quiet {
            return false;
        }
        if scheduled <= ctx.now - ctx.late_tolerance {
            warn!(
                "Late event {}: \"{}\" [{:?}] scheduled for {}",
                label, self.title, self.id, scheduled
            );
            return false;
        }
        let Some(target) = target else {
            return false;
        };
        let content = ctx.collab.templates.render(format, self, ctx.settings);
        let delivered = deliver(ctx.collab, &handle.guild, target, &content) > 0;
        if delivered {
            info!(
                "Announced {} of \"{}\" [{:?}] scheduled for {}",
                label,
                self.title,
                self.id,
                scheduled.format("%H:%M")
            );
        }
        delivered
    }

    fn renew_or_remove(&mut self, ctx: &TriggerContext<'_>, handle: &MessageHandle) -> Transition {
        let (start, end) = match self.repeat.next_occurrence(&self.start, &self.end) {
            Ok(Some(next)) => next,
            Ok(None) => {
                self.destroy(ctx, handle);
                return Transition::Removed;
            }
            Err(e) => {
                error!(
                    "Cannot compute next occurrence of entry {:?} ({}), removing it: {}",
                    self.id, self.repeat, e
                );
                self.destroy(ctx, handle);
                return Transition::Failed;
            }
        };

        self.start = start;
        self.end = end;
        self.has_started = false;
        if self.expire.as_ref().is_some_and(|expire| self.start >= *expire) {
            info!("Entry {:?} expired before its next occurrence", self.id);
            self.destroy(ctx, handle);
            return Transition::Expired;
        }

        self.rsvp.members.clear();
        self.regenerate_reminders(ctx.settings, ctx.now);
        self.persist(ctx);
        self.reload_display(ctx, handle);
        info!(
            "Entry \"{}\" [{:?}] renewed for {}",
            self.title, self.id, self.start
        );
        Transition::Renewed
    }

    fn destroy(&self, ctx: &TriggerContext<'_>, handle: &MessageHandle) {
        if let Some(id) = self.id {
            if let Err(e) = ctx.collab.store.delete(id) {
                error!("Failed to remove entry {}: {}", id, e);
            }
        }
        if let Err(e) = ctx.collab.messenger.delete(handle) {
            error!("Failed to delete message of entry {:?}: {}", self.id, e);
        }
        info!("Removed entry \"{}\" [{:?}]", self.title, self.id);
    }
}
