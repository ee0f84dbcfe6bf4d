//! Reminder timestamp generation and the per-entry announcement override table.

use crate::common::OverrideId;
use crate::error::OverrideError;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Produces the reminder timestamps for `anchor` that are still ahead of
/// `reference`.
///
/// An offset `t` yields `anchor - t minutes` only when `reference` is at least
/// `t` whole minutes before `anchor`. Negative offsets are ignored.
pub fn regenerate_reminders<Z: TimeZone>(
    reference: DateTime<Utc>,
    anchor: &DateTime<Z>,
    offsets_minutes: &[i64],
) -> BTreeSet<DateTime<Utc>> {
    let anchor = anchor.with_timezone(&Utc);
    let lead = (anchor - reference).num_minutes();
    offsets_minutes
        .iter()
        .copied()
        .filter(|offset| {
            if *offset < 0 {
                debug!("ignoring negative reminder offset {offset}");
                return false;
            }
            lead >= *offset
        })
        .map(|offset| anchor - chrono::Duration::minutes(offset))
        .collect()
}

/// One ad-hoc announcement bound to an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnouncementOverride {
    /// When the announcement is due, as resolved at creation time.
    pub at: DateTime<Utc>,
    /// The time expression the user gave, kept for display.
    pub time_spec: String,
    /// Channel identifier (id or name) receiving the announcement.
    pub target: String,
    /// Message template rendered against the entry when it fires.
    pub message: String,
}

/// The overrides of one entry, plus the distinct due timestamps used for
/// due-checks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnouncementOverrides {
    due: BTreeSet<DateTime<Utc>>,
    table: BTreeMap<OverrideId, AnnouncementOverride>,
}

impl AnnouncementOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the table from persisted overrides; the due set is derived.
    pub fn from_table(table: BTreeMap<OverrideId, AnnouncementOverride>) -> Self {
        let due = table.values().map(|o| o.at).collect();
        Self { due, table }
    }

    /// The smallest id not currently in use.
    pub fn next_id(&self) -> Option<OverrideId> {
        (0..=u32::MAX)
            .map(OverrideId)
            .find(|id| !self.table.contains_key(id))
    }

    /// Stores an override under a freshly allocated id.
    pub fn insert(&mut self, announcement: AnnouncementOverride) -> Result<OverrideId, OverrideError> {
        let id = self.next_id().ok_or(OverrideError::IdsExhausted)?;
        self.due.insert(announcement.at);
        self.table.insert(id, announcement);
        Ok(id)
    }

    /// Removes an override. Its timestamp leaves the due set only when no
    /// other override shares it.
    pub fn remove(&mut self, id: OverrideId) -> Option<AnnouncementOverride> {
        let removed = self.table.remove(&id)?;
        if !self.table.values().any(|o| o.at == removed.at) {
            self.due.remove(&removed.at);
        }
        Some(removed)
    }

    /// Ids of every override whose timestamp is at or before `now`, grouped
    /// by timestamp in chronological order.
    pub fn due_at(&self, now: DateTime<Utc>) -> Vec<OverrideId> {
        self.due
            .range(..=now)
            .flat_map(|at| {
                self.table
                    .iter()
                    .filter(move |(_, o)| o.at == *at)
                    .map(|(id, _)| *id)
            })
            .collect()
    }

    pub fn has_due(&self, now: DateTime<Utc>) -> bool {
        self.due.range(..=now).next().is_some()
    }

    pub fn due_timestamps(&self) -> &BTreeSet<DateTime<Utc>> {
        &self.due
    }

    pub fn get(&self, id: OverrideId) -> Option<&AnnouncementOverride> {
        self.table.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (OverrideId, &AnnouncementOverride)> {
        self.table.iter().map(|(id, o)| (*id, o))
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, h, m, 0).unwrap()
    }

    fn announcement(when: DateTime<Utc>, message: &str) -> AnnouncementOverride {
        AnnouncementOverride {
            at: when,
            time_spec: "start-10m".to_string(),
            target: "general".to_string(),
            message: message.to_string(),
        }
    }

    #[test]
    fn only_future_reminders_are_kept() {
        let start = at(12, 0);
        let reminders = regenerate_reminders(at(11, 40), &start, &[60, 20, 10, 0]);
        let expected: BTreeSet<_> = [at(11, 40), at(11, 50), at(12, 0)].into_iter().collect();
        assert_eq!(reminders, expected);
    }

    #[test]
    fn partial_minutes_do_not_count() {
        let start = at(12, 0);
        let reference = start - Duration::minutes(10) + Duration::seconds(30);
        assert!(regenerate_reminders(reference, &start, &[10]).is_empty());
    }

    #[test]
    fn negative_offsets_are_ignored() {
        assert!(regenerate_reminders(at(9, 0), &at(12, 0), &[-5]).is_empty());
    }

    #[test]
    fn ids_reuse_the_smallest_gap() {
        let mut overrides = AnnouncementOverrides::new();
        let a = overrides.insert(announcement(at(10, 0), "a")).unwrap();
        let b = overrides.insert(announcement(at(11, 0), "b")).unwrap();
        let c = overrides.insert(announcement(at(12, 0), "c")).unwrap();
        assert_eq!((a, b, c), (OverrideId(0), OverrideId(1), OverrideId(2)));

        overrides.remove(b);
        assert_eq!(overrides.next_id(), Some(OverrideId(1)));
        assert_eq!(overrides.insert(announcement(at(13, 0), "d")).unwrap(), OverrideId(1));
    }

    #[test]
    fn shared_timestamps_survive_a_single_removal() {
        let mut overrides = AnnouncementOverrides::new();
        let first = overrides.insert(announcement(at(10, 0), "first")).unwrap();
        let second = overrides.insert(announcement(at(10, 0), "second")).unwrap();
        assert_eq!(overrides.due_timestamps().len(), 1);

        overrides.remove(first);
        assert!(overrides.due_timestamps().contains(&at(10, 0)));

        overrides.remove(second);
        assert!(overrides.due_timestamps().is_empty());
        assert!(overrides.is_empty());
    }

    #[test]
    fn due_ids_group_by_timestamp() {
        let mut overrides = AnnouncementOverrides::new();
        overrides.insert(announcement(at(11, 0), "late")).unwrap();
        overrides.insert(announcement(at(10, 0), "early")).unwrap();
        overrides.insert(announcement(at(10, 0), "early too")).unwrap();
        overrides.insert(announcement(at(15, 0), "future")).unwrap();

        let due = overrides.due_at(at(11, 0));
        assert_eq!(due, vec![OverrideId(1), OverrideId(2), OverrideId(0)]);
        assert!(overrides.has_due(at(10, 0)));
        assert!(!overrides.has_due(at(9, 59)));
    }

    #[test]
    fn rebuilt_table_derives_due_set() {
        let mut table = BTreeMap::new();
        table.insert(OverrideId(3), announcement(at(10, 0), "x"));
        table.insert(OverrideId(5), announcement(at(10, 0), "y"));
        let overrides = AnnouncementOverrides::from_table(table);
        assert_eq!(overrides.due_timestamps().len(), 1);
        assert_eq!(overrides.next_id(), Some(OverrideId(0)));
    }

    proptest! {
        #[test]
        fn regeneration_is_idempotent(
            lead in -120i64..600,
            offsets in proptest::collection::vec(0i64..720, 0..6),
        ) {
            let start = at(12, 0);
            let reference = start - Duration::minutes(lead);
            let first = regenerate_reminders(reference, &start, &offsets);
            let second = regenerate_reminders(reference, &start, &offsets);
            prop_assert_eq!(&first, &second);
            for reminder in &first {
                prop_assert!(*reminder >= reference);
                prop_assert!(*reminder <= start);
            }
        }
    }
}
