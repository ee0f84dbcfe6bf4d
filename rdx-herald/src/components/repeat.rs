//! The repeat rule codec and next-occurrence computation.
//!
//! A repeat rule is persisted as a single integer. Bit layout (bit 0 is the
//! least significant):
//!
//! | bits | meaning                                                        |
//! |------|----------------------------------------------------------------|
//! | 0-6  | one flag per weekday, Sunday first                             |
//! | 7    | day interval mode: bits 0-6 hold a day count instead           |
//! | 8    | yearly                                                         |
//! | 11   | minute interval mode: bits 0-10 hold a minute count            |
//!
//! Decoding checks minute interval, then yearly, then day interval, and falls
//! back to a weekday set. Inside the crate the rule is always the decoded
//! [`RepeatRule`]; the integer only exists at the persistence boundary.

use crate::error::RepeatError;
use chrono::{DateTime, Datelike, Days, Months, NaiveDateTime, TimeZone, Weekday};
use std::fmt;

pub const WEEKDAY_MASK: u32 = 0b111_1111;
pub const DAY_INTERVAL_FLAG: u32 = 1 << 7;
pub const YEARLY_FLAG: u32 = 1 << 8;
pub const MINUTE_INTERVAL_FLAG: u32 = 1 << 11;
pub const MINUTE_MASK: u32 = MINUTE_INTERVAL_FLAG - 1;

const UNUSED_LOW_BITS: u32 = 0b11 << 9;
const KNOWN_BITS: u32 = MINUTE_INTERVAL_FLAG | MINUTE_MASK;

const WEEK_ORDER: [Weekday; 7] = [
    Weekday::Sun,
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
];

/// A set of weekdays, stored as bits 0-6 with Sunday as bit 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct WeekdaySet(u8);

impl WeekdaySet {
    pub const EMPTY: WeekdaySet = WeekdaySet(0);
    pub const ALL: WeekdaySet = WeekdaySet(WEEKDAY_MASK as u8);

    /// Builds a set from the low seven bits; higher bits are ignored.
    pub fn from_bits(bits: u8) -> Self {
        Self(bits & WEEKDAY_MASK as u8)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> u32 {
        self.0.count_ones()
    }

    pub fn contains(self, day: Weekday) -> bool {
        self.0 & day_bit(day) != 0
    }

    pub fn insert(&mut self, day: Weekday) {
        self.0 |= day_bit(day);
    }

    /// Iterates over the members, Sunday first.
    pub fn iter(self) -> impl Iterator<Item = Weekday> {
        WEEK_ORDER.into_iter().filter(move |day| self.contains(*day))
    }

    /// The smallest `days >= 1` such that `from + days` falls on a member.
    ///
    /// When `from` is the only member this is a full week.
    pub fn days_until_next(self, from: Weekday) -> Option<u32> {
        let origin = from.num_days_from_sunday();
        (1..=7).find(|days| self.0 & (1 << ((origin + days) % 7)) != 0)
    }

    /// Parses user text the way the create command accepts it: `daily`,
    /// `no`/`none`, or any text mentioning weekday abbreviations
    /// (`"mon wed"`, `"tuesday,thursday"`).
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim().to_lowercase();
        match text.as_str() {
            "daily" => return Some(Self::ALL),
            "no" | "none" => return Some(Self::EMPTY),
            _ => {}
        }
        const ABBREVIATIONS: [&str; 7] = ["su", "mo", "tu", "we", "th", "fr", "sa"];
        let mut set = Self::EMPTY;
        for (abbr, day) in ABBREVIATIONS.iter().zip(WEEK_ORDER) {
            if text.contains(abbr) {
                set.insert(day);
            }
        }
        (!set.is_empty()).then_some(set)
    }
}

impl FromIterator<Weekday> for WeekdaySet {
    fn from_iter<I: IntoIterator<Item = Weekday>>(iter: I) -> Self {
        let mut set = Self::EMPTY;
        for day in iter {
            set.insert(day);
        }
        set
    }
}

fn day_bit(day: Weekday) -> u8 {
    1 << day.num_days_from_sunday()
}

/// The decoded meaning of a repeat bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RepeatRule {
    /// The entry is removed after it ends.
    #[default]
    None,
    /// Repeats on each listed weekday.
    Weekdays(WeekdaySet),
    /// Repeats every N days, `1..=127`.
    DayInterval(u8),
    /// Repeats on the same date every year.
    Yearly,
    /// Repeats every M minutes, `1..=2047`.
    MinuteInterval(u16),
}

impl RepeatRule {
    /// Decodes a persisted bitmask.
    pub fn decode(bits: u32) -> Result<Self, RepeatError> {
        if bits == 0 {
            return Ok(RepeatRule::None);
        }
        if bits & !KNOWN_BITS != 0 {
            return Err(RepeatError::Malformed {
                bits,
                reason: "bits above 11 are not part of the encoding",
            });
        }
        if bits & MINUTE_INTERVAL_FLAG != 0 {
            let minutes = bits & MINUTE_MASK;
            if minutes == 0 {
                return Err(RepeatError::Malformed {
                    bits,
                    reason: "minute interval of zero",
                });
            }
            return Ok(RepeatRule::MinuteInterval(minutes as u16));
        }
        if bits & YEARLY_FLAG != 0 {
            return Ok(RepeatRule::Yearly);
        }
        if bits & UNUSED_LOW_BITS != 0 {
            return Err(RepeatError::Malformed {
                bits,
                reason: "bits 9 and 10 are only meaningful in minute mode",
            });
        }
        if bits & DAY_INTERVAL_FLAG != 0 {
            let days = bits & WEEKDAY_MASK;
            if days == 0 {
                return Err(RepeatError::Malformed {
                    bits,
                    reason: "day interval of zero",
                });
            }
            return Ok(RepeatRule::DayInterval(days as u8));
        }
        Ok(RepeatRule::Weekdays(WeekdaySet::from_bits(bits as u8)))
    }

    /// Encodes the rule into its persisted bitmask.
    pub fn encode(self) -> u32 {
        match self {
            RepeatRule::None => 0,
            RepeatRule::Weekdays(set) => u32::from(set.bits()),
            RepeatRule::DayInterval(days) => {
                debug_assert!((1..=127).contains(&days));
                DAY_INTERVAL_FLAG | (u32::from(days) & WEEKDAY_MASK)
            }
            RepeatRule::Yearly => YEARLY_FLAG,
            RepeatRule::MinuteInterval(minutes) => {
                debug_assert!((1..=2047).contains(&minutes));
                MINUTE_INTERVAL_FLAG | (u32::from(minutes) & MINUTE_MASK)
            }
        }
    }

    /// A weekday rule; an empty set means no repeat.
    pub fn weekdays(set: WeekdaySet) -> Self {
        if set.is_empty() {
            RepeatRule::None
        } else {
            RepeatRule::Weekdays(set)
        }
    }

    pub fn every_days(days: u32) -> Result<Self, RepeatError> {
        Self::decode(DAY_INTERVAL_FLAG | days).and_then(|rule| match rule {
            RepeatRule::DayInterval(n) if u32::from(n) == days => Ok(rule),
            _ => Err(RepeatError::Malformed {
                bits: DAY_INTERVAL_FLAG | days,
                reason: "day interval must be between 1 and 127",
            }),
        })
    }

    pub fn every_minutes(minutes: u32) -> Result<Self, RepeatError> {
        Self::decode(MINUTE_INTERVAL_FLAG | minutes).and_then(|rule| match rule {
            RepeatRule::MinuteInterval(n) if u32::from(n) == minutes => Ok(rule),
            _ => Err(RepeatError::Malformed {
                bits: MINUTE_INTERVAL_FLAG | minutes,
                reason: "minute interval must be between 1 and 2047",
            }),
        })
    }

    pub fn is_repeating(self) -> bool {
        self != RepeatRule::None
    }

    /// Computes the next `(start, end)` pair, or `None` for a one-shot entry.
    ///
    /// Minute intervals move the instant; day, weekday and yearly rules move
    /// the local wall-clock date in the timestamps' own zone. Both returned
    /// timestamps are strictly later than the inputs.
    pub fn next_occurrence<Z: TimeZone>(
        self,
        start: &DateTime<Z>,
        end: &DateTime<Z>,
    ) -> Result<Option<(DateTime<Z>, DateTime<Z>)>, RepeatError> {
        let (next_start, next_end) = match self {
            RepeatRule::None => return Ok(None),
            RepeatRule::MinuteInterval(minutes) => {
                let step = chrono::Duration::minutes(i64::from(minutes));
                (start.clone() + step, end.clone() + step)
            }
            RepeatRule::Yearly => (add_years(start)?, add_years(end)?),
            RepeatRule::DayInterval(days) => (
                add_days_forward(start, u64::from(days))?,
                add_days_forward(end, u64::from(days))?,
            ),
            RepeatRule::Weekdays(set) => {
                let days = set
                    .days_until_next(start.weekday())
                    .ok_or(RepeatError::Malformed {
                        bits: 0,
                        reason: "empty weekday set",
                    })?;
                (
                    add_days_forward(start, u64::from(days))?,
                    add_days_forward(end, u64::from(days))?,
                )
            }
        };

        if next_start <= *start || next_end <= *end {
            return Err(RepeatError::NotForward);
        }
        Ok(Some((next_start, next_end)))
    }

    /// Human description of the rule, as shown on an entry.
    pub fn describe(self) -> String {
        match self {
            RepeatRule::None => "once".to_string(),
            RepeatRule::Weekdays(set) if set == WeekdaySet::ALL => "daily".to_string(),
            RepeatRule::Weekdays(set) => {
                let days: Vec<String> = set.iter().map(|day| format!("{day}")).collect();
                format!("weekly on {}", days.join(", "))
            }
            RepeatRule::DayInterval(1) => "every day".to_string(),
            RepeatRule::DayInterval(days) => format!("every {days} days"),
            RepeatRule::Yearly => "yearly".to_string(),
            RepeatRule::MinuteInterval(1) => "every minute".to_string(),
            RepeatRule::MinuteInterval(minutes) => format!("every {minutes} minutes"),
        }
    }
}

impl TryFrom<u32> for RepeatRule {
    type Error = RepeatError;

    fn try_from(bits: u32) -> Result<Self, Self::Error> {
        RepeatRule::decode(bits)
    }
}

impl From<RepeatRule> for u32 {
    fn from(rule: RepeatRule) -> Self {
        rule.encode()
    }
}

impl fmt::Display for RepeatRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Applies a wall-clock shift in the timestamp's zone.
///
/// Ambiguous local times resolve to the earlier instant; a local time that
/// falls into a gap moves forward by an hour.
fn shift_local<Z: TimeZone>(
    at: &DateTime<Z>,
    shift: impl Fn(NaiveDateTime) -> Option<NaiveDateTime>,
) -> Result<DateTime<Z>, RepeatError> {
    let zone = at.timezone();
    let local = shift(at.naive_local()).ok_or(RepeatError::NotForward)?;
    zone.from_local_datetime(&local)
        .earliest()
        .or_else(|| {
            zone.from_local_datetime(&(local + chrono::Duration::hours(1)))
                .earliest()
        })
        .ok_or(RepeatError::NotForward)
}

fn add_years<Z: TimeZone>(at: &DateTime<Z>) -> Result<DateTime<Z>, RepeatError> {
    shift_local(at, |local| local.checked_add_months(Months::new(12)))
}

/// Adds `days` on the local calendar and restores forward order by one year
/// if the addition wrapped.
fn add_days_forward<Z: TimeZone>(at: &DateTime<Z>, days: u64) -> Result<DateTime<Z>, RepeatError> {
    let shifted = shift_local(at, |local| local.checked_add_days(Days::new(days)))?;
    if shifted > *at {
        return Ok(shifted);
    }
    let corrected = add_years(&shifted)?;
    if corrected > *at {
        Ok(corrected)
    } else {
        Err(RepeatError::NotForward)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate, Utc};
    use chrono_tz::America::New_York;
    use proptest::prelude::*;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn decodes_by_priority() {
        assert_eq!(RepeatRule::decode(0).unwrap(), RepeatRule::None);
        assert_eq!(
            RepeatRule::decode(0b0001010).unwrap(),
            RepeatRule::Weekdays(WeekdaySet::from_bits(0b0001010))
        );
        assert_eq!(RepeatRule::decode(0b1000_0011).unwrap(), RepeatRule::DayInterval(3));
        // yearly wins over the day interval flag
        assert_eq!(RepeatRule::decode(YEARLY_FLAG | 0b1000_0011).unwrap(), RepeatRule::Yearly);
        // minute mode wins over everything and uses bits 0-10
        assert_eq!(
            RepeatRule::decode(MINUTE_INTERVAL_FLAG | YEARLY_FLAG | 5).unwrap(),
            RepeatRule::MinuteInterval(256 + 5)
        );
    }

    #[test]
    fn rejects_inconsistent_bitmasks() {
        assert!(matches!(
            RepeatRule::decode(DAY_INTERVAL_FLAG),
            Err(RepeatError::Malformed { .. })
        ));
        assert!(matches!(
            RepeatRule::decode(MINUTE_INTERVAL_FLAG),
            Err(RepeatError::Malformed { .. })
        ));
        assert!(matches!(RepeatRule::decode(1 << 9), Err(RepeatError::Malformed { .. })));
        assert!(matches!(RepeatRule::decode(1 << 12), Err(RepeatError::Malformed { .. })));
        assert!(RepeatRule::every_days(0).is_err());
        assert!(RepeatRule::every_days(128).is_err());
        assert_eq!(RepeatRule::every_minutes(90).unwrap(), RepeatRule::MinuteInterval(90));
    }

    #[test]
    fn day_interval_adds_exact_days() {
        let start = utc(2026, 3, 2, 18, 0);
        let end = utc(2026, 3, 2, 20, 0);
        let rule = RepeatRule::decode(0b1000_0000 | 3).unwrap();
        let (s, e) = rule.next_occurrence(&start, &end).unwrap().unwrap();
        assert_eq!(s, start + Duration::days(3));
        assert_eq!(e, end + Duration::days(3));
    }

    #[test]
    fn minute_interval_adds_exact_minutes() {
        let start = utc(2026, 12, 31, 23, 0);
        let end = utc(2026, 12, 31, 23, 30);
        let rule = RepeatRule::decode(MINUTE_INTERVAL_FLAG | 90).unwrap();
        let (s, e) = rule.next_occurrence(&start, &end).unwrap().unwrap();
        assert_eq!(s, start + Duration::minutes(90));
        assert_eq!(e, end + Duration::minutes(90));
    }

    #[test]
    fn yearly_handles_leap_days() {
        let rule = RepeatRule::Yearly;
        let leap = utc(2024, 2, 29, 12, 0);
        let (s, _) = rule.next_occurrence(&leap, &leap).unwrap().unwrap();
        assert_eq!(s, utc(2025, 2, 28, 12, 0));

        let before_leap = utc(2023, 3, 1, 9, 0);
        let (s, _) = rule.next_occurrence(&before_leap, &before_leap).unwrap().unwrap();
        assert_eq!(s, utc(2024, 3, 1, 9, 0));
    }

    #[test]
    fn weekdays_pick_the_next_set_day() {
        // 2026-10-19 is a Monday
        let monday = utc(2026, 10, 19, 19, 0);
        let rule = RepeatRule::Weekdays([Weekday::Mon, Weekday::Wed].into_iter().collect());
        let (wed, _) = rule.next_occurrence(&monday, &monday).unwrap().unwrap();
        assert_eq!(wed, utc(2026, 10, 21, 19, 0));
        let (next_monday, _) = rule.next_occurrence(&wed, &wed).unwrap().unwrap();
        assert_eq!(next_monday, utc(2026, 10, 26, 19, 0));
    }

    #[test]
    fn single_weekday_repeats_a_week_later() {
        let monday = utc(2026, 10, 19, 19, 0);
        let rule = RepeatRule::Weekdays([Weekday::Mon].into_iter().collect());
        let (s, _) = rule.next_occurrence(&monday, &monday).unwrap().unwrap();
        assert_eq!(s, monday + Duration::days(7));
    }

    #[test]
    fn weekly_crosses_the_year_boundary() {
        // 2026-12-30 is a Wednesday
        let start = utc(2026, 12, 30, 21, 0);
        let end = utc(2026, 12, 31, 1, 0);
        let rule = RepeatRule::Weekdays([Weekday::Wed].into_iter().collect());
        let (s, e) = rule.next_occurrence(&start, &end).unwrap().unwrap();
        assert_eq!(s, utc(2027, 1, 6, 21, 0));
        assert_eq!(e, utc(2027, 1, 7, 1, 0));
    }

    #[test]
    fn daily_keeps_wall_clock_across_dst() {
        // clocks in New York go back on 2026-11-01
        let start = New_York.with_ymd_and_hms(2026, 10, 31, 9, 0, 0).unwrap();
        let rule = RepeatRule::Weekdays(WeekdaySet::ALL);
        let (s, _) = rule.next_occurrence(&start, &start).unwrap().unwrap();
        assert_eq!(s.naive_local(), NaiveDate::from_ymd_opt(2026, 11, 1).unwrap().and_hms_opt(9, 0, 0).unwrap());
        assert_eq!(s - start, Duration::hours(25));
    }

    #[test]
    fn none_has_no_next_occurrence() {
        let at = utc(2026, 1, 1, 0, 0);
        assert_eq!(RepeatRule::None.next_occurrence(&at, &at).unwrap(), None);
    }

    #[test]
    fn parses_weekday_text() {
        assert_eq!(WeekdaySet::parse("daily"), Some(WeekdaySet::ALL));
        assert_eq!(WeekdaySet::parse("none"), Some(WeekdaySet::EMPTY));
        let set = WeekdaySet::parse("Tuesday, Thursday").unwrap();
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![Weekday::Tue, Weekday::Thu]);
        assert_eq!(WeekdaySet::parse("whenever"), None);
    }

    #[test]
    fn describes_rules() {
        assert_eq!(RepeatRule::None.describe(), "once");
        assert_eq!(RepeatRule::Weekdays(WeekdaySet::ALL).describe(), "daily");
        assert_eq!(
            RepeatRule::Weekdays(WeekdaySet::from_bits(0b0001010)).describe(),
            "weekly on Mon, Wed"
        );
        assert_eq!(RepeatRule::DayInterval(3).describe(), "every 3 days");
        assert_eq!(RepeatRule::MinuteInterval(90).to_string(), "every 90 minutes");
    }

    proptest! {
        #[test]
        fn weekday_cycle_returns_after_one_week(
            mask in 1u8..128,
            day_offset in 0i64..3650,
            hour in 0u32..24,
        ) {
            let set = WeekdaySet::from_bits(mask);
            let rule = RepeatRule::Weekdays(set);
            let mut start = utc(2020, 1, 1, hour, 0) + Duration::days(day_offset);
            // align onto a member so a full cycle spans exactly one week
            while !set.contains(start.weekday()) {
                start += Duration::days(1);
            }
            let origin = start;
            let mut total = 0;
            for _ in 0..set.len() {
                let (next, _) = rule.next_occurrence(&start, &start).unwrap().unwrap();
                let days = (next - start).num_days();
                prop_assert!(days >= 1);
                for skipped in 1..days {
                    prop_assert!(!set.contains((start + Duration::days(skipped)).weekday()));
                }
                prop_assert!(set.contains(next.weekday()));
                total += days;
                start = next;
            }
            prop_assert_eq!(start.weekday(), origin.weekday());
            prop_assert_eq!(total, 7);
        }

        #[test]
        fn weekday_encoding_round_trips(mask in 1u32..128) {
            let rule = RepeatRule::decode(mask).unwrap();
            prop_assert_eq!(rule, RepeatRule::Weekdays(WeekdaySet::from_bits(mask as u8)));
            prop_assert_eq!(rule.encode(), mask);
        }

        #[test]
        fn next_occurrence_always_moves_forward(
            bits in prop_oneof![
                1u32..128,
                (1u32..128).prop_map(|n| DAY_INTERVAL_FLAG | n),
                Just(YEARLY_FLAG),
                (1u32..2048).prop_map(|n| MINUTE_INTERVAL_FLAG | n),
            ],
            day_offset in 0i64..3650,
            length_minutes in 0i64..600,
        ) {
            let rule = RepeatRule::decode(bits).unwrap();
            let start = New_York.with_ymd_and_hms(2020, 1, 1, 8, 30, 0).unwrap() + Duration::days(day_offset);
            let end = start + Duration::minutes(length_minutes);
            let (s, e) = rule.next_occurrence(&start, &end).unwrap().unwrap();
            prop_assert!(s > start);
            prop_assert!(e > end);
        }
    }
}
