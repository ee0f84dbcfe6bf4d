//! Default message templating, time expression parsing, and the entry summary
//! shown in a backing message.

use crate::collab::{DisplayRenderer, TemplateResolver};
use crate::config::ChannelSettings;
use crate::entry::ScheduleEntry;
use chrono::{DateTime, Duration, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::fmt::Write;

/// Formats an instant in 12 or 24 hour style. Anything other than `"24"`
/// renders 12 hour times.
pub fn format_time(at: &DateTime<Tz>, clock_format: &str) -> String {
    if clock_format == "24" {
        at.format("%a %b %-d %Y, %H:%M %Z").to_string()
    } else {
        at.format("%a %b %-d %Y, %-I:%M %p %Z").to_string()
    }
}

/// Resolves `%` tokens and time expressions.
///
/// | token | expands to |
/// |-------|------------|
/// | `%t`  | title |
/// | `%s`  | start time |
/// | `%e`  | end time |
/// | `%i`  | entry id |
/// | `%c`  | comments, space separated |
/// | `%%`  | a literal `%` |
///
/// Unknown tokens are left as written. Times follow the channel's
/// `clock_format`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTemplates;

impl TemplateResolver for DefaultTemplates {
    fn render(&self, template: &str, entry: &ScheduleEntry, settings: &ChannelSettings) -> String {
        let clock = settings.clock_format.as_str();
        let mut out = String::with_capacity(template.len());
        let mut chars = template.chars();
        while let Some(c) = chars.next() {
            if c != '%' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('t') => out.push_str(entry.title()),
                Some('s') => out.push_str(&format_time(entry.starts_at(), clock)),
                Some('e') => out.push_str(&format_time(entry.ends_at(), clock)),
                Some('i') => {
                    if let Some(id) = entry.id() {
                        out.push_str(&id.to_string());
                    }
                }
                Some('c') => out.push_str(&entry.comments().join(" ")),
                Some('%') => out.push('%'),
                Some(other) => {
                    out.push('%');
                    out.push(other);
                }
                None => out.push('%'),
            }
        }
        out
    }

    fn resolve_time_spec(&self, spec: &str, entry: &ScheduleEntry) -> Option<DateTime<Utc>> {
        let spec = spec.trim().to_ascii_lowercase();
        if let Some(at) = relative_spec(&spec, entry) {
            return Some(at);
        }

        let zone = entry.starts_at().timezone();
        let local = NaiveDateTime::parse_from_str(&spec, "%Y-%m-%d %H:%M")
            .ok()
            .or_else(|| {
                NaiveTime::parse_from_str(&spec, "%H:%M")
                    .ok()
                    .map(|time| entry.starts_at().date_naive().and_time(time))
            })?;
        zone.from_local_datetime(&local)
            .earliest()
            .map(|at| at.with_timezone(&Utc))
    }
}

/// `start` or `end`, optionally followed by a signed offset such as `-30m`,
/// `+2h` or `-1d`.
fn relative_spec(spec: &str, entry: &ScheduleEntry) -> Option<DateTime<Utc>> {
    let (base, rest) = if let Some(rest) = spec.strip_prefix("start") {
        (entry.starts_at().with_timezone(&Utc), rest)
    } else if let Some(rest) = spec.strip_prefix("end") {
        (entry.ends_at().with_timezone(&Utc), rest)
    } else {
        return None;
    };

    let rest = rest.trim();
    if rest.is_empty() {
        return Some(base);
    }
    let (sign, rest) = match rest.chars().next()? {
        '+' => (1, &rest[1..]),
        '-' => (-1, &rest[1..]),
        _ => return None,
    };
    let rest = rest.trim();
    let unit = rest.chars().last()?;
    let amount: i64 = rest[..rest.len() - unit.len_utf8()].trim().parse().ok()?;
    let offset = match unit {
        'm' => Duration::try_minutes(amount)?,
        'h' => Duration::try_hours(amount)?,
        'd' => Duration::try_days(amount)?,
        _ => return None,
    };
    base.checked_add_signed(offset * sign)
}

/// Renders the backing message with [`ScheduleEntry::describe`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDisplay;

impl DisplayRenderer for DefaultDisplay {
    fn render(&self, entry: &ScheduleEntry, settings: &ChannelSettings) -> String {
        entry.describe(settings)
    }
}

impl ScheduleEntry {
    /// A human-readable summary of the entry, one field per line.
    pub fn describe(&self, settings: &ChannelSettings) -> String {
        let clock = settings.clock_format.as_str();
        let mut out = String::new();

        let _ = writeln!(out, "{}", self.title());
        if let Some(url) = &self.presentation().title_url {
            let _ = writeln!(out, "  link: {}", url);
        }
        if self.is_instantaneous() {
            let _ = writeln!(out, "  at: {}", format_time(self.starts_at(), clock));
        } else {
            let _ = writeln!(out, "  starts: {}", format_time(self.starts_at(), clock));
            let _ = writeln!(out, "  ends: {}", format_time(self.ends_at(), clock));
        }
        let _ = writeln!(out, "  repeats: {}", self.repeat_rule().describe());
        if let Some(expire) = self.expire() {
            let _ = writeln!(out, "  expires: {}", format_time(expire, clock));
        }

        let quiet = self.quiet();
        let silenced: Vec<&str> = [
            (quiet.start, "start"),
            (quiet.end, "end"),
            (quiet.remind, "reminders"),
        ]
        .into_iter()
        .filter_map(|(on, label)| on.then_some(label))
        .collect();
        if !silenced.is_empty() {
            let _ = writeln!(out, "  quiet: {}", silenced.join(", "));
        }

        if let Some(image) = &self.presentation().image_url {
            let _ = writeln!(out, "  image: {}", image);
        }
        if let Some(thumbnail) = &self.presentation().thumbnail_url {
            let _ = writeln!(out, "  thumbnail: {}", thumbnail);
        }

        if settings.rsvp_enabled {
            if let Some(deadline) = &self.rsvp().deadline {
                let _ = writeln!(out, "  rsvp by: {}", format_time(deadline, clock));
            }
            for (category, limit) in &self.rsvp().limits {
                let _ = writeln!(
                    out,
                    "  {}: {}/{}",
                    category,
                    self.rsvp().members_of(category).len(),
                    limit
                );
            }
        }

        for (index, comment) in self.comments().iter().enumerate() {
            let _ = writeln!(out, "  [{}] {}", index + 1, comment);
        }

        for (id, announcement) in self.overrides().iter() {
            let _ = writeln!(
                out,
                "  ({}) \"{}\" to {} at {}",
                id, announcement.message, announcement.target, announcement.time_spec
            );
        }

        if let Some(id) = self.id() {
            let _ = write!(out, "  id: {}", id);
        }
        out.trim_end().to_string()
    }
}
