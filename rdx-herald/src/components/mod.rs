//! Contains the building blocks of an entry's schedule.
//!
//! The repeat codec computes next occurrences, the reminder module generates
//! reminder timestamps and holds the announcement override table, and the
//! delivery module resolves announcement targets to channels.

pub mod delivery;
pub mod reminder;
pub mod repeat;
