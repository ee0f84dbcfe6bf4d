//! Contains common, primitive types and a prelude for easy importing.
//!
//! This module defines the identifier types used to refer to entries, their
//! announcement overrides, and the opaque platform objects an entry is bound
//! to. Using distinct types keeps a message reference from ever being passed
//! where a channel reference is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A prelude module for convenient importing of the most common Herald types.
///
/// # Example
/// ```
/// use herald::common::prelude::*;
/// ```
pub mod prelude {
    pub use super::{ChannelRef, EntryId, GuildRef, MessageRef, OverrideId};
    pub use crate::config::HeraldConfig;
    pub use crate::entry::ScheduleEntry;
}

/// Identifies an entry within the store. Small, positive, and immutable once
/// assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub u32);

/// Entry-local identifier of an announcement override.
///
/// Allocated as the smallest non-negative integer not already in use by the
/// same entry, so ids are reused once an override fires or is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OverrideId(pub u32);

macro_rules! opaque_ref {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

opaque_ref!(
    /// Platform reference to the message an entry is displayed in.
    MessageRef
);
opaque_ref!(
    /// Platform reference to a text channel.
    ChannelRef
);
opaque_ref!(
    /// Platform reference to the guild owning a channel.
    GuildRef
);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for OverrideId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
