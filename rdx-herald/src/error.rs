//! Error types for the Herald core.
//!
//! Construction and codec failures are surfaced to callers. Failures that
//! happen while an entry is being triggered are caught at the boundary of the
//! trigger and logged, so one entry's failure never blocks another.

use crate::common::{ChannelRef, MessageRef};
use thiserror::Error;

/// A repeat bitmask that does not decode to a consistent rule.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepeatError {
    #[error("malformed repeat rule {bits:#014b}: {reason}")]
    Malformed { bits: u32, reason: &'static str },

    /// The computed next occurrence does not move strictly forward.
    #[error("next occurrence does not advance the entry")]
    NotForward,
}

/// Failures while adding an announcement override.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OverrideError {
    #[error("unable to resolve time expression \"{0}\"")]
    UnresolvableTimeSpec(String),

    #[error("no free announcement id left on this entry")]
    IdsExhausted,
}

/// The message an entry is displayed in no longer exists, or could not be
/// retrieved in time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("backing message {message} in channel {channel} is missing")]
pub struct BackingMessageMissing {
    pub channel: ChannelRef,
    pub message: MessageRef,
}

/// Failures building or rehydrating an entry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntryError {
    #[error("entry ends before it starts")]
    EndBeforeStart,

    #[error("entry has no {0} yet")]
    MissingIdentity(&'static str),

    #[error("entry already has id {0}")]
    IdentityAssigned(crate::common::EntryId),

    #[error(transparent)]
    Repeat(#[from] RepeatError),
}

/// A collaborator (store, messenger, renderer) reported a failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{collaborator} failed: {message}")]
pub struct CollabError {
    pub collaborator: &'static str,
    pub message: String,
}

impl CollabError {
    pub fn new(collaborator: &'static str, message: impl Into<String>) -> Self {
        Self {
            collaborator,
            message: message.into(),
        }
    }
}

/// Crate-level error type.
#[derive(Debug, Error)]
pub enum HeraldError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Repeat(#[from] RepeatError),

    #[error(transparent)]
    Override(#[from] OverrideError),

    #[error(transparent)]
    Entry(#[from] EntryError),

    #[error(transparent)]
    MessageMissing(#[from] BackingMessageMissing),

    #[error(transparent)]
    Collab(#[from] CollabError),
}
