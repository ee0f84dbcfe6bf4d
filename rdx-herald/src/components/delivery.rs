//! Resolves announcement targets and delivers announcement content.

use crate::collab::{Collaborators, Directory};
use crate::common::{ChannelRef, GuildRef};
use tracing::{error, warn};

/// Resolves a channel identifier within a guild.
///
/// A numeric identifier is first tried as a direct channel reference. When
/// that yields nothing the identifier is treated as a channel name, and every
/// channel carrying that name (ignoring case) is a target.
pub fn resolve_targets(directory: &dyn Directory, guild: &GuildRef, identifier: &str) -> Vec<ChannelRef> {
    let identifier = identifier.trim();
    if identifier.is_empty() {
        return Vec::new();
    }
    if identifier.chars().all(|c| c.is_ascii_digit()) {
        if let Some(channel) = directory.channel_by_id(guild, identifier) {
            return vec![channel];
        }
    }
    directory.channels_by_name(guild, identifier)
}

/// Sends `content` to every channel `identifier` resolves to.
///
/// Returns how many channels accepted the message. Send failures are logged
/// and do not stop delivery to the remaining channels.
pub fn deliver(collab: &Collaborators, guild: &GuildRef, identifier: &str, content: &str) -> usize {
    let targets = resolve_targets(collab.directory.as_ref(), guild, identifier);
    if targets.is_empty() {
        warn!("No channel matches announcement target \"{}\" in guild {}", identifier, guild);
        return 0;
    }
    targets
        .iter()
        .filter(|channel| match collab.messenger.send(content, channel) {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to send announcement to channel {}: {}", channel, e);
                false
            }
        })
        .count()
}
