// Multicast ids
//
// A multicast id is `providerParticipantId/broadcastName[/partition...]`.
// Subscribers may use `+` for exactly one partition level and a trailing `*`
// for any number of levels (including none).

use crate::error::{PlexusError, Result};

pub const SINGLE_LEVEL_WILDCARD: &str = "+";
pub const MULTI_LEVEL_WILDCARD: &str = "*";

pub fn create_multicast_id(
    provider_participant_id: &str,
    broadcast_name: &str,
    partitions: &[String],
) -> String {
    let mut id = format!("{provider_participant_id}/{broadcast_name}");
    for partition in partitions {
        id.push('/');
        id.push_str(partition);
    }
    id
}

/// Partitions are alphanumeric; `+` may replace any of them and `*` may only
/// be the last one.
pub fn validate_partitions(partitions: &[String]) -> Result<()> {
    for (index, partition) in partitions.iter().enumerate() {
        if partition == SINGLE_LEVEL_WILDCARD {
            continue;
        }
        if partition == MULTI_LEVEL_WILDCARD {
            if index + 1 == partitions.len() {
                continue;
            }
            return Err(PlexusError::InvalidArgument(format!(
                "multi level wildcard \"*\" is only allowed as last partition, got {}",
                partitions.join("/")
            )));
        }
        if partition.is_empty() || !partition.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(PlexusError::InvalidArgument(format!(
                "partition \"{partition}\" contains invalid characters, allowed are [a-zA-Z0-9]"
            )));
        }
    }
    Ok(())
}

/// Does the concrete `multicast_id` of a publication match the subscribed
/// `pattern`?
pub fn matches(pattern: &str, multicast_id: &str) -> bool {
    let mut pattern_levels = pattern.split('/');
    let mut id_levels = multicast_id.split('/');
    loop {
        match (pattern_levels.next(), id_levels.next()) {
            (Some(MULTI_LEVEL_WILDCARD), _) => return pattern_levels.next().is_none(),
            (Some(SINGLE_LEVEL_WILDCARD), Some(_)) => {}
            (Some(expected), Some(actual)) if expected == actual => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
