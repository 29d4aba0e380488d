use crate::domain::channel::{Channel, ChannelId, ChannelSet};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Merge device-reported `d` parameters into a channel set.
///
/// Known channels keep their bounds and take the reported `d`; unknown
/// channels are created with the protocol default bounds; channels the
/// device did not mention are carried through unchanged.
pub fn reconcile(existing: &ChannelSet, reported: &BTreeMap<ChannelId, i32>) -> ChannelSet {
    let mut merged = existing.clone();

    for (&id, &d) in reported {
        match merged.get(id).cloned() {
            Some(channel) => {
                merged.insert(Channel { d, ..channel });
            }
            None => {
                debug!("Creating channel {} from device report", id);
                merged.insert(Channel::reported(id, d));
            }
        }
    }

    merged
}

/// Apply a reading report to a channel set, producing a new snapshot.
///
/// Channel `n` takes `values[n]`; channels whose id is past the end of the
/// report, or whose reading is not an integer, keep their previous value.
pub fn apply_values(existing: &ChannelSet, values: &[String]) -> ChannelSet {
    existing
        .iter()
        .map(|channel| {
            let mut updated = channel.clone();
            if let Some(raw) = values.get(channel.id as usize) {
                match raw.parse::<i32>() {
                    Ok(value) => updated.value = Some(value),
                    Err(_) => {
                        warn!("Ignoring non-numeric reading '{}' for channel {}", raw, channel.id)
                    }
                }
            }
            updated
        })
        .collect()
}
