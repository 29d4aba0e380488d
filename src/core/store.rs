use crate::domain::channel::{Channel, ChannelId, ChannelSet};
use crate::domain::error::LinkResult;

/// Per-device persisted channel configuration.
///
/// Only the calibration part of a channel (`min`, `max`, `d`) is stored.
pub trait ConfigStore: Send + Sync {
    /// All channels stored for the device
    fn get_all(&self, device: &str) -> LinkResult<ChannelSet>;

    /// Replace every channel stored for the device
    fn put_all(&self, device: &str, channels: &ChannelSet) -> LinkResult<()>;

    /// Insert or replace one channel
    fn put(&self, device: &str, channel: &Channel) -> LinkResult<()>;

    /// One channel; zero-valued when nothing is stored under `id`
    fn get(&self, device: &str, id: ChannelId) -> LinkResult<Channel> {
        Ok(self
            .get_all(device)?
            .get(id)
            .cloned()
            .unwrap_or_else(|| Channel {
                id,
                ..Channel::default()
            }))
    }
}

/// Append-only destination of tagged reading rows
pub trait RecordSink: Send + Sync {
    /// Append one row; a row is written completely or not at all
    fn append(&self, fields: &[String]) -> LinkResult<()>;
}
