use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Channel identifier as reported by the device
pub type ChannelId = u32;

/// Lower calibration bound given to channels first reported by the device
pub const DEFAULT_MIN: i32 = 100;
/// Upper calibration bound given to channels first reported by the device
pub const DEFAULT_MAX: i32 = 20000;

/// A discovered device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Device {
    /// Opaque transport address, also the key for persisted configuration
    pub address: String,
    /// Human-readable name
    pub name: String,
    /// Transport-specific handle used to open the connection
    pub handle: String,
}

impl Device {
    pub fn new(address: impl Into<String>, name: impl Into<String>) -> Self {
        let address = address.into();
        Self {
            handle: address.clone(),
            address,
            name: name.into(),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.address)
    }
}

/// A calibrated sensor channel
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub min: i32,
    pub max: i32,
    /// Calibration parameter owned by the device
    pub d: i32,
    /// Last observed reading; never persisted
    #[serde(skip)]
    pub value: Option<i32>,
}

impl Channel {
    pub fn new(id: ChannelId, min: i32, max: i32, d: i32) -> Self {
        Self {
            id,
            min,
            max,
            d,
            value: None,
        }
    }

    /// Channel first seen in a device report
    pub fn reported(id: ChannelId, d: i32) -> Self {
        Self::new(id, DEFAULT_MIN, DEFAULT_MAX, d)
    }

    pub fn with_value(mut self, value: i32) -> Self {
        self.value = Some(value);
        self
    }

    /// Copy of the persisted part of the channel
    pub fn calibration(&self) -> Self {
        Self {
            value: None,
            ..self.clone()
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "D{} [{}..{}] d={}", self.id, self.min, self.max, self.d)?;
        if let Some(value) = self.value {
            write!(f, " value={}", value)?;
        }
        Ok(())
    }
}

/// Channels of one device, keyed and ordered by id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelSet {
    channels: BTreeMap<ChannelId, Channel>,
}

impl ChannelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the channel stored under its own id
    pub fn insert(&mut self, channel: Channel) -> Option<Channel> {
        self.channels.insert(channel.id, channel)
    }

    pub fn get(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.get(&id)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Channels in ascending id order
    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.channels.keys().copied()
    }

    /// Copy of the set with every channel replaced by its persisted part
    pub fn calibration(&self) -> Self {
        self.iter().map(Channel::calibration).collect()
    }
}

impl FromIterator<Channel> for ChannelSet {
    fn from_iter<T: IntoIterator<Item = Channel>>(iter: T) -> Self {
        let mut set = ChannelSet::new();
        for channel in iter {
            set.insert(channel);
        }
        set
    }
}

impl IntoIterator for ChannelSet {
    type Item = Channel;
    type IntoIter = std::collections::btree_map::IntoValues<ChannelId, Channel>;

    fn into_iter(self) -> Self::IntoIter {
        self.channels.into_values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_replaces_by_id() {
        let mut set = ChannelSet::new();
        set.insert(Channel::new(3, 0, 10, 1));
        set.insert(Channel::new(3, 0, 10, 2));

        assert_eq!(set.len(), 1);
        assert_eq!(set.get(3).map(|c| c.d), Some(2));
    }

    #[test]
    fn test_iteration_is_ascending() {
        let set: ChannelSet = vec![
            Channel::reported(7, 1),
            Channel::reported(0, 1),
            Channel::reported(3, 1),
        ]
        .into_iter()
        .collect();

        let ids: Vec<_> = set.ids().collect();
        assert_eq!(ids, vec![0, 3, 7]);
    }

    #[test]
    fn test_calibration_drops_value() {
        let channel = Channel::new(1, 50, 100, 4).with_value(77);
        assert_eq!(channel.calibration().value, None);
        assert_eq!(channel.calibration().d, 4);
    }

    #[test]
    fn test_value_is_not_serialized() {
        let set: ChannelSet = vec![Channel::new(2, 1, 9, 5).with_value(42)].into_iter().collect();
        let json = serde_json::to_string(&set).unwrap();
        assert!(!json.contains("42"));

        let decoded: ChannelSet = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.get(2), Some(&Channel::new(2, 1, 9, 5)));
    }

    #[test]
    fn test_reported_defaults() {
        let channel = Channel::reported(1, 9);
        assert_eq!((channel.min, channel.max), (DEFAULT_MIN, DEFAULT_MAX));
    }
}
