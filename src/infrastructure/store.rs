//! `ConfigStore` implementations.

use crate::core::store::ConfigStore;
use crate::domain::channel::{Channel, ChannelSet};
use crate::domain::error::{LinkError, LinkResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Process-local store, mainly for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    devices: Mutex<HashMap<String, ChannelSet>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ChannelSet>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ConfigStore for MemoryConfigStore {
    fn get_all(&self, device: &str) -> LinkResult<ChannelSet> {
        Ok(self.lock().get(device).cloned().unwrap_or_default())
    }

    fn put_all(&self, device: &str, channels: &ChannelSet) -> LinkResult<()> {
        self.lock().insert(device.to_string(), channels.calibration());
        Ok(())
    }

    fn put(&self, device: &str, channel: &Channel) -> LinkResult<()> {
        self.lock()
            .entry(device.to_string())
            .or_default()
            .insert(channel.calibration());
        Ok(())
    }
}

/// On-disk layout of the channel store
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    devices: BTreeMap<String, Vec<Channel>>,
}

/// TOML file holding the calibration of every known device.
///
/// Every write rewrites the whole file through a temporary sibling and a
/// rename, so readers never see a partially written store.
#[derive(Debug)]
pub struct FileConfigStore {
    path: PathBuf,
    guard: Mutex<()>,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> LinkResult<StoreFile> {
        if !self.path.exists() {
            return Ok(StoreFile::default());
        }

        let content = fs::read_to_string(&self.path).map_err(|e| {
            LinkError::store(format!("Failed to read {}: {}", self.path.display(), e))
        })?;
        toml::from_str(&content).map_err(|e| {
            LinkError::store(format!("Failed to parse {}: {}", self.path.display(), e))
        })
    }

    fn write(&self, file: &StoreFile) -> LinkResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    LinkError::store(format!("Failed to create {}: {}", parent.display(), e))
                })?;
            }
        }

        let content = toml::to_string_pretty(file)
            .map_err(|e| LinkError::store(format!("Failed to serialize channels: {}", e)))?;

        let staging = self.path.with_extension("toml.tmp");
        fs::write(&staging, content).map_err(|e| {
            LinkError::store(format!("Failed to write {}: {}", staging.display(), e))
        })?;
        fs::rename(&staging, &self.path).map_err(|e| {
            LinkError::store(format!("Failed to replace {}: {}", self.path.display(), e))
        })?;

        debug!("Channel store written to {}", self.path.display());
        Ok(())
    }

    /// Read-modify-write under the store lock
    fn update(&self, device: &str, f: impl FnOnce(&mut ChannelSet)) -> LinkResult<()> {
        let _guard = self.guard.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = self.read()?;

        let mut channels: ChannelSet = file
            .devices
            .remove(device)
            .unwrap_or_default()
            .into_iter()
            .collect();
        f(&mut channels);
        file.devices
            .insert(device.to_string(), channels.calibration().into_iter().collect());

        self.write(&file)
    }
}

impl ConfigStore for FileConfigStore {
    fn get_all(&self, device: &str) -> LinkResult<ChannelSet> {
        let _guard = self.guard.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self
            .read()?
            .devices
            .remove(device)
            .unwrap_or_default()
            .into_iter()
            .collect())
    }

    fn put_all(&self, device: &str, channels: &ChannelSet) -> LinkResult<()> {
        self.update(device, |stored| *stored = channels.clone())
    }

    fn put(&self, device: &str, channel: &Channel) -> LinkResult<()> {
        self.update(device, |stored| {
            stored.insert(channel.clone());
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn channels(list: Vec<Channel>) -> ChannelSet {
        list.into_iter().collect()
    }

    #[test]
    fn test_memory_store_strips_values() {
        let store = MemoryConfigStore::new();
        store.put("dev", &Channel::new(1, 0, 10, 2).with_value(99)).unwrap();

        assert_eq!(store.get("dev", 1).unwrap(), Channel::new(1, 0, 10, 2));
    }

    #[test]
    fn test_missing_channel_is_zero_valued() {
        let store = MemoryConfigStore::new();
        let channel = store.get("dev", 4).unwrap();

        assert_eq!(channel.id, 4);
        assert_eq!((channel.min, channel.max, channel.d), (0, 0, 0));
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store").join("channels.toml");

        let store = FileConfigStore::new(&path);
        store
            .put_all("AA:BB", &channels(vec![Channel::new(0, 50, 100, 1), Channel::reported(3, 9)]))
            .unwrap();
        store.put("CC:DD", &Channel::new(1, 1, 2, 3)).unwrap();

        let reopened = FileConfigStore::new(&path);
        let stored = reopened.get_all("AA:BB").unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored.get(3), Some(&Channel::reported(3, 9)));
        assert_eq!(reopened.get("CC:DD", 1).unwrap().d, 3);
    }

    #[test]
    fn test_file_store_put_all_overwrites() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileConfigStore::new(temp_dir.path().join("channels.toml"));

        store
            .put_all("dev", &channels(vec![Channel::reported(0, 1), Channel::reported(1, 1)]))
            .unwrap();
        store.put_all("dev", &channels(vec![Channel::reported(2, 1)])).unwrap();

        let ids: Vec<_> = store.get_all("dev").unwrap().ids().collect();
        assert_eq!(ids, vec![2]);
    }

    #[test]
    fn test_file_store_missing_file_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileConfigStore::new(temp_dir.path().join("absent.toml"));
        assert!(store.get_all("dev").unwrap().is_empty());
    }

    #[test]
    fn test_file_store_corrupt_file_is_store_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("channels.toml");
        fs::write(&path, "devices = 3").unwrap();

        let result = FileConfigStore::new(&path).get_all("dev");
        assert!(matches!(result, Err(LinkError::Store { .. })));
    }
}
