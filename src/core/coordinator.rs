//! Application glue between the link and persistence.
//!
//! The coordinator reacts to link events: it loads and republishes the
//! stored channel configuration when a device connects, reconciles
//! configuration reports from the device into the store, and turns reading
//! reports into live snapshots and tagged records.

use crate::core::channels::{apply_values, reconcile};
use crate::core::protocol::{decode, Command, Message};
use crate::core::session::{LinkEvent, LinkHandle, Subscriber};
use crate::core::store::{ConfigStore, RecordSink};
use crate::domain::channel::{Channel, ChannelId, ChannelSet, Device};
use crate::domain::error::{LinkError, LinkResult};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Suspends reading processing while a configuration write is in flight
#[derive(Debug, Default)]
pub struct PauseGate {
    holders: AtomicUsize,
}

impl PauseGate {
    pub fn hold(&self) -> PauseGuard<'_> {
        self.holders.fetch_add(1, Ordering::SeqCst);
        PauseGuard { gate: self }
    }

    pub fn is_paused(&self) -> bool {
        self.holders.load(Ordering::SeqCst) > 0
    }
}

/// Releases the pause when dropped
pub struct PauseGuard<'a> {
    gate: &'a PauseGate,
}

impl Drop for PauseGuard<'_> {
    fn drop(&mut self) {
        self.gate.holders.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct Coordinator {
    link: LinkHandle,
    store: Arc<dyn ConfigStore>,
    sink: Arc<dyn RecordSink>,
    device: Mutex<Option<Device>>,
    context_tag: Mutex<String>,
    pause: PauseGate,
    /// Serializes every store read-modify-write and snapshot publish
    mutation: Mutex<()>,
    snapshot: watch::Sender<Arc<ChannelSet>>,
}

impl Coordinator {
    pub fn new(link: LinkHandle, store: Arc<dyn ConfigStore>, sink: Arc<dyn RecordSink>) -> Self {
        let (snapshot, _) = watch::channel(Arc::new(ChannelSet::new()));
        Self {
            link,
            store,
            sink,
            device: Mutex::new(None),
            context_tag: Mutex::new(String::new()),
            pause: PauseGate::default(),
            mutation: Mutex::new(()),
            snapshot,
        }
    }

    /// Set the first field of every record
    pub fn with_context_tag(self, tag: impl Into<String>) -> Self {
        self.set_context_tag(tag);
        self
    }

    /// Receiver of published channel snapshots
    pub fn channels(&self) -> watch::Receiver<Arc<ChannelSet>> {
        self.snapshot.subscribe()
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> Arc<ChannelSet> {
        self.snapshot.borrow().clone()
    }

    /// Device of the current session, as seen by the coordinator
    pub fn current_device(&self) -> Option<Device> {
        lock(&self.device).clone()
    }

    pub fn context_tag(&self) -> String {
        lock(&self.context_tag).clone()
    }

    pub fn set_context_tag(&self, tag: impl Into<String>) {
        *lock(&self.context_tag) = tag.into();
    }

    /// Tag records with a position, as `"<lat> <lng>"`
    pub fn set_location(&self, latitude: f64, longitude: f64) {
        self.set_context_tag(format!("{:.6} {:.6}", latitude, longitude));
    }

    pub fn is_paused(&self) -> bool {
        self.pause.is_paused()
    }

    /// Handle one link event
    pub fn handle_event(&self, event: &LinkEvent) -> LinkResult<()> {
        match event {
            LinkEvent::DeviceConnected(device) => self.on_connected(device),
            LinkEvent::DeviceDisconnected => {
                let _mutation = lock(&self.mutation);
                if let Some(device) = lock(&self.device).take() {
                    info!("Session with {} ended", device);
                }
                Ok(())
            }
            LinkEvent::MessageReceived(text) => self.handle_message(text),
            LinkEvent::DevicesDiscovered(devices) => {
                debug!("{} device(s) available", devices.len());
                Ok(())
            }
            LinkEvent::DiscoveryStarted | LinkEvent::DiscoveryFinished => Ok(()),
            LinkEvent::AdapterEnabled | LinkEvent::AdapterDisabled => Ok(()),
        }
    }

    fn on_connected(&self, device: &Device) -> LinkResult<()> {
        let _mutation = lock(&self.mutation);
        *lock(&self.device) = Some(device.clone());

        let stored = self.store.get_all(&device.address)?;
        info!("Loaded {} stored channel(s) for {}", stored.len(), device);
        self.publish(stored);

        if !self.link.send_command(Command::GetConfig) {
            warn!("Could not request configuration from {}", device);
        }
        Ok(())
    }

    /// Dispatch one inbound message
    pub fn handle_message(&self, text: &str) -> LinkResult<()> {
        match decode(text) {
            Message::Config { entries } => self.apply_config(&entries),
            Message::Values { values } => self.apply_readings(values),
            Message::Unrecognized { raw } => {
                debug!("Ignoring message: {:?}", raw);
                Ok(())
            }
        }
    }

    fn apply_config(&self, reported: &BTreeMap<ChannelId, i32>) -> LinkResult<()> {
        let _mutation = lock(&self.mutation);
        let Some(device) = self.current_device() else {
            warn!("Configuration report without a device, ignoring");
            return Ok(());
        };

        let existing = self.store.get_all(&device.address)?;
        let merged = reconcile(&existing, reported);
        self.store.put_all(&device.address, &merged)?;

        let persisted = self.store.get_all(&device.address)?;
        debug!("Device reported {} channel(s), {} stored", reported.len(), persisted.len());
        self.publish(persisted);
        Ok(())
    }

    fn apply_readings(&self, values: Vec<String>) -> LinkResult<()> {
        let _mutation = lock(&self.mutation);
        if self.pause.is_paused() {
            debug!("Configuration write in flight, dropping readings");
            return Ok(());
        }
        if values.is_empty() {
            debug!("Empty reading report");
            return Ok(());
        }

        let current = self.snapshot();
        self.publish(apply_values(&current, &values));

        let mut record = Vec::with_capacity(values.len() + 1);
        record.push(self.context_tag());
        record.extend(values);
        self.sink.append(&record)
    }

    /// Store a channel's configuration, publish it and, when its `d`
    /// changed, push it to the device. Returns whether a `SET_CFG` was
    /// queued.
    pub fn configure_channel(&self, channel: Channel) -> LinkResult<bool> {
        let _pause = self.pause.hold();
        let _mutation = lock(&self.mutation);
        let device = self.current_device().ok_or(LinkError::NoDeviceSelected)?;

        let previous = self.store.get(&device.address, channel.id)?;
        self.store.put(&device.address, &channel)?;

        let mut updated = (*self.snapshot()).clone();
        let live_value = updated.get(channel.id).and_then(|c| c.value);
        let mut replacement = channel.clone();
        if replacement.value.is_none() {
            replacement.value = live_value;
        }
        updated.insert(replacement);
        self.publish(updated);

        if previous.d == channel.d {
            debug!("Channel {} d unchanged, nothing to send", channel.id);
            return Ok(false);
        }

        let queued = self.link.send_command(Command::SetConfig {
            channel: channel.id,
            d: channel.d,
        });
        if !queued {
            warn!("Channel {} stored but not sent to the device", channel.id);
        }
        Ok(queued)
    }

    /// Ask the device to change its serial baud rate
    pub fn set_baud_rate(&self, rate: u32) -> bool {
        self.link.send_command(Command::SetBaud(rate))
    }

    fn publish(&self, channels: ChannelSet) {
        self.snapshot.send_replace(Arc::new(channels));
    }
}

#[async_trait]
impl Subscriber for Coordinator {
    async fn on_event(&self, event: &LinkEvent) {
        if let Err(e) = self.handle_event(event) {
            error!("Error handling {:?}: {}", event, e);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
