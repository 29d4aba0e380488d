//! In-memory transport. Each connection is a `tokio::io::duplex` pipe
//! whose far end is handed out as a [`LoopbackPeer`], which plays the
//! device.

use crate::core::transport::{DeviceStreams, Transport, TransportEvent, TransportEventSender};
use crate::domain::channel::Device;
use crate::domain::error::{LinkError, LinkResult};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::DuplexStream;
use tokio::sync::mpsc;

const PIPE_CAPACITY: usize = 4096;

/// Device side of a loopback connection
#[derive(Debug)]
pub struct LoopbackPeer {
    pub device: Device,
    pub stream: DuplexStream,
}

pub struct LoopbackTransport {
    paired: Vec<Device>,
    discoverable: Vec<Device>,
    peers: mpsc::UnboundedSender<LoopbackPeer>,
    refuse: AtomicBool,
}

impl LoopbackTransport {
    /// Transport knowing `paired`; accepted connections arrive on the
    /// returned receiver
    pub fn new(paired: Vec<Device>) -> (Self, mpsc::UnboundedReceiver<LoopbackPeer>) {
        let (peers, accepted) = mpsc::unbounded_channel();
        let transport = Self {
            paired,
            discoverable: Vec::new(),
            peers,
            refuse: AtomicBool::new(false),
        };
        (transport, accepted)
    }

    /// Devices reported by discovery
    pub fn with_discoverable(mut self, devices: Vec<Device>) -> Self {
        self.discoverable = devices;
        self
    }

    /// Make subsequent connection attempts fail
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    fn name(&self) -> &str {
        "loopback"
    }

    async fn paired_devices(&self) -> LinkResult<Vec<Device>> {
        Ok(self.paired.clone())
    }

    async fn begin_discovery(&self, events: TransportEventSender) -> LinkResult<()> {
        for device in &self.discoverable {
            let _ = events.send(TransportEvent::DeviceFound(device.clone()));
        }
        let _ = events.send(TransportEvent::DiscoveryFinished);
        Ok(())
    }

    async fn end_discovery(&self) -> LinkResult<()> {
        Ok(())
    }

    async fn connect(&self, device: &Device) -> LinkResult<DeviceStreams> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(LinkError::transport(format!("{} refused the connection", device)));
        }

        let (local, remote) = tokio::io::duplex(PIPE_CAPACITY);
        self.peers
            .send(LoopbackPeer {
                device: device.clone(),
                stream: remote,
            })
            .map_err(|_| LinkError::transport("no peer is listening"))?;

        Ok(DeviceStreams::split(local))
    }
}
