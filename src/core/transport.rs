use crate::domain::{channel::Device, error::LinkResult};
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

/// Inbound half of a device connection
pub type DeviceReader = Box<dyn AsyncRead + Send + Unpin>;
/// Outbound half of a device connection
pub type DeviceWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Independent byte streams of an open connection
pub struct DeviceStreams {
    pub reader: DeviceReader,
    pub writer: DeviceWriter,
}

impl DeviceStreams {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }

    /// Split one duplex stream into its two halves
    pub fn split<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(reader, writer)
    }
}

/// Asynchronous notification raised by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    DeviceFound(Device),
    DiscoveryFinished,
    AdapterEnabled,
    AdapterDisabled,
}

pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

/// Device discovery and connection capability
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Devices known without running a discovery
    async fn paired_devices(&self) -> LinkResult<Vec<Device>>;

    /// Start looking for devices, reporting them through `events`
    async fn begin_discovery(&self, events: TransportEventSender) -> LinkResult<()>;

    /// Stop a running discovery
    async fn end_discovery(&self) -> LinkResult<()>;

    /// Open a connection to the device
    async fn connect(&self, device: &Device) -> LinkResult<DeviceStreams>;

    /// Report adapter power changes through `events`
    fn watch_adapter(&self, events: TransportEventSender) {
        let _ = events;
    }
}
