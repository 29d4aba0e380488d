//! SensorLink Library
//!
//! Serial link to calibrated multi-channel sensor devices: connection
//! lifecycle, the device's line protocol, channel reconciliation against a
//! persisted store, and tagged recording of streamed readings.

pub mod cli;
pub mod core;
pub mod domain;
pub mod infrastructure;

pub use crate::core::coordinator::Coordinator;
pub use crate::core::protocol::{Command, Message};
pub use crate::core::session::{
    LinkEvent, LinkHandle, LinkState, SessionConfig, SessionManager, Subscriber, Subscription,
};
pub use crate::core::store::{ConfigStore, RecordSink};
pub use crate::core::transport::{DeviceStreams, Transport, TransportEvent};
pub use domain::channel::{Channel, ChannelId, ChannelSet, Device};
pub use domain::config::LinkConfig;
pub use domain::error::{LinkError, LinkResult};
