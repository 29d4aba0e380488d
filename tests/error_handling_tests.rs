use async_trait::async_trait;
use sensorlink::core::transport::TransportEventSender;
use sensorlink::infrastructure::sink::MemoryRecordSink;
use sensorlink::infrastructure::store::MemoryConfigStore;
use sensorlink::{
    Channel, ChannelSet, ConfigStore, Coordinator, Device, DeviceStreams, LinkError, LinkEvent,
    LinkResult, LinkState, RecordSink, SessionConfig, SessionManager, Transport,
};
use std::collections::VecDeque;
use std::error::Error;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_test::io::Builder;

const WAIT: Duration = Duration::from_secs(2);

/// Error handling and resilience tests
#[cfg(test)]
mod error_handling_tests {
    use super::*;

    /// Hands out pre-built stream pairs, one per connection attempt
    struct ScriptedTransport {
        sessions: Mutex<VecDeque<DeviceStreams>>,
        hang: bool,
    }

    impl ScriptedTransport {
        fn new(sessions: Vec<DeviceStreams>) -> Self {
            Self {
                sessions: Mutex::new(sessions.into()),
                hang: false,
            }
        }

        fn hanging() -> Self {
            Self {
                sessions: Mutex::new(VecDeque::new()),
                hang: true,
            }
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn paired_devices(&self) -> LinkResult<Vec<Device>> {
            Ok(Vec::new())
        }

        async fn begin_discovery(&self, _events: TransportEventSender) -> LinkResult<()> {
            Err(LinkError::transport("adapter off"))
        }

        async fn end_discovery(&self) -> LinkResult<()> {
            Ok(())
        }

        async fn connect(&self, _device: &Device) -> LinkResult<DeviceStreams> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            self.sessions
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| LinkError::transport("connection refused"))
        }
    }

    struct Harness {
        manager: SessionManager,
        events: mpsc::UnboundedReceiver<LinkEvent>,
        _subscription: sensorlink::Subscription,
    }

    impl Harness {
        fn new(transport: ScriptedTransport, config: SessionConfig) -> Self {
            let manager = SessionManager::new(Arc::new(transport), config);
            let (tx, events) = mpsc::unbounded_channel();
            let subscription = manager.subscribe(Arc::new(tx));
            tokio::spawn(manager.dispatcher().unwrap().run());
            Self {
                manager,
                events,
                _subscription: subscription,
            }
        }

        async fn next_event(&mut self) -> LinkEvent {
            timeout(WAIT, self.events.recv()).await.unwrap().unwrap()
        }

        async fn assert_quiet(&mut self) {
            assert!(timeout(Duration::from_millis(100), self.events.recv()).await.is_err());
        }
    }

    fn device() -> Device {
        Device::new("98:D3:31:F5:2A:11", "sensor")
    }

    /// Reader that stays silent until the session is torn down
    fn idle_reader() -> tokio_test::io::Mock {
        Builder::new().wait(Duration::from_secs(60)).build()
    }

    #[test]
    fn test_error_types() {
        let errors = vec![
            LinkError::transport("reset"),
            LinkError::store("disk full"),
            LinkError::sink("closed"),
            LinkError::Timeout,
            LinkError::InvalidOperation("connect while connected".to_string()),
            LinkError::NoDeviceSelected,
            LinkError::Config { message: "bad".to_string() },
            LinkError::InvalidInput("data bits".to_string()),
            LinkError::Output("stdout closed".to_string()),
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }

        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LinkError>();
    }

    #[test]
    fn test_io_error_is_transport_and_chained() {
        let root_cause = io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed");
        let error: LinkError = root_cause.into();

        assert!(matches!(error, LinkError::Io(_)));
        assert!(error.is_transport());
        assert!(error.source().is_some());
        assert!(!LinkError::store("x").is_transport());
    }

    #[tokio::test]
    async fn test_read_error_ends_session_once_and_manager_is_reusable() {
        let failing = DeviceStreams::new(
            Builder::new()
                .read(b"VALUES: 1")
                .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
                .build(),
            Builder::new().build(),
        );
        let healthy = DeviceStreams::new(idle_reader(), Builder::new().build());
        let mut harness = Harness::new(
            ScriptedTransport::new(vec![failing, healthy]),
            SessionConfig::default(),
        );

        assert!(harness.manager.connect(device()));
        assert!(matches!(harness.next_event().await, LinkEvent::DeviceConnected(_)));
        assert_eq!(
            harness.next_event().await,
            LinkEvent::MessageReceived("VALUES: 1".to_string())
        );
        assert_eq!(harness.next_event().await, LinkEvent::DeviceDisconnected);
        harness.assert_quiet().await;
        assert_eq!(harness.manager.state(), LinkState::Idle);
        assert!(!harness.manager.disconnect());

        assert!(harness.manager.connect(device()));
        assert!(matches!(harness.next_event().await, LinkEvent::DeviceConnected(_)));
        assert!(harness.manager.disconnect());
        assert_eq!(harness.next_event().await, LinkEvent::DeviceDisconnected);
    }

    #[tokio::test]
    async fn test_write_error_ends_session() {
        let streams = DeviceStreams::new(
            idle_reader(),
            Builder::new()
                .write(b"GET_CFG")
                .write_error(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"))
                .build(),
        );
        let mut harness = Harness::new(
            ScriptedTransport::new(vec![streams]),
            SessionConfig::default(),
        );

        harness.manager.connect(device());
        assert!(matches!(harness.next_event().await, LinkEvent::DeviceConnected(_)));

        assert!(harness.manager.send("GET_CFG"));
        assert!(harness.manager.send("SET_CFG D1=2"));

        assert_eq!(harness.next_event().await, LinkEvent::DeviceDisconnected);
        harness.assert_quiet().await;
        assert!(!harness.manager.send("GET_CFG"));
    }

    #[tokio::test]
    async fn test_refused_connection_returns_to_idle() {
        let mut harness = Harness::new(
            ScriptedTransport::new(Vec::new()),
            SessionConfig::default(),
        );

        assert!(harness.manager.connect(device()));
        assert_eq!(harness.next_event().await, LinkEvent::DeviceDisconnected);
        assert_eq!(harness.manager.state(), LinkState::Idle);

        assert!(harness.manager.connect(device()));
        assert_eq!(harness.next_event().await, LinkEvent::DeviceDisconnected);
    }

    #[tokio::test]
    async fn test_connect_timeout() {
        let config = SessionConfig {
            connect_timeout: Duration::from_millis(50),
            ..SessionConfig::default()
        };
        let mut harness = Harness::new(ScriptedTransport::hanging(), config);

        assert!(harness.manager.connect(device()));
        assert_eq!(harness.manager.state(), LinkState::Connecting);
        assert!(!harness.manager.connect(device()));

        assert_eq!(harness.next_event().await, LinkEvent::DeviceDisconnected);
        assert_eq!(harness.manager.state(), LinkState::Idle);
    }

    #[tokio::test]
    async fn test_discovery_failure_is_not_fatal() {
        let mut harness = Harness::new(
            ScriptedTransport::new(Vec::new()),
            SessionConfig::default(),
        );

        harness.manager.start_discovery().await;

        assert_eq!(harness.next_event().await, LinkEvent::DevicesDiscovered(Vec::new()));
        assert_eq!(harness.next_event().await, LinkEvent::DiscoveryStarted);
        assert_eq!(harness.manager.state(), LinkState::Idle);
    }

    struct FailingStore;

    impl ConfigStore for FailingStore {
        fn get_all(&self, _device: &str) -> LinkResult<ChannelSet> {
            Ok(ChannelSet::new())
        }

        fn put_all(&self, _device: &str, _channels: &ChannelSet) -> LinkResult<()> {
            Err(LinkError::store("read-only"))
        }

        fn put(&self, _device: &str, _channel: &Channel) -> LinkResult<()> {
            Err(LinkError::store("read-only"))
        }
    }

    struct FailingSink;

    impl RecordSink for FailingSink {
        fn append(&self, _fields: &[String]) -> LinkResult<()> {
            Err(LinkError::sink("disk full"))
        }
    }

    fn idle_coordinator(
        store: Arc<dyn ConfigStore>,
        sink: Arc<dyn RecordSink>,
    ) -> (SessionManager, Coordinator) {
        let manager = SessionManager::new(
            Arc::new(ScriptedTransport::new(Vec::new())),
            SessionConfig::default(),
        );
        let coordinator = Coordinator::new(manager.handle(), store, sink);
        (manager, coordinator)
    }

    #[tokio::test]
    async fn test_store_failure_propagates_and_releases_pause() {
        let (_manager, coordinator) =
            idle_coordinator(Arc::new(FailingStore), Arc::new(MemoryRecordSink::new()));
        coordinator
            .handle_event(&LinkEvent::DeviceConnected(device()))
            .unwrap();

        let result = coordinator.configure_channel(Channel::new(0, 1, 2, 3));
        assert!(matches!(result, Err(LinkError::Store { .. })));
        assert!(!coordinator.is_paused());

        let result = coordinator.handle_message("CH=1,D0=4");
        assert!(matches!(result, Err(LinkError::Store { .. })));
    }

    #[tokio::test]
    async fn test_sink_failure_is_reported() {
        let store = Arc::new(MemoryConfigStore::new());
        let (_manager, coordinator) = idle_coordinator(store.clone(), Arc::new(FailingSink));
        coordinator
            .handle_event(&LinkEvent::DeviceConnected(device()))
            .unwrap();
        coordinator.handle_message("CH=1,D0=4").unwrap();

        let result = coordinator.handle_message("VALUES: 12");
        assert!(matches!(result, Err(LinkError::Sink { .. })));
        assert_eq!(coordinator.snapshot().get(0).and_then(|c| c.value), Some(12));
    }

    #[tokio::test]
    async fn test_malformed_config_tokens_are_skipped() {
        let store = Arc::new(MemoryConfigStore::new());
        let (_manager, coordinator) =
            idle_coordinator(store.clone(), Arc::new(MemoryRecordSink::new()));
        coordinator
            .handle_event(&LinkEvent::DeviceConnected(device()))
            .unwrap();

        coordinator.handle_message("CH=3,Dx=5,D2=abc,D4=8,garbage").unwrap();

        let stored = store.get_all(&device().address).unwrap();
        let ids: Vec<_> = stored.ids().collect();
        assert_eq!(ids, vec![4]);
        assert_eq!(stored.get(4).map(|c| c.d), Some(8));
    }

    #[tokio::test]
    async fn test_send_while_idle_is_rejected_without_error() {
        let (manager, coordinator) =
            idle_coordinator(Arc::new(MemoryConfigStore::new()), Arc::new(MemoryRecordSink::new()));

        assert!(!manager.send("GET_CFG"));
        assert!(!coordinator.set_baud_rate(9600));
        assert!(!manager.disconnect());
        assert_eq!(manager.state(), LinkState::Idle);
    }
}
