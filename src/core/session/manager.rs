use crate::core::protocol::{Command, MessageFramer};
use crate::core::session::event::{EventBus, LinkEvent, Subscriber, Subscription};
use crate::core::session::state::{LinkState, SessionStateMachine};
use crate::core::transport::{DeviceReader, DeviceWriter, Transport, TransportEvent};
use crate::domain::channel::Device;
use crate::domain::config::{FramingMode, GlobalConfig};
use crate::domain::error::LinkError;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Session tuning
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub connect_timeout: Duration,
    pub read_buffer_size: usize,
    pub framing: FramingMode,
    pub max_line_length: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&GlobalConfig::default())
    }
}

impl From<&GlobalConfig> for SessionConfig {
    fn from(global: &GlobalConfig) -> Self {
        Self {
            connect_timeout: global.connect_timeout(),
            read_buffer_size: global.read_buffer_size.max(1),
            framing: global.framing,
            max_line_length: global.max_line_length,
        }
    }
}

/// Live connection to one device
struct ActiveSession {
    generation: u64,
    device: Device,
    /// `None` once the session is draining for close
    outbound: Option<mpsc::UnboundedSender<String>>,
    cancel: CancellationToken,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

/// State shared between the manager, its background tasks and handles
#[derive(Clone)]
struct Shared {
    transport: Arc<dyn Transport>,
    config: SessionConfig,
    state: Arc<SessionStateMachine>,
    active: Arc<Mutex<Option<ActiveSession>>>,
    notifier: mpsc::UnboundedSender<LinkEvent>,
}

impl Shared {
    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: LinkEvent) {
        if self.notifier.send(event).is_err() {
            debug!("Event dispatcher is gone");
        }
    }

    // Lock order is state, then active. `active` is only filled and
    // emptied inside state transitions.

    fn send(&self, line: String) -> bool {
        let admitted = self.lock_active().as_ref().and_then(|session| {
            let outbound = session.outbound.clone()?;
            Some((session.generation, outbound))
        });

        let Some((generation, outbound)) = admitted else {
            error!("Not connected to any device, dropping '{}'", line);
            return false;
        };

        match self.state.while_connected(generation, move || outbound.send(line)) {
            Some(Ok(())) => true,
            Some(Err(e)) => {
                warn!("Outbound queue closed, dropping '{}'", e.0);
                false
            }
            None => {
                error!("Session ended, dropping queued line");
                false
            }
        }
    }

    /// Leave `Connected` and tear the session down. `None` ends whichever
    /// session is current.
    fn end_session(&self, generation: Option<u64>) -> bool {
        let mut session = None;
        let ended = self.state.end_session(generation, |ended| {
            let mut active = self.lock_active();
            if active.as_ref().is_some_and(|s| s.generation == ended) {
                session = active.take();
            }
            let _ = self.notifier.send(LinkEvent::DeviceDisconnected);
        });

        if let Some(session) = session {
            session.cancel.cancel();
            info!("Disconnected from {}", session.device);
        }
        ended.is_some()
    }

    async fn open_session(self, generation: u64, device: Device) {
        let connected =
            match tokio::time::timeout(self.config.connect_timeout, self.transport.connect(&device))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(LinkError::Timeout),
            };

        let streams = match connected {
            Ok(streams) => streams,
            Err(e) => {
                error!("Error connecting to {}: {}", device, e);
                let notifier = self.notifier.clone();
                self.state.fail_connect(generation, || {
                    let _ = notifier.send(LinkEvent::DeviceDisconnected);
                });
                return;
            }
        };

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let session = ActiveSession {
            generation,
            device: device.clone(),
            outbound: Some(outbound_tx),
            cancel: cancel.clone(),
            reader: None,
            writer: None,
        };
        let entered = self.state.complete_connect(generation, || {
            *self.lock_active() = Some(session);
            let _ = self.notifier.send(LinkEvent::DeviceConnected(device.clone()));
        });
        if !entered {
            warn!("Connection to {} abandoned before it opened", device);
            return;
        }
        info!("Connected to {}", device);

        let reader = tokio::spawn(self.clone().receive_loop(
            generation,
            streams.reader,
            cancel.clone(),
        ));
        let writer = tokio::spawn(self.clone().outbound_loop(
            generation,
            streams.writer,
            outbound_rx,
            cancel,
        ));

        if let Some(session) = self.lock_active().as_mut() {
            if session.generation == generation {
                session.reader = Some(reader);
                session.writer = Some(writer);
            }
        }
    }

    async fn receive_loop(
        self,
        generation: u64,
        mut reader: DeviceReader,
        cancel: CancellationToken,
    ) {
        let mut buffer = vec![0u8; self.config.read_buffer_size];
        let mut framer = MessageFramer::new(self.config.framing, self.config.max_line_length);

        loop {
            let read = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Receive loop cancelled");
                    return;
                }
                read = reader.read(&mut buffer) => read,
            };

            match read {
                Ok(0) => {
                    warn!("Device closed the stream");
                    break;
                }
                Ok(n) => {
                    debug!("Received {} bytes", n);
                    for message in framer.push(&buffer[..n]) {
                        debug!("Received message: {:?}", message);
                        let notifier = &self.notifier;
                        let delivered = self.state.while_connected(generation, || {
                            let _ = notifier.send(LinkEvent::MessageReceived(message));
                        });
                        if delivered.is_none() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    error!("Error receiving message: {}", e);
                    break;
                }
            }
        }

        self.end_session(Some(generation));
    }

    async fn outbound_loop(
        self,
        generation: u64,
        mut writer: DeviceWriter,
        mut queue: mpsc::UnboundedReceiver<String>,
        cancel: CancellationToken,
    ) {
        loop {
            let line = tokio::select! {
                _ = cancel.cancelled() => break,
                line = queue.recv() => match line {
                    Some(line) => line,
                    None => break,
                },
            };

            match write_line(&mut writer, &line).await {
                Ok(()) => debug!("Message sent: {}", line),
                Err(e) => {
                    error!("Error sending '{}': {}", line, e);
                    self.end_session(Some(generation));
                    return;
                }
            }
        }

        if let Err(e) = writer.shutdown().await {
            debug!("Error closing output stream: {}", e);
        }
    }
}

async fn write_line(writer: &mut DeviceWriter, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

/// Cheap handle for sending commands over the current session
#[derive(Clone)]
pub struct LinkHandle {
    shared: Shared,
}

impl LinkHandle {
    /// Queue a line for the device; rejected unless connected
    pub fn send(&self, line: impl Into<String>) -> bool {
        self.shared.send(line.into())
    }

    pub fn send_command(&self, command: Command) -> bool {
        self.send(command.encode())
    }

    pub fn state(&self) -> LinkState {
        self.shared.state.state()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state.is_connected()
    }

    /// Device of the current session
    pub fn connected_device(&self) -> Option<Device> {
        self.shared
            .lock_active()
            .as_ref()
            .map(|session| session.device.clone())
    }
}

/// Owns the link to a single device: discovery, the connection state
/// machine, the receive loop and the serialized outbound queue
pub struct SessionManager {
    shared: Shared,
    bus: Arc<EventBus>,
    discovered: Arc<Mutex<Vec<Device>>>,
    transport_events: mpsc::UnboundedSender<TransportEvent>,
    dispatcher: Mutex<Option<EventDispatcher>>,
    connecting: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl SessionManager {
    /// Create a new session manager
    pub fn new(transport: Arc<dyn Transport>, config: SessionConfig) -> Self {
        let (notifier, events) = mpsc::unbounded_channel();
        let (transport_events, transport_rx) = mpsc::unbounded_channel();
        let bus = Arc::new(EventBus::new());
        let discovered = Arc::new(Mutex::new(Vec::new()));
        let shutdown = CancellationToken::new();

        transport.watch_adapter(transport_events.clone());

        let dispatcher = EventDispatcher {
            bus: Arc::clone(&bus),
            events,
            transport_events: transport_rx,
            discovered: Arc::clone(&discovered),
            shutdown: shutdown.clone(),
        };

        Self {
            shared: Shared {
                transport,
                config,
                state: Arc::new(SessionStateMachine::new()),
                active: Arc::new(Mutex::new(None)),
                notifier,
            },
            bus,
            discovered,
            transport_events,
            dispatcher: Mutex::new(Some(dispatcher)),
            connecting: Mutex::new(None),
            shutdown,
        }
    }

    /// Register a subscriber; events are delivered while the handle lives
    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> Subscription {
        self.bus.subscribe(subscriber)
    }

    /// Take the event dispatcher. The host runs it on the context that owns
    /// application state; only the first call returns it.
    pub fn dispatcher(&self) -> Option<EventDispatcher> {
        self.dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn handle(&self) -> LinkHandle {
        LinkHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn state(&self) -> LinkState {
        self.shared.state.state()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state.is_connected()
    }

    /// Devices listed by the current discovery
    pub fn discovered_devices(&self) -> Vec<Device> {
        lock_devices(&self.discovered).clone()
    }

    /// List known devices and start looking for new ones
    pub async fn start_discovery(&self) {
        if self.is_connected() {
            warn!("Discovery not started: already connected");
            return;
        }

        debug!("Start discovery on {}", self.shared.transport.name());
        let known = match self.shared.transport.paired_devices().await {
            Ok(devices) => devices,
            Err(e) => {
                error!("Error listing known devices: {}", e);
                Vec::new()
            }
        };

        let listed = {
            let mut discovered = lock_devices(&self.discovered);
            discovered.clear();
            for device in known {
                push_unique(&mut discovered, device);
            }
            discovered.clone()
        };
        self.shared.emit(LinkEvent::DevicesDiscovered(listed));
        self.shared.emit(LinkEvent::DiscoveryStarted);

        match self
            .shared
            .transport
            .begin_discovery(self.transport_events.clone())
            .await
        {
            Ok(()) => debug!("Discovery started"),
            Err(e) => error!("Error starting discovery: {}", e),
        }
    }

    pub async fn stop_discovery(&self) {
        debug!("Stop discovery");
        if let Err(e) = self.shared.transport.end_discovery().await {
            error!("Error stopping discovery: {}", e);
        }
        self.shared.emit(LinkEvent::DiscoveryFinished);
    }

    /// Open a session to the device in the background. Returns `false`
    /// when a session is already connecting or connected.
    pub fn connect(&self, device: Device) -> bool {
        let generation = match self.shared.state.begin_connect() {
            Ok(generation) => generation,
            Err(state) => {
                error!("Cannot connect to {}: link is {}", device, state);
                return false;
            }
        };

        info!("Connecting to {}", device);
        let attempt = tokio::spawn(self.shared.clone().open_session(generation, device));
        *self.connecting.lock().unwrap_or_else(PoisonError::into_inner) = Some(attempt);
        true
    }

    /// Close the current session without waiting for its tasks
    pub fn disconnect(&self) -> bool {
        let ended = self.shared.end_session(None);
        if !ended {
            error!("Not connected to any device");
        }
        ended
    }

    /// Queue a line for the device; rejected unless connected
    pub fn send(&self, line: impl Into<String>) -> bool {
        self.shared.send(line.into())
    }

    /// Abandon a pending connection attempt, drain queued sends, close the
    /// session, join its tasks and stop the event dispatcher
    pub async fn close(&self) {
        let notifier = self.shared.notifier.clone();
        let aborted = self.shared.state.abort_connect(|| {
            let _ = notifier.send(LinkEvent::DeviceDisconnected);
        });

        let attempt = self
            .connecting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(attempt) = attempt {
            if aborted.is_some() {
                info!("Connection attempt abandoned");
                attempt.abort();
            }
            match attempt.await {
                Err(e) if !e.is_cancelled() => warn!("Connect task ended abnormally: {}", e),
                _ => {}
            }
        }

        let (reader, writer) = {
            let mut active = self.shared.lock_active();
            match active.as_mut() {
                Some(session) => {
                    session.outbound = None;
                    (session.reader.take(), session.writer.take())
                }
                None => (None, None),
            }
        };

        if let Some(writer) = writer {
            if let Err(e) = writer.await {
                warn!("Outbound task ended abnormally: {}", e);
            }
        }

        self.shared.end_session(None);

        if let Some(reader) = reader {
            if let Err(e) = reader.await {
                warn!("Receive task ended abnormally: {}", e);
            }
        }

        self.shutdown.cancel();
    }
}

fn lock_devices(devices: &Mutex<Vec<Device>>) -> MutexGuard<'_, Vec<Device>> {
    devices.lock().unwrap_or_else(PoisonError::into_inner)
}

fn push_unique(devices: &mut Vec<Device>, device: Device) -> bool {
    if devices.iter().any(|known| known.address == device.address) {
        return false;
    }
    devices.push(device);
    true
}

/// Single consumer of the notification queue; delivers every event to the
/// subscribers on the task that runs it
pub struct EventDispatcher {
    bus: Arc<EventBus>,
    events: mpsc::UnboundedReceiver<LinkEvent>,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    discovered: Arc<Mutex<Vec<Device>>>,
    shutdown: CancellationToken,
}

impl EventDispatcher {
    /// Deliver events until the manager is closed or dropped
    pub async fn run(mut self) {
        loop {
            let event = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                event = self.events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
                Some(event) = self.transport_events.recv() => {
                    match translate(&self.discovered, event) {
                        Some(event) => event,
                        None => continue,
                    }
                }
            };

            self.bus.deliver(&event).await;
        }

        while let Ok(event) = self.events.try_recv() {
            self.bus.deliver(&event).await;
        }
        debug!("Event dispatcher stopped");
    }
}

fn translate(discovered: &Mutex<Vec<Device>>, event: TransportEvent) -> Option<LinkEvent> {
    match event {
        TransportEvent::DeviceFound(device) => {
            let mut discovered = lock_devices(discovered);
            debug!("Device found: {}", device);
            if push_unique(&mut discovered, device) {
                Some(LinkEvent::DevicesDiscovered(discovered.clone()))
            } else {
                None
            }
        }
        TransportEvent::DiscoveryFinished => Some(LinkEvent::DiscoveryFinished),
        TransportEvent::AdapterEnabled => Some(LinkEvent::AdapterEnabled),
        TransportEvent::AdapterDisabled => Some(LinkEvent::AdapterDisabled),
    }
}
