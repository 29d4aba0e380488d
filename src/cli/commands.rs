use crate::cli::args::{
    Args, BaudArgs, Command, ConfigCommand, MonitorArgs, PortArgs, SetChannelArgs,
};
use crate::cli::output::{ConsoleWriter, OutputWriter};
use crate::core::coordinator::Coordinator;
use crate::core::session::{LinkEvent, SessionConfig, SessionManager, Subscription};
use crate::core::store::{ConfigStore, RecordSink};
use crate::domain::channel::{Channel, Device};
use crate::domain::config::{FramingMode, LinkConfig};
use crate::domain::error::{LinkError, LinkResult};
use crate::infrastructure::config::ConfigManager;
use crate::infrastructure::logging::init_logging;
use crate::infrastructure::serial::SerialTransport;
use crate::infrastructure::sink::CsvRecordSink;
use crate::infrastructure::store::FileConfigStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Execute CLI command
pub async fn execute_command(args: Args) -> LinkResult<()> {
    let writer = ConsoleWriter::new(args.output);

    // Load configuration using ConfigManager
    let config_manager = ConfigManager::new()?;
    let config = if let Some(config_path) = &args.config {
        config_manager.load_config_from_path(config_path)?
    } else {
        config_manager.load_config()?
    };

    if !args.quiet {
        let level = if args.verbose { "debug" } else { config.global.log_level.as_str() };
        init_logging(level)?;
    }

    match args.command {
        Command::Ports => {
            let devices = SerialTransport::available_devices().await?;
            writer.write_devices(&devices)?;
            Ok(())
        }
        Command::Monitor(monitor) => execute_monitor(monitor, &writer, config).await,
        Command::SetChannel(set) => execute_set_channel(set, &writer, &config).await,
        Command::Baud(baud) => execute_baud(baud, &writer, &config).await,
        Command::Channels { device } => {
            let store = open_store(&config)?;
            let channels = store.get_all(&device)?;
            writer.write_channels(&device, &channels)?;
            Ok(())
        }
        Command::Config(config_args) => match config_args.command {
            ConfigCommand::Show => {
                writer.write_config(&config)?;
                Ok(())
            }
            ConfigCommand::Init { path } => {
                let created = config_manager.init_project_config(&path)?;
                writer.write_message(&format!(
                    "Project configuration written to {}",
                    created.display()
                ))?;
                Ok(())
            }
        },
        Command::Version => {
            writer.write_message(&format!("sensorlink {}", env!("CARGO_PKG_VERSION")))?;
            Ok(())
        }
    }
}

async fn execute_monitor(
    args: MonitorArgs,
    writer: &ConsoleWriter,
    mut config: LinkConfig,
) -> LinkResult<()> {
    if args.line_framing {
        config.global.framing = FramingMode::Line;
    }

    let record_path = args.record.clone().or_else(|| config.storage.record_path.clone());
    let file = match record_path {
        Some(path) => {
            info!("Recording readings to {}", path.display());
            Some(CsvRecordSink::open(path)?)
        }
        None => None,
    };
    let sink = Arc::new(ConsoleRecordSink {
        writer: ConsoleWriter::new(writer.format()),
        file,
    });

    let mut runtime = LinkRuntime::start(&config, &args.port, sink)?;
    runtime
        .coordinator
        .set_context_tag(args.tag.unwrap_or_else(|| config.storage.context_tag.clone()));

    runtime.connect(&args.port.port, config.global.connect_timeout()).await?;
    writer.write_message(&format!("Connected to {}, press Ctrl-C to stop", args.port.port))?;

    let result = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break Ok(()),
            event = runtime.events.recv() => match event {
                Some(LinkEvent::DeviceDisconnected) | None => {
                    break Err(LinkError::transport("device disconnected"));
                }
                Some(LinkEvent::MessageReceived(text)) if is_config_report(&text) => {
                    let snapshot = runtime.coordinator.snapshot();
                    if let Err(e) = writer.write_channels(&args.port.port, &snapshot) {
                        break Err(e.into());
                    }
                }
                Some(_) => {}
            },
        }
    };

    runtime.shutdown().await;
    result
}

async fn execute_set_channel(
    args: SetChannelArgs,
    writer: &ConsoleWriter,
    config: &LinkConfig,
) -> LinkResult<()> {
    let mut runtime = LinkRuntime::start(config, &args.port, Arc::new(DiscardRecordSink))?;
    runtime.connect(&args.port.port, config.global.connect_timeout()).await?;

    if !runtime.wait_for_config(Duration::from_secs(args.wait)).await {
        warn!("No configuration report from the device, using stored values");
    }

    let base = match runtime.coordinator.snapshot().get(args.channel) {
        Some(channel) => channel.calibration(),
        None => Channel::reported(args.channel, 0),
    };
    let channel = Channel {
        min: args.min.unwrap_or(base.min),
        max: args.max.unwrap_or(base.max),
        d: args.d.unwrap_or(base.d),
        ..base
    };

    let result = runtime.coordinator.configure_channel(channel.clone());
    runtime.shutdown().await;

    let sent = result?;
    writer.write_message(&format!(
        "{} stored{}",
        channel,
        if sent { ", sent to device" } else { "" }
    ))?;
    Ok(())
}

async fn execute_baud(
    args: BaudArgs,
    writer: &ConsoleWriter,
    config: &LinkConfig,
) -> LinkResult<()> {
    let mut runtime = LinkRuntime::start(config, &args.port, Arc::new(DiscardRecordSink))?;
    runtime.connect(&args.port.port, config.global.connect_timeout()).await?;

    let sent = runtime.coordinator.set_baud_rate(args.rate);
    runtime.shutdown().await;

    if !sent {
        return Err(LinkError::transport("device disconnected before the command was sent"));
    }
    writer.write_message(&format!("Requested baud rate {}", args.rate))?;
    Ok(())
}

fn is_config_report(text: &str) -> bool {
    text.trim_start().starts_with("CH=")
}

fn open_store(config: &LinkConfig) -> LinkResult<FileConfigStore> {
    let path = config
        .storage
        .channel_store_path()
        .ok_or_else(|| LinkError::Config {
            message: "No channel store path and no data directory".to_string(),
        })?;
    debug!("Channel store at {}", path.display());
    Ok(FileConfigStore::new(path))
}

/// One serial session with a coordinator attached
struct LinkRuntime {
    manager: SessionManager,
    coordinator: Arc<Coordinator>,
    events: mpsc::UnboundedReceiver<LinkEvent>,
    dispatcher: JoinHandle<()>,
    _subscriptions: Vec<Subscription>,
}

impl LinkRuntime {
    fn start(config: &LinkConfig, port: &PortArgs, sink: Arc<dyn RecordSink>) -> LinkResult<Self> {
        let transport =
            SerialTransport::new(port.apply(&config.serial), config.global.read_buffer_size);
        let manager = SessionManager::new(Arc::new(transport), SessionConfig::from(&config.global));
        let store: Arc<dyn ConfigStore> = Arc::new(open_store(config)?);
        let coordinator = Arc::new(Coordinator::new(manager.handle(), store, sink));

        // The coordinator goes first so events seen here are already applied.
        let (tx, events) = mpsc::unbounded_channel();
        let subscriptions = vec![
            manager.subscribe(coordinator.clone()),
            manager.subscribe(Arc::new(tx)),
        ];

        let dispatcher = manager.dispatcher().ok_or_else(|| {
            LinkError::InvalidOperation("event dispatcher already taken".to_string())
        })?;

        Ok(Self {
            manager,
            coordinator,
            events,
            dispatcher: tokio::spawn(dispatcher.run()),
            _subscriptions: subscriptions,
        })
    }

    async fn connect(&mut self, port: &str, timeout: Duration) -> LinkResult<()> {
        if !self.manager.connect(Device::new(port, port)) {
            return Err(LinkError::InvalidOperation("already connected".to_string()));
        }

        let deadline = tokio::time::sleep(timeout + Duration::from_secs(1));
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => return Err(LinkError::Timeout),
                event = self.events.recv() => match event {
                    Some(LinkEvent::DeviceConnected(_)) => return Ok(()),
                    Some(LinkEvent::DeviceDisconnected) | None => {
                        return Err(LinkError::transport(format!("could not connect to {}", port)));
                    }
                    Some(_) => {}
                },
            }
        }
    }

    /// Wait for the device's configuration report
    async fn wait_for_config(&mut self, wait: Duration) -> bool {
        let deadline = tokio::time::sleep(wait);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => return false,
                event = self.events.recv() => match event {
                    Some(LinkEvent::MessageReceived(text)) if is_config_report(&text) => {
                        return true;
                    }
                    Some(LinkEvent::DeviceDisconnected) | None => return false,
                    Some(_) => {}
                },
            }
        }
    }

    async fn shutdown(self) {
        self.manager.close().await;
        if let Err(e) = self.dispatcher.await {
            warn!("Event dispatcher ended abnormally: {}", e);
        }
    }
}

/// Prints every record and optionally appends it to a CSV file
struct ConsoleRecordSink {
    writer: ConsoleWriter,
    file: Option<CsvRecordSink>,
}

impl RecordSink for ConsoleRecordSink {
    fn append(&self, fields: &[String]) -> LinkResult<()> {
        if let Some(file) = &self.file {
            file.append(fields)?;
        }
        self.writer.write_record(fields)?;
        Ok(())
    }
}

/// For commands that do not record readings
struct DiscardRecordSink;

impl RecordSink for DiscardRecordSink {
    fn append(&self, _fields: &[String]) -> LinkResult<()> {
        Ok(())
    }
}
