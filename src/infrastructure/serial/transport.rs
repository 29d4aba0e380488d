use crate::core::transport::{DeviceStreams, Transport, TransportEvent, TransportEventSender};
use crate::domain::channel::Device;
use crate::domain::config::{FlowControlConfig, ParityConfig, SerialSettings};
use crate::domain::error::{LinkError, LinkResult};
use async_trait::async_trait;
use serialport::{SerialPort, SerialPortBuilder, SerialPortInfo, SerialPortType};
use std::io::{self, Read, Write};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Reads queued between the port thread and the receive loop
const READ_QUEUE_DEPTH: usize = 32;

/// `Transport` over local serial ports. Every port the OS reports is a
/// device; its path is both the address and the connect handle.
pub struct SerialTransport {
    settings: SerialSettings,
    read_buffer_size: usize,
}

impl SerialTransport {
    pub fn new(settings: SerialSettings, read_buffer_size: usize) -> Self {
        Self {
            settings,
            read_buffer_size: read_buffer_size.max(1),
        }
    }

    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }

    /// Serial ports currently present
    pub async fn available_devices() -> LinkResult<Vec<Device>> {
        let ports = tokio::task::spawn_blocking(serialport::available_ports)
            .await
            .map_err(|e| LinkError::transport(format!("Port scan failed: {}", e)))??;

        Ok(ports.iter().map(device_from_port).collect())
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn name(&self) -> &str {
        "serial"
    }

    async fn paired_devices(&self) -> LinkResult<Vec<Device>> {
        Self::available_devices().await
    }

    async fn begin_discovery(&self, events: TransportEventSender) -> LinkResult<()> {
        tokio::spawn(async move {
            match Self::available_devices().await {
                Ok(devices) => {
                    for device in devices {
                        let _ = events.send(TransportEvent::DeviceFound(device));
                    }
                }
                Err(e) => error!("Error scanning serial ports: {}", e),
            }
            let _ = events.send(TransportEvent::DiscoveryFinished);
        });
        Ok(())
    }

    async fn end_discovery(&self) -> LinkResult<()> {
        Ok(())
    }

    async fn connect(&self, device: &Device) -> LinkResult<DeviceStreams> {
        let builder = port_builder(&device.handle, &self.settings)?;
        let read_buffer_size = self.read_buffer_size;

        let port = tokio::task::spawn_blocking(move || builder.open())
            .await
            .map_err(|e| LinkError::transport(format!("Port open failed: {}", e)))??;
        info!("Serial port {} opened", device.handle);

        let reader = SerialReader::spawn(port.try_clone()?, read_buffer_size)?;
        Ok(DeviceStreams::new(reader, SerialWriter { port }))
    }
}

/// Translate settings into a port builder
pub fn port_builder(path: &str, settings: &SerialSettings) -> LinkResult<SerialPortBuilder> {
    let mut builder = serialport::new(path, settings.baud_rate);

    builder = builder.data_bits(match settings.data_bits {
        5 => serialport::DataBits::Five,
        6 => serialport::DataBits::Six,
        7 => serialport::DataBits::Seven,
        8 => serialport::DataBits::Eight,
        other => {
            return Err(LinkError::InvalidInput(format!("Invalid data bits: {}", other)));
        }
    });

    builder = builder.stop_bits(match settings.stop_bits {
        1 => serialport::StopBits::One,
        2 => serialport::StopBits::Two,
        other => {
            return Err(LinkError::InvalidInput(format!("Invalid stop bits: {}", other)));
        }
    });

    builder = builder.parity(match settings.parity {
        ParityConfig::None => serialport::Parity::None,
        ParityConfig::Even => serialport::Parity::Even,
        ParityConfig::Odd => serialport::Parity::Odd,
    });

    builder = builder.flow_control(match settings.flow_control {
        FlowControlConfig::None => serialport::FlowControl::None,
        FlowControlConfig::Software => serialport::FlowControl::Software,
        FlowControlConfig::Hardware => serialport::FlowControl::Hardware,
    });

    Ok(builder.timeout(settings.read_timeout()))
}

/// Describe an OS serial port as a device
pub fn device_from_port(port: &SerialPortInfo) -> Device {
    let name = match &port.port_type {
        SerialPortType::UsbPort(usb) => usb
            .product
            .clone()
            .unwrap_or_else(|| format!("USB serial {:04x}:{:04x}", usb.vid, usb.pid)),
        SerialPortType::BluetoothPort => "Bluetooth serial".to_string(),
        SerialPortType::PciPort => "PCI serial".to_string(),
        SerialPortType::Unknown => "Serial port".to_string(),
    };
    Device::new(port.port_name.clone(), name)
}

/// Inbound half of a serial port.
///
/// A dedicated thread performs the blocking reads and hands each chunk
/// over a bounded queue. The thread stops on a port error, or at its next
/// read timeout once the reader is dropped.
pub struct SerialReader {
    chunks: mpsc::Receiver<io::Result<Vec<u8>>>,
    pending: Vec<u8>,
    offset: usize,
    stop: Arc<AtomicBool>,
}

impl SerialReader {
    fn spawn(mut port: Box<dyn SerialPort>, buffer_size: usize) -> LinkResult<Self> {
        let (tx, chunks) = mpsc::channel(READ_QUEUE_DEPTH);
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);

        std::thread::Builder::new()
            .name("sensorlink-serial-rx".to_string())
            .spawn(move || {
                let mut buffer = vec![0u8; buffer_size];
                while !thread_stop.load(Ordering::Relaxed) {
                    let chunk = match port.read(&mut buffer) {
                        Ok(0) => continue,
                        Ok(n) => Ok(buffer[..n].to_vec()),
                        Err(ref e) if e.kind() == io::ErrorKind::TimedOut => continue,
                        Err(e) => Err(e),
                    };
                    let failed = chunk.is_err();
                    if tx.blocking_send(chunk).is_err() || failed {
                        break;
                    }
                }
                debug!("Serial reader thread exiting");
            })?;

        Ok(Self::from_queue(chunks, stop))
    }

    fn from_queue(chunks: mpsc::Receiver<io::Result<Vec<u8>>>, stop: Arc<AtomicBool>) -> Self {
        Self {
            chunks,
            pending: Vec::new(),
            offset: 0,
            stop,
        }
    }
}

impl AsyncRead for SerialReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.offset >= this.pending.len() {
            match this.chunks.poll_recv(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Err(e)),
                Poll::Ready(Some(Ok(chunk))) => {
                    this.pending = chunk;
                    this.offset = 0;
                }
            }
        }

        let available = &this.pending[this.offset..];
        let n = available.len().min(buf.remaining());
        buf.put_slice(&available[..n]);
        this.offset += n;
        Poll::Ready(Ok(()))
    }
}

impl Drop for SerialReader {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

/// Outbound half of a serial port. Writes go straight to the port; the
/// port timeout bounds how long one can block.
pub struct SerialWriter {
    port: Box<dyn SerialPort>,
}

impl AsyncWrite for SerialWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(self.get_mut().port.write(buf))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(self.get_mut().port.flush())
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if let Err(e) = self.get_mut().port.flush() {
            warn!("Error flushing serial port on close: {}", e);
        }
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serialport::UsbPortInfo;
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_invalid_framing_settings_rejected() {
        let settings = SerialSettings {
            data_bits: 9,
            ..SerialSettings::default()
        };
        assert!(matches!(
            port_builder("/dev/ttyUSB0", &settings),
            Err(LinkError::InvalidInput(_))
        ));

        let settings = SerialSettings {
            stop_bits: 3,
            ..SerialSettings::default()
        };
        assert!(port_builder("/dev/ttyUSB0", &settings).is_err());
    }

    #[test]
    fn test_default_settings_build() {
        assert!(port_builder("/dev/ttyUSB0", &SerialSettings::default()).is_ok());
    }

    #[test]
    fn test_device_names() {
        let usb = SerialPortInfo {
            port_name: "/dev/ttyACM0".to_string(),
            port_type: SerialPortType::UsbPort(UsbPortInfo {
                vid: 0x2341,
                pid: 0x0043,
                serial_number: None,
                manufacturer: None,
                product: None,
            }),
        };
        let device = device_from_port(&usb);
        assert_eq!(device.address, "/dev/ttyACM0");
        assert_eq!(device.handle, "/dev/ttyACM0");
        assert_eq!(device.name, "USB serial 2341:0043");

        let unknown = SerialPortInfo {
            port_name: "COM3".to_string(),
            port_type: SerialPortType::Unknown,
        };
        assert_eq!(device_from_port(&unknown).name, "Serial port");
    }

    #[tokio::test]
    async fn test_reader_preserves_chunks_and_ends_on_close() {
        let (tx, rx) = mpsc::channel(4);
        let mut reader = SerialReader::from_queue(rx, Arc::new(AtomicBool::new(false)));

        tx.send(Ok(b"VALUES: 1".to_vec())).await.unwrap();
        tx.send(Ok(b",2".to_vec())).await.unwrap();
        drop(tx);

        let mut buffer = [0u8; 64];
        let n = reader.read(&mut buffer).await.unwrap();
        assert_eq!(&buffer[..n], b"VALUES: 1");
        let n = reader.read(&mut buffer).await.unwrap();
        assert_eq!(&buffer[..n], b",2");
        assert_eq!(reader.read(&mut buffer).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reader_surfaces_port_errors() {
        let (tx, rx) = mpsc::channel(1);
        let mut reader = SerialReader::from_queue(rx, Arc::new(AtomicBool::new(false)));

        tx.send(Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged")))
            .await
            .unwrap();

        let mut buffer = [0u8; 8];
        let err = reader.read(&mut buffer).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_dropping_reader_stops_thread() {
        let (_tx, rx) = mpsc::channel(1);
        let stop = Arc::new(AtomicBool::new(false));
        drop(SerialReader::from_queue(rx, Arc::clone(&stop)));
        assert!(stop.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn test_connect_to_missing_port_fails() {
        let transport = SerialTransport::new(SerialSettings::default(), 64);
        let device = Device::new("/dev/sensorlink-does-not-exist", "missing");
        assert!(transport.connect(&device).await.is_err());
    }
}
