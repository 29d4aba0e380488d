// Serial module - Serial port transport
pub mod transport;

pub use transport::{SerialReader, SerialTransport, SerialWriter};
