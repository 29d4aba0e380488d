// Protocol module - Wire codec and inbound framing
pub mod codec;
pub mod framing;

pub use codec::{decode, decode_config, decode_values, Command, Message};
pub use framing::MessageFramer;
