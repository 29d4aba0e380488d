pub mod channels;
pub mod coordinator;
pub mod protocol;
pub mod session;
pub mod store;
pub mod transport;
