// Session module - single-device link lifecycle
pub mod event;
pub mod manager;
pub mod state;

pub use event::{EventBus, LinkEvent, Subscriber, Subscription};
pub use manager::{EventDispatcher, LinkHandle, SessionConfig, SessionManager};
pub use state::{LinkState, SessionStateMachine};
