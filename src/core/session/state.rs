use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Connection state of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    /// No session
    Idle,
    /// Transport handshake in flight
    Connecting,
    /// Streams open, receive loop running
    Connected,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Idle => write!(f, "Idle"),
            LinkState::Connecting => write!(f, "Connecting"),
            LinkState::Connected => write!(f, "Connected"),
        }
    }
}

#[derive(Debug)]
struct Phase {
    state: LinkState,
    generation: u64,
}

/// Synchronized link state machine.
///
/// Every session attempt gets a generation number when it leaves `Idle`.
/// Transitions out of `Connecting`/`Connected` name the generation they
/// belong to, so a stale task can never move a newer session. Callbacks
/// passed to a transition run while the state is locked, which orders
/// event emission with the transition itself.
#[derive(Debug)]
pub struct SessionStateMachine {
    phase: Mutex<Phase>,
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self {
            phase: Mutex::new(Phase {
                state: LinkState::Idle,
                generation: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state
    pub fn state(&self) -> LinkState {
        self.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    /// `Idle -> Connecting`; returns the new session generation, or the
    /// state that blocked the transition
    pub fn begin_connect(&self) -> Result<u64, LinkState> {
        let mut phase = self.lock();
        if phase.state != LinkState::Idle {
            return Err(phase.state);
        }
        phase.generation += 1;
        phase.state = LinkState::Connecting;
        Ok(phase.generation)
    }

    /// `Connecting -> Connected`
    pub fn complete_connect(&self, generation: u64, on_enter: impl FnOnce()) -> bool {
        self.transition(generation, LinkState::Connecting, LinkState::Connected, on_enter)
    }

    /// `Connecting -> Idle`
    pub fn fail_connect(&self, generation: u64, on_exit: impl FnOnce()) -> bool {
        self.transition(generation, LinkState::Connecting, LinkState::Idle, on_exit)
    }

    /// `Connecting -> Idle` for whichever attempt is pending. The attempt's
    /// own `complete_connect` then fails.
    pub fn abort_connect(&self, on_exit: impl FnOnce()) -> Option<u64> {
        let mut phase = self.lock();
        if phase.state != LinkState::Connecting {
            return None;
        }
        phase.state = LinkState::Idle;
        on_exit();
        Some(phase.generation)
    }

    /// `Connected -> Idle`, for the given generation or whichever session
    /// is current. `on_exit` gets the generation that ended.
    pub fn end_session(
        &self,
        generation: Option<u64>,
        on_exit: impl FnOnce(u64),
    ) -> Option<u64> {
        let mut phase = self.lock();
        if phase.state != LinkState::Connected {
            return None;
        }
        if generation.is_some_and(|g| g != phase.generation) {
            return None;
        }
        phase.state = LinkState::Idle;
        on_exit(phase.generation);
        Some(phase.generation)
    }

    /// Run `f` only while the given session is connected
    pub fn while_connected<R>(&self, generation: u64, f: impl FnOnce() -> R) -> Option<R> {
        let phase = self.lock();
        if phase.state == LinkState::Connected && phase.generation == generation {
            Some(f())
        } else {
            None
        }
    }

    fn transition(
        &self,
        generation: u64,
        from: LinkState,
        to: LinkState,
        callback: impl FnOnce(),
    ) -> bool {
        let mut phase = self.lock();
        if phase.state != from || phase.generation != generation {
            return false;
        }
        phase.state = to;
        callback();
        true
    }
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
