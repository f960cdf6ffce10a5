//! Session states and transition events

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of a [`super::StreamSession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum SessionState {
    /// No transport, no buffer. Initial and terminal.
    Idle = 0,
    /// Sender: connect in progress
    Connecting = 1,
    /// Sender: frames go out on every audio callback
    Sending = 2,
    /// Receiver: listening and buffering, output is silent
    AwaitingConnection = 3,
    /// Receiver: backlog passed the threshold, frames are played
    Receiving = 4,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SessionState::Connecting,
            2 => SessionState::Sending,
            3 => SessionState::AwaitingConnection,
            4 => SessionState::Receiving,
            _ => SessionState::Idle,
        }
    }

    pub fn is_sending_role(self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Sending)
    }

    pub fn is_receiving_role(self) -> bool {
        matches!(
            self,
            SessionState::AwaitingConnection | SessionState::Receiving
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "Idle",
            SessionState::Connecting => "Connecting",
            SessionState::Sending => "Sending",
            SessionState::AwaitingConnection => "AwaitingConnection",
            SessionState::Receiving => "Receiving",
        };
        f.write_str(name)
    }
}

/// Session state readable from any thread without blocking
#[derive(Debug)]
pub(crate) struct AtomicSessionState(AtomicU8);

impl AtomicSessionState {
    pub(crate) fn new(state: SessionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn load(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn swap(&self, state: SessionState) -> SessionState {
        SessionState::from_u8(self.0.swap(state as u8, Ordering::AcqRel))
    }

    /// Move from `from` to `to` only if the state is still `from`.
    pub(crate) fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Notifications published on the session's event channel
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    /// `connect` or `listen` failed; the session is back in `Idle`
    ConnectionFailed { message: String },
    /// The audio device failed; the session is back in `Idle`
    DeviceFailed { message: String },
}
