//! Atomic session state machine.
//!
//! Written by the session task and by `stop()` from any thread; read by
//! `state()` and `is_playing()`.

use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of one `speak` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// Created, nothing requested yet.
    Idle = 0,
    /// Primary request sent, waiting for response headers.
    Fetching = 1,
    /// Body arriving, frames being parsed and decoded.
    Streaming = 2,
    /// First buffer handed to the output device.
    Playing = 3,
    /// Primary path gave up; the fallback chain owns the text.
    FallingBack = 4,
    /// All audio finished (or nothing could be played).
    Completed = 5,
    /// Stopped or superseded by a newer session.
    Cancelled = 6,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Fetching,
            2 => Self::Streaming,
            3 => Self::Playing,
            4 => Self::FallingBack,
            5 => Self::Completed,
            6 => Self::Cancelled,
            _ => Self::Idle,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Fetching => write!(f, "fetching"),
            Self::Streaming => write!(f, "streaming"),
            Self::Playing => write!(f, "playing"),
            Self::FallingBack => write!(f, "falling_back"),
            Self::Completed => write!(f, "completed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Thread-safe session state.
#[derive(Debug)]
pub struct SessionStateCell {
    state: AtomicU8,
}

impl SessionStateCell {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(SessionState::Idle as u8),
        }
    }

    pub fn current(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to `to` unless the session already ended. Returns whether the
    /// transition happened.
    pub fn advance(&self, to: SessionState) -> bool {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (!SessionState::from_u8(current).is_terminal()).then_some(to as u8)
            })
            .is_ok()
    }

    /// Mark the session cancelled. A session that already completed stays
    /// completed.
    pub fn cancel(&self) -> bool {
        self.advance(SessionState::Cancelled)
    }

    pub fn is_terminal(&self) -> bool {
        self.current().is_terminal()
    }
}

impl Default for SessionStateCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        let cell = SessionStateCell::new();
        assert_eq!(cell.current(), SessionState::Idle);
        assert!(cell.advance(SessionState::Fetching));
        assert!(cell.advance(SessionState::Streaming));
        assert!(cell.advance(SessionState::Playing));
        assert!(cell.advance(SessionState::Completed));
        assert!(cell.is_terminal());
    }

    #[test]
    fn test_terminal_states_are_sticky() {
        let cell = SessionStateCell::new();
        cell.advance(SessionState::Completed);
        assert!(!cell.cancel());
        assert!(!cell.advance(SessionState::Playing));
        assert_eq!(cell.current(), SessionState::Completed);

        let cell = SessionStateCell::new();
        cell.advance(SessionState::Streaming);
        assert!(cell.cancel());
        assert!(!cell.advance(SessionState::Completed));
        assert_eq!(cell.current(), SessionState::Cancelled);
    }

    #[test]
    fn test_display() {
        assert_eq!(SessionState::FallingBack.to_string(), "falling_back");
        assert_eq!(SessionState::from_u8(42), SessionState::Idle);
    }
}
