//! Error taxonomy for the playback core.
//!
//! None of these cross the public `speak` / `stop` / `is_playing` contract:
//! the session controller logs them and decides between skipping a frame,
//! finishing with partial audio, or engaging the fallback chain.

use std::time::Duration;

/// Errors that can occur while fetching, decoding or playing speech.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerError {
    /// Request failed or the endpoint answered with a non-success status.
    Network(String),
    /// The initial fetch did not produce a response before the deadline.
    Timeout(Duration),
    /// The framed byte stream violated the wire protocol.
    Protocol(String),
    /// A single frame could not be decoded.
    Decode { index: u32, message: String },
    /// The engaged fallback tier failed.
    Fallback(String),
    /// Audio output error.
    Playback(String),
    /// The session was stopped.
    Cancelled,
}

impl PlayerError {
    /// Whether this error on the primary path should hand the text to the
    /// fallback chain.
    pub fn engages_fallback(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }
}

impl std::fmt::Display for PlayerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network(msg) => write!(f, "TTS network error: {}", msg),
            Self::Timeout(after) => write!(f, "TTS request timed out after {:?}", after),
            Self::Protocol(msg) => write!(f, "TTS stream protocol error: {}", msg),
            Self::Decode { index, message } => {
                write!(f, "Failed to decode frame {}: {}", index, message)
            }
            Self::Fallback(msg) => write!(f, "TTS fallback error: {}", msg),
            Self::Playback(msg) => write!(f, "TTS playback error: {}", msg),
            Self::Cancelled => write!(f, "TTS session cancelled"),
        }
    }
}

impl std::error::Error for PlayerError {}

impl From<reqwest::Error> for PlayerError {
    fn from(e: reqwest::Error) -> Self {
        Self::Network(e.to_string())
    }
}

/// First 80 characters of `text`, for log records.
pub(crate) fn preview(text: &str) -> String {
    text.chars().take(80).collect()
}
