//! Ordered streaming speech playback.
//!
//! Text goes to a streaming synthesis endpoint that answers with a framed
//! byte stream of encoded audio segments. Frames are decoded concurrently
//! and played strictly in order, back to back. When the primary endpoint is
//! unreachable or produces nothing, the text is spoken through a fallback
//! tier instead.
//!
//! ```no_run
//! # async fn demo() -> anyhow::Result<()> {
//! let config = speech_stream::config::read_player_config();
//! let player = speech_stream::SpeechPlayer::from_config(&config)?;
//! player.speak("Tell me about yourself.").await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod decode;
pub mod error;
pub mod fallback;
pub mod logging;
pub mod playback;
pub mod session;
pub mod stream;

#[cfg(test)]
mod testing;

pub use config::PlayerConfig;
pub use error::PlayerError;
pub use session::{SessionState, SpeechPlayer};
