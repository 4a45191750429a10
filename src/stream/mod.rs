//! Primary synthesis stream: request types, the framed wire format and the
//! HTTP client that produces it.

pub mod frame;
pub mod http;

use std::future::Future;
use std::pin::Pin;

use futures_util::Stream;
use uuid::Uuid;

use crate::error::PlayerError;

pub use frame::{FrameParser, FrameReader, StreamEnd};
pub use http::HttpStreamSynthesizer;

/// Raw response body chunks, of arbitrary size.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, PlayerError>> + Send>>;

/// Text to speak, tagged with the session that owns it.
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub session_id: Uuid,
    pub text: String,
    pub voice: Option<String>,
}

/// One length-prefixed unit of encoded audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Position in completion order, starting at 0.
    pub index: u32,
    /// Encoded audio (MP3 for the default backend).
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Backend that answers a synthesis request with a framed byte stream
/// (dyn-compatible).
pub trait StreamingSynthesizer: Send + Sync {
    /// Issue the request and return the response body once headers arrive.
    ///
    /// Non-success statuses are reported as [`PlayerError::Network`].
    fn open_stream(
        &self,
        request: &SynthesisRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ByteStream, PlayerError>> + Send + '_>>;

    /// Display name for log records.
    fn name(&self) -> String;
}
