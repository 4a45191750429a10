//! Cloud fallback tiers: StreamElements and Google Translate TTS.
//!
//! Each tier sends one bounded text chunk per request and gets back a
//! complete MP3 payload, decoded here to f32 PCM.

use std::future::Future;
use std::pin::Pin;

use tracing::info;

use super::{chunking, FallbackStrategy};
use crate::decode::{decode_mp3_to_f32, DecodedBuffer};
use crate::error::PlayerError;

/// GET an MP3 and decode it on the blocking pool.
async fn fetch_mp3(
    request: reqwest::RequestBuilder,
    label: &str,
) -> Result<DecodedBuffer, PlayerError> {
    let resp = request
        .send()
        .await
        .map_err(|e| PlayerError::Fallback(format!("{} request failed: {}", label, e)))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(PlayerError::Fallback(format!(
            "{} API error {}: {}",
            label, status, body
        )));
    }

    let bytes = resp
        .bytes()
        .await
        .map_err(|e| PlayerError::Fallback(format!("Failed to read {} response: {}", label, e)))?;

    let (samples, sample_rate) = tokio::task::spawn_blocking(move || decode_mp3_to_f32(&bytes))
        .await
        .map_err(|e| PlayerError::Fallback(format!("{} decode task failed: {}", label, e)))?
        .map_err(|e| {
            PlayerError::Fallback(format!("{} returned undecodable audio: {}", label, e))
        })?;

    Ok(DecodedBuffer {
        index: 0,
        samples,
        sample_rate,
    })
}

// ---------------------------------------------------------------------------
// StreamElements
// ---------------------------------------------------------------------------

/// StreamElements TTS: free, no auth, MP3 responses.
///
/// GET `https://api.streamelements.com/kappa/v2/speech?voice=Brian&text=...`
/// The service rejects long inputs, so text is packed into sentence-aligned
/// chunks of at most 280 characters.
pub struct StreamElementsTts {
    voice: String,
    max_chunk_chars: usize,
    client: reqwest::Client,
}

impl StreamElementsTts {
    pub const DEFAULT_VOICE: &'static str = "Brian";
    pub const MAX_CHUNK_CHARS: usize = 280;

    pub fn new(voice: &str) -> Self {
        Self {
            voice: voice.to_string(),
            max_chunk_chars: Self::MAX_CHUNK_CHARS,
            client: reqwest::Client::new(),
        }
    }
}

impl FallbackStrategy for StreamElementsTts {
    fn name(&self) -> String {
        format!("StreamElements ({})", self.voice)
    }

    fn chunk_text(&self, text: &str) -> Vec<String> {
        chunking::pack_sentences(text, self.max_chunk_chars)
    }

    fn synthesize_chunk(
        &self,
        chunk: &str,
    ) -> Pin<Box<dyn Future<Output = Result<DecodedBuffer, PlayerError>> + Send + '_>> {
        let chunk = chunk.to_string();
        Box::pin(async move {
            info!(voice = %self.voice, text_len = chunk.len(), "StreamElements TTS request");
            let request = self
                .client
                .get("https://api.streamelements.com/kappa/v2/speech")
                .query(&[("voice", self.voice.as_str()), ("text", chunk.as_str())]);
            fetch_mp3(request, "StreamElements").await
        })
    }
}

// ---------------------------------------------------------------------------
// Google Translate
// ---------------------------------------------------------------------------

/// Google Translate's TTS endpoint. Free but rate-limited, 200 characters
/// per request, chunks cut at word boundaries.
pub struct GoogleTranslateTts {
    language: String,
    max_chunk_chars: usize,
    client: reqwest::Client,
}

impl GoogleTranslateTts {
    pub const MAX_CHUNK_CHARS: usize = 200;

    pub fn new(language: &str) -> Self {
        Self {
            language: language.to_string(),
            max_chunk_chars: Self::MAX_CHUNK_CHARS,
            client: reqwest::Client::new(),
        }
    }
}

impl FallbackStrategy for GoogleTranslateTts {
    fn name(&self) -> String {
        format!("Google Translate TTS ({})", self.language)
    }

    fn chunk_text(&self, text: &str) -> Vec<String> {
        chunking::split_at_spaces(text, self.max_chunk_chars)
    }

    fn synthesize_chunk(
        &self,
        chunk: &str,
    ) -> Pin<Box<dyn Future<Output = Result<DecodedBuffer, PlayerError>> + Send + '_>> {
        let chunk = chunk.to_string();
        Box::pin(async move {
            info!(lang = %self.language, text_len = chunk.len(), "Google Translate TTS request");
            let request = self
                .client
                .get("https://translate.google.com/translate_tts")
                .header("User-Agent", "Mozilla/5.0")
                .query(&[
                    ("ie", "UTF-8"),
                    ("q", chunk.as_str()),
                    ("tl", self.language.as_str()),
                    ("client", "tw-ob"),
                ]);
            fetch_mp3(request, "Google Translate TTS").await
        })
    }
}
