//! Fallback synthesis used when the primary stream fails or yields nothing.
//!
//! A chain is an ordered list of tiers. Each tier owns its chunking policy
//! and turns one chunk into one playable buffer; the chain plays chunks
//! strictly one after another. By default only the first tier engages.

pub mod chunking;
pub mod cloud;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::PlayerConfig;
use crate::decode::DecodedBuffer;
use crate::error::{preview, PlayerError};
use crate::playback::AudioOutput;
use crate::session::CancelSignal;

pub use cloud::{GoogleTranslateTts, StreamElementsTts};

/// One alternate synthesis backend (dyn-compatible).
pub trait FallbackStrategy: Send + Sync {
    /// Display name for log records.
    fn name(&self) -> String;

    /// Split text into chunks the backend accepts, in speaking order.
    fn chunk_text(&self, text: &str) -> Vec<String>;

    /// Synthesize one chunk into a complete buffer.
    fn synthesize_chunk(
        &self,
        chunk: &str,
    ) -> Pin<Box<dyn Future<Output = Result<DecodedBuffer, PlayerError>> + Send + '_>>;
}

/// Ordered fallback tiers.
#[derive(Clone, Default)]
pub struct FallbackChain {
    tiers: Vec<Arc<dyn FallbackStrategy>>,
    auto_escalate: bool,
}

impl FallbackChain {
    pub fn new(tiers: Vec<Arc<dyn FallbackStrategy>>) -> Self {
        Self {
            tiers,
            auto_escalate: false,
        }
    }

    /// Let a failing tier hand the text to the next one.
    pub fn with_auto_escalate(mut self, auto_escalate: bool) -> Self {
        self.auto_escalate = auto_escalate;
        self
    }

    /// Build the tiers named in `config.fallback_tiers`.
    pub fn from_config(config: &PlayerConfig) -> Result<Self, PlayerError> {
        let tiers = config
            .fallback_tiers
            .iter()
            .map(|name| create_fallback_tier(name, config))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(tiers).with_auto_escalate(config.auto_escalate))
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    /// Speak the full text through the engaged tier(s), waiting for each
    /// chunk to finish before synthesizing the next. Nothing reaches
    /// `output` once `cancel` has fired.
    pub async fn speak(
        &self,
        text: &str,
        output: &dyn AudioOutput,
        cancel: &CancelSignal,
    ) -> Result<(), PlayerError> {
        let engaged = if self.auto_escalate {
            &self.tiers[..]
        } else {
            &self.tiers[..self.tiers.len().min(1)]
        };
        if engaged.is_empty() {
            return Err(PlayerError::Fallback("no fallback tiers configured".into()));
        }

        let mut last_error = None;
        for tier in engaged {
            info!(
                tier = %tier.name(),
                text_len = text.len(),
                preview = %preview(text),
                "Engaging fallback TTS"
            );
            match speak_with(tier.as_ref(), text, output, cancel).await {
                Ok(()) => return Ok(()),
                Err(PlayerError::Cancelled) => return Err(PlayerError::Cancelled),
                Err(e) => {
                    warn!(tier = %tier.name(), error = %e, "Fallback tier failed");
                    last_error = Some(e);
                }
            }
        }

        Err(match last_error {
            Some(PlayerError::Fallback(msg)) => PlayerError::Fallback(msg),
            Some(other) => PlayerError::Fallback(other.to_string()),
            None => PlayerError::Fallback("no fallback tier engaged".into()),
        })
    }
}

async fn speak_with(
    tier: &dyn FallbackStrategy,
    text: &str,
    output: &dyn AudioOutput,
    cancel: &CancelSignal,
) -> Result<(), PlayerError> {
    let chunks = tier.chunk_text(text);
    let total = chunks.len();

    for (i, chunk) in chunks.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(PlayerError::Cancelled);
        }
        let mut buffer = tier.synthesize_chunk(chunk).await?;
        buffer.index = i as u32;
        debug!(
            chunk = i + 1,
            total,
            duration_ms = buffer.duration().as_millis() as u64,
            "Fallback chunk synthesized"
        );
        let done = cancel
            .unless_cancelled(|| output.append(buffer))
            .ok_or(PlayerError::Cancelled)?;
        done.await.map_err(|_| PlayerError::Cancelled)?;
    }
    Ok(())
}

/// Create a fallback tier by name: "streamelements" or "google-translate".
pub fn create_fallback_tier(
    name: &str,
    config: &PlayerConfig,
) -> Result<Arc<dyn FallbackStrategy>, PlayerError> {
    match name {
        "streamelements" => Ok(Arc::new(StreamElementsTts::new(&config.fallback_voice))),
        "google-translate" => Ok(Arc::new(GoogleTranslateTts::new(&config.fallback_language))),
        other => Err(PlayerError::Fallback(format!(
            "Unknown fallback tier: {}",
            other
        ))),
    }
}
