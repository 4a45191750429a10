//! HTTP client for the primary streaming synthesis endpoint.
//!
//! POST `<endpoint>`
//! Body: `{"text": "...", "voice": "en-US-AriaNeural"}` (voice optional)
//! Returns a chunked body in the framed format parsed by [`super::frame`].

use std::future::Future;
use std::pin::Pin;

use futures_util::StreamExt;
use tracing::{debug, info};

use super::{ByteStream, StreamingSynthesizer, SynthesisRequest};
use crate::error::PlayerError;

/// Streaming TTS backend reached over HTTP.
pub struct HttpStreamSynthesizer {
    endpoint: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl HttpStreamSynthesizer {
    pub fn new(endpoint: &str, auth_token: Option<String>) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            auth_token,
            client: reqwest::Client::new(),
        }
    }

    fn request_body(request: &SynthesisRequest) -> serde_json::Value {
        let mut body = serde_json::json!({ "text": request.text });
        if let Some(voice) = &request.voice {
            body["voice"] = serde_json::Value::String(voice.clone());
        }
        body
    }
}

impl StreamingSynthesizer for HttpStreamSynthesizer {
    fn open_stream(
        &self,
        request: &SynthesisRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ByteStream, PlayerError>> + Send + '_>> {
        let body = Self::request_body(request);
        let session = request.session_id;
        let text_len = request.text.len();
        Box::pin(async move {
            info!(%session, endpoint = %self.endpoint, text_len, "Streaming TTS request");

            let mut req = self.client.post(&self.endpoint).json(&body);
            if let Some(token) = &self.auth_token {
                req = req.bearer_auth(token);
            }

            let resp = req
                .send()
                .await
                .map_err(|e| PlayerError::Network(format!("TTS request failed: {}", e)))?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(PlayerError::Network(format!(
                    "TTS endpoint returned {}: {}",
                    status, body
                )));
            }

            debug!(%session, "TTS response headers received, streaming body");

            let stream = resp.bytes_stream().map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| PlayerError::Network(format!("TTS body read failed: {}", e)))
            });
            Ok(Box::pin(stream) as ByteStream)
        })
    }

    fn name(&self) -> String {
        format!("Streaming TTS ({})", self.endpoint)
    }
}
