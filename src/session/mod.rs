//! Session controller: the public `speak` / `stop` / `is_playing` surface.
//!
//! Each `speak` call is one session. Starting a session cancels the one
//! before it, so at most one session ever feeds the output device. Within a
//! session the primary stream is parsed frame by frame, frames decode
//! concurrently, and the scheduler plays them back in index order. If the
//! primary backend cannot be reached, answers with an error status, times
//! out, or produces no frames, the full text goes to the fallback chain.

pub mod cancel;
pub mod state;

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::PlayerConfig;
use crate::decode::{AudioDecoder, Mp3Decoder};
use crate::error::{preview, PlayerError};
use crate::fallback::FallbackChain;
use crate::playback::{
    AudioOutput, PlaybackOutcome, PlaybackQueue, PlaybackScheduler, RodioOutput, SchedulerEvent,
};
use crate::stream::{
    ByteStream, FrameReader, HttpStreamSynthesizer, StreamEnd, StreamingSynthesizer,
    SynthesisRequest,
};

pub use cancel::CancelSignal;
pub use state::{SessionState, SessionStateCell};

struct Session {
    id: Uuid,
    state: SessionStateCell,
    queue: Arc<Mutex<PlaybackQueue>>,
    cancel: Arc<CancelSignal>,
}

impl Session {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SessionStateCell::new(),
            queue: Arc::new(Mutex::new(PlaybackQueue::new())),
            cancel: Arc::new(CancelSignal::new()),
        }
    }

    fn lock_queue(&self) -> MutexGuard<'_, PlaybackQueue> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns whether this call ended the session.
    fn cancel(&self) -> bool {
        let changed = self.state.cancel();
        self.cancel.cancel();
        changed
    }
}

/// Streaming speech player owning one output device.
pub struct SpeechPlayer {
    config: PlayerConfig,
    synthesizer: Arc<dyn StreamingSynthesizer>,
    decoder: Arc<dyn AudioDecoder>,
    output: Arc<dyn AudioOutput>,
    fallback: FallbackChain,
    /// Latest session, live or finished.
    current: Mutex<Option<Arc<Session>>>,
}

impl SpeechPlayer {
    pub fn new(
        config: PlayerConfig,
        synthesizer: Arc<dyn StreamingSynthesizer>,
        decoder: Arc<dyn AudioDecoder>,
        output: Arc<dyn AudioOutput>,
        fallback: FallbackChain,
    ) -> Self {
        Self {
            config,
            synthesizer,
            decoder,
            output,
            fallback,
            current: Mutex::new(None),
        }
    }

    /// HTTP primary backend, MP3 decoding and a rodio output device, all
    /// configured from `config`.
    pub fn from_config(config: &PlayerConfig) -> anyhow::Result<Self> {
        let synthesizer = Arc::new(HttpStreamSynthesizer::new(
            &config.tts_endpoint,
            config.auth_token.clone(),
        ));
        let output = Arc::new(RodioOutput::new(
            config.output_device.as_deref(),
            config.volume,
        )?);
        let fallback = FallbackChain::from_config(config)?;

        info!(
            endpoint = %config.tts_endpoint,
            fallback_tiers = ?config.fallback_tiers,
            "Speech player ready"
        );
        Ok(Self::new(
            config.clone(),
            synthesizer,
            Arc::new(Mp3Decoder),
            output,
            fallback,
        ))
    }

    fn lock_current(&self) -> MutexGuard<'_, Option<Arc<Session>>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn current_session(&self) -> Option<Arc<Session>> {
        self.lock_current().clone()
    }

    /// Speak `text`, replacing whatever is currently playing. Resolves when
    /// all audio for it has played, or as soon as the session is stopped or
    /// superseded. Failures are logged, never returned.
    pub async fn speak(&self, text: &str) {
        if text.trim().is_empty() {
            debug!("Ignoring empty speak request");
            return;
        }

        let session = Arc::new(Session::new());
        let previous = self.lock_current().replace(Arc::clone(&session));
        if let Some(previous) = previous {
            if previous.cancel() {
                info!(session = %previous.id, superseded_by = %session.id, "Session superseded");
            }
            self.output.stop();
            previous.lock_queue().clear();
        }

        info!(
            session = %session.id,
            text_len = text.len(),
            preview = %preview(text),
            "Speak requested"
        );

        tokio::select! {
            biased;
            _ = session.cancel.cancelled() => {
                debug!(session = %session.id, "Session cancelled");
            }
            _ = self.run_session(&session, text) => {}
        }
    }

    /// Silence output, discard queued audio and resolve the in-flight
    /// `speak`. Safe to call at any time, any number of times.
    pub fn stop(&self) {
        let session = self.current_session();
        if let Some(session) = &session {
            if session.cancel() {
                info!(session = %session.id, "Session stopped");
            }
        }
        self.output.stop();
        if let Some(session) = session {
            session.lock_queue().clear();
        }
    }

    /// Audio sounding or decoded buffers waiting to play.
    pub fn is_playing(&self) -> bool {
        let Some(session) = self.current_session() else {
            return false;
        };
        if session.state.is_terminal() {
            return false;
        }
        session.lock_queue().is_active() || self.output.is_playing()
    }

    /// State of the latest session; `Idle` before the first one.
    pub fn state(&self) -> SessionState {
        self.current_session()
            .map_or(SessionState::Idle, |s| s.state.current())
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.current_session().map(|s| s.id)
    }

    pub fn set_volume(&self, volume: f32) {
        self.output.set_volume(volume.max(0.0));
    }

    async fn run_session(&self, session: &Arc<Session>, text: &str) {
        let request = SynthesisRequest {
            session_id: session.id,
            text: text.to_string(),
            voice: self.config.voice.clone(),
        };

        if !session.state.advance(SessionState::Fetching) {
            return;
        }

        let opening = self.synthesizer.open_stream(&request);
        let opened = match self.config.fetch_timeout() {
            Some(limit) => match tokio::time::timeout(limit, opening).await {
                Ok(result) => result,
                Err(_) => Err(PlayerError::Timeout(limit)),
            },
            None => opening.await,
        };

        let stream = match opened {
            Ok(stream) => stream,
            Err(e) if e.engages_fallback() => {
                warn!(
                    session = %session.id,
                    backend = %self.synthesizer.name(),
                    error = %e,
                    "Primary TTS unavailable"
                );
                self.fall_back(session, text).await;
                return;
            }
            Err(e) => {
                error!(session = %session.id, error = %e, "Primary TTS failed");
                session.state.advance(SessionState::Completed);
                return;
            }
        };

        if !session.state.advance(SessionState::Streaming) {
            return;
        }

        let (frames, outcome) = self.play_stream(session, stream).await;
        match outcome {
            PlaybackOutcome::Completed { .. } if frames == 0 => {
                warn!(session = %session.id, "Primary stream produced no frames");
                self.fall_back(session, text).await;
            }
            PlaybackOutcome::Completed { played, skipped } => {
                if session.state.advance(SessionState::Completed) {
                    info!(session = %session.id, frames, played, skipped, "Session completed");
                }
            }
            PlaybackOutcome::Interrupted { at } => {
                debug!(session = %session.id, at, "Primary playback interrupted");
                session.state.advance(SessionState::Completed);
            }
        }
    }

    /// Parse, decode and play one primary stream. Returns the number of
    /// frames parsed and how playback ended.
    async fn play_stream(
        &self,
        session: &Arc<Session>,
        stream: ByteStream,
    ) -> (u32, PlaybackOutcome) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut decodes = JoinSet::new();

        let started = Arc::clone(session);
        let scheduler = PlaybackScheduler::new(
            session.id,
            Arc::clone(&session.queue),
            Arc::clone(&self.output),
        )
        .cancel_on(Arc::clone(&session.cancel))
        .on_start(move || {
            if started.state.advance(SessionState::Playing) {
                info!(session = %started.id, "Playback started");
            }
        });

        // Dropping `decodes` aborts decodes still running.
        tokio::join!(
            self.feed_frames(session.id, stream, events_tx, &mut decodes),
            scheduler.run(events_rx),
        )
    }

    /// Read frames off the stream and decode each on its own task. Sends the
    /// frame count as `EndOfStream` once the stream is exhausted.
    async fn feed_frames(
        &self,
        session_id: Uuid,
        stream: ByteStream,
        events: mpsc::UnboundedSender<SchedulerEvent>,
        decodes: &mut JoinSet<()>,
    ) -> u32 {
        let mut reader = FrameReader::new(stream, self.config.max_frame_bytes);
        let limiter = self
            .config
            .decode_limit()
            .map(|n| Arc::new(Semaphore::new(n)));
        let decode_timeout = self.config.decode_timeout();

        while let Some(frame) = reader.next_frame().await {
            debug!(
                session = %session_id,
                index = frame.index,
                bytes = frame.len(),
                "Frame received"
            );

            let permit = match &limiter {
                Some(limiter) => Arc::clone(limiter).acquire_owned().await.ok(),
                None => None,
            };
            let decoder = Arc::clone(&self.decoder);
            let events = events.clone();

            decodes.spawn(async move {
                let _permit = permit;
                let index = frame.index;
                let decoded = match decode_timeout {
                    Some(limit) => tokio::time::timeout(limit, decoder.decode(frame))
                        .await
                        .unwrap_or_else(|_| {
                            Err(PlayerError::Decode {
                                index,
                                message: format!("timed out after {:?}", limit),
                            })
                        }),
                    None => decoder.decode(frame).await,
                };
                let event = match decoded {
                    Ok(buffer) => SchedulerEvent::Decoded(buffer),
                    Err(e) => {
                        warn!(session = %session_id, index, error = %e, "Skipping frame");
                        SchedulerEvent::Skipped(index)
                    }
                };
                let _ = events.send(event);
            });
        }

        let frames = reader.frames_read();
        match reader.end() {
            Some(StreamEnd::Terminated) => {
                debug!(session = %session_id, frames, "Stream terminated")
            }
            Some(StreamEnd::Truncated { buffered }) => warn!(
                session = %session_id,
                frames,
                buffered,
                "Stream closed without terminal marker"
            ),
            Some(StreamEnd::Failed(e)) => {
                warn!(session = %session_id, frames, error = %e, "Stream ended early")
            }
            None => {}
        }

        let _ = events.send(SchedulerEvent::EndOfStream(frames));
        frames
    }

    async fn fall_back(&self, session: &Session, text: &str) {
        if !session.state.advance(SessionState::FallingBack) {
            return;
        }
        session.lock_queue().clear();

        let spoken = self
            .fallback
            .speak(text, self.output.as_ref(), &session.cancel)
            .await;
        match spoken {
            Ok(()) => info!(session = %session.id, "Fallback playback finished"),
            Err(PlayerError::Cancelled) => {
                debug!(session = %session.id, "Fallback playback interrupted")
            }
            Err(e) => error!(
                session = %session.id,
                text_len = text.len(),
                preview = %preview(text),
                error = %e,
                "Fallback TTS failed"
            ),
        }
        session.state.advance(SessionState::Completed);
    }
}
