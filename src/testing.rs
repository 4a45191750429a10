//! Scripted collaborators for unit tests. No network or audio hardware.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::oneshot;

use crate::decode::{AudioDecoder, DecodedBuffer};
use crate::error::PlayerError;
use crate::fallback::{chunking, FallbackStrategy};
use crate::playback::AudioOutput;
use crate::stream::{ByteStream, Frame, StreamingSynthesizer, SynthesisRequest};

pub(crate) const TEST_SAMPLE_RATE: u32 = 1_000;

/// Wire bytes for `payloads` followed by the terminal marker.
pub(crate) fn encode_frames(payloads: &[Vec<u8>]) -> Vec<u8> {
    let mut wire = Vec::new();
    for payload in payloads {
        wire.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        wire.extend_from_slice(payload);
    }
    wire.extend_from_slice(&0u32.to_be_bytes());
    wire
}

/// Split `wire` into chunks, cycling through `sizes`.
pub(crate) fn rechunk(wire: &[u8], sizes: &[usize]) -> Vec<Vec<u8>> {
    let mut chunks = Vec::new();
    let mut pos = 0;
    let mut i = 0;
    while pos < wire.len() {
        let end = (pos + sizes[i % sizes.len()]).min(wire.len());
        chunks.push(wire[pos..end].to_vec());
        pos = end;
        i += 1;
    }
    chunks
}

pub(crate) fn byte_stream(chunks: Vec<Vec<u8>>) -> ByteStream {
    Box::pin(futures_util::stream::iter(
        chunks.into_iter().map(Ok::<_, PlayerError>),
    ))
}

/// A short decoded buffer whose samples encode its index.
pub(crate) fn buffer(index: u32) -> DecodedBuffer {
    DecodedBuffer {
        index,
        samples: vec![index as f32; 4],
        sample_rate: TEST_SAMPLE_RATE,
    }
}

// ---------------------------------------------------------------------------
// Primary synthesizer
// ---------------------------------------------------------------------------

pub(crate) enum Script {
    /// Respond with these body chunks, pausing before each one.
    Body { chunks: Vec<Vec<u8>>, chunk_delay: Duration },
    /// Fail the request the way a non-success status does.
    Status(u16),
    /// Never respond.
    Hang,
}

pub(crate) struct ScriptedSynthesizer {
    script: Script,
    requests: Mutex<Vec<String>>,
}

impl ScriptedSynthesizer {
    pub(crate) fn new(script: Script) -> Self {
        Self {
            script,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Serve `payloads` as one framed body, split into small chunks.
    pub(crate) fn frames(payloads: &[Vec<u8>], chunk_delay: Duration) -> Self {
        let chunks = rechunk(&encode_frames(payloads), &[3, 7, 2, 11]);
        Self::new(Script::Body { chunks, chunk_delay })
    }

    pub(crate) fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl StreamingSynthesizer for ScriptedSynthesizer {
    fn open_stream(
        &self,
        request: &SynthesisRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ByteStream, PlayerError>> + Send + '_>> {
        self.requests.lock().unwrap().push(request.text.clone());
        Box::pin(async move {
            match &self.script {
                Script::Body { chunks, chunk_delay } => {
                    let delay = *chunk_delay;
                    let stream =
                        futures_util::stream::iter(chunks.clone()).then(move |chunk| async move {
                            tokio::time::sleep(delay).await;
                            Ok::<_, PlayerError>(chunk)
                        });
                    Ok(Box::pin(stream) as ByteStream)
                }
                Script::Status(code) => Err(PlayerError::Network(format!(
                    "TTS endpoint returned {}",
                    code
                ))),
                Script::Hang => std::future::pending().await,
            }
        })
    }

    fn name(&self) -> String {
        "Scripted TTS".into()
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// Decodes a payload into one sample per byte, with optional per-index
/// delays, failures and hangs.
#[derive(Default)]
pub(crate) struct FakeDecoder {
    delays: HashMap<u32, Duration>,
    failures: HashSet<u32>,
    hangs: HashSet<u32>,
}

impl FakeDecoder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn delay(mut self, index: u32, delay: Duration) -> Self {
        self.delays.insert(index, delay);
        self
    }

    pub(crate) fn fail(mut self, index: u32) -> Self {
        self.failures.insert(index);
        self
    }

    pub(crate) fn hang(mut self, index: u32) -> Self {
        self.hangs.insert(index);
        self
    }
}

impl AudioDecoder for FakeDecoder {
    fn decode(
        &self,
        frame: Frame,
    ) -> Pin<Box<dyn Future<Output = Result<DecodedBuffer, PlayerError>> + Send + '_>> {
        Box::pin(async move {
            let index = frame.index;
            if self.hangs.contains(&index) {
                std::future::pending::<()>().await;
            }
            if let Some(delay) = self.delays.get(&index) {
                tokio::time::sleep(*delay).await;
            }
            if self.failures.contains(&index) {
                return Err(PlayerError::Decode {
                    index,
                    message: "injected failure".into(),
                });
            }
            Ok(DecodedBuffer {
                index,
                samples: frame.payload.iter().map(|&b| b as f32).collect(),
                sample_rate: TEST_SAMPLE_RATE,
            })
        })
    }
}

// ---------------------------------------------------------------------------
// Output device
// ---------------------------------------------------------------------------

#[derive(Default)]
struct OutputLog {
    appended: Vec<DecodedBuffer>,
    completed: Vec<u32>,
    queue: VecDeque<(u32, oneshot::Sender<()>)>,
    generation: u64,
    busy: bool,
    stops: usize,
    max_depth: usize,
}

/// Plays each buffer for a fixed wall-clock time, one at a time, and
/// records what happened.
pub(crate) struct RecordingOutput {
    log: Arc<Mutex<OutputLog>>,
    play_time: Duration,
}

impl RecordingOutput {
    pub(crate) fn new(play_time: Duration) -> Self {
        Self {
            log: Arc::new(Mutex::new(OutputLog::default())),
            play_time,
        }
    }

    /// Indices whose playback ran to the end, in order.
    pub(crate) fn completed(&self) -> Vec<u32> {
        self.log.lock().unwrap().completed.clone()
    }

    pub(crate) fn appended(&self) -> Vec<DecodedBuffer> {
        self.log.lock().unwrap().appended.clone()
    }

    pub(crate) fn stops(&self) -> usize {
        self.log.lock().unwrap().stops
    }

    /// Most buffers ever queued on the device at once.
    pub(crate) fn max_depth(&self) -> usize {
        self.log.lock().unwrap().max_depth
    }

    fn start_playhead(&self, generation: u64) {
        let log = Arc::clone(&self.log);
        let play_time = self.play_time;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(play_time).await;
                let mut state = log.lock().unwrap();
                if state.generation != generation {
                    return;
                }
                if let Some((index, done)) = state.queue.pop_front() {
                    state.completed.push(index);
                    let _ = done.send(());
                }
                if state.queue.is_empty() {
                    state.busy = false;
                    return;
                }
            }
        });
    }
}

impl AudioOutput for RecordingOutput {
    fn append(&self, buffer: DecodedBuffer) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        let generation = {
            let mut log = self.log.lock().unwrap();
            log.queue.push_back((buffer.index, tx));
            log.max_depth = log.max_depth.max(log.queue.len());
            log.appended.push(buffer);
            if log.busy {
                None
            } else {
                log.busy = true;
                Some(log.generation)
            }
        };
        if let Some(generation) = generation {
            self.start_playhead(generation);
        }
        rx
    }

    fn stop(&self) {
        let mut log = self.log.lock().unwrap();
        log.queue.clear();
        log.generation += 1;
        log.busy = false;
        log.stops += 1;
    }

    fn set_volume(&self, _volume: f32) {}

    fn is_playing(&self) -> bool {
        !self.log.lock().unwrap().queue.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Fallback tier
// ---------------------------------------------------------------------------

/// Fallback tier that records the text it was engaged with and produces a
/// recognisable buffer (samples of `-1.0`) per chunk.
pub(crate) struct RecordingFallback {
    name: String,
    max_len: usize,
    fail: bool,
    engaged_with: Mutex<Vec<String>>,
}

impl RecordingFallback {
    pub(crate) fn new(name: &str, max_len: usize) -> Self {
        Self {
            name: name.to_string(),
            max_len,
            fail: false,
            engaged_with: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing(name: &str) -> Self {
        Self {
            fail: true,
            ..Self::new(name, 280)
        }
    }

    pub(crate) fn engaged_with(&self) -> Vec<String> {
        self.engaged_with.lock().unwrap().clone()
    }
}

impl FallbackStrategy for RecordingFallback {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn chunk_text(&self, text: &str) -> Vec<String> {
        self.engaged_with.lock().unwrap().push(text.to_string());
        chunking::pack_sentences(text, self.max_len)
    }

    fn synthesize_chunk(
        &self,
        _chunk: &str,
    ) -> Pin<Box<dyn Future<Output = Result<DecodedBuffer, PlayerError>> + Send + '_>> {
        Box::pin(async move {
            if self.fail {
                return Err(PlayerError::Fallback(format!("{} unavailable", self.name)));
            }
            Ok(DecodedBuffer {
                index: 0,
                samples: vec![-1.0; 4],
                sample_rate: TEST_SAMPLE_RATE,
            })
        })
    }
}
