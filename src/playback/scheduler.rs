//! Strictly ordered playback of decoded buffers.
//!
//! Decoded buffers arrive in whatever order their decodes finish. The queue
//! holds them by index and only releases the contiguous run starting at the
//! cursor, so output order always matches frame order. Released buffers are
//! appended to the device back-to-back, which chains them with no gap.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use futures_util::stream::{FuturesOrdered, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::AudioOutput;
use crate::decode::DecodedBuffer;
use crate::session::CancelSignal;

/// Input to the scheduler from the decode side.
#[derive(Debug)]
pub enum SchedulerEvent {
    /// A frame decoded successfully.
    Decoded(DecodedBuffer),
    /// A frame failed to decode and will never arrive.
    Skipped(u32),
    /// The parser saw the terminal marker (or gave up) after this many frames.
    EndOfStream(u32),
}

/// How a scheduler run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// Every frame up to the end of stream played or was skipped.
    Completed { played: u32, skipped: u32 },
    /// The device discarded the buffer at this index (stop was called).
    Interrupted { at: u32 },
}

#[derive(Debug)]
enum Slot {
    Ready(DecodedBuffer),
    Skipped,
}

/// Index-keyed holding area for buffers awaiting their turn.
#[derive(Debug, Default)]
pub struct PlaybackQueue {
    pending: BTreeMap<u32, Slot>,
    /// Next index to hand to the device.
    next_release: u32,
    /// Handed to the device, not yet finished, in play order.
    playing: VecDeque<u32>,
    total: Option<u32>,
    played: u32,
    skipped: u32,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: SchedulerEvent) {
        match event {
            SchedulerEvent::Decoded(buffer) => self.insert(buffer),
            SchedulerEvent::Skipped(index) => self.skip(index),
            SchedulerEvent::EndOfStream(total) => self.set_total(total),
        }
    }

    pub fn insert(&mut self, buffer: DecodedBuffer) {
        let index = buffer.index;
        if self.accepts(index) {
            self.pending.insert(index, Slot::Ready(buffer));
        }
    }

    /// Mark an index as permanently missing.
    pub fn skip(&mut self, index: u32) {
        if self.accepts(index) {
            self.pending.insert(index, Slot::Skipped);
        }
    }

    fn accepts(&self, index: u32) -> bool {
        if index < self.next_release || self.total.is_some_and(|t| index >= t) {
            warn!(index, "Ignoring buffer outside the playable range");
            return false;
        }
        true
    }

    /// Record the number of frames the stream produced.
    pub fn set_total(&mut self, total: u32) {
        self.total = Some(total);
        self.pending.retain(|&index, _| index < total);
    }

    /// Release the contiguous run of ready buffers starting at the cursor,
    /// stepping over skipped indices. Stops at the first index not yet
    /// available.
    pub fn take_ready(&mut self) -> Vec<DecodedBuffer> {
        let mut ready = Vec::new();
        while let Some(slot) = self.pending.remove(&self.next_release) {
            match slot {
                Slot::Ready(buffer) => {
                    self.playing.push_back(buffer.index);
                    ready.push(buffer);
                }
                Slot::Skipped => {
                    debug!(index = self.next_release, "Skipping undecodable frame");
                    self.skipped += 1;
                }
            }
            self.next_release += 1;
        }
        ready
    }

    /// Note that the buffer at `index` finished sounding. Buffers finish in
    /// release order; anything else is ignored.
    pub fn finished(&mut self, index: u32) -> bool {
        if self.playing.front() == Some(&index) {
            self.playing.pop_front();
            self.played += 1;
            true
        } else {
            warn!(index, expected = ?self.playing.front(), "Out-of-order playback completion");
            false
        }
    }

    /// No more events will arrive: fix the total and treat every index
    /// still missing below it as skipped.
    pub fn close(&mut self) {
        let upper = self.total.unwrap_or_else(|| {
            let last = self.pending.keys().next_back().map_or(0, |&i| i + 1);
            last.max(self.next_release)
        });
        self.total = Some(upper);
        for index in self.next_release..upper {
            self.pending.entry(index).or_insert(Slot::Skipped);
        }
    }

    /// Terminal count known and every index below it played or skipped.
    pub fn is_complete(&self) -> bool {
        match self.total {
            Some(total) => self.next_release >= total && self.playing.is_empty(),
            None => false,
        }
    }

    /// Audio sounding or decoded buffers waiting.
    pub fn is_active(&self) -> bool {
        !self.playing.is_empty()
            || self
                .pending
                .values()
                .any(|slot| matches!(slot, Slot::Ready(_)))
    }

    /// Index whose playback completion is awaited next.
    pub fn next_expected(&self) -> u32 {
        self.playing.front().copied().unwrap_or(self.next_release)
    }

    pub fn played(&self) -> u32 {
        self.played
    }

    pub fn skipped(&self) -> u32 {
        self.skipped
    }

    /// Discard everything and rewind the cursor.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Drives one session's queue against the output device.
pub struct PlaybackScheduler {
    session: Uuid,
    queue: Arc<Mutex<PlaybackQueue>>,
    output: Arc<dyn AudioOutput>,
    cancel: Option<Arc<CancelSignal>>,
    on_start: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl PlaybackScheduler {
    pub fn new(
        session: Uuid,
        queue: Arc<Mutex<PlaybackQueue>>,
        output: Arc<dyn AudioOutput>,
    ) -> Self {
        Self {
            session,
            queue,
            output,
            cancel: None,
            on_start: None,
        }
    }

    /// Stop handing buffers to the device once `cancel` fires.
    pub fn cancel_on(mut self, cancel: Arc<CancelSignal>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Run `f` when the first buffer is handed to the device.
    pub fn on_start(mut self, f: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.on_start = Some(Box::new(f));
        self
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, PlaybackQueue> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append released buffers to the device in order.
    fn hand_off(&mut self, released: Vec<DecodedBuffer>) -> Vec<(u32, oneshot::Receiver<()>)> {
        let mut pending = Vec::with_capacity(released.len());
        for buffer in released {
            if let Some(start) = self.on_start.take() {
                start();
            }
            let index = buffer.index;
            debug!(
                session = %self.session,
                index,
                duration_ms = buffer.duration().as_millis() as u64,
                "Buffer queued for playback"
            );
            pending.push((index, self.output.append(buffer)));
        }
        pending
    }

    /// Consume events until the stream's last frame has played or been
    /// skipped, until the device discards a buffer, or until cancelled.
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<SchedulerEvent>,
    ) -> PlaybackOutcome {
        let session = self.session;
        let mut completions = FuturesOrdered::new();
        let mut events_open = true;

        loop {
            let (released, outcome) = {
                let mut queue = self.lock_queue();
                let released = queue.take_ready();
                let outcome = queue.is_complete().then(|| PlaybackOutcome::Completed {
                    played: queue.played(),
                    skipped: queue.skipped(),
                });
                (released, outcome)
            };

            let handed_off = match self.cancel.clone() {
                Some(cancel) => cancel.unless_cancelled(|| self.hand_off(released)),
                None => Some(self.hand_off(released)),
            };
            let Some(handed_off) = handed_off else {
                let at = self.lock_queue().next_expected();
                debug!(%session, at, "Session cancelled, dropping released buffers");
                return PlaybackOutcome::Interrupted { at };
            };
            for (index, done) in handed_off {
                completions.push_back(wait_for_end(index, done));
            }

            if let Some(outcome) = outcome {
                info!(%session, ?outcome, "Playback finished");
                return outcome;
            }

            tokio::select! {
                event = events.recv(), if events_open => match event {
                    Some(event) => self.lock_queue().apply(event),
                    None => {
                        events_open = false;
                        self.lock_queue().close();
                    }
                },
                Some((index, finished)) = completions.next(), if !completions.is_empty() => {
                    if !finished {
                        debug!(%session, index, "Playback interrupted");
                        return PlaybackOutcome::Interrupted { at: index };
                    }
                    self.lock_queue().finished(index);
                }
                else => {
                    // Nothing left to wait for; close() has already run.
                    let queue = self.lock_queue();
                    return PlaybackOutcome::Completed {
                        played: queue.played(),
                        skipped: queue.skipped(),
                    };
                }
            }
        }
    }
}

async fn wait_for_end(index: u32, done: oneshot::Receiver<()>) -> (u32, bool) {
    (index, done.await.is_ok())
}
