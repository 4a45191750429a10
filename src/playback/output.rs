//! Audio output device via rodio.
//!
//! Buffers are appended to a single rodio `Sink` and play back-to-back with
//! no gap. Each append returns a receiver that resolves when that buffer has
//! finished sounding; if the buffer is discarded by [`AudioOutput::stop`]
//! the sender is dropped and the receiver errors instead.

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait};
use rodio::buffer::SamplesBuffer;
use rodio::source::EmptyCallback;
use rodio::{OutputStream, OutputStreamHandle, Sink};
use tokio::sync::oneshot;

use crate::decode::DecodedBuffer;

/// The one output device owned by a player.
pub trait AudioOutput: Send + Sync {
    /// Queue a buffer behind everything already queued.
    fn append(&self, buffer: DecodedBuffer) -> oneshot::Receiver<()>;

    /// Silence immediately and discard everything queued.
    fn stop(&self);

    /// Set playback volume (0.0 = silent, 1.0 = normal).
    fn set_volume(&self, volume: f32);

    /// Whether audio is sounding or queued on the device.
    fn is_playing(&self) -> bool;
}

/// rodio-backed output on the default (or a named) device.
///
/// rodio's `OutputStream` is not `Send`, so it lives on a dedicated thread
/// for as long as this value exists; the `Sink` and stream handle are shared.
pub struct RodioOutput {
    stream_handle: OutputStreamHandle,
    sink: Mutex<Arc<Sink>>,
    volume: Mutex<f32>,
    _keepalive: std::sync::mpsc::Sender<()>,
}

impl RodioOutput {
    /// Open the output device. `device_name` of `None` uses the default.
    pub fn new(device_name: Option<&str>, volume: f32) -> anyhow::Result<Self> {
        let (handle_tx, handle_rx) = std::sync::mpsc::channel();
        let (keepalive_tx, keepalive_rx) = std::sync::mpsc::channel::<()>();
        let name = device_name.map(str::to_string);

        std::thread::Builder::new()
            .name("speech-output".into())
            .spawn(move || match open_output_stream(name.as_deref()) {
                Ok((stream, handle)) => {
                    let _ = handle_tx.send(Ok(handle));
                    // Returns once the owning RodioOutput is dropped.
                    let _ = keepalive_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = handle_tx.send(Err(e));
                }
            })?;

        let stream_handle = handle_rx
            .recv()
            .map_err(|_| anyhow::anyhow!("Audio output thread exited during startup"))?
            .map_err(|e| anyhow::anyhow!(e))?;

        let volume = volume.clamp(0.0, 2.0);
        let sink = new_sink(&stream_handle, volume)?;

        Ok(Self {
            stream_handle,
            sink: Mutex::new(Arc::new(sink)),
            volume: Mutex::new(volume),
            _keepalive: keepalive_tx,
        })
    }

    fn current_sink(&self) -> Arc<Sink> {
        let guard = self.sink.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }
}

impl AudioOutput for RodioOutput {
    fn append(&self, buffer: DecodedBuffer) -> oneshot::Receiver<()> {
        let (done_tx, done_rx) = oneshot::channel();
        if buffer.samples.is_empty() || buffer.sample_rate == 0 {
            let _ = done_tx.send(());
            return done_rx;
        }

        let sink = self.current_sink();
        sink.append(SamplesBuffer::new(1, buffer.sample_rate, buffer.samples));

        // Fires when the mixer reaches the end of the buffer above.
        let done = Mutex::new(Some(done_tx));
        sink.append(EmptyCallback::<f32>::new(Box::new(move || {
            if let Some(tx) = done.lock().ok().and_then(|mut slot| slot.take()) {
                let _ = tx.send(());
            }
        })));

        done_rx
    }

    fn stop(&self) {
        let volume = *self.volume.lock().unwrap_or_else(|e| e.into_inner());
        let mut guard = self.sink.lock().unwrap_or_else(|e| e.into_inner());
        guard.stop();

        // Next session starts on a fresh sink.
        match new_sink(&self.stream_handle, volume) {
            Ok(sink) => *guard = Arc::new(sink),
            Err(e) => tracing::error!("Failed to recreate audio sink after stop: {}", e),
        }
    }

    fn set_volume(&self, volume: f32) {
        let volume = volume.clamp(0.0, 2.0);
        *self.volume.lock().unwrap_or_else(|e| e.into_inner()) = volume;
        self.current_sink().set_volume(volume);
    }

    fn is_playing(&self) -> bool {
        !self.current_sink().empty()
    }
}

fn new_sink(handle: &OutputStreamHandle, volume: f32) -> anyhow::Result<Sink> {
    let sink = Sink::try_new(handle)
        .map_err(|e| anyhow::anyhow!("Failed to create audio sink: {}", e))?;
    sink.set_volume(volume);
    Ok(sink)
}

/// Open the audio output stream for a named or default device.
fn open_output_stream(
    output_device_name: Option<&str>,
) -> Result<(OutputStream, OutputStreamHandle), String> {
    if let Some(name) = output_device_name {
        let host = cpal::default_host();
        let device = host
            .output_devices()
            .map_err(|e| format!("Failed to enumerate output devices: {}", e))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false));

        match device {
            Some(dev) => {
                tracing::info!(device = %name, "Using configured output device");
                OutputStream::try_from_device(&dev)
                    .map_err(|e| format!("Failed to open output device '{}': {}", name, e))
            }
            None => {
                tracing::warn!(
                    device = %name,
                    "Configured output device not found, falling back to default"
                );
                OutputStream::try_default()
                    .map_err(|e| format!("No audio output device available: {}", e))
            }
        }
    } else {
        OutputStream::try_default()
            .map_err(|e| format!("No audio output device available: {}", e))
    }
}
