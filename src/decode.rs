//! Frame decoding: encoded payload -> mono f32 PCM.
//!
//! Decoding is CPU-bound and runs on tokio's blocking pool, so decodes for
//! different frames proceed concurrently and may finish in any order.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::error::PlayerError;
use crate::stream::Frame;

/// Decoded, playable form of one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBuffer {
    /// Sequence index inherited from the frame.
    pub index: u32,
    /// Mono samples in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedBuffer {
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

/// Turns one frame's payload into a [`DecodedBuffer`] (dyn-compatible).
pub trait AudioDecoder: Send + Sync {
    fn decode(
        &self,
        frame: Frame,
    ) -> Pin<Box<dyn Future<Output = Result<DecodedBuffer, PlayerError>> + Send + '_>>;
}

/// MP3 decoder backed by Symphonia.
#[derive(Debug, Default, Clone, Copy)]
pub struct Mp3Decoder;

impl AudioDecoder for Mp3Decoder {
    fn decode(
        &self,
        frame: Frame,
    ) -> Pin<Box<dyn Future<Output = Result<DecodedBuffer, PlayerError>> + Send + '_>> {
        Box::pin(async move {
            let index = frame.index;
            let (samples, sample_rate) =
                tokio::task::spawn_blocking(move || decode_mp3_to_f32(&frame.payload))
                    .await
                    .map_err(|e| PlayerError::Decode {
                        index,
                        message: format!("decode task failed: {}", e),
                    })?
                    .map_err(|message| PlayerError::Decode { index, message })?;

            Ok(DecodedBuffer {
                index,
                samples,
                sample_rate,
            })
        })
    }
}

/// Decode MP3 bytes to mono f32 PCM samples plus their sample rate.
pub(crate) fn decode_mp3_to_f32(mp3_bytes: &[u8]) -> Result<(Vec<f32>, u32), String> {
    use symphonia::core::audio::SampleBuffer;
    use symphonia::core::codecs::DecoderOptions;
    use symphonia::core::formats::FormatOptions;
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::meta::MetadataOptions;
    use symphonia::core::probe::Hint;

    // MediaSourceStream needs an owned ('static) source.
    let cursor = std::io::Cursor::new(mp3_bytes.to_vec());
    let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

    let mut hint = Hint::new();
    hint.with_extension("mp3");

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| format!("MP3 probe failed: {}", e))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| "No audio track in MP3".to_string())?;
    let track_id = track.id;
    let channels = track
        .codec_params
        .channels
        .map(|c| c.count())
        .unwrap_or(1);
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| format!("MP3 decoder init failed: {}", e))?;

    let mut all_samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(symphonia::core::errors::Error::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(format!("MP3 decode error: {}", e)),
        };
        if packet.track_id() != track_id {
            continue;
        }
        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!("MP3 packet decode error (skipping): {}", e);
                continue;
            }
        };
        let spec = *decoded.spec();
        if sample_rate == 0 {
            sample_rate = spec.rate;
        }
        let duration = decoded.capacity();
        let mut sample_buf = SampleBuffer::<f32>::new(duration as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        let samples = sample_buf.samples();

        if channels == 1 {
            all_samples.extend_from_slice(samples);
        } else {
            for chunk in samples.chunks(channels) {
                let sum: f32 = chunk.iter().sum();
                all_samples.push(sum / channels as f32);
            }
        }
    }

    if all_samples.is_empty() || sample_rate == 0 {
        return Err("MP3 contained no decodable audio".into());
    }

    Ok((all_samples, sample_rate))
}
