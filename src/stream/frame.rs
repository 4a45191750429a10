//! Incremental deframer for the length-prefixed audio stream.
//!
//! Wire format: `[u32 big-endian length][payload]` repeated, terminated by a
//! zero length. The synthesis daemon may open the stream with a single
//! `0xFFFFFFFF` streaming-mode header, which is skipped.

use futures_util::{Stream, StreamExt};

use super::Frame;
use crate::error::PlayerError;

const HEADER_LEN: usize = 4;
const STREAMING_MODE_HEADER: u32 = 0xFFFF_FFFF;

/// Largest payload accepted by default (16 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Sans-IO frame parser. Feed it chunks with [`push`](Self::push) and pull
/// completed frames with [`next_frame`](Self::next_frame).
#[derive(Debug)]
pub struct FrameParser {
    buf: Vec<u8>,
    pos: usize,
    next_index: u32,
    at_start: bool,
    terminated: bool,
    max_frame_bytes: usize,
}

impl FrameParser {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            pos: 0,
            next_index: 0,
            at_start: true,
            terminated: false,
            max_frame_bytes,
        }
    }

    /// Append raw bytes. Ignored once the terminal marker has been seen.
    pub fn push(&mut self, chunk: &[u8]) {
        if self.terminated {
            return;
        }
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
        self.buf.extend_from_slice(chunk);
    }

    /// Yield the next complete frame, or `None` if more bytes are needed or
    /// the terminal marker was reached.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, PlayerError> {
        loop {
            if self.terminated {
                return Ok(None);
            }

            let avail = &self.buf[self.pos..];
            if avail.len() < HEADER_LEN {
                return Ok(None);
            }
            let declared = u32::from_be_bytes([avail[0], avail[1], avail[2], avail[3]]);

            if self.at_start {
                self.at_start = false;
                if declared == STREAMING_MODE_HEADER {
                    self.pos += HEADER_LEN;
                    continue;
                }
            }

            if declared == 0 {
                self.terminated = true;
                self.buf.clear();
                self.pos = 0;
                return Ok(None);
            }

            let len = declared as usize;
            if len > self.max_frame_bytes {
                return Err(PlayerError::Protocol(format!(
                    "frame {} declares {} bytes (limit {})",
                    self.next_index, len, self.max_frame_bytes
                )));
            }
            if avail.len() < HEADER_LEN + len {
                return Ok(None);
            }

            let payload = avail[HEADER_LEN..HEADER_LEN + len].to_vec();
            self.pos += HEADER_LEN + len;

            let index = self.next_index;
            self.next_index += 1;
            return Ok(Some(Frame { index, payload }));
        }
    }

    /// Whether the zero-length terminal marker has been consumed.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Bytes received but not yet part of a completed frame.
    pub fn buffered_len(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn frames_emitted(&self) -> u32 {
        self.next_index
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

/// Why a [`FrameReader`] stopped yielding frames.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEnd {
    /// Terminal marker received.
    Terminated,
    /// Byte stream closed without a terminal marker; `buffered` bytes of an
    /// incomplete frame were discarded.
    Truncated { buffered: usize },
    /// Transport error or protocol violation.
    Failed(PlayerError),
}

/// Lazy, single-pass frame sequence over a byte stream.
pub struct FrameReader<S> {
    stream: S,
    parser: FrameParser,
    end: Option<StreamEnd>,
}

impl<S> FrameReader<S>
where
    S: Stream<Item = Result<Vec<u8>, PlayerError>> + Unpin,
{
    pub fn new(stream: S, max_frame_bytes: usize) -> Self {
        Self {
            stream,
            parser: FrameParser::new(max_frame_bytes),
            end: None,
        }
    }

    /// Next completed frame. Returns `None` forever once the sequence ended;
    /// [`end`](Self::end) then says why.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        if self.end.is_some() {
            return None;
        }

        loop {
            match self.parser.next_frame() {
                Ok(Some(frame)) => return Some(frame),
                Ok(None) if self.parser.is_terminated() => {
                    self.end = Some(StreamEnd::Terminated);
                    return None;
                }
                Ok(None) => {}
                Err(e) => {
                    self.end = Some(StreamEnd::Failed(e));
                    return None;
                }
            }

            match self.stream.next().await {
                Some(Ok(chunk)) => self.parser.push(&chunk),
                Some(Err(e)) => {
                    self.end = Some(StreamEnd::Failed(e));
                    return None;
                }
                None => {
                    self.end = Some(StreamEnd::Truncated {
                        buffered: self.parser.buffered_len(),
                    });
                    return None;
                }
            }
        }
    }

    pub fn end(&self) -> Option<&StreamEnd> {
        self.end.as_ref()
    }

    /// Number of frames yielded so far.
    pub fn frames_read(&self) -> u32 {
        self.parser.frames_emitted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{byte_stream, encode_frames, rechunk};

    fn payloads() -> Vec<Vec<u8>> {
        vec![
            vec![1; 3],
            vec![2; 1],
            vec![3; 300],
            (0..=255u8).collect(),
            vec![5; 17],
        ]
    }

    fn parse_all(wire: &[u8], chunk_size: usize) -> Vec<Frame> {
        let mut parser = FrameParser::default();
        let mut frames = Vec::new();
        for chunk in wire.chunks(chunk_size) {
            parser.push(chunk);
            while let Some(frame) = parser.next_frame().unwrap() {
                frames.push(frame);
            }
        }
        frames
    }

    #[test]
    fn test_every_chunking_yields_same_frames() {
        let payloads = payloads();
        let wire = encode_frames(&payloads);

        for chunk_size in 1..=wire.len() {
            let frames = parse_all(&wire, chunk_size);
            assert_eq!(frames.len(), payloads.len(), "chunk size {}", chunk_size);
            for (i, frame) in frames.iter().enumerate() {
                assert_eq!(frame.index, i as u32);
                assert_eq!(frame.payload, payloads[i]);
                assert_eq!(frame.len(), payloads[i].len());
            }
        }
    }

    #[test]
    fn test_header_split_across_chunks() {
        let mut parser = FrameParser::default();
        parser.push(&[0, 0]);
        assert_eq!(parser.next_frame().unwrap(), None);
        parser.push(&[0, 2, 9]);
        assert_eq!(parser.next_frame().unwrap(), None);
        assert_eq!(parser.buffered_len(), 5);
        parser.push(&[9]);
        let frame = parser.next_frame().unwrap().unwrap();
        assert_eq!(frame.index, 0);
        assert_eq!(frame.payload, vec![9, 9]);
        assert_eq!(parser.buffered_len(), 0);
    }

    #[test]
    fn test_terminal_marker_ends_sequence() {
        let mut wire = encode_frames(&[vec![1, 2]]);
        wire.extend_from_slice(&[0, 0, 0, 3, 7, 7, 7]);

        let mut parser = FrameParser::default();
        parser.push(&wire);
        assert!(parser.next_frame().unwrap().is_some());
        assert_eq!(parser.next_frame().unwrap(), None);
        assert!(parser.is_terminated());

        parser.push(&[0, 0, 0, 1, 1]);
        assert_eq!(parser.next_frame().unwrap(), None);
        assert_eq!(parser.frames_emitted(), 1);
    }

    #[test]
    fn test_streaming_mode_header_skipped() {
        let mut wire = vec![0xFF, 0xFF, 0xFF, 0xFF];
        wire.extend(encode_frames(&[vec![4; 4], vec![5; 5]]));

        let frames = parse_all(&wire, 3);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].index, 0);
        assert_eq!(frames[1].payload, vec![5; 5]);
    }

    #[test]
    fn test_oversized_frame_is_protocol_error() {
        let mut parser = FrameParser::new(8);
        parser.push(&[0, 0, 0, 9]);
        match parser.next_frame() {
            Err(PlayerError::Protocol(msg)) => assert!(msg.contains("frame 0")),
            other => panic!("expected protocol error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reader_yields_frames_then_terminated() {
        let payloads = payloads();
        let chunks = rechunk(&encode_frames(&payloads), &[1, 2, 5, 64, 3]);
        let mut reader = FrameReader::new(byte_stream(chunks), DEFAULT_MAX_FRAME_BYTES);

        let mut indices = Vec::new();
        while let Some(frame) = reader.next_frame().await {
            indices.push(frame.index);
        }
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        assert_eq!(reader.end(), Some(&StreamEnd::Terminated));
        assert_eq!(reader.next_frame().await, None);
    }

    #[tokio::test]
    async fn test_reader_reports_truncation_mid_frame() {
        let mut wire = encode_frames(&[vec![1; 10]]);
        wire.truncate(wire.len() - 4); // drop the terminal marker
        wire.extend_from_slice(&[0, 0, 0, 50, 1, 2, 3]);

        let mut reader = FrameReader::new(byte_stream(vec![wire]), DEFAULT_MAX_FRAME_BYTES);
        assert!(reader.next_frame().await.is_some());
        assert_eq!(reader.next_frame().await, None);
        assert_eq!(reader.end(), Some(&StreamEnd::Truncated { buffered: 7 }));
        assert_eq!(reader.frames_read(), 1);
    }

    #[tokio::test]
    async fn test_reader_zero_frames() {
        let mut reader = FrameReader::new(
            byte_stream(vec![vec![0, 0, 0, 0]]),
            DEFAULT_MAX_FRAME_BYTES,
        );
        assert_eq!(reader.next_frame().await, None);
        assert_eq!(reader.end(), Some(&StreamEnd::Terminated));
        assert_eq!(reader.frames_read(), 0);
    }

    #[tokio::test]
    async fn test_reader_transport_error() {
        let stream = futures_util::stream::iter(vec![
            Ok(encode_frames(&[vec![1, 1]])[..6].to_vec()),
            Err(PlayerError::Network("connection reset".into())),
        ]);
        let mut reader = FrameReader::new(Box::pin(stream), DEFAULT_MAX_FRAME_BYTES);
        assert!(reader.next_frame().await.is_some());
        assert_eq!(reader.next_frame().await, None);
        assert_eq!(
            reader.end(),
            Some(&StreamEnd::Failed(PlayerError::Network("connection reset".into())))
        );
    }
}
