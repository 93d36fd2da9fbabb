//! Codec for the Engine's multiplexed log stream
//!
//! When a container runs without a TTY, the Engine interleaves stdout and
//! stderr on one connection. Every frame starts with an 8-byte header:
//!
//! ```text
//! [stream, 0, 0, 0, len_3, len_2, len_1, len_0]
//! ```
//!
//! where `stream` is 0 (stdin), 1 (stdout) or 2 (stderr) and the length is a
//! big-endian `u32` counting the payload bytes that follow.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Size of a frame header in bytes
pub const HEADER_LEN: usize = 8;

/// Logical stream a frame belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdin,
    Stdout,
    Stderr,
}

impl StreamKind {
    fn from_selector(selector: u8) -> Option<Self> {
        match selector {
            0 => Some(StreamKind::Stdin),
            1 => Some(StreamKind::Stdout),
            2 => Some(StreamKind::Stderr),
            _ => None,
        }
    }

    fn selector(self) -> u8 {
        match self {
            StreamKind::Stdin => 0,
            StreamKind::Stdout => 1,
            StreamKind::Stderr => 2,
        }
    }
}

/// One decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFrame {
    pub stream: StreamKind,
    pub payload: Bytes,
}

impl LogFrame {
    pub fn new(stream: StreamKind, payload: impl Into<Bytes>) -> Self {
        Self {
            stream,
            payload: payload.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("unknown stream selector {0}")]
    UnknownStream(u8),

    #[error("stream ended inside a frame ({available} of {expected} bytes)")]
    Truncated { expected: usize, available: usize },

    #[error("frame payload of {0} bytes does not fit a frame header")]
    PayloadTooLarge(usize),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Decoder (and encoder) for framed log output
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFrameCodec;

impl Decoder for LogFrameCodec {
    type Item = LogFrame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<LogFrame>, FrameError> {
        if src.len() < HEADER_LEN {
            src.reserve(HEADER_LEN - src.len());
            return Ok(None);
        }

        let selector = src[0];
        let stream = StreamKind::from_selector(selector).ok_or(FrameError::UnknownStream(selector))?;
        let len = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;

        let frame_len = HEADER_LEN + len;
        // The length comes off the wire; don't reserve for it up front
        if src.len() < frame_len {
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(len).freeze();
        Ok(Some(LogFrame { stream, payload }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<LogFrame>, FrameError> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => {
                let expected = if src.len() < HEADER_LEN {
                    HEADER_LEN
                } else {
                    HEADER_LEN + u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize
                };
                Err(FrameError::Truncated {
                    expected,
                    available: src.len(),
                })
            }
        }
    }
}

impl Encoder<LogFrame> for LogFrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: LogFrame, dst: &mut BytesMut) -> Result<(), FrameError> {
        let len = u32::try_from(frame.payload.len())
            .map_err(|_| FrameError::PayloadTooLarge(frame.payload.len()))?;
        dst.reserve(HEADER_LEN + frame.payload.len());
        dst.put_u8(frame.stream.selector());
        dst.put_bytes(0, 3);
        dst.put_u32(len);
        dst.put_slice(&frame.payload);
        Ok(())
    }
}

/// Logical streams recovered from a framed log body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Demuxed {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl Demuxed {
    /// Bytes of one stream; stdin frames are echoed on stdout by the Engine
    pub fn stream(&self, kind: StreamKind) -> &[u8] {
        match kind {
            StreamKind::Stdin | StreamKind::Stdout => &self.stdout,
            StreamKind::Stderr => &self.stderr,
        }
    }

    pub fn into_stream(self, kind: StreamKind) -> Vec<u8> {
        match kind {
            StreamKind::Stdin | StreamKind::Stdout => self.stdout,
            StreamKind::Stderr => self.stderr,
        }
    }
}

/// Split a complete framed body into stdout and stderr
///
/// Payload bytes keep their original order within each stream regardless of
/// how frames of the two streams were interleaved.
pub fn demux(raw: &[u8]) -> Result<Demuxed, FrameError> {
    let mut codec = LogFrameCodec;
    let mut buf = BytesMut::from(raw);
    let mut out = Demuxed::default();

    while let Some(frame) = codec.decode_eof(&mut buf)? {
        match frame.stream {
            StreamKind::Stdin | StreamKind::Stdout => out.stdout.extend_from_slice(&frame.payload),
            StreamKind::Stderr => out.stderr.extend_from_slice(&frame.payload),
        }
    }

    Ok(out)
}

#[cfg(test)]
pub(crate) fn encode_frames(frames: impl IntoIterator<Item = LogFrame>) -> Vec<u8> {
    let mut codec = LogFrameCodec;
    let mut buf = BytesMut::new();
    for frame in frames {
        codec
            .encode(frame, &mut buf)
            .expect("test frames fit a header");
    }
    buf.to_vec()
}
