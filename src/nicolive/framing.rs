//! Frame codec for the live comment socket.
//!
//! The comment server speaks a text stream where every message ends with
//! a single NUL byte:
//!
//! ```text
//! <thread thread="1" ... />\0<chat no="1" ...>hi</chat>\0
//! ```
//!
//! The payload (XML) is opaque at this layer; [`FrameDecoder`] only cuts
//! the stream at the delimiter and strips it.

use super::error::NicoError;
use crate::constants::{FRAME_DELIMITER, MAX_FRAME_SIZE};

/// Encode one outgoing payload as a frame (payload + delimiter).
pub fn encode_frame(payload: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(payload.len() + 1);
    buf.extend_from_slice(payload.as_bytes());
    buf.push(FRAME_DELIMITER);
    buf
}

/// Incremental frame decoder that handles partial reads.
///
/// Feed bytes via [`FrameDecoder::feed`] and extract complete frames.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    /// Create a new decoder with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes into the decoder and extract every complete frame.
    ///
    /// Incomplete data is buffered for the next call. Frames that are not
    /// valid UTF-8 are decoded lossily; the server only sends text.
    ///
    /// # Errors
    ///
    /// Returns [`NicoError::Protocol`] if the buffered partial frame
    /// grows beyond [`MAX_FRAME_SIZE`]. The buffer is cleared so the
    /// decoder can resynchronize on the next delimiter.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<String>, NicoError> {
        self.buf.extend_from_slice(bytes);
        let mut frames = Vec::new();

        while let Some(end) = self.buf.iter().position(|b| *b == FRAME_DELIMITER) {
            let frame: Vec<u8> = self.buf.drain(..=end).collect();
            let payload = frame.get(..end).unwrap_or_default();
            frames.push(String::from_utf8_lossy(payload).into_owned());
        }

        if self.buf.len() > MAX_FRAME_SIZE {
            let len = self.buf.len();
            self.buf.clear();
            return Err(NicoError::Protocol(format!(
                "frame too large: {len} bytes without delimiter (max {MAX_FRAME_SIZE})"
            )));
        }

        Ok(frames)
    }

    /// Returns true if the decoder has buffered partial data.
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }
}
