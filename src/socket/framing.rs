//! Wire protocol codec for the session socket.
//!
//! One logical message per frame:
//!
//! ```text
//! [u32 BE length] [payload: length bytes of JSON]
//! ```
//!
//! The length never counts the header itself. Payloads carry no type tag;
//! see [`super::messages::Request::from_frame`] for how a receiver tells the
//! request shapes apart.

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::IpcError;

/// Size of the length header.
pub const HEADER_LEN: usize = 4;

/// Maximum frame payload size (16 MB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Serialize `value` to JSON and prepend its big-endian length.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, IpcError> {
    let payload = serde_json::to_vec(value).map_err(IpcError::Encode)?;
    encode_raw(&payload)
}

/// Frame an already-serialized payload.
pub fn encode_raw(payload: &[u8]) -> Result<Vec<u8>, IpcError> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(IpcError::FrameTooLarge {
            length: payload.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    let length = payload.len() as u32;
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.extend_from_slice(&length.to_be_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Deserialize a payload (no length header) into `T`.
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, IpcError> {
    serde_json::from_slice(payload).map_err(IpcError::Decode)
}

/// Parse a length header, enforcing [`MAX_FRAME_SIZE`].
pub fn parse_header(header: [u8; HEADER_LEN]) -> Result<usize, IpcError> {
    let length = u32::from_be_bytes(header) as usize;
    if length > MAX_FRAME_SIZE {
        return Err(IpcError::FrameTooLarge {
            length,
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(length)
}

/// Incremental frame accumulator that handles partial reads.
///
/// Feed bytes via [`FrameAccumulator::feed`] and collect complete payloads.
/// Chunk boundaries may fall anywhere: inside the header, inside the
/// payload, or exactly between frames.
#[derive(Debug, Default)]
pub struct FrameAccumulator {
    buf: Vec<u8>,
}

impl FrameAccumulator {
    /// Create an accumulator with an empty buffer.
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Append `chunk` and peel off every complete frame now buffered.
    ///
    /// Returns the payloads in arrival order. Any trailing partial frame is
    /// kept for the next call.
    ///
    /// # Errors
    ///
    /// Returns [`IpcError::FrameTooLarge`] if a header exceeds the size limit.
    /// The buffer is left untouched in that case; the stream is unusable.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Vec<u8>>, IpcError> {
        self.buf.extend_from_slice(chunk);
        let mut payloads = Vec::new();

        loop {
            if self.buf.len() < HEADER_LEN {
                break;
            }

            let header = [self.buf[0], self.buf[1], self.buf[2], self.buf[3]];
            let length = parse_header(header)?;

            let total = HEADER_LEN + length;
            if self.buf.len() < total {
                break; // Incomplete frame, wait for more data
            }

            payloads.push(self.buf[HEADER_LEN..total].to_vec());
            self.buf.drain(..total);
        }

        Ok(payloads)
    }

    /// Returns true if a partial frame is buffered.
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }
}
