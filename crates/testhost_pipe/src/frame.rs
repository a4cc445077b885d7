//! Length-prefixed framing.
//!
//! Wire layout of one frame:
//!
//! ```text
//! offset 0: i32 LE  total length = 4 + payload length
//! offset 4: i32 LE  serializer id
//! offset 8: payload
//! ```
//!
//! Reads arrive in arbitrary chunks. [`FrameDecoder`] accumulates them and only interprets bytes once a complete
//! frame is buffered, so partial reads never cause misalignment.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{PipeError, PipeResult};

/// Size of the length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Size of the serializer id.
pub const SERIALIZER_ID_SIZE: usize = 4;

/// Largest accepted value of the length prefix. A larger prefix is treated as corruption rather than buffered.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Size of the scratch buffer used for each socket read. Messages larger than this span several reads.
pub const READ_BUFFER_SIZE: usize = 250_000;

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub serializer_id: i32,
    pub payload: Vec<u8>,
}

/// Encode a frame into its wire bytes.
pub fn encode_frame(serializer_id: i32, payload: &[u8]) -> PipeResult<Vec<u8>> {
    let total_length = Some(SERIALIZER_ID_SIZE + payload.len())
        .filter(|len| *len <= MAX_FRAME_LEN)
        .and_then(|len| i32::try_from(len).ok())
        .ok_or_else(|| PipeError::MalformedFrame(format!("payload of {} bytes is too large", payload.len())))?;

    let mut bytes = Vec::with_capacity(LENGTH_PREFIX_SIZE + SERIALIZER_ID_SIZE + payload.len());
    bytes.extend_from_slice(&total_length.to_le_bytes());
    bytes.extend_from_slice(&serializer_id.to_le_bytes());
    bytes.extend_from_slice(payload);
    Ok(bytes)
}

/// Write one frame and flush it.
pub async fn write_frame<W>(writer: &mut W, serializer_id: i32, payload: &[u8]) -> PipeResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let bytes = encode_frame(serializer_id, payload)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Accumulates chunked reads into complete frames.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes received from the stream.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Bytes buffered but not yet consumed by a complete frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Pop the next complete frame, if one is fully buffered.
    pub fn next_frame(&mut self) -> PipeResult<Option<Frame>> {
        let Some(prefix) = self.buffer.get(..LENGTH_PREFIX_SIZE) else {
            return Ok(None);
        };
        let total_length = i32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
        let total_length = usize::try_from(total_length)
            .ok()
            .filter(|len| (SERIALIZER_ID_SIZE..=MAX_FRAME_LEN).contains(len))
            .ok_or_else(|| PipeError::MalformedFrame(format!("invalid total length {}", total_length)))?;

        let frame_end = LENGTH_PREFIX_SIZE + total_length;
        if self.buffer.len() < frame_end {
            return Ok(None);
        }

        let id_bytes = &self.buffer[LENGTH_PREFIX_SIZE..LENGTH_PREFIX_SIZE + SERIALIZER_ID_SIZE];
        let serializer_id = i32::from_le_bytes([id_bytes[0], id_bytes[1], id_bytes[2], id_bytes[3]]);
        let payload = self.buffer[LENGTH_PREFIX_SIZE + SERIALIZER_ID_SIZE..frame_end].to_vec();
        self.buffer.drain(..frame_end);

        Ok(Some(Frame { serializer_id, payload }))
    }
}

/// Read until one complete frame is available.
///
/// Returns `Ok(None)` when the peer closed the stream on a frame boundary. A close in the middle of a frame is a
/// [`PipeError::ConnectionClosed`].
pub async fn read_frame<R>(reader: &mut R, decoder: &mut FrameDecoder, scratch: &mut [u8]) -> PipeResult<Option<Frame>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    loop {
        if let Some(frame) = decoder.next_frame()? {
            return Ok(Some(frame));
        }

        let read = reader.read(scratch).await?;
        if read == 0 {
            if decoder.is_empty() {
                return Ok(None);
            }
            return Err(PipeError::ConnectionClosed);
        }
        decoder.push(&scratch[..read]);
    }
}
