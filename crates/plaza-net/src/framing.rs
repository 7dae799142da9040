//! Length-prefixed framing for TCP streams.
//!
//! Every message on the wire is a length-prefixed frame:
//!
//! ```text
//! +-------------------+--------------------+
//! | length (4 bytes)  |   payload          |
//! | u32 little-endian |   (length bytes)   |
//! +-------------------+--------------------+
//! ```
//!
//! The length does **not** include the 4 prefix bytes themselves. A length
//! of 0 is a valid no-op frame. [`read_message`] and [`write_message`] layer
//! the versioned [`Message`] codec on top.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::messages::{Message, MessageError, deserialize_message, serialize_message};

/// Configuration for the framing layer.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum allowed payload size in bytes. Default: 1 MB.
    pub max_payload_size: u32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: 1_048_576,
        }
    }
}

/// Errors that can occur during framing operations.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload size exceeds the configured maximum.
    #[error("payload size {size} exceeds maximum {max}")]
    PayloadTooLarge {
        /// The actual payload size.
        size: u32,
        /// The configured maximum.
        max: u32,
    },

    /// The connection was closed before a complete frame was received.
    #[error("connection closed")]
    ConnectionClosed,

    /// The frame did not contain a valid message.
    #[error("bad message: {0}")]
    Message(#[from] MessageError),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn closed_on_eof(e: std::io::Error) -> FrameError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        FrameError::ConnectionClosed
    } else {
        FrameError::Io(e)
    }
}

fn check_size(len: u32, config: &FrameConfig) -> Result<(), FrameError> {
    if len > config.max_payload_size {
        Err(FrameError::PayloadTooLarge {
            size: len,
            max: config.max_payload_size,
        })
    } else {
        Ok(())
    }
}

/// Read one frame's payload.
///
/// A peer hanging up mid-frame is [`FrameError::ConnectionClosed`]. Not
/// cancel-safe: dropping the future loses a partially read frame.
pub async fn read_frame<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    config: &FrameConfig,
) -> Result<Vec<u8>, FrameError> {
    let len = reader.read_u32_le().await.map_err(closed_on_eof)?;
    check_size(len, config)?;

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await.map_err(closed_on_eof)?;
    Ok(payload)
}

/// Write `payload` as one frame and flush.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    payload: &[u8],
    config: &FrameConfig,
) -> Result<(), FrameError> {
    let len = u32::try_from(payload.len()).unwrap_or(u32::MAX);
    check_size(len, config)?;

    writer.write_u32_le(len).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame and decode it as a [`Message`]. Zero-length frames are
/// skipped.
pub async fn read_message<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    config: &FrameConfig,
) -> Result<Message, FrameError> {
    loop {
        let payload = read_frame(reader, config).await?;
        if !payload.is_empty() {
            return Ok(deserialize_message(&payload)?);
        }
    }
}

/// Encode `msg` and write it as one frame.
pub async fn write_message<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    msg: &Message,
    config: &FrameConfig,
) -> Result<(), FrameError> {
    let payload = serialize_message(msg)?;
    write_frame(writer, &payload, config).await
}
