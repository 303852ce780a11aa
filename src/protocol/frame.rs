//! Length-prefixed framing for requests and responses.
//!
//! Both directions use the same header: a 4-byte big-endian `u32` holding the
//! payload length. Requests carry newline-joined arguments, responses carry a
//! JSON object.
//!
//! ```text
//! +----------------+------------------------------+
//! | len: u32 (BE)  | payload: len bytes (UTF-8)   |
//! +----------------+------------------------------+
//! ```
use log::trace;
use serde_json::{Map, Value};
use thiserror::Error;

/// Size of the length prefix on every frame.
pub const HEADER_SIZE: usize = size_of::<u32>();

/// Separator placed between request arguments.
pub const ARG_SEPARATOR: char = '\n';

/// Decoded response object.
pub type Response = Map<String, Value>;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("request payload of {0} bytes does not fit a frame header")]
    TooLarge(usize),

    #[error("malformed response payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Joins `args` with [`ARG_SEPARATOR`] and prepends the length header.
pub fn encode_request<S: AsRef<str>>(args: &[S]) -> Result<Vec<u8>, FrameError> {
    let payload_len = args.iter().map(|a| a.as_ref().len()).sum::<usize>()
        + args.len().saturating_sub(1);
    let len = u32::try_from(payload_len).map_err(|_| FrameError::TooLarge(payload_len))?;

    let mut frame = Vec::with_capacity(HEADER_SIZE + payload_len);
    frame.extend_from_slice(&len.to_be_bytes());
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            frame.push(ARG_SEPARATOR as u8);
        }
        frame.extend_from_slice(arg.as_ref().as_bytes());
    }
    Ok(frame)
}

/// Attempts to decode one response frame from the front of `buffer`.
///
/// Returns `Ok(None)` while the header or payload is still incomplete. On
/// success, returns the number of bytes the frame occupied (header included)
/// so the caller can trim its buffer.
pub fn try_decode_response(buffer: &[u8]) -> Result<Option<(usize, Response)>, FrameError> {
    let Some(header) = buffer.first_chunk::<HEADER_SIZE>() else {
        return Ok(None);
    };

    let payload_len = u32::from_be_bytes(*header) as usize;
    let available = buffer.len() - HEADER_SIZE;
    if available < payload_len {
        trace!("insufficient input, expecting {payload_len} bytes, have {available} bytes");
        return Ok(None);
    }

    let payload = &buffer[HEADER_SIZE..HEADER_SIZE + payload_len];
    let response: Response = serde_json::from_slice(payload)?;
    Ok(Some((HEADER_SIZE + payload_len, response)))
}
