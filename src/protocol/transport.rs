use std::io::{self, ErrorKind, Read, Write};

use log::trace;
use thiserror::Error;

use super::frame::{FrameError, Response, encode_request, try_decode_response};

/// Size of the scratch chunk handed to each `read` call.
const READ_CHUNK_SIZE: usize = 8 * 1024;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to encode request: {0}")]
    Encode(FrameError),
    #[error("{sent} bytes sent of {expected}")]
    ShortWrite { sent: usize, expected: usize },
    #[error("connection closed by server")]
    Closed,
    #[error("Transport IO Error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Whether this error was a clean end of stream rather than a failure.
    pub fn is_eof(&self) -> bool {
        matches!(self, TransportError::Closed)
    }

    /// Whether this error was a read deadline expiring.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Io(e)
            if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut))
    }
}

/// Error raised while waiting for a response.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Request/response exchange over a byte stream.
///
/// Inbound bytes are copied into an owned accumulation buffer; anything read
/// past the end of a response frame stays buffered for the next exchange.
#[derive(Debug)]
pub struct ProtocolTransport<T: Read + Write> {
    stream: T,
    inbound: Vec<u8>,
}

impl<T: Read + Write> ProtocolTransport<T> {
    pub fn new(stream: T) -> Self {
        Self {
            stream,
            inbound: Vec::new(),
        }
    }

    pub fn stream(&self) -> &T {
        &self.stream
    }

    pub fn into_inner(self) -> T {
        self.stream
    }

    /// Bytes received but not yet consumed by a decoded frame.
    pub fn buffered(&self) -> usize {
        self.inbound.len()
    }

    /// Writes one request frame with a single `write` call.
    pub fn write_request<S: AsRef<str>>(&mut self, args: &[S]) -> Result<(), TransportError> {
        let frame = encode_request(args).map_err(TransportError::Encode)?;

        let sent = self.stream.write(&frame)?;
        if sent != frame.len() {
            return Err(TransportError::ShortWrite {
                sent,
                expected: frame.len(),
            });
        }
        self.stream.flush()?;
        Ok(())
    }

    /// Reads until one complete response frame is buffered and decodes it.
    pub fn read_response(&mut self) -> Result<Response, ReadError> {
        loop {
            if let Some((consumed, response)) = try_decode_response(&self.inbound)? {
                self.inbound.drain(..consumed);
                return Ok(response);
            }

            let mut chunk = vec![0u8; READ_CHUNK_SIZE];
            let n = match self.stream.read(&mut chunk) {
                Ok(0) => return Err(TransportError::Closed.into()),
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(TransportError::Io(e).into()),
            };

            self.inbound.extend_from_slice(&chunk[..n]);
            trace!("received {n} bytes from server, {} buffered", self.inbound.len());
        }
    }
}
