//! Client-server communication protocol.
//!
//! This module defines how a TreeStore client talks to the server: the frame
//! format, a transport that exchanges frames over any byte stream, and the
//! connection that owns the TCP socket.
//!
//! # Overview
//!
//! The protocol is strictly request/response. A request is a list of string
//! arguments, the first being the command verb; the server answers each request
//! with exactly one JSON object. There is no request tagging, so at most one
//! request may be outstanding on a connection.
//!
//! # Key Components
//!
//! - [`frame`]: Pure encode/decode of length-prefixed frames.
//! - [`ProtocolTransport`]: Frame exchange over a `Read + Write` stream, with
//!   reassembly of responses split across reads.
//! - [`Connection`]: Lazily connected TCP socket with failure teardown.
//!
//! # Binary Format
//!
//! - Every frame starts with a 4-byte big-endian payload length.
//! - Request payloads are the arguments joined by `\n`, with no terminator.
//! - Response payloads are UTF-8 JSON objects. A string `"error"` member means
//!   the server rejected the command.
//!
//! Several response frames can arrive in one read; they are split by their
//! length prefix, never by scanning for delimiters.
//!
//! # See Also
//!
//! - [`value`](crate::value): Escaping of binary values carried in arguments
//!   and response fields.
pub mod frame;

mod connection;
mod transport;

pub use connection::{
    ConnectError, Connection, DEFAULT_HOST, DEFAULT_PORT, DEFAULT_READ_TIMEOUT, Endpoint,
    EndpointParseError,
};
pub use frame::{FrameError, Response};
pub use transport::{ProtocolTransport, ReadError, TransportError};
