//! Synchronous TreeStore client.
//!
//! [`Client`] owns one TCP connection and serializes every command over it: a
//! call takes the call lock, writes its request frame and holds the lock until
//! the matching response frame is decoded. The client is `Send + Sync`, so it
//! can be shared between threads behind an `Arc`; concurrent callers queue on
//! the lock in FIFO order.
//!
//! # Failure handling
//!
//! Write failures, read failures, read timeouts and undecodable responses drop
//! the connection; the next call reconnects. The failed call is never retried.
//! A response carrying an `"error"` string is returned as
//! [`ClientError::Application`] and leaves the connection open.
//!
//! # Example
//! ```no_run
//! use treestore_client::Client;
//!
//! let client = Client::new();
//! client.set_server("localhost", 6770);
//!
//! let response = client.raw_command(&["setk", "/users/ada"]).unwrap();
//! println!("{}", response["address"]);
//!
//! client.close();
//! ```
use std::{
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use log::{debug, error, warn};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::{
    protocol::{
        ConnectError, Connection, Endpoint, FrameError, ReadError, Response, TransportError,
        DEFAULT_READ_TIMEOUT,
    },
    value::ValueError,
};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("invalid request: {0}")]
    Request(FrameError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("bad response: {0}")]
    MalformedResponse(#[from] FrameError),

    #[error("{0}")]
    Application(String),

    #[error(transparent)]
    Value(#[from] ValueError),

    #[error("response field '{field}' is missing or has the wrong type")]
    UnexpectedResponse { field: String },
}

impl ClientError {
    /// Whether this error tore down the connection.
    pub fn closed_connection(&self) -> bool {
        matches!(
            self,
            ClientError::Connect(_) | ClientError::Transport(_) | ClientError::MalformedResponse(_)
        )
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Number of calls that have entered [`Client::raw_command`] and not yet
/// returned. Kept outside the call lock so close can wait on it.
#[derive(Debug, Default)]
struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl InFlight {
    fn enter(&self) -> InFlightGuard<'_> {
        *lock(&self.count) += 1;
        InFlightGuard { in_flight: self }
    }

    fn current(&self) -> usize {
        *lock(&self.count)
    }

    /// Blocks until no call is in flight.
    fn wait_idle(&self) {
        let count = lock(&self.count);
        let _idle = self
            .idle
            .wait_while(count, |count| *count > 0)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

struct InFlightGuard<'a> {
    in_flight: &'a InFlight,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut count = lock(&self.in_flight.count);
        *count -= 1;
        if *count == 0 {
            self.in_flight.idle.notify_all();
        }
    }
}

#[derive(Debug)]
pub struct Client {
    conn: Mutex<Connection>,
    in_flight: InFlight,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    /// Creates a client for the default endpoint, `localhost:6770`.
    ///
    /// No connection is made until the first command.
    pub fn new() -> Self {
        Self::with_endpoint(Endpoint::default())
    }

    pub fn with_endpoint(endpoint: Endpoint) -> Self {
        Self {
            conn: Mutex::new(Connection::new(endpoint, DEFAULT_READ_TIMEOUT)),
            in_flight: InFlight::default(),
        }
    }

    /// Overrides the per-read deadline (20 seconds by default). Zero disables
    /// the deadline.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.conn
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .set_read_timeout(timeout);
        self
    }

    pub fn endpoint(&self) -> Endpoint {
        lock(&self.conn).endpoint().clone()
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.conn).is_connected()
    }

    /// Number of calls currently waiting for or using the connection.
    pub fn in_flight(&self) -> usize {
        self.in_flight.current()
    }

    /// Points the client at another server.
    ///
    /// Waits for in-flight calls to finish before the current connection is
    /// closed; the next call connects to the new endpoint.
    pub fn set_server(&self, host: &str, port: u16) {
        self.in_flight.wait_idle();
        lock(&self.conn).set_endpoint(Endpoint::new(host, port));
    }

    /// Closes the connection once in-flight calls have finished.
    ///
    /// Safe to call repeatedly. A later call reconnects.
    pub fn close(&self) {
        self.in_flight.wait_idle();
        lock(&self.conn).disconnect();
    }

    /// Sends one command and returns the decoded response object.
    ///
    /// `args` are transported verbatim, joined by newlines; any argument that
    /// may contain control characters must be escaped with
    /// [`escape`](crate::value::escape) first.
    pub fn raw_command<S: AsRef<str>>(&self, args: &[S]) -> Result<Response, ClientError> {
        let _in_flight = self.in_flight.enter();

        let response = {
            let mut conn = lock(&self.conn);
            exchange(&mut conn, args)?
        };

        if let Some(JsonValue::String(message)) = response.get("error") {
            debug!("server rejected command: {message}");
            return Err(ClientError::Application(message.clone()));
        }
        Ok(response)
    }
}

/// One request/response round trip. Must be called with the call lock held.
fn exchange<S: AsRef<str>>(conn: &mut Connection, args: &[S]) -> Result<Response, ClientError> {
    let transport = conn.ensure_connected()?;

    match transport.write_request(args) {
        Ok(()) => {}
        Err(TransportError::Encode(e)) => return Err(ClientError::Request(e)),
        Err(e) => {
            warn!("failed to write request to {}: {e}", conn.endpoint());
            conn.report_failure();
            return Err(e.into());
        }
    }

    match transport.read_response() {
        Ok(response) => Ok(response),
        Err(ReadError::Transport(e)) => {
            if e.is_eof() {
                debug!("{} closed the connection", conn.endpoint());
            } else {
                warn!("read error from {}: {e}", conn.endpoint());
            }
            conn.report_failure();
            Err(e.into())
        }
        Err(ReadError::Frame(e)) => {
            error!("bad response from {}: {e}", conn.endpoint());
            conn.report_failure();
            Err(ClientError::MalformedResponse(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        panic::{self, AssertUnwindSafe},
        sync::atomic::{AtomicBool, Ordering},
        thread,
    };

    use super::*;

    #[test]
    fn in_flight_guard_releases_on_panic() {
        let in_flight = InFlight::default();

        let res = panic::catch_unwind(AssertUnwindSafe(|| {
            let _guard = in_flight.enter();
            assert_eq!(in_flight.current(), 1);
            panic!("call failed mid-flight");
        }));

        assert!(res.is_err());
        assert_eq!(in_flight.current(), 0);
        in_flight.wait_idle();
    }

    #[test]
    fn wait_idle_blocks_until_calls_finish() {
        let in_flight = InFlight::default();
        let released = AtomicBool::new(false);

        thread::scope(|s| {
            let guard = in_flight.enter();
            let waiter = s.spawn(|| {
                in_flight.wait_idle();
                assert!(released.load(Ordering::SeqCst));
            });

            thread::sleep(Duration::from_millis(50));
            assert!(!waiter.is_finished());

            released.store(true, Ordering::SeqCst);
            drop(guard);
            waiter.join().unwrap();
        });
    }

    #[test]
    fn close_without_connection_is_noop() {
        let client = Client::with_endpoint(Endpoint::new("127.0.0.1", 1));
        client.close();
        client.close();
        assert!(!client.is_connected());
        assert_eq!(client.in_flight(), 0);
    }

    #[test]
    fn set_server_updates_endpoint() {
        let client = Client::new();
        assert_eq!(client.endpoint(), Endpoint::default());

        client.set_server("10.0.0.2", 6771);
        assert_eq!(client.endpoint(), Endpoint::new("10.0.0.2", 6771));
    }

    #[test]
    fn error_display() {
        let err = ClientError::Application("key not found".to_string());
        assert_eq!(err.to_string(), "key not found");
        assert!(!err.closed_connection());

        let err = ClientError::Transport(TransportError::Closed);
        assert_eq!(err.to_string(), "transport error: connection closed by server");
        assert!(err.closed_connection());
    }
}
