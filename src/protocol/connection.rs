use std::{
    fmt,
    io,
    net::{Shutdown, TcpStream},
    str::FromStr,
    time::Duration,
};

use log::{debug, error};
use thiserror::Error;

use super::ProtocolTransport;

/// Host used when none is configured.
pub const DEFAULT_HOST: &str = "localhost";
/// Port the TreeStore server listens on by default.
pub const DEFAULT_PORT: u16 = 6770;
/// Deadline applied to every socket read.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Error)]
#[error("can't connect to {endpoint}: {source}")]
pub struct ConnectError {
    pub endpoint: Endpoint,
    #[source]
    pub source: io::Error,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EndpointParseError {
    #[error("endpoint '{0}' is missing a ':port' suffix")]
    MissingPort(String),
    #[error("invalid port in endpoint '{0}'")]
    InvalidPort(String),
}

/// Address of a TreeStore server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = EndpointParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| EndpointParseError::MissingPort(s.to_string()))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| EndpointParseError::InvalidPort(s.to_string()))?;
        Ok(Self::new(host, port))
    }
}

/// Owner of the single socket behind a client.
///
/// The connection is opened lazily by [`Connection::ensure_connected`] and
/// dropped by [`Connection::report_failure`] or [`Connection::disconnect`];
/// the next call reconnects. Callers are expected to hold the client's call
/// lock for every method here.
#[derive(Debug)]
pub struct Connection {
    endpoint: Endpoint,
    read_timeout: Duration,
    transport: Option<ProtocolTransport<TcpStream>>,
}

impl Connection {
    pub fn new(endpoint: Endpoint, read_timeout: Duration) -> Self {
        Self {
            endpoint,
            read_timeout,
            transport: None,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Deadline for each read on connections opened from now on. Zero disables
    /// the deadline.
    pub fn set_read_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// Returns the live transport, connecting first if there is none.
    pub fn ensure_connected(&mut self) -> Result<&mut ProtocolTransport<TcpStream>, ConnectError> {
        let transport = match self.transport.take() {
            Some(transport) => transport,
            None => {
                let stream = self.open().map_err(|source| {
                    error!("can't connect to {}: {source}", self.endpoint);
                    ConnectError {
                        endpoint: self.endpoint.clone(),
                        source,
                    }
                })?;
                debug!("connected to {}", self.endpoint);
                ProtocolTransport::new(stream)
            }
        };
        Ok(self.transport.insert(transport))
    }

    fn open(&self) -> io::Result<TcpStream> {
        let stream = TcpStream::connect((self.endpoint.host.as_str(), self.endpoint.port))?;
        // A zero deadline is rejected by the socket; treat it as "no deadline".
        let deadline = Some(self.read_timeout).filter(|timeout| !timeout.is_zero());
        stream.set_read_timeout(deadline)?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    /// Tears down the socket after a failed exchange.
    pub fn report_failure(&mut self) {
        if let Some(transport) = self.transport.take() {
            debug!("dropping failed connection to {}", self.endpoint);
            let _ = transport.stream().shutdown(Shutdown::Both);
        }
    }

    /// Closes the socket, if any. Idempotent.
    pub fn disconnect(&mut self) {
        if let Some(transport) = self.transport.take() {
            debug!("closing connection to {}", self.endpoint);
            let _ = transport.stream().shutdown(Shutdown::Both);
        }
    }

    /// Points the connection at a new server, closing the current socket.
    pub fn set_endpoint(&mut self, endpoint: Endpoint) {
        self.disconnect();
        debug!("endpoint set to {endpoint}");
        self.endpoint = endpoint;
    }
}
