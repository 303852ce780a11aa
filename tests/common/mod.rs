//! In-process stand-in for a TreeStore server.
//!
//! Each accepted connection is served on its own thread: requests are read
//! frame by frame and answered with whatever the test's handler returns.
#![allow(dead_code)]

use std::{
    io::{Read, Write},
    net::{TcpListener, TcpStream},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use serde_json::Value as JsonValue;
use treestore_client::{Client, Endpoint};

/// What the stub does with a request.
pub enum Reply {
    /// Answer with one framed JSON object.
    Json(JsonValue),
    /// Write these bytes verbatim.
    Raw(Vec<u8>),
    /// Write these bytes in pieces of the given size, flushing between them.
    Chunked(Vec<u8>, usize),
    /// Never answer; wait for the client to go away.
    Hang,
    /// Drop the connection without answering.
    Close,
}

type Handler = dyn Fn(&[String]) -> Reply + Send + Sync;

pub struct StubServer {
    port: u16,
    accepted: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<Vec<String>>>>,
}

impl StubServer {
    pub fn spawn<F>(handler: F) -> Self
    where
        F: Fn(&[String]) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handler: Arc<Handler> = Arc::new(handler);

        {
            let accepted = Arc::clone(&accepted);
            let requests = Arc::clone(&requests);
            thread::spawn(move || {
                for stream in listener.incoming() {
                    let Ok(stream) = stream else { break };
                    accepted.fetch_add(1, Ordering::SeqCst);

                    let handler = Arc::clone(&handler);
                    let requests = Arc::clone(&requests);
                    thread::spawn(move || serve(stream, handler, requests));
                }
            });
        }

        Self {
            port,
            accepted,
            requests,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new("127.0.0.1", self.port)
    }

    pub fn client(&self) -> Client {
        Client::with_endpoint(self.endpoint())
    }

    /// Connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<Vec<String>> {
        self.requests.lock().unwrap().clone()
    }
}

/// Frames a response payload.
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut bytes = (payload.len() as u32).to_be_bytes().to_vec();
    bytes.extend_from_slice(payload);
    bytes
}

pub fn json_frame(value: &JsonValue) -> Vec<u8> {
    frame(value.to_string().as_bytes())
}

fn read_request(stream: &mut TcpStream) -> Option<Vec<String>> {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).ok()?;

    let mut payload = vec![0u8; u32::from_be_bytes(header) as usize];
    stream.read_exact(&mut payload).ok()?;

    let text = String::from_utf8(payload).ok()?;
    Some(text.split('\n').map(str::to_string).collect())
}

fn serve(mut stream: TcpStream, handler: Arc<Handler>, requests: Arc<Mutex<Vec<Vec<String>>>>) {
    while let Some(args) = read_request(&mut stream) {
        requests.lock().unwrap().push(args.clone());

        let written = match handler(&args) {
            Reply::Json(value) => stream.write_all(&json_frame(&value)),
            Reply::Raw(bytes) => stream.write_all(&bytes),
            Reply::Chunked(bytes, size) => bytes.chunks(size).try_for_each(|chunk| {
                stream.write_all(chunk)?;
                stream.flush()?;
                thread::sleep(Duration::from_micros(200));
                Ok(())
            }),
            Reply::Hang => {
                let mut buf = [0u8; 64];
                while matches!(stream.read(&mut buf), Ok(n) if n > 0) {}
                return;
            }
            Reply::Close => return,
        };

        if written.is_err() {
            return;
        }
    }
}
