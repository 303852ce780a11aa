mod common;

use std::{
    net::TcpListener,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
        mpsc,
    },
    thread,
    time::Duration,
};

use common::{Reply, StubServer, frame, json_frame};
use serde_json::json;
use treestore_client::{Client, ClientError, Endpoint};

fn echo_server() -> StubServer {
    StubServer::spawn(|args| Reply::Json(json!({ "verb": args[0], "args": &args[1..] })))
}

#[test]
fn raw_command_round_trip() {
    let server = echo_server();
    let client = server.client();

    let response = client.raw_command(&["setk", "/users/ada"]).unwrap();
    assert_eq!(response["verb"], json!("setk"));
    assert_eq!(response["args"], json!(["/users/ada"]));

    assert_eq!(server.requests(), vec![vec!["setk", "/users/ada"]]);
    assert!(client.is_connected());
}

#[test]
fn connection_is_reused_between_calls() {
    let server = echo_server();
    let client = server.client();

    for _ in 0..5 {
        client.raw_command(&["getk", "/a"]).unwrap();
    }

    assert_eq!(server.accepted(), 1);
    assert_eq!(server.requests().len(), 5);
}

#[test]
fn concurrent_callers_get_their_own_responses() {
    let server = StubServer::spawn(|args| Reply::Json(json!({ "token": args.get(1) })));
    let client = Arc::new(server.client());

    let handles: Vec<_> = (0..12)
        .map(|t| {
            let client = Arc::clone(&client);
            thread::spawn(move || {
                for i in 0..20 {
                    let token = format!("{t}-{i}");
                    let response = client.raw_command(&["echo", token.as_str()]).unwrap();
                    assert_eq!(response["token"], json!(token));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(server.requests().len(), 240);
    assert_eq!(server.accepted(), 1);
    assert_eq!(client.in_flight(), 0);
}

#[test]
fn application_error_keeps_connection() {
    let server = StubServer::spawn(|args| match args[0].as_str() {
        "getk" => Reply::Json(json!({ "error": "key not found" })),
        _ => Reply::Json(json!({ "ok": true })),
    });
    let client = server.client();

    let err = client.raw_command(&["getk", "/missing"]).unwrap_err();
    assert!(matches!(&err, ClientError::Application(m) if m == "key not found"));
    assert_eq!(err.to_string(), "key not found");
    assert!(!err.closed_connection());
    assert!(client.is_connected());

    client.raw_command(&["ping"]).unwrap();
    assert_eq!(server.accepted(), 1);
}

#[test]
fn non_string_error_field_is_not_an_error() {
    let server = StubServer::spawn(|_| Reply::Json(json!({ "error": 3 })));
    let client = server.client();

    let response = client.raw_command(&["ping"]).unwrap();
    assert_eq!(response["error"], json!(3));
}

#[test]
fn malformed_response_forces_reconnect() {
    let calls = AtomicUsize::new(0);
    let server = StubServer::spawn(move |_| {
        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Reply::Raw(frame(b"{not json"))
        } else {
            Reply::Json(json!({ "ok": true }))
        }
    });
    let client = server.client();

    let err = client.raw_command(&["getk", "/a"]).unwrap_err();
    assert!(matches!(err, ClientError::MalformedResponse(_)));
    assert!(!client.is_connected());

    let response = client.raw_command(&["getk", "/a"]).unwrap();
    assert_eq!(response["ok"], json!(true));
    assert_eq!(server.accepted(), 2);
}

#[test]
fn byte_at_a_time_response() {
    let payload = json!({ "address": 42, "exists": true });
    let server = StubServer::spawn(move |_| Reply::Chunked(json_frame(&payload), 1));
    let client = server.client();

    let response = client.raw_command(&["setk", "/a"]).unwrap();
    assert_eq!(response["address"], json!(42));
    assert_eq!(response["exists"], json!(true));
}

#[test]
fn concatenated_frames_are_decoded_in_order() {
    let calls = AtomicUsize::new(0);
    let server = StubServer::spawn(move |_| match calls.fetch_add(1, Ordering::SeqCst) {
        0 => {
            let mut bytes = json_frame(&json!({ "n": 1 }));
            bytes.extend(json_frame(&json!({ "n": 2 })));
            Reply::Raw(bytes)
        }
        n => Reply::Json(json!({ "n": n + 2 })),
    });
    let client = server.client();

    let first = client.raw_command(&["a"]).unwrap();
    let second = client.raw_command(&["b"]).unwrap();
    let third = client.raw_command(&["c"]).unwrap();

    assert_eq!(first["n"], json!(1));
    assert_eq!(second["n"], json!(2));
    assert_eq!(third["n"], json!(3));
}

#[test]
fn server_closing_connection_is_a_transport_error() {
    let calls = AtomicUsize::new(0);
    let server = StubServer::spawn(move |_| {
        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Reply::Close
        } else {
            Reply::Json(json!({ "ok": true }))
        }
    });
    let client = server.client();

    let err = client.raw_command(&["getk", "/a"]).unwrap_err();
    assert!(matches!(&err, ClientError::Transport(e) if e.is_eof()));
    assert!(err.closed_connection());
    assert!(!client.is_connected());

    client.raw_command(&["getk", "/a"]).unwrap();
    assert_eq!(server.accepted(), 2);
}

#[test]
fn read_timeout_tears_down_connection() {
    let server = StubServer::spawn(|args| match args[0].as_str() {
        "hang" => Reply::Hang,
        _ => Reply::Json(json!({ "ok": true })),
    });
    let client = server.client().with_read_timeout(Duration::from_millis(200));

    let err = client.raw_command(&["hang"]).unwrap_err();
    assert!(matches!(&err, ClientError::Transport(e) if e.is_timeout()));
    assert!(!client.is_connected());

    client.raw_command(&["ping"]).unwrap();
    assert_eq!(server.accepted(), 2);
}

#[test]
fn connect_error_names_endpoint() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let client = Client::with_endpoint(Endpoint::new("127.0.0.1", port));

    let err = client.raw_command(&["getk", "/a"]).unwrap_err();
    assert!(matches!(err, ClientError::Connect(_)));

    let message = err.to_string();
    assert!(message.contains(&format!("127.0.0.1:{port}")), "{message}");
    assert!(!client.is_connected());
}

#[test]
fn close_waits_for_in_flight_call() {
    let (seen_tx, seen_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let release_rx = Mutex::new(release_rx);

    let server = StubServer::spawn(move |args| {
        if args[0] == "slow" {
            seen_tx.send(()).unwrap();
            release_rx.lock().unwrap().recv().unwrap();
        }
        Reply::Json(json!({ "ok": true }))
    });
    let client = Arc::new(server.client());

    let caller = {
        let client = Arc::clone(&client);
        thread::spawn(move || client.raw_command(&["slow"]))
    };
    seen_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(client.in_flight(), 1);

    let closed = Arc::new(AtomicBool::new(false));
    let closer = {
        let client = Arc::clone(&client);
        let closed = Arc::clone(&closed);
        thread::spawn(move || {
            client.close();
            closed.store(true, Ordering::SeqCst);
        })
    };

    thread::sleep(Duration::from_millis(100));
    assert!(!closed.load(Ordering::SeqCst));

    release_tx.send(()).unwrap();
    let response = caller.join().unwrap().unwrap();
    assert_eq!(response["ok"], json!(true));

    closer.join().unwrap();
    assert!(closed.load(Ordering::SeqCst));
    assert!(!client.is_connected());

    client.raw_command(&["ping"]).unwrap();
    assert_eq!(server.accepted(), 2);
}

#[test]
fn close_is_idempotent() {
    let server = echo_server();
    let client = server.client();

    client.close();
    client.raw_command(&["ping"]).unwrap();
    client.close();
    client.close();

    assert!(!client.is_connected());
    assert_eq!(client.in_flight(), 0);
}

#[test]
fn set_server_switches_endpoint() {
    let first = echo_server();
    let second = echo_server();
    let client = first.client();

    client.raw_command(&["ping"]).unwrap();
    client.set_server("127.0.0.1", second.port());
    assert_eq!(client.endpoint(), second.endpoint());
    assert!(!client.is_connected());

    client.raw_command(&["ping"]).unwrap();

    assert_eq!(first.requests().len(), 1);
    assert_eq!(second.requests().len(), 1);
}

#[test]
fn set_server_waits_for_in_flight_call() {
    let (seen_tx, seen_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let release_rx = Mutex::new(release_rx);

    let first = StubServer::spawn(move |args| {
        if args[0] == "slow" {
            seen_tx.send(()).unwrap();
            release_rx.lock().unwrap().recv().unwrap();
        }
        Reply::Json(json!({ "server": "first" }))
    });
    let second = StubServer::spawn(|_| Reply::Json(json!({ "server": "second" })));
    let client = Arc::new(first.client());

    let caller = {
        let client = Arc::clone(&client);
        thread::spawn(move || client.raw_command(&["slow"]))
    };
    seen_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    let switched = Arc::new(AtomicBool::new(false));
    let switcher = {
        let client = Arc::clone(&client);
        let switched = Arc::clone(&switched);
        let port = second.port();
        thread::spawn(move || {
            client.set_server("127.0.0.1", port);
            switched.store(true, Ordering::SeqCst);
        })
    };

    thread::sleep(Duration::from_millis(100));
    assert!(!switched.load(Ordering::SeqCst));

    release_tx.send(()).unwrap();
    let response = caller.join().unwrap().unwrap();
    assert_eq!(response["server"], json!("first"));

    switcher.join().unwrap();
    assert!(switched.load(Ordering::SeqCst));
    assert_eq!(client.endpoint(), second.endpoint());

    let response = client.raw_command(&["ping"]).unwrap();
    assert_eq!(response["server"], json!("second"));
    assert_eq!(first.requests().len(), 1);
}
