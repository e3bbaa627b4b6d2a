//! Delta push against an in-process HTTP responder.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use _cellscope_core::config::PushConfig;
use _cellscope_core::index::DeltaPusher;
use _cellscope_core::models::PushErrorKind;

/// Accepts exactly `max` connections, answering each with `status`.
struct Responder {
    endpoint: String,
    requests: Arc<Mutex<Vec<String>>>,
    handle: JoinHandle<()>,
}

impl Responder {
    fn start(status: u16, max: usize) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = format!("http://{}/update", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = requests.clone();
        let handle = std::thread::spawn(move || {
            for stream in listener.incoming().take(max) {
                let mut stream = stream.unwrap();
                seen.lock().push(read_request(&mut stream));
                let reply = format!(
                    "HTTP/1.1 {status} Status\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                );
                stream.write_all(reply.as_bytes()).unwrap();
                stream.flush().unwrap();
            }
        });
        Self {
            endpoint,
            requests,
            handle,
        }
    }

    fn finish(self) -> Vec<String> {
        self.handle.join().unwrap();
        Arc::try_unwrap(self.requests).unwrap().into_inner()
    }
}

fn read_request(stream: &mut TcpStream) -> String {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = stream.read(&mut buf).unwrap();
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        let text = String::from_utf8_lossy(&data).to_string();
        if let Some(end) = text.find("\r\n\r\n") {
            let length = text[..end]
                .lines()
                .find_map(|l| {
                    let lower = l.to_ascii_lowercase();
                    lower
                        .strip_prefix("content-length:")
                        .map(|v| v.trim().parse::<usize>().unwrap())
                })
                .unwrap_or(0);
            if data.len() >= end + 4 + length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&data).to_string()
}

fn config(endpoint: &str, retries: u32) -> PushConfig {
    PushConfig {
        endpoint: Some(endpoint.to_string()),
        retries: Some(retries),
        backoff_seconds: Some(0.01),
        timeout_seconds: Some(5.0),
        ..PushConfig::default()
    }
}

#[test]
fn test_retry_bound_against_503() {
    let server = Responder::start(503, 3);
    let result = DeltaPusher::default()
        .push("INSERT DATA { }", &config(&server.endpoint, 2))
        .unwrap();
    assert!(result.attempted);
    assert_eq!(result.attempts, 3);
    assert_eq!(result.status_code, Some(503));
    assert_eq!(result.error, Some(PushErrorKind::RetriesExhausted));
    assert_eq!(server.finish().len(), 3);
}

#[test]
fn test_401_short_circuits() {
    let server = Responder::start(401, 1);
    let started = std::time::Instant::now();
    let result = DeltaPusher::default()
        .push("INSERT DATA { }", &config(&server.endpoint, 4))
        .unwrap();
    assert_eq!(result.attempts, 1);
    assert_eq!(result.status_code, Some(401));
    assert_eq!(result.error, Some(PushErrorKind::ClientError));
    assert!(started.elapsed() < std::time::Duration::from_secs(5));
    assert_eq!(server.finish().len(), 1);
}

#[test]
fn test_429_is_not_retried() {
    let server = Responder::start(429, 1);
    let result = DeltaPusher::default()
        .push("INSERT DATA { }", &config(&server.endpoint, 3))
        .unwrap();
    assert_eq!(result.attempts, 1);
    assert_eq!(result.status_code, Some(429));
    assert_eq!(result.error, Some(PushErrorKind::ClientError));
    assert_eq!(server.finish().len(), 1);
}

#[test]
fn test_success_sends_update_with_credentials() {
    let server = Responder::start(204, 1);
    let mut cfg = config(&server.endpoint, 0);
    cfg.username = Some("alice".to_string());
    cfg.password = Some("secret".to_string());
    cfg.headers
        .insert("X-Request-Source".to_string(), "cellscope".to_string());
    let result = DeltaPusher::default()
        .push("INSERT DATA { <a> <b> <c> . }", &cfg)
        .unwrap();
    assert!(result.succeeded());
    assert_eq!(result.status_code, Some(204));

    let requests = server.finish();
    let request = requests[0].to_ascii_lowercase();
    assert!(request.starts_with("post /update"));
    assert!(request.contains("content-type: application/sparql-update"));
    // base64("alice:secret")
    assert!(request.contains("authorization: basic ywxpy2u6c2vjcmv0"));
    assert!(request.contains("x-request-source: cellscope"));
    assert!(requests[0].ends_with("INSERT DATA { <a> <b> <c> . }"));
}

#[test]
fn test_unreachable_endpoint_is_transient() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let endpoint = format!("http://127.0.0.1:{port}/update");
    let result = DeltaPusher::default()
        .push("INSERT DATA { }", &config(&endpoint, 1))
        .unwrap();
    assert_eq!(result.attempts, 2);
    assert_eq!(result.status_code, None);
    assert_eq!(result.error, Some(PushErrorKind::RetriesExhausted));
}
