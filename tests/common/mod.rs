//! Shared test fixture: a tiny raw-HTTP stand-in for a forward proxy.
//!
//! `reqwest` configured with `Proxy::all("http://host:port")` sends plain
//! `GET <absolute-uri> HTTP/1.1` request lines straight to the proxy's TCP
//! endpoint for `http://` targets (no `CONNECT` tunnel needed). That means a
//! bare listener that reads a request line and replies with a canned status
//! and body, keyed by the absolute-URI it was asked for, is enough to stand
//! in for both a proxy's self-test endpoint and whatever URL a test fetches
//! through it.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Clone)]
pub enum Canned {
    /// Respond with this status and body.
    Reply(u16, Vec<u8>),
    /// Drop the connection without writing anything back, simulating a
    /// transport-level failure against this proxy.
    Reset,
}

/// Per-target response queue: each hit consumes the front entry; once
/// exhausted, the last entry repeats forever. Lets a single target (e.g. the
/// proxy self-test URL) behave differently across a worker's first and
/// second self-test without tracking any extra state in the test itself.
struct Script {
    remaining: VecDeque<Canned>,
}

pub struct MockProxy {
    pub addr: std::net::SocketAddr,
    pub hits: Arc<Mutex<HashMap<String, u32>>>,
}

impl MockProxy {
    pub fn hit_count(&self, target: &str) -> u32 {
        *self.hits.lock().unwrap().get(target).unwrap_or(&0)
    }
}

/// Starts a background accept loop keyed by request-target string. Each
/// target maps to a sequence of responses consumed in order (one per hit);
/// an unlisted target gets a 404.
pub async fn start_mock_proxy_sequenced(responses: HashMap<String, Vec<Canned>>) -> MockProxy {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(Mutex::new(HashMap::new()));
    let hits_for_loop = Arc::clone(&hits);

    let scripts: HashMap<String, Mutex<Script>> = responses
        .into_iter()
        .map(|(k, v)| (k, Mutex::new(Script { remaining: v.into() })))
        .collect();
    let scripts = Arc::new(scripts);

    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => break,
            };
            let scripts = Arc::clone(&scripts);
            let hits = Arc::clone(&hits_for_loop);
            tokio::spawn(handle_connection(stream, scripts, hits));
        }
    });

    MockProxy { addr, hits }
}

/// Convenience wrapper for the common case: one fixed response per target
/// for the lifetime of the mock.
pub async fn start_mock_proxy(responses: HashMap<String, Canned>) -> MockProxy {
    start_mock_proxy_sequenced(responses.into_iter().map(|(k, v)| (k, vec![v])).collect()).await
}

async fn handle_connection(
    mut stream: TcpStream,
    scripts: Arc<HashMap<String, Mutex<Script>>>,
    hits: Arc<Mutex<HashMap<String, u32>>>,
) {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 4096];
    loop {
        let n = match stream.read(&mut tmp).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        buf.extend_from_slice(&tmp[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }

    let text = String::from_utf8_lossy(&buf);
    let target = text
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("")
        .to_string();

    *hits.lock().unwrap().entry(target.clone()).or_insert(0) += 1;

    let next = scripts.get(&target).map(|script| {
        let mut script = script.lock().unwrap();
        if script.remaining.len() > 1 {
            script.remaining.pop_front()
        } else {
            script.remaining.front().cloned()
        }
    });

    match next.flatten() {
        None => {
            let body = b"not found";
            let head = format!(
                "HTTP/1.1 404 Not Found\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            let _ = stream.write_all(head.as_bytes()).await;
            let _ = stream.write_all(body).await;
        }
        Some(Canned::Reset) => {
            // drop without writing: reqwest observes this as a transport error.
        }
        Some(Canned::Reply(status, body)) => {
            let head = format!(
                "HTTP/1.1 {status} OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            let _ = stream.write_all(head.as_bytes()).await;
            let _ = stream.write_all(body).await;
        }
    }
}
