//! Minimal HTTP/1.1 server for integration tests.
//!
//! Answers every request with `METHOD target` on the first line followed by
//! the request body, unless a fixed body is configured.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EchoOptions {
    pub status_line: &'static str,
    /// `None` omits the header.
    pub content_type: Option<&'static str>,
    /// Sent instead of the echo when set.
    pub body: Option<Vec<u8>>,
    /// Sleep before answering.
    pub delay: Option<Duration>,
    /// Keep the connection open for further requests instead of closing it.
    pub keep_alive: bool,
}

impl Default for EchoOptions {
    fn default() -> Self {
        Self {
            status_line: "200 OK",
            content_type: Some("text/plain; charset=utf-8"),
            body: None,
            delay: None,
            keep_alive: false,
        }
    }
}

/// Starts a server in a background thread. Returns the base URL
/// (e.g. "http://127.0.0.1:12345"). The server runs until the process exits.
pub fn start() -> String {
    start_with_options(EchoOptions::default())
}

pub fn start_with_options(opts: EchoOptions) -> String {
    start_counting(opts).0
}

/// Like [`start_with_options`], also returning the number of TCP
/// connections accepted so far.
pub fn start_counting(opts: EchoOptions) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let opts = Arc::new(opts);
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            counter.fetch_add(1, Ordering::SeqCst);
            let opts = Arc::clone(&opts);
            thread::spawn(move || handle(stream, &opts));
        }
    });
    (format!("http://127.0.0.1:{}", port), accepted)
}

/// A URL on a port nothing listens on.
pub fn unreachable_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{}/", port)
}

fn handle(mut stream: TcpStream, opts: &EchoOptions) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    while let Some((request_line, body)) = read_request(&mut stream) {
        if let Some(delay) = opts.delay {
            thread::sleep(delay);
        }
        let payload = match &opts.body {
            Some(body) => body.clone(),
            None => {
                let mut echo = request_line.into_bytes();
                echo.push(b'\n');
                echo.extend_from_slice(&body);
                echo
            }
        };
        let content_type = opts
            .content_type
            .map(|value| format!("Content-Type: {}\r\n", value))
            .unwrap_or_default();
        let connection = if opts.keep_alive { "keep-alive" } else { "close" };
        let head = format!(
            "HTTP/1.1 {}\r\n{}Content-Length: {}\r\nConnection: {}\r\n\r\n",
            opts.status_line,
            content_type,
            payload.len(),
            connection
        );
        if stream.write_all(head.as_bytes()).is_err() || stream.write_all(&payload).is_err() {
            return;
        }
        if !opts.keep_alive {
            return;
        }
    }
}

/// Returns ("METHOD target", body).
fn read_request(stream: &mut TcpStream) -> Option<(String, Vec<u8>)> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
    };
    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let mut lines = head.lines();
    let request_line = lines.next()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?;
    let target = parts.next()?;
    let content_length = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    let mut body = buf[head_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);
    Some((format!("{} {}", method, target), body))
}
