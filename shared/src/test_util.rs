//! Test fixtures shared across the workspace: a loopback HTTP receiver and
//! synthetic frame builders.
//!
//! Lives in the library (not behind `cfg(test)`) so downstream crates can use
//! it from their own test suites, mirroring how the receiver behaves in the
//! field without any network setup.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// One HTTP request captured by [`TestReceiver`].
#[derive(Debug, Clone)]
pub struct ReceivedRequest {
    pub method: String,
    pub path: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ReceivedRequest {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Minimal loopback HTTP/1.0 receiver.
///
/// Accepts connections on an ephemeral port, parses one request per
/// connection, replies `200 OK` and hands the parsed request to the test
/// through a channel.
pub struct TestReceiver {
    port: u16,
    requests: Receiver<ReceivedRequest>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl TestReceiver {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
        let port = listener.local_addr().expect("local addr").port();
        listener.set_nonblocking(true).expect("nonblocking");

        let (tx, rx) = unbounded();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let thread = std::thread::spawn(move || {
            while !stop_flag.load(Ordering::SeqCst) {
                match listener.accept() {
                    Ok((stream, _)) => handle_connection(stream, &tx),
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        std::thread::sleep(Duration::from_millis(5));
                    }
                    Err(_) => break,
                }
            }
        });

        Self {
            port,
            requests: rx,
            stop,
            thread: Some(thread),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Block until a request arrives or the timeout elapses.
    pub fn wait_for_request(&self, timeout: Duration) -> Option<ReceivedRequest> {
        self.requests.recv_timeout(timeout).ok()
    }

    /// Non-blocking check for an already-captured request.
    pub fn try_request(&self) -> Option<ReceivedRequest> {
        self.requests.try_recv().ok()
    }
}

impl Drop for TestReceiver {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

fn handle_connection(mut stream: std::net::TcpStream, tx: &Sender<ReceivedRequest>) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));

    // Read until the blank line terminating the headers.
    let mut raw = Vec::new();
    let mut buf = [0u8; 1024];
    let header_end = loop {
        match stream.read(&mut buf) {
            Ok(0) => return,
            Ok(n) => {
                raw.extend_from_slice(&buf[..n]);
                if let Some(pos) = find_blank_line(&raw) {
                    break pos;
                }
            }
            Err(_) => return,
        }
    };

    let head = String::from_utf8_lossy(&raw[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();
    let version = parts.next().unwrap_or_default().to_string();

    let mut headers = Vec::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.push((k.trim().to_string(), v.trim().to_string()));
        }
    }

    let content_length: usize = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse().ok())
        .unwrap_or(0);

    let mut body = raw[header_end + 4..].to_vec();
    while body.len() < content_length {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => body.extend_from_slice(&buf[..n]),
            Err(_) => break,
        }
    }
    body.truncate(content_length);

    let _ = stream.write_all(b"HTTP/1.0 200 OK\r\nContent-Length: 0\r\n\r\n");
    let _ = tx.send(ReceivedRequest {
        method,
        path,
        version,
        headers,
        body,
    });
}

fn find_blank_line(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|w| w == b"\r\n\r\n")
}

/// A luma plane of `width * height` bytes at a constant value.
pub fn flat_luma(width: usize, height: usize, value: u8) -> Vec<u8> {
    vec![value; width * height]
}

/// Paint `len` pixels starting at `(x0, y0)` stepping by `(dx, dy)` per
/// pixel. Pixels falling outside the plane are skipped.
pub fn paint_segment(
    luma: &mut [u8],
    width: usize,
    height: usize,
    x0: i32,
    y0: i32,
    dx: i32,
    dy: i32,
    len: usize,
    value: u8,
) {
    for i in 0..len as i32 {
        let x = x0 + i * dx;
        let y = y0 + i * dy;
        if x >= 0 && (x as usize) < width && y >= 0 && (y as usize) < height {
            luma[y as usize * width + x as usize] = value;
        }
    }
}
