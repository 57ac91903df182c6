//! Blocking HTTP push client for the LAN receiver.
//!
//! One HTTP/1.0 request per call with `Connection: close`; no keep-alive,
//! no TLS. The receiver sits on a trusted LAN segment and ingests JSON
//! events, FF binaries and stack JPEGs. Publication is best-effort: every
//! failure surfaces as a [`PushError`] that callers log and move past, and
//! nothing here is ever invoked from the ingest thread.

use serde::Serialize;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// File bodies are streamed in chunks of this size; the client never holds
/// a whole file in memory.
const SEND_CHUNK: usize = 8192;

/// Connection parameters for the receiver.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PushConfig {
    pub server_ip: String,
    pub server_port: u16,
    pub timeout_ms: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            server_ip: "192.168.1.245".to_string(),
            server_port: 8765,
            timeout_ms: 5000,
        }
    }
}

/// Errors from a single push attempt.
#[derive(Error, Debug)]
pub enum PushError {
    #[error("invalid server address {0}")]
    Address(String),

    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("send failed: {0}")]
    Send(std::io::Error),

    #[error("receive failed: {0}")]
    Receive(std::io::Error),

    #[error("staged file {}: {source}", path.display())]
    File {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("event serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Stateless HTTP/1.0 POST client; each call opens its own connection.
#[derive(Debug, Clone)]
pub struct PushClient {
    cfg: PushConfig,
}

impl PushClient {
    pub fn new(cfg: PushConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &PushConfig {
        &self.cfg
    }

    /// POST a JSON payload to `/event`.
    pub fn post_json<T: Serialize>(&self, payload: &T) -> Result<(), PushError> {
        let body = serde_json::to_vec(payload)?;
        let mut stream = self.connect()?;

        let header = format!(
            "POST /event HTTP/1.0\r\n\
             Host: {}:{}\r\n\
             Content-Type: application/json\r\n\
             Content-Length: {}\r\n\
             Connection: close\r\n\
             \r\n",
            self.cfg.server_ip,
            self.cfg.server_port,
            body.len()
        );
        stream.write_all(header.as_bytes()).map_err(PushError::Send)?;
        stream.write_all(&body).map_err(PushError::Send)?;
        self.drain_response(&mut stream)
    }

    /// POST a local file to `endpoint`, streamed in fixed-size chunks.
    ///
    /// `filename` is carried in the `X-Filename` header so the receiver can
    /// store the file under its canonical name.
    pub fn post_file(
        &self,
        endpoint: &str,
        content_type: &str,
        path: &Path,
        filename: &str,
    ) -> Result<(), PushError> {
        let file_err = |source| PushError::File {
            path: path.to_path_buf(),
            source,
        };
        let len = std::fs::metadata(path).map_err(file_err)?.len();
        let mut file = std::fs::File::open(path).map_err(file_err)?;

        let mut stream = self.connect()?;
        let header = format!(
            "POST {} HTTP/1.0\r\n\
             Host: {}:{}\r\n\
             Content-Type: {}\r\n\
             Content-Length: {}\r\n\
             X-Filename: {}\r\n\
             Connection: close\r\n\
             \r\n",
            endpoint, self.cfg.server_ip, self.cfg.server_port, content_type, len, filename
        );
        stream.write_all(header.as_bytes()).map_err(PushError::Send)?;

        let mut chunk = [0u8; SEND_CHUNK];
        loop {
            let n = file.read(&mut chunk).map_err(file_err)?;
            if n == 0 {
                break;
            }
            stream.write_all(&chunk[..n]).map_err(PushError::Send)?;
        }
        self.drain_response(&mut stream)
    }

    /// POST an FF binary block file to `/ff`.
    pub fn post_ff(&self, path: &Path, filename: &str) -> Result<(), PushError> {
        self.post_file("/ff", "application/octet-stream", path, filename)
    }

    /// POST a stack JPEG to `/stack`.
    pub fn post_stack(&self, path: &Path, filename: &str) -> Result<(), PushError> {
        self.post_file("/stack", "image/jpeg", path, filename)
    }

    fn connect(&self) -> Result<TcpStream, PushError> {
        let addr: SocketAddr = format!("{}:{}", self.cfg.server_ip, self.cfg.server_port)
            .parse()
            .map_err(|_| PushError::Address(self.cfg.server_ip.clone()))?;
        let timeout = Duration::from_millis(self.cfg.timeout_ms);

        let stream = TcpStream::connect_timeout(&addr, timeout)
            .map_err(|source| PushError::Connect { addr, source })?;
        stream
            .set_write_timeout(Some(timeout))
            .map_err(PushError::Send)?;
        stream
            .set_read_timeout(Some(timeout))
            .map_err(PushError::Receive)?;
        Ok(stream)
    }

    /// Wait for the status line; the body, if any, is ignored.
    fn drain_response(&self, stream: &mut TcpStream) -> Result<(), PushError> {
        let mut buf = [0u8; 512];
        stream.read(&mut buf).map_err(PushError::Receive)?;
        Ok(())
    }
}
