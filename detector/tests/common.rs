//! Helpers shared by the scenario tests.

use detector::{DetectConfig, DetectionEngine};
use shared::push::{PushClient, PushConfig};
use shared::test_util::TestReceiver;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tempfile::TempDir;

pub const W: usize = 640;
pub const H: usize = 480;

/// Engine at the default 640x480 detection setup, staging into `tmp` and
/// publishing to the loopback receiver.
pub fn make_engine(receiver: &TestReceiver, tmp: &TempDir) -> DetectionEngine {
    let cfg = DetectConfig {
        ff_tmp_dir: staging_dir(tmp),
        ..DetectConfig::default()
    };
    let client = PushClient::new(PushConfig {
        server_ip: "127.0.0.1".to_string(),
        server_port: receiver.port(),
        timeout_ms: 2000,
    });
    DetectionEngine::new(cfg, client, "XX0001", 1).expect("engine construction")
}

pub fn staging_dir(tmp: &TempDir) -> PathBuf {
    tmp.path().join("ff-staging")
}

/// Feed a full 256-frame block; `frame_for(i)` picks the plane per frame.
/// Timestamps advance 40 ms per frame from `start_ms`.
pub fn feed_block<'a, F>(engine: &mut DetectionEngine, start_ms: u64, mut frame_for: F)
where
    F: FnMut(u32) -> &'a [u8],
{
    for i in 0..256u32 {
        engine.push_frame(frame_for(i), W, start_ms + u64::from(i) * 40);
    }
}

/// Wait until the staging directory holds no files (upload cleans up).
pub fn wait_for_empty_dir(dir: &std::path::Path, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        let count = std::fs::read_dir(dir)
            .map(|entries| entries.count())
            .unwrap_or(0);
        if count == 0 {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    false
}
