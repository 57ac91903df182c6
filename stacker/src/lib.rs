//! Full-resolution NV12 frame stacker.
//!
//! Every frame is added into 32-bit accumulators; once `frames_per_stack`
//! frames have been summed the per-cell average is computed, the optional
//! dark frame subtracted, and the result handed to a background worker that
//! encodes a JPEG and uploads it together with a companion JSON event.
//!
//! The handoff is a capacity-1 channel carrying the single pair of output
//! buffers; if the encoder still owns them when the next stack completes,
//! that stack is dropped with a warning. The ingest thread never blocks
//! here.

use chrono::{DateTime, Datelike, Timelike, Utc};
use crossbeam_channel::{bounded, Receiver, Sender};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use shared::dark::DarkFrame;
use shared::encode::ImageEncoder;
use shared::events::{MotionProvider, MotionSummary, StackEvent};
use shared::push::PushClient;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;
use tracing::{info, warn};

/// Stacker tuning parameters, immutable after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackerConfig {
    /// Full capture resolution width.
    pub width: usize,
    /// Full capture resolution height.
    pub height: usize,
    /// Frames averaged into one output image.
    pub frames_per_stack: u32,
    /// JPEG quality 1-100.
    pub jpeg_quality: u8,
    /// Station label embedded in output filenames and events.
    pub station_id: String,
    /// Optional raw dark-frame file; absent or wrong-sized files are
    /// ignored with a warning.
    pub dark_path: Option<PathBuf>,
    /// Directory for the short-lived encoded file awaiting upload.
    pub staging_dir: PathBuf,
}

impl Default for StackerConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            frames_per_stack: 750,
            jpeg_quality: 85,
            station_id: "XX0001".to_string(),
            dark_path: None,
            staging_dir: PathBuf::from("/tmp/perseid-stack"),
        }
    }
}

/// Construction-time failures; nothing later is fatal.
#[derive(Error, Debug)]
pub enum StackerError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to create staging directory {}: {source}", path.display())]
    Staging {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to spawn encoder worker: {0}")]
    Spawn(std::io::Error),
}

/// The averaged output planes, owned by exactly one thread at a time.
struct StackBuffers {
    luma: Array2<u8>,
    chroma: Array2<u8>,
}

struct PendingStack {
    buffers: StackBuffers,
    ts_ms: u64,
    motion: Option<MotionSummary>,
    stack_index: u32,
}

/// Accumulates frames on the ingest thread and owns the encoder worker.
pub struct Stacker {
    cfg: StackerConfig,
    y_acc: Vec<u32>,
    uv_acc: Vec<u32>,
    frame_count: u32,
    stack_index: u32,
    dark: Option<DarkFrame>,
    out: Option<StackBuffers>,
    returns: Receiver<StackBuffers>,
    to_encoder: Option<Sender<PendingStack>>,
    motion: Option<Arc<dyn MotionProvider>>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    dropped_stacks: u64,
}

impl std::fmt::Debug for Stacker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stacker").finish_non_exhaustive()
    }
}

impl Stacker {
    pub fn new(
        cfg: StackerConfig,
        push: PushClient,
        encoder: Box<dyn ImageEncoder>,
        motion: Option<Arc<dyn MotionProvider>>,
    ) -> Result<Self, StackerError> {
        if cfg.width == 0 || cfg.height == 0 || cfg.height % 2 != 0 {
            return Err(StackerError::InvalidConfig(format!(
                "capture resolution {}x{} is not a valid NV12 shape",
                cfg.width, cfg.height
            )));
        }
        if cfg.frames_per_stack == 0 {
            return Err(StackerError::InvalidConfig(
                "frames_per_stack must be non-zero".into(),
            ));
        }
        if !(1..=100).contains(&cfg.jpeg_quality) {
            return Err(StackerError::InvalidConfig(format!(
                "jpeg quality {} out of range 1-100",
                cfg.jpeg_quality
            )));
        }
        std::fs::create_dir_all(&cfg.staging_dir).map_err(|source| StackerError::Staging {
            path: cfg.staging_dir.clone(),
            source,
        })?;

        let dark = cfg
            .dark_path
            .as_ref()
            .and_then(|p| DarkFrame::load(p, cfg.width, cfg.height));

        let y_len = cfg.width * cfg.height;
        let uv_len = cfg.width * (cfg.height / 2);

        let (to_encoder, pending_rx) = bounded::<PendingStack>(1);
        let (return_tx, returns) = bounded::<StackBuffers>(1);
        let running = Arc::new(AtomicBool::new(true));

        let worker_state = EncodeWorker {
            cfg: cfg.clone(),
            push,
            encoder,
            running: Arc::clone(&running),
            return_tx,
        };
        let worker = std::thread::Builder::new()
            .name("stack-encoder".into())
            .spawn(move || worker_state.run(pending_rx))
            .map_err(StackerError::Spawn)?;

        info!(
            "stacker started: {} frames/stack, quality {}",
            cfg.frames_per_stack, cfg.jpeg_quality
        );

        Ok(Self {
            out: Some(StackBuffers {
                luma: Array2::zeros((cfg.height, cfg.width)),
                chroma: Array2::zeros((cfg.height / 2, cfg.width)),
            }),
            y_acc: vec![0; y_len],
            uv_acc: vec![0; uv_len],
            frame_count: 0,
            stack_index: 0,
            dark,
            returns,
            to_encoder: Some(to_encoder),
            motion,
            running,
            worker: Some(worker),
            dropped_stacks: 0,
            cfg,
        })
    }

    /// Whether a dark frame was loaded at startup.
    pub fn has_dark_frame(&self) -> bool {
        self.dark.is_some()
    }

    pub fn config(&self) -> &StackerConfig {
        &self.cfg
    }

    /// Completed stacks dropped because the encoder was still busy.
    pub fn dropped_stacks(&self) -> u64 {
        self.dropped_stacks
    }

    /// Feed one full-resolution NV12 frame. Never blocks.
    ///
    /// `luma` is `height` rows of `width` bytes; `chroma` is the
    /// half-height interleaved U/V plane. `ts_ms` stamps the output
    /// filename when this frame completes a stack.
    pub fn on_frame(&mut self, luma: &[u8], chroma: &[u8], ts_ms: u64) {
        debug_assert!(luma.len() >= self.y_acc.len());
        debug_assert!(chroma.len() >= self.uv_acc.len());
        for (acc, &s) in self.y_acc.iter_mut().zip(luma) {
            *acc += u32::from(s);
        }
        for (acc, &s) in self.uv_acc.iter_mut().zip(chroma) {
            *acc += u32::from(s);
        }

        self.frame_count += 1;
        if self.frame_count < self.cfg.frames_per_stack {
            return;
        }
        self.complete_stack(ts_ms);
    }

    fn complete_stack(&mut self, ts_ms: u64) {
        let n = self.frame_count;
        self.frame_count = 0;

        // Reclaim the output buffers if the encoder has returned them.
        if self.out.is_none() {
            self.out = self.returns.try_recv().ok();
        }
        let Some(mut out) = self.out.take() else {
            self.dropped_stacks += 1;
            warn!("encoder busy, dropping stack {}", self.stack_index);
            self.y_acc.fill(0);
            self.uv_acc.fill(0);
            return;
        };

        for (o, &acc) in out.luma.iter_mut().zip(&self.y_acc) {
            *o = (acc / n) as u8;
        }
        for (o, &acc) in out.chroma.iter_mut().zip(&self.uv_acc) {
            *o = (acc / n) as u8;
        }
        self.y_acc.fill(0);
        self.uv_acc.fill(0);

        if let Some(dark) = &self.dark {
            for (o, &d) in out.luma.iter_mut().zip(dark.luma.iter()) {
                *o = o.saturating_sub(d);
            }
            // The dark capture is assumed neutral-chroma (128), hence the
            // +128 re-centring; a tinted dark file will drift the colours.
            for (o, &d) in out.chroma.iter_mut().zip(dark.chroma.iter()) {
                *o = (i32::from(*o) - i32::from(d) + 128).clamp(0, 255) as u8;
            }
        }

        let motion = self.motion.as_ref().map(|m| m.snapshot_and_reset());
        self.stack_index += 1;

        let pending = PendingStack {
            buffers: out,
            ts_ms,
            motion,
            stack_index: self.stack_index,
        };
        let sent = match self.to_encoder.as_ref() {
            Some(tx) => tx.try_send(pending).is_ok(),
            None => false,
        };
        if !sent {
            // Buffers were in hand, so the slot was free; only shutdown
            // races land here.
            self.dropped_stacks += 1;
        }
    }

    #[cfg(test)]
    fn new_without_worker(cfg: StackerConfig, dark: Option<DarkFrame>) -> Self {
        let (to_encoder, pending_rx) = bounded::<PendingStack>(1);
        let (_return_tx, returns) = bounded::<StackBuffers>(1);
        std::mem::forget(pending_rx);
        std::mem::forget(_return_tx);
        Self {
            out: Some(StackBuffers {
                luma: Array2::zeros((cfg.height, cfg.width)),
                chroma: Array2::zeros((cfg.height / 2, cfg.width)),
            }),
            y_acc: vec![0; cfg.width * cfg.height],
            uv_acc: vec![0; cfg.width * (cfg.height / 2)],
            frame_count: 0,
            stack_index: 0,
            dark,
            returns,
            to_encoder: Some(to_encoder),
            motion: None,
            running: Arc::new(AtomicBool::new(true)),
            worker: None,
            dropped_stacks: 0,
            cfg,
        }
    }
}

impl Drop for Stacker {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        drop(self.to_encoder.take());
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

/// Output filename: `STACK_<station>_<YYYYMMDD>_<HHMMSS>_<mmm>.jpg` in UTC.
fn stack_filename(station_id: &str, ts_ms: u64) -> String {
    let dt: DateTime<Utc> = DateTime::from_timestamp_millis(ts_ms as i64).unwrap_or_default();
    format!(
        "STACK_{}_{:04}{:02}{:02}_{:02}{:02}{:02}_{:03}.jpg",
        station_id,
        dt.year(),
        dt.month(),
        dt.day(),
        dt.hour(),
        dt.minute(),
        dt.second(),
        ts_ms % 1000
    )
}

struct EncodeWorker {
    cfg: StackerConfig,
    push: PushClient,
    encoder: Box<dyn ImageEncoder>,
    running: Arc<AtomicBool>,
    return_tx: Sender<StackBuffers>,
}

impl EncodeWorker {
    fn run(self, pending: Receiver<PendingStack>) {
        info!("stack encoder started");
        while let Ok(job) = pending.recv() {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            self.encode_and_push(&job);
            if self.return_tx.send(job.buffers).is_err() {
                break;
            }
        }
        info!("stack encoder stopped");
    }

    fn encode_and_push(&self, job: &PendingStack) {
        let filename = stack_filename(&self.cfg.station_id, job.ts_ms);
        let staged = self
            .cfg
            .staging_dir
            .join(format!("stack-{}.jpg", job.stack_index));

        match self.encoder.encode(
            &staged,
            &job.buffers.luma,
            &job.buffers.chroma,
            self.cfg.jpeg_quality,
        ) {
            Err(e) => warn!("stack encode failed for {filename}: {e}"),
            Ok(()) => {
                match self.push.post_stack(&staged, &filename) {
                    Err(e) => warn!("stack push failed: {e}"),
                    Ok(()) => info!("pushed {filename}"),
                }
                if let Err(e) = std::fs::remove_file(&staged) {
                    warn!("failed to remove staged {}: {e}", staged.display());
                }
            }
        }

        let event = StackEvent::new(&self.cfg.station_id, job.ts_ms, filename, job.motion);
        if let Err(e) = self.push.post_json(&event) {
            warn!("stack event push failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::encode::RecordingEncoder;
    use shared::push::PushConfig;
    use shared::test_util::TestReceiver;
    use std::time::Duration;
    use tempfile::TempDir;

    const W: usize = 8;
    const H: usize = 8;

    fn test_cfg(tmp: &TempDir, frames: u32, dark: Option<PathBuf>) -> StackerConfig {
        StackerConfig {
            width: W,
            height: H,
            frames_per_stack: frames,
            jpeg_quality: 85,
            station_id: "XX0001".to_string(),
            dark_path: dark,
            staging_dir: tmp.path().join("staging"),
        }
    }

    fn client_for(receiver: &TestReceiver) -> PushClient {
        PushClient::new(PushConfig {
            server_ip: "127.0.0.1".to_string(),
            server_port: receiver.port(),
            timeout_ms: 2000,
        })
    }

    fn nv12(luma: u8, chroma: u8) -> (Vec<u8>, Vec<u8>) {
        (vec![luma; W * H], vec![chroma; W * (H / 2)])
    }

    #[test]
    fn filename_is_utc_stamped() {
        // 2024-08-12T23:41:07.250Z
        assert_eq!(
            stack_filename("XX0001", 1_723_506_067_250),
            "STACK_XX0001_20240812_234107_250.jpg"
        );
    }

    #[test]
    fn identical_frames_average_exactly() {
        let tmp = TempDir::new().unwrap();
        let receiver = TestReceiver::start();
        let enc = RecordingEncoder::new();
        let mut stacker = Stacker::new(
            test_cfg(&tmp, 30, None),
            client_for(&receiver),
            Box::new(enc.clone()),
            None,
        )
        .unwrap();

        let (luma, chroma) = nv12(100, 128);
        for i in 0..30 {
            stacker.on_frame(&luma, &chroma, 1_000 + i);
        }

        // Wait for the /stack POST so the encoder has run.
        receiver
            .wait_for_request(Duration::from_secs(5))
            .expect("stack upload");
        let captured = enc.captured();
        assert_eq!(captured.len(), 1);
        assert!(captured[0].luma.iter().all(|&v| v == 100));
        assert!(captured[0].chroma.iter().all(|&v| v == 128));
        assert_eq!(captured[0].quality, 85);
    }

    #[test]
    fn dark_frame_subtracts_with_neutral_chroma_offset() {
        let tmp = TempDir::new().unwrap();
        let dark_path = tmp.path().join("dark.raw");
        DarkFrame::save(
            &dark_path,
            &Array2::from_elem((H, W), 30u8),
            &Array2::from_elem((H / 2, W), 128u8),
        )
        .unwrap();

        let receiver = TestReceiver::start();
        let enc = RecordingEncoder::new();
        let mut stacker = Stacker::new(
            test_cfg(&tmp, 30, Some(dark_path)),
            client_for(&receiver),
            Box::new(enc.clone()),
            None,
        )
        .unwrap();
        assert!(stacker.has_dark_frame());

        let (luma, chroma) = nv12(100, 128);
        for i in 0..30 {
            stacker.on_frame(&luma, &chroma, i);
        }

        receiver
            .wait_for_request(Duration::from_secs(5))
            .expect("stack upload");
        let captured = enc.captured();
        assert_eq!(captured.len(), 1);
        assert!(captured[0].luma.iter().all(|&v| v == 70));
        assert!(captured[0].chroma.iter().all(|&v| v == 128));
    }

    #[test]
    fn stack_upload_and_companion_event_are_published() {
        let tmp = TempDir::new().unwrap();
        let receiver = TestReceiver::start();

        struct FixedMotion;
        impl MotionProvider for FixedMotion {
            fn snapshot_and_reset(&self) -> MotionSummary {
                MotionSummary {
                    polls: 12,
                    active_polls: 3,
                    total_rois: 7,
                    last_rois: 1,
                }
            }
        }

        let mut stacker = Stacker::new(
            test_cfg(&tmp, 5, None),
            client_for(&receiver),
            Box::new(RecordingEncoder::new()),
            Some(Arc::new(FixedMotion)),
        )
        .unwrap();

        let (luma, chroma) = nv12(50, 130);
        for i in 0..5 {
            // 2024-08-12T23:41:07.250Z on the closing frame.
            stacker.on_frame(&luma, &chroma, 1_723_506_067_246 + i);
        }

        let upload = receiver
            .wait_for_request(Duration::from_secs(5))
            .expect("stack upload");
        assert_eq!(upload.path, "/stack");
        assert_eq!(upload.header("content-type").unwrap(), "image/jpeg");
        assert_eq!(
            upload.header("x-filename").unwrap(),
            "STACK_XX0001_20240812_234107_250.jpg"
        );

        let event = receiver
            .wait_for_request(Duration::from_secs(5))
            .expect("companion event");
        assert_eq!(event.path, "/event");
        let json: serde_json::Value = serde_json::from_slice(&event.body).unwrap();
        assert_eq!(json["type"], "stack");
        assert_eq!(json["filename"], "STACK_XX0001_20240812_234107_250.jpg");
        assert_eq!(json["polls"], 12);
        assert_eq!(json["active_polls"], 3);

        // Staged file is gone once the upload completed.
        let staged: Vec<_> = std::fs::read_dir(tmp.path().join("staging"))
            .unwrap()
            .collect();
        assert!(staged.is_empty());
    }

    #[test]
    fn busy_encoder_drops_the_stack_and_resets_accumulators() {
        let tmp = TempDir::new().unwrap();
        let mut stacker = Stacker::new_without_worker(test_cfg(&tmp, 4, None), None);

        let (luma, chroma) = nv12(100, 128);
        for i in 0..4 {
            stacker.on_frame(&luma, &chroma, i);
        }
        assert_eq!(stacker.dropped_stacks(), 0, "first stack handed off");

        // The buffers never come back (no worker); the next stack drops.
        let (luma2, chroma2) = nv12(200, 128);
        for i in 0..4 {
            stacker.on_frame(&luma2, &chroma2, 100 + i);
        }
        assert_eq!(stacker.dropped_stacks(), 1);

        // Accumulators were reset on the drop: a third stack would average
        // only its own frames.
        assert!(stacker.y_acc.iter().all(|&v| v == 0));
        assert_eq!(stacker.frame_count, 0);
    }

    #[test]
    fn wrong_sized_dark_file_is_ignored() {
        let tmp = TempDir::new().unwrap();
        let dark_path = tmp.path().join("dark.raw");
        std::fs::write(&dark_path, [0u8; 7]).unwrap();

        let receiver = TestReceiver::start();
        let stacker = Stacker::new(
            test_cfg(&tmp, 5, Some(dark_path)),
            client_for(&receiver),
            Box::new(RecordingEncoder::new()),
            None,
        )
        .unwrap();
        assert!(!stacker.has_dark_frame());
    }

    #[test]
    fn invalid_quality_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let receiver = TestReceiver::start();
        let cfg = StackerConfig {
            jpeg_quality: 0,
            ..test_cfg(&tmp, 5, None)
        };
        let err = Stacker::new(
            cfg,
            client_for(&receiver),
            Box::new(RecordingEncoder::new()),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, StackerError::InvalidConfig(_)));
    }
}
