//! Double-buffered detection engine.
//!
//! The ingest thread calls [`DetectionEngine::push_frame`] once per frame
//! and never blocks: a completed block is handed to the worker through a
//! capacity-1 channel, and when the worker still owns the other block the
//! just-filled one is dropped with a warning. Exactly two blocks exist for
//! the lifetime of the engine; the worker returns each processed block
//! through a recycling channel.

use crate::config::DetectConfig;
use crate::error::DetectorError;
use crate::ftp::FtpBlock;
use crate::geometry::{line_endpoints, segment_length};
use crate::hough::HoughAccum;
use crossbeam_channel::{bounded, Receiver, Sender};
use shared::algo::trig::THETA_STEPS;
use shared::events::{LineCandidate, MeteorEvent};
use shared::ff::{write_ff, FfHeader, StatPlanes};
use shared::push::PushClient;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

/// Hough peaks examined per block.
pub const MAX_LINES: usize = 16;

/// A filled block travelling to the worker with its completion timestamp
/// (the last frame's wall-clock time).
struct PendingBlock {
    block: FtpBlock,
    completed_ms: u64,
}

/// Owns the double buffer and the detection worker thread.
pub struct DetectionEngine {
    cfg: DetectConfig,
    active: FtpBlock,
    frame_count: u32,
    to_worker: Option<Sender<PendingBlock>>,
    spare_rx: Receiver<FtpBlock>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    dropped_blocks: u64,
}

impl DetectionEngine {
    /// Build the engine and start its worker thread.
    ///
    /// `station_id`/`camno` label every published file and event. Fails only
    /// on bad configuration, staging-directory creation or thread spawn;
    /// nothing after construction is fatal.
    pub fn new(
        cfg: DetectConfig,
        push: PushClient,
        station_id: &str,
        camno: u32,
    ) -> Result<Self, DetectorError> {
        validate(&cfg)?;
        std::fs::create_dir_all(&cfg.ff_tmp_dir).map_err(|source| DetectorError::Staging {
            path: cfg.ff_tmp_dir.clone(),
            source,
        })?;

        let header_template = FfHeader {
            station_id: station_id.to_string(),
            year: 0,
            month: 0,
            day: 0,
            hour: 0,
            minute: 0,
            second: 0,
            millisecond: 0,
            width: cfg.detect_w as u32,
            height: cfg.detect_h as u32,
            nframes: cfg.block_frames,
            fps: cfg.fps,
            camno,
        };

        let (to_worker, pending_rx) = bounded::<PendingBlock>(1);
        let (spare_tx, spare_rx) = bounded::<FtpBlock>(1);
        let running = Arc::new(AtomicBool::new(true));

        let active = FtpBlock::new(cfg.detect_w, cfg.detect_h);
        // The second block starts in the recycling channel as the spare.
        spare_tx
            .send(FtpBlock::new(cfg.detect_w, cfg.detect_h))
            .expect("fresh spare channel has capacity");

        let worker_state = Worker {
            cfg: cfg.clone(),
            hough: HoughAccum::new(cfg.rho_max),
            planes: StatPlanes::new(cfg.detect_w, cfg.detect_h),
            cand_x: Vec::with_capacity(cfg.max_candidates),
            cand_y: Vec::with_capacity(cfg.max_candidates),
            push,
            header_template,
            running: Arc::clone(&running),
            spare_tx,
        };
        let worker = std::thread::Builder::new()
            .name("detect-worker".into())
            .spawn(move || worker_state.run(pending_rx))
            .map_err(DetectorError::Spawn)?;

        Ok(Self {
            cfg,
            active,
            frame_count: 0,
            to_worker: Some(to_worker),
            spare_rx,
            running,
            worker: Some(worker),
            dropped_blocks: 0,
        })
    }

    /// Feed one downsampled luma frame. Never blocks.
    ///
    /// `y_plane` is `detect_h` rows of `detect_w` samples at row `stride`;
    /// `ts_ms` is the frame's wall-clock time. The first frame of a cycle
    /// stamps the block's start time; the frame that completes the block
    /// supplies the completion time carried into publication.
    pub fn push_frame(&mut self, y_plane: &[u8], stride: usize, ts_ms: u64) {
        if self.frame_count == 0 {
            self.active.reset(ts_ms);
        }
        self.active
            .update(y_plane, stride, (self.frame_count & 0xFF) as u8);
        self.frame_count += 1;

        if self.frame_count < self.cfg.block_frames {
            return;
        }
        self.frame_count = 0;

        // Hand off only if the spare block is back from the worker;
        // otherwise drop the just-filled block so ingest never stalls.
        match self.spare_rx.try_recv() {
            Ok(spare) => {
                let filled = std::mem::replace(&mut self.active, spare);
                let pending = PendingBlock {
                    block: filled,
                    completed_ms: ts_ms,
                };
                // A spare in hand implies the pending slot is empty, so the
                // send only fails once shutdown has begun.
                let sent = match self.to_worker.as_ref() {
                    Some(tx) => tx.try_send(pending).is_ok(),
                    None => false,
                };
                if !sent {
                    self.dropped_blocks += 1;
                }
            }
            Err(_) => {
                self.dropped_blocks += 1;
                warn!(
                    "detection worker busy, dropping block {}",
                    self.active.block_index()
                );
            }
        }
    }

    /// Completed blocks dropped because the worker was still busy.
    pub fn dropped_blocks(&self) -> u64 {
        self.dropped_blocks
    }

    pub fn config(&self) -> &DetectConfig {
        &self.cfg
    }

    #[cfg(test)]
    pub(crate) fn new_without_worker(cfg: DetectConfig) -> Self {
        let (to_worker, pending_rx) = bounded::<PendingBlock>(1);
        let (spare_tx, spare_rx) = bounded::<FtpBlock>(1);
        // Park the receiver so the channel stays connected with no consumer.
        std::mem::forget(pending_rx);
        let active = FtpBlock::new(cfg.detect_w, cfg.detect_h);
        spare_tx
            .send(FtpBlock::new(cfg.detect_w, cfg.detect_h))
            .expect("fresh spare channel has capacity");
        std::mem::forget(spare_tx);
        Self {
            cfg,
            active,
            frame_count: 0,
            to_worker: Some(to_worker),
            spare_rx,
            running: Arc::new(AtomicBool::new(true)),
            worker: None,
            dropped_blocks: 0,
        }
    }
}

impl Drop for DetectionEngine {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        // Disconnecting the pending channel wakes the worker; any block
        // still queued is discarded by the running check.
        drop(self.to_worker.take());
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

/// State owned by the worker thread: the Hough accumulator, the finalised
/// planes, the candidate buffers and the push client are touched by no one
/// else.
struct Worker {
    cfg: DetectConfig,
    hough: HoughAccum,
    planes: StatPlanes,
    cand_x: Vec<i32>,
    cand_y: Vec<i32>,
    push: PushClient,
    header_template: FfHeader,
    running: Arc<AtomicBool>,
    spare_tx: Sender<FtpBlock>,
}

impl Worker {
    fn run(mut self, pending: Receiver<PendingBlock>) {
        info!("detection worker started");
        while let Ok(mut job) = pending.recv() {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            self.process_block(&job.block, job.completed_ms);
            job.block.reset(0);
            if self.spare_tx.send(job.block).is_err() {
                break;
            }
        }
        info!("detection worker stopped");
    }

    fn process_block(&mut self, block: &FtpBlock, completed_ms: u64) {
        block.finalize(&mut self.planes);
        self.collect_candidates();
        let ncands = self.cand_x.len();

        debug!("block {}: {} candidates", block.block_index(), ncands);

        if ncands < self.cfg.min_candidates {
            return;
        }
        if ncands >= self.cfg.max_candidates {
            // A saturated candidate buffer means a scene-wide brightness
            // change (cloud, dew, gain surge), not a streak.
            debug!(
                "block {}: candidate buffer saturated, skipping",
                block.block_index()
            );
            return;
        }

        self.hough.reset();
        for i in 0..ncands {
            self.hough.vote(self.cand_x[i], self.cand_y[i]);
        }
        let peaks = self.hough.find_peaks(self.cfg.peak_threshold, MAX_LINES);
        debug!("block {}: {} Hough peaks", block.block_index(), peaks.len());

        for line in &peaks {
            if line.votes < self.cfg.min_votes {
                continue;
            }
            let Some((p1, p2)) =
                line_endpoints(line.rho, line.theta, self.cfg.detect_w, self.cfg.detect_h)
            else {
                continue;
            };
            let length_px = segment_length(p1, p2);
            if length_px < self.cfg.min_length_px {
                continue;
            }

            info!(
                "meteor candidate rho={} theta={} votes={} len={}px",
                line.rho, line.theta, line.votes, length_px
            );

            let header = self.header_template.stamped(completed_ms);
            let filename = header.filename();
            let path = self.cfg.ff_tmp_dir.join(&filename);

            if let Err(e) = write_ff(&path, &header, &self.planes) {
                warn!("FF write to {} failed: {e}, skipping publication", path.display());
                break;
            }

            let event = MeteorEvent::new(
                &header.station_id,
                completed_ms,
                block.start_ms(),
                LineCandidate {
                    rho: line.rho,
                    theta: line.theta,
                    x1: p1.0,
                    y1: p1.1,
                    x2: p2.0,
                    y2: p2.1,
                    length_px,
                    votes: line.votes,
                },
            );
            if let Err(e) = self.push.post_json(&event) {
                warn!("event push failed: {e}");
            }
            if let Err(e) = self.push.post_ff(&path, &filename) {
                warn!("FF push failed: {e}");
            }
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("failed to remove staged {}: {e}", path.display());
            }

            // The RMS receiver expects one file per block; the first
            // validated peak wins.
            break;
        }
    }

    /// Threshold the finalised planes into candidate coordinates.
    ///
    /// The comparison deliberately stays in 8-bit unsigned arithmetic:
    /// `k * std` wraps modulo 256, capping the right-hand side. Widening
    /// either operand changes reject counts near the saturation band.
    /// Scanning stops once the buffer is full.
    fn collect_candidates(&mut self) {
        self.cand_x.clear();
        self.cand_y.clear();
        let w = self.cfg.detect_w;
        let n = w * self.cfg.detect_h;
        for i in 0..n {
            if self.cand_x.len() >= self.cfg.max_candidates {
                break;
            }
            if is_candidate(
                self.planes.max_pixel[i],
                self.planes.avg_pixel[i],
                self.planes.std_pixel[i],
                self.cfg.k_sigma,
            ) {
                self.cand_x.push((i % w) as i32);
                self.cand_y.push((i / w) as i32);
            }
        }
    }
}

/// The candidate comparison in 8-bit unsigned arithmetic.
///
/// `k * std` is truncated to 8 bits and wraps modulo 256; widening either
/// side would change reject counts near the saturation band, so don't.
#[inline]
pub(crate) fn is_candidate(max: u8, avg: u8, std: u8, k_sigma: u32) -> bool {
    let diff = i32::from(max) - i32::from(avg);
    diff > 0 && diff as u8 > (k_sigma * u32::from(std)) as u8
}

fn validate(cfg: &DetectConfig) -> Result<(), DetectorError> {
    if cfg.detect_w == 0 || cfg.detect_h == 0 {
        return Err(DetectorError::InvalidConfig(
            "detection resolution must be non-zero".into(),
        ));
    }
    if cfg.block_frames == 0 || cfg.block_frames > 256 {
        return Err(DetectorError::InvalidConfig(format!(
            "block_frames must be 1-256, got {}",
            cfg.block_frames
        )));
    }
    if cfg.theta_steps != THETA_STEPS {
        return Err(DetectorError::InvalidConfig(format!(
            "theta_steps must be {THETA_STEPS} to match the trig table"
        )));
    }
    if cfg.rho_max < 2 {
        return Err(DetectorError::InvalidConfig("rho_max too small".into()));
    }
    if cfg.max_candidates == 0 {
        return Err(DetectorError::InvalidConfig(
            "max_candidates must be non-zero".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_cfg() -> DetectConfig {
        DetectConfig {
            detect_w: 16,
            detect_h: 16,
            block_frames: 4,
            ..DetectConfig::default()
        }
    }

    #[test]
    fn backpressure_drops_newer_blocks_without_blocking() {
        // No worker is attached, so the first handoff parks in the pending
        // slot and every later completed block must be dropped.
        let cfg = small_cfg();
        let frames = cfg.block_frames;
        let mut engine = DetectionEngine::new_without_worker(cfg);

        let plane = vec![7u8; 16 * 16];
        for i in 0..frames {
            engine.push_frame(&plane, 16, 1_000 + u64::from(i));
        }
        assert_eq!(engine.dropped_blocks(), 0, "first block is handed off");

        for round in 0..3u64 {
            for i in 0..frames {
                engine.push_frame(&plane, 16, 2_000 + u64::from(i));
            }
            assert_eq!(engine.dropped_blocks(), round + 1);
        }
    }

    #[test]
    fn dropped_block_is_reused_for_the_next_cycle() {
        let cfg = small_cfg();
        let frames = cfg.block_frames;
        let mut engine = DetectionEngine::new_without_worker(cfg);

        let plane = vec![7u8; 16 * 16];
        for _ in 0..2 {
            for i in 0..frames {
                engine.push_frame(&plane, 16, u64::from(i));
            }
        }
        // The second block was dropped in place; the next frame restarts
        // accumulation on it from zero.
        engine.push_frame(&plane, 16, 9_000);
        assert_eq!(engine.active.frame_count(), 1);
        assert_eq!(engine.active.start_ms(), 9_000);
    }

    #[test]
    fn candidate_threshold_wraps_in_eight_bits() {
        // Plain cases.
        assert!(is_candidate(200, 10, 12, 5)); // 190 > 60
        assert!(!is_candidate(20, 20, 0, 5)); // diff 0
        assert!(!is_candidate(120, 27, 27, 5)); // 93 < 135

        // k*std = 635 wraps to 123, so a 128 excess passes even though it
        // would fail in wider arithmetic.
        assert!(is_candidate(255, 127, 127, 5));
        // One notch below the wrapped gate still fails.
        assert!(!is_candidate(250, 127, 127, 5)); // 123 > 123 is false
    }

    #[test]
    fn invalid_theta_steps_is_rejected() {
        let cfg = DetectConfig {
            theta_steps: 90,
            ..DetectConfig::default()
        };
        let err = validate(&cfg).unwrap_err();
        assert!(matches!(err, DetectorError::InvalidConfig(_)));
    }

    #[test]
    fn oversized_block_frames_is_rejected() {
        let cfg = DetectConfig {
            block_frames: 512,
            ..DetectConfig::default()
        };
        assert!(validate(&cfg).is_err());
    }
}
