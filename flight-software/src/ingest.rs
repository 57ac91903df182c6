//! The ingest loop: acquire, downsample, dispatch, release.
//!
//! One long-lived thread drives the capture collaborator and feeds every
//! frame to both consumers: the detection engine gets a nearest-neighbour
//! downsampled luma plane, the stacker gets the full-resolution NV12 data.
//! The loop never performs file or network I/O; those live on the engine
//! and stacker worker threads.

use anyhow::{bail, Result};
use detector::DetectionEngine;
use ndarray::Array2;
use shared::algo::downsample_luma;
use shared::capture::FrameSource;
use shared::clock::Clock;
use stacker::Stacker;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::info;

/// Backoff after a transient acquire failure.
const ACQUIRE_RETRY: Duration = Duration::from_millis(10);

/// Owns the frame source, the clock and both pipeline stages for the life
/// of the process.
pub struct IngestDriver {
    source: Box<dyn FrameSource>,
    clock: Box<dyn Clock>,
    engine: DetectionEngine,
    stacker: Stacker,
    detect_buf: Array2<u8>,
}

impl IngestDriver {
    pub fn new(
        source: Box<dyn FrameSource>,
        clock: Box<dyn Clock>,
        engine: DetectionEngine,
        stacker: Stacker,
    ) -> Result<Self> {
        let (src_w, src_h) = source.dimensions();
        let (det_w, det_h) = (engine.config().detect_w, engine.config().detect_h);
        if src_w < det_w || src_h < det_h {
            bail!("capture {src_w}x{src_h} smaller than detection {det_w}x{det_h}");
        }
        if stacker.config().width != src_w || stacker.config().height != src_h {
            bail!(
                "stacker configured for {}x{} but capture delivers {src_w}x{src_h}",
                stacker.config().width,
                stacker.config().height
            );
        }
        Ok(Self {
            source,
            clock,
            engine,
            stacker,
            detect_buf: Array2::zeros((det_h, det_w)),
        })
    }

    /// Process one frame; returns false on a transient acquire failure.
    pub fn step(&mut self) -> bool {
        let frame = match self.source.acquire() {
            Ok(f) => f,
            Err(_) => return false,
        };
        let ts_ms = self.clock.now_ms();

        downsample_luma(
            frame.luma,
            frame.width,
            frame.height,
            frame.width,
            &mut self.detect_buf,
        );
        let detect = self
            .detect_buf
            .as_slice()
            .expect("detect buffer is contiguous");
        self.engine
            .push_frame(detect, self.detect_buf.ncols(), ts_ms);
        self.stacker.on_frame(frame.luma, frame.chroma, ts_ms);
        // The frame borrow ends here; the source reclaims its buffer on the
        // next acquire.
        true
    }

    /// Run until `running` is flipped, backing off briefly when the source
    /// has no frame ready.
    pub fn run(&mut self, running: &AtomicBool) {
        info!("ingest loop started");
        while running.load(Ordering::SeqCst) {
            if !self.step() && running.load(Ordering::SeqCst) {
                std::thread::sleep(ACQUIRE_RETRY);
            }
        }
        info!("ingest loop stopped");
    }
}
