use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Tuning parameters for the detection pipeline.
///
/// Immutable once the engine is built. The defaults match the RMS block
/// conventions (256 frames, 1° Hough bins) tuned for a high-gain embedded
/// sensor at 640×480 detection resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectConfig {
    /// Detection resolution width; the ingest loop downsamples to this.
    pub detect_w: usize,
    /// Detection resolution height.
    pub detect_h: usize,
    /// Frames accumulated per FTP block (the RMS standard is 256).
    pub block_frames: u32,
    /// Nominal camera frame rate.
    pub fps: f32,
    /// Candidate threshold multiplier: a pixel is a candidate when
    /// `max - avg > k_sigma * std`. 3 suits low-noise sensors; 5-6 suits
    /// high-gain embedded cameras.
    pub k_sigma: u32,
    /// Hough angular bins over [0°, 180°); must match the trig table.
    pub theta_steps: usize,
    /// Hough ρ range is [-rho_max, +rho_max]; must be at least the image
    /// diagonal (800 px at 640×480).
    pub rho_max: usize,
    /// Minimum votes for a cell to qualify as a Hough peak.
    pub peak_threshold: u16,
    /// Minimum votes for a peak to be accepted as a line.
    pub min_votes: u32,
    /// Minimum geometric streak length in pixels.
    pub min_length_px: u32,
    /// Skip the block entirely below this many candidates.
    pub min_candidates: usize,
    /// Candidate buffer capacity; hitting it is treated as a scene-wide
    /// brightness event rather than a meteor.
    pub max_candidates: usize,
    /// Staging directory for FF files awaiting upload.
    pub ff_tmp_dir: PathBuf,
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            detect_w: 640,
            detect_h: 480,
            block_frames: 256,
            fps: 25.0,
            k_sigma: 5,
            theta_steps: 180,
            rho_max: 900,
            peak_threshold: 8,
            min_votes: 10,
            min_length_px: 15,
            min_candidates: 5,
            max_candidates: 4096,
            ff_tmp_dir: PathBuf::from("/tmp/perseid-ff"),
        }
    }
}
