//! Dark-frame capture: average N frames with the lens covered and write the
//! raw NV12 result for the stacker to subtract at night.

use anyhow::{Context, Result};
use ndarray::Array2;
use shared::capture::{CaptureError, FrameSource};
use shared::dark::DarkFrame;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Average `frames` captures into a raw dark file at `out`.
///
/// Transient acquire failures are retried with a short backoff; everything
/// else aborts the capture.
pub fn capture_dark(source: &mut dyn FrameSource, frames: u32, out: &Path) -> Result<()> {
    anyhow::ensure!(frames > 0, "dark capture needs at least one frame");
    let (w, h) = source.dimensions();
    let mut y_acc = vec![0u32; w * h];
    let mut uv_acc = vec![0u32; w * (h / 2)];

    let mut captured = 0u32;
    while captured < frames {
        let frame = match source.acquire() {
            Ok(f) => f,
            Err(CaptureError::NoFrame) => {
                std::thread::sleep(Duration::from_millis(10));
                continue;
            }
            Err(e) => return Err(e).context("dark capture aborted"),
        };
        for (acc, &s) in y_acc.iter_mut().zip(frame.luma) {
            *acc += u32::from(s);
        }
        for (acc, &s) in uv_acc.iter_mut().zip(frame.chroma) {
            *acc += u32::from(s);
        }
        captured += 1;
    }

    let luma = Array2::from_shape_fn((h, w), |(y, x)| (y_acc[y * w + x] / frames) as u8);
    let chroma = Array2::from_shape_fn((h / 2, w), |(y, x)| (uv_acc[y * w + x] / frames) as u8);
    DarkFrame::save(out, &luma, &chroma)
        .with_context(|| format!("writing dark frame to {}", out.display()))?;

    info!("dark frame ({frames} frames averaged) written to {}", out.display());
    Ok(())
}
