//! Dark-frame loading for fixed-pattern noise subtraction.
//!
//! A dark frame is a raw NV12 capture taken with the optical path blocked:
//! a luma plane of `W·H` bytes followed by an interleaved chroma half-plane
//! of `W·(H/2)` bytes. The file is optional; a missing or wrong-sized file
//! disables subtraction with a warning rather than failing startup.

use ndarray::Array2;
use std::io::{Read, Write};
use std::path::Path;
use tracing::{info, warn};

/// Loaded dark-frame planes at full capture resolution.
#[derive(Debug, Clone)]
pub struct DarkFrame {
    pub luma: Array2<u8>,
    pub chroma: Array2<u8>,
}

impl DarkFrame {
    /// Expected raw file length for the given capture resolution.
    pub fn expected_len(width: usize, height: usize) -> usize {
        width * height + width * (height / 2)
    }

    /// Load a dark frame, returning `None` (with a log line) if the file is
    /// absent, unreadable or not exactly the expected length.
    pub fn load(path: &Path, width: usize, height: usize) -> Option<Self> {
        let expected = Self::expected_len(width, height);
        let meta = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(_) => {
                info!("no dark frame at {} (subtraction disabled)", path.display());
                return None;
            }
        };
        if meta.len() as usize != expected {
            warn!(
                "dark frame {} is {} bytes (expected {}), ignoring",
                path.display(),
                meta.len(),
                expected
            );
            return None;
        }

        let mut raw = Vec::with_capacity(expected);
        match std::fs::File::open(path).and_then(|mut f| f.read_to_end(&mut raw)) {
            Ok(_) if raw.len() == expected => {}
            _ => {
                warn!("failed to read dark frame {}, ignoring", path.display());
                return None;
            }
        }

        let chroma_raw = raw.split_off(width * height);
        let luma = Array2::from_shape_vec((height, width), raw).ok()?;
        let chroma = Array2::from_shape_vec((height / 2, width), chroma_raw).ok()?;
        info!("dark frame loaded from {}", path.display());
        Some(Self { luma, chroma })
    }

    /// Write planes as a raw dark-frame file (luma then chroma).
    pub fn save(path: &Path, luma: &Array2<u8>, chroma: &Array2<u8>) -> std::io::Result<()> {
        let mut f = std::fs::File::create(path)?;
        write_plane(&mut f, luma)?;
        write_plane(&mut f, chroma)?;
        Ok(())
    }
}

fn write_plane(f: &mut std::fs::File, plane: &Array2<u8>) -> std::io::Result<()> {
    match plane.as_slice() {
        Some(bytes) => f.write_all(bytes),
        None => {
            for row in plane.rows() {
                f.write_all(&row.to_vec())?;
            }
            Ok(())
        }
    }
}
