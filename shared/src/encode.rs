//! Image encoder collaborator contract and the production JPEG encoder.
//!
//! The stacker hands averaged NV12 planes to an [`ImageEncoder`]; the
//! production implementation converts to RGB with fixed-point BT.601
//! coefficients and writes a JPEG through the `image` crate. Tests inject
//! [`RecordingEncoder`] to observe the exact planes handed over.

use ndarray::Array2;
use std::io::BufWriter;
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("luma {luma_rows}x{luma_cols} and chroma {chroma_rows}x{chroma_cols} planes do not form an NV12 image")]
    BadDimensions {
        luma_rows: usize,
        luma_cols: usize,
        chroma_rows: usize,
        chroma_cols: usize,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("JPEG encode failed: {0}")]
    Image(#[from] image::ImageError),
}

/// Encodes one averaged NV12 stack into an image file.
///
/// Implementations are used from a single encoder thread per stacker; they
/// need not be safe for concurrent encodes to the same path.
pub trait ImageEncoder: Send {
    fn encode(
        &self,
        path: &Path,
        luma: &Array2<u8>,
        chroma: &Array2<u8>,
        quality: u8,
    ) -> Result<(), EncodeError>;
}

#[inline]
fn clamp8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// Production JPEG encoder (NV12 → RGB → JPEG).
#[derive(Debug, Default, Clone, Copy)]
pub struct JpegStackEncoder;

impl ImageEncoder for JpegStackEncoder {
    fn encode(
        &self,
        path: &Path,
        luma: &Array2<u8>,
        chroma: &Array2<u8>,
        quality: u8,
    ) -> Result<(), EncodeError> {
        let (h, w) = luma.dim();
        let (ch, cw) = chroma.dim();
        if ch != h / 2 || cw != w {
            return Err(EncodeError::BadDimensions {
                luma_rows: h,
                luma_cols: w,
                chroma_rows: ch,
                chroma_cols: cw,
            });
        }

        let mut img = image::RgbImage::new(w as u32, h as u32);
        for y in 0..h {
            for x in 0..w {
                let yv = i32::from(luma[[y, x]]);
                let u = i32::from(chroma[[y / 2, x & !1]]) - 128;
                let v = i32::from(chroma[[y / 2, (x & !1) + 1]]) - 128;
                img.put_pixel(
                    x as u32,
                    y as u32,
                    image::Rgb([
                        clamp8(yv + ((v * 1436) >> 10)),
                        clamp8(yv - ((u * 352 + v * 731) >> 10)),
                        clamp8(yv + ((u * 1815) >> 10)),
                    ]),
                );
            }
        }

        let file = BufWriter::new(std::fs::File::create(path)?);
        let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(file, quality);
        img.write_with_encoder(encoder)?;
        Ok(())
    }
}

/// One stack captured by [`RecordingEncoder`].
#[derive(Debug, Clone)]
pub struct CapturedStack {
    pub luma: Array2<u8>,
    pub chroma: Array2<u8>,
    pub quality: u8,
}

/// Test encoder that records the planes it is given and writes a small stub
/// file so the upload path still has something to stream.
#[derive(Clone, Default)]
pub struct RecordingEncoder {
    captured: Arc<Mutex<Vec<CapturedStack>>>,
}

impl RecordingEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn captured(&self) -> Vec<CapturedStack> {
        self.captured.lock().expect("encoder mutex").clone()
    }
}

impl ImageEncoder for RecordingEncoder {
    fn encode(
        &self,
        path: &Path,
        luma: &Array2<u8>,
        chroma: &Array2<u8>,
        quality: u8,
    ) -> Result<(), EncodeError> {
        std::fs::write(path, b"stub-jpeg")?;
        self.captured.lock().expect("encoder mutex").push(CapturedStack {
            luma: luma.clone(),
            chroma: chroma.clone(),
            quality,
        });
        Ok(())
    }
}
