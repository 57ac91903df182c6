//! RMS-compatible FF binary block files.
//!
//! One FF file carries the four per-pixel statistic planes of a 256-frame
//! block behind a fixed nine-field little-endian header. Receivers feed
//! these files to unmodified RMS tooling, so the layout is bit-exact:
//!
//! ```text
//! int32   -1           version marker
//! uint32  nrows        height
//! uint32  ncols        width
//! uint32  nframes      256
//! uint32  first        0
//! uint32  camno        numeric camera id
//! uint32  decimation   1
//! uint32  interleave   0
//! uint32  fps_milli    round(fps * 1000)
//! u8[nrows*ncols]      max_pixel plane
//! u8[nrows*ncols]      max_frame plane
//! u8[nrows*ncols]      avg_pixel plane
//! u8[nrows*ncols]      std_pixel plane
//! ```

use chrono::{DateTime, Datelike, Timelike, Utc};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Version marker stored as the two's-complement encoding of -1.
const FF_VERSION: u32 = (-1i32) as u32;

/// Metadata for one FF file.
///
/// The station template is built once at startup; the date/time fields are
/// overwritten per block from the block's completion timestamp.
#[derive(Debug, Clone)]
pub struct FfHeader {
    pub station_id: String,
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub millisecond: u16,
    pub width: u32,
    pub height: u32,
    pub nframes: u32,
    pub fps: f32,
    pub camno: u32,
}

impl FfHeader {
    /// Copy the template with date/time fields taken from `ts_ms` (Unix
    /// epoch milliseconds, rendered in UTC).
    pub fn stamped(&self, ts_ms: u64) -> Self {
        let dt: DateTime<Utc> =
            DateTime::from_timestamp_millis(ts_ms as i64).unwrap_or_default();
        Self {
            year: dt.year() as u16,
            month: dt.month() as u8,
            day: dt.day() as u8,
            hour: dt.hour() as u8,
            minute: dt.minute() as u8,
            second: dt.second() as u8,
            millisecond: (ts_ms % 1000) as u16,
            ..self.clone()
        }
    }

    /// Canonical RMS filename:
    /// `FF_<station>_<YYYYMMDD>_<HHMMSS>_<mmm>_000000.bin`.
    pub fn filename(&self) -> String {
        format!(
            "FF_{}_{:04}{:02}{:02}_{:02}{:02}{:02}_{:03}_000000.bin",
            self.station_id,
            self.year,
            self.month,
            self.day,
            self.hour,
            self.minute,
            self.second,
            self.millisecond
        )
    }
}

/// The four finalised statistic planes of one block, each `width * height`
/// bytes in row-major order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatPlanes {
    pub max_pixel: Vec<u8>,
    pub max_frame: Vec<u8>,
    pub avg_pixel: Vec<u8>,
    pub std_pixel: Vec<u8>,
}

impl StatPlanes {
    pub fn new(width: usize, height: usize) -> Self {
        let n = width * height;
        Self {
            max_pixel: vec![0; n],
            max_frame: vec![0; n],
            avg_pixel: vec![0; n],
            std_pixel: vec![0; n],
        }
    }
}

/// The nine raw header fields as stored on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FfRawHeader {
    pub version: u32,
    pub nrows: u32,
    pub ncols: u32,
    pub nframes: u32,
    pub first: u32,
    pub camno: u32,
    pub decimation: u32,
    pub interleave: u32,
    pub fps_milli: u32,
}

/// Write an FF file to `path`.
pub fn write_ff(path: &Path, hdr: &FfHeader, planes: &StatPlanes) -> std::io::Result<()> {
    let mut w = BufWriter::new(std::fs::File::create(path)?);

    let fields = [
        FF_VERSION,
        hdr.height,
        hdr.width,
        hdr.nframes,
        0, // first frame number
        hdr.camno,
        1, // decimation
        0, // interleave
        (hdr.fps * 1000.0).round() as u32,
    ];
    for v in fields {
        w.write_all(&v.to_le_bytes())?;
    }

    w.write_all(&planes.max_pixel)?;
    w.write_all(&planes.max_frame)?;
    w.write_all(&planes.avg_pixel)?;
    w.write_all(&planes.std_pixel)?;
    w.flush()
}

/// Read an FF file back. Used by the receiver-side tooling and by the
/// round-trip tests.
pub fn read_ff(path: &Path) -> std::io::Result<(FfRawHeader, StatPlanes)> {
    let mut r = BufReader::new(std::fs::File::open(path)?);

    let mut fields = [0u32; 9];
    for v in fields.iter_mut() {
        let mut buf = [0u8; 4];
        r.read_exact(&mut buf)?;
        *v = u32::from_le_bytes(buf);
    }
    let hdr = FfRawHeader {
        version: fields[0],
        nrows: fields[1],
        ncols: fields[2],
        nframes: fields[3],
        first: fields[4],
        camno: fields[5],
        decimation: fields[6],
        interleave: fields[7],
        fps_milli: fields[8],
    };

    let n = hdr.nrows as usize * hdr.ncols as usize;
    let mut planes = StatPlanes {
        max_pixel: vec![0; n],
        max_frame: vec![0; n],
        avg_pixel: vec![0; n],
        std_pixel: vec![0; n],
    };
    r.read_exact(&mut planes.max_pixel)?;
    r.read_exact(&mut planes.max_frame)?;
    r.read_exact(&mut planes.avg_pixel)?;
    r.read_exact(&mut planes.std_pixel)?;
    Ok((hdr, planes))
}
