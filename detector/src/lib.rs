//! Meteor streak detection over FTP statistic blocks.
//!
//! Frames arrive at detection resolution from the ingest loop and are
//! compressed 256-at-a-time into four per-pixel statistic planes (max,
//! max-frame, average, standard deviation). A worker thread thresholds the
//! finalised planes into candidate pixels, votes them through a fixed-point
//! Hough transform, validates the strongest line geometrically and publishes
//! the block as an RMS FF file plus a JSON event.
//!
//! The engine double-buffers two [`ftp::FtpBlock`]s: the ingest thread fills
//! one while the worker processes the other, and a completed block is
//! dropped rather than ever blocking ingest.

pub mod config;
pub mod engine;
pub mod error;
pub mod ftp;
pub mod geometry;
pub mod hough;

pub use config::DetectConfig;
pub use engine::DetectionEngine;
pub use error::DetectorError;
pub use hough::MeteorLine;
