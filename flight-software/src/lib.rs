//! Station runtime: the ingest driver that feeds the detection engine and
//! the stacker from a live frame source, plus the dark-frame capture
//! utility.

pub mod darkcap;
pub mod ingest;

pub use ingest::IngestDriver;
