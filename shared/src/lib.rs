//! Shared components for the perseid meteor station.
//!
//! This crate holds the pieces used by more than one stage of the pipeline:
//! integer math helpers, the collaborator contracts (capture, clock, image
//! encoder), the RMS FF file format, the HTTP push client and the event
//! payload types.

pub mod algo;
pub mod capture;
pub mod clock;
pub mod dark;
pub mod encode;
pub mod events;
pub mod ff;
pub mod push;
pub mod test_util;
