//! JSON event payloads POSTed to the receiver's `/event` endpoint.

use serde::{Deserialize, Serialize};

/// A validated line candidate as published with a meteor event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineCandidate {
    pub rho: i32,
    pub theta: u16,
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    pub length_px: u32,
    pub votes: u32,
}

/// Event published for each detected meteor streak (one per block at most).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeteorEvent {
    pub camera_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    /// Completion timestamp of the block (last frame).
    pub timestamp_ms: u64,
    /// Timestamp of the first frame in the block.
    pub block_start_ms: u64,
    pub candidate: LineCandidate,
}

impl MeteorEvent {
    pub fn new(
        camera_id: &str,
        timestamp_ms: u64,
        block_start_ms: u64,
        candidate: LineCandidate,
    ) -> Self {
        Self {
            camera_id: camera_id.to_string(),
            event_type: "meteor".to_string(),
            timestamp_ms,
            block_start_ms,
            candidate,
        }
    }
}

/// Motion-grid counters snapshotted when a stack completes.
///
/// Supplied by an external motion monitor collaborator; the stacker only
/// forwards the numbers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotionSummary {
    pub polls: u32,
    pub active_polls: u32,
    pub total_rois: u32,
    pub last_rois: u32,
}

/// Collaborator that accumulates motion statistics between stacks.
pub trait MotionProvider: Send + Sync {
    /// Return the counters accumulated since the previous call and reset
    /// them to zero.
    fn snapshot_and_reset(&self) -> MotionSummary;
}

/// Companion event published alongside each uploaded stack image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackEvent {
    pub camera_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp_ms: u64,
    pub filename: String,
    #[serde(flatten)]
    pub motion: Option<MotionSummary>,
}

impl StackEvent {
    pub fn new(
        camera_id: &str,
        timestamp_ms: u64,
        filename: String,
        motion: Option<MotionSummary>,
    ) -> Self {
        Self {
            camera_id: camera_id.to_string(),
            event_type: "stack".to_string(),
            timestamp_ms,
            filename,
            motion,
        }
    }
}
