//! Keyscout Core Type Definitions
//!
//! Defines fundamental types used throughout the engine.

use serde::{Deserialize, Serialize};

// =============================================================================
// ID Types
// =============================================================================

/// Video identifier (keyframe directory name, without container extension)
pub type VideoId = String;

/// Raw frame number as found in the keyframe storage layout
pub type FrameNumber = u32;

/// Dense 0-based rank of a frame among all frames of its video
pub type SequencePosition = usize;

/// Vector store point identifier
pub type PointId = u64;

// =============================================================================
// Constants
// =============================================================================

/// Width of the zero-padded keyframe id representation
pub const FRAME_NUMBER_WIDTH: usize = 5;

/// Maximum frame gap between consecutive stages of a chain
pub const DEFAULT_WINDOW_SIZE: FrameNumber = 1000;

/// Default number of hits requested per stage
pub const DEFAULT_TOP_K: usize = 100;

/// Related range end used at ingestion when a frame has no shot record
pub const DEFAULT_RELATED_END_FRAME: FrameNumber = 50_000;

/// Container extension stored in `video_name` payloads
pub const VIDEO_EXTENSION: &str = ".mp4";

// =============================================================================
// Shot Class
// =============================================================================

/// Category of the shot a keyframe belongs to
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShotClass {
    /// Anchor / presenter segment
    Anchor,
    /// News summary segment
    Summary,
    /// Main content
    #[default]
    Main,
}

impl ShotClass {
    /// Maps a storage code to a shot class
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(ShotClass::Anchor),
            1 => Some(ShotClass::Summary),
            2 => Some(ShotClass::Main),
            _ => None,
        }
    }

    /// Returns the storage code
    pub fn code(&self) -> i64 {
        match self {
            ShotClass::Anchor => 0,
            ShotClass::Summary => 1,
            ShotClass::Main => 2,
        }
    }
}

// =============================================================================
// Frame Record
// =============================================================================

/// One indexed keyframe
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameRecord {
    pub video_id: VideoId,
    pub frame_number: FrameNumber,
    pub sequence_position: SequencePosition,
    pub shot_class: ShotClass,
    pub related_start_frame: FrameNumber,
    pub related_end_frame: FrameNumber,
    /// Point id of the frame's embedding in the vector store
    pub embedding_ref: PointId,
}

// =============================================================================
// Frame Number Helpers
// =============================================================================

/// Formats a frame number as a fixed-width keyframe id ("00042")
pub fn format_keyframe_id(frame: FrameNumber) -> String {
    format!("{:0width$}", frame, width = FRAME_NUMBER_WIDTH)
}

/// Parses a padded or unpadded decimal frame number
pub fn parse_frame_number(raw: &str) -> Option<FrameNumber> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    trimmed.parse().ok()
}

/// Strips the container extension from a stored video name
pub fn normalize_video_id(raw: &str) -> VideoId {
    raw.trim()
        .strip_suffix(VIDEO_EXTENSION)
        .unwrap_or(raw.trim())
        .to_string()
}
