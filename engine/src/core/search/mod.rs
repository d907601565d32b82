//! Search System Module
//!
//! Temporal multi-stage keyframe search over an external vector index.
//!
//! A temporal request carries one query vector per narrative segment. Stage 1
//! is a plain similarity query; every later stage is restricted to frames that
//! follow an already matched frame of the same video within a bounded window,
//! and its hits are fused into running chains.

pub mod exclusion;
pub mod formatter;
pub mod fusion;
pub mod index;
pub mod memory;
pub mod qdrant;
pub mod temporal;

use serde::{Deserialize, Serialize};

use crate::core::{
    format_keyframe_id, FrameNumber, FrameRecord, PointId, SequencePosition, ShotClass, VideoId,
    DEFAULT_RELATED_END_FRAME,
};

pub use exclusion::{ExclusionFilterBuilder, ExclusionRange, ExclusionSet};
pub use formatter::ResultFormatter;
pub use fusion::{dedup_by_terminal, finalize_chains, sort_chains, Chain, ScoreFusion};
pub use index::{IndexFilter, PointPayload, RawPoint, VectorIndex};
pub use memory::{MemoryIndex, StoredPoint};
pub use temporal::TemporalSearchEngine;

// =============================================================================
// Search Hit
// =============================================================================

/// Object detection attached to a keyframe
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedObject {
    /// Class label
    #[serde(alias = "object")]
    pub label: String,
    /// Detector confidence
    #[serde(default, alias = "conf")]
    pub confidence: f64,
    /// Bounding box as stored by the detector
    #[serde(default)]
    pub bbox: Vec<f64>,
}

/// A single keyframe matched by one stage
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    /// Vector store point id
    pub point_id: PointId,
    pub video_id: VideoId,
    pub frame_number: FrameNumber,
    /// Zero-padded frame number
    pub keyframe_id: String,
    pub sequence_position: SequencePosition,
    /// Similarity score reported by the store (0.0 for scrolls)
    pub score: f64,
    pub shot_class: ShotClass,
    pub related_start_frame: FrameNumber,
    pub related_end_frame: FrameNumber,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    /// Speech-to-text lines aligned to this keyframe
    #[serde(default)]
    pub transcript: Vec<String>,
    #[serde(default)]
    pub objects: Vec<DetectedObject>,
}

impl SearchHit {
    /// Creates a hit for a main-content frame with no related shot bounds
    pub fn new(
        video_id: &str,
        frame_number: FrameNumber,
        sequence_position: SequencePosition,
        score: f64,
    ) -> Self {
        Self {
            point_id: 0,
            video_id: video_id.to_string(),
            frame_number,
            keyframe_id: format_keyframe_id(frame_number),
            sequence_position,
            score,
            shot_class: ShotClass::Main,
            related_start_frame: 0,
            related_end_frame: DEFAULT_RELATED_END_FRAME,
            fps: None,
            transcript: Vec::new(),
            objects: Vec::new(),
        }
    }

    pub fn with_point_id(mut self, point_id: PointId) -> Self {
        self.point_id = point_id;
        self
    }

    /// Sets shot class and related range
    pub fn with_shot(mut self, class: ShotClass, start: FrameNumber, end: FrameNumber) -> Self {
        self.shot_class = class;
        self.related_start_frame = start;
        self.related_end_frame = end;
        self
    }

    pub fn with_fps(mut self, fps: f64) -> Self {
        self.fps = Some(fps);
        self
    }

    pub fn with_transcript(mut self, lines: Vec<String>) -> Self {
        self.transcript = lines;
        self
    }

    pub fn with_objects(mut self, objects: Vec<DetectedObject>) -> Self {
        self.objects = objects;
        self
    }

    /// Key used for deduplication
    pub fn frame_key(&self) -> (&str, FrameNumber) {
        (&self.video_id, self.frame_number)
    }

    /// Frame record view of this hit
    pub fn to_record(&self) -> FrameRecord {
        FrameRecord {
            video_id: self.video_id.clone(),
            frame_number: self.frame_number,
            sequence_position: self.sequence_position,
            shot_class: self.shot_class,
            related_start_frame: self.related_start_frame,
            related_end_frame: self.related_end_frame,
            embedding_ref: self.point_id,
        }
    }

    /// Range covering the shot this frame belongs to
    pub fn shot_range(&self) -> ExclusionRange {
        ExclusionRange::new(
            &self.video_id,
            Some(self.related_start_frame),
            Some(self.related_end_frame),
        )
    }
}

// =============================================================================
// Search Filters
// =============================================================================

/// Filters applied to every stage of a search
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchFilters {
    /// Video id patterns; entries may be comma-separated lists
    #[serde(default)]
    pub video_filter: Vec<String>,
    /// Substring that the frame transcript must contain
    #[serde(default)]
    pub metadata_filter: Option<String>,
    /// Exclude anchor shots; `None` uses the configured default
    #[serde(default)]
    pub exclude_shot_class: Option<bool>,
    /// Regions already shown to the caller
    #[serde(default)]
    pub exclusion_ranges: Vec<ExclusionRange>,
}

impl SearchFilters {
    /// Flattened, trimmed video patterns
    pub fn video_patterns(&self) -> Vec<String> {
        self.video_filter
            .iter()
            .flat_map(|entry| entry.split(','))
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Trimmed transcript filter, if any
    pub fn transcript_filter(&self) -> Option<&str> {
        self.metadata_filter
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

// =============================================================================
// Requests
// =============================================================================

/// Multi-segment temporal search request
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchTemporalRequest {
    /// One embedding per narrative segment, in story order
    pub queries: Vec<Vec<f32>>,
    /// Hits per stage; `None` uses the configured default
    #[serde(default)]
    pub top_k: Option<usize>,
    /// Max frame gap between consecutive stages; `None` uses the configured default
    #[serde(default)]
    pub window_size: Option<FrameNumber>,
    #[serde(flatten)]
    pub filters: SearchFilters,
}

impl SearchTemporalRequest {
    pub fn new(queries: Vec<Vec<f32>>) -> Self {
        Self {
            queries,
            ..Default::default()
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_window_size(mut self, window_size: FrameNumber) -> Self {
        self.window_size = Some(window_size);
        self
    }

    pub fn with_filters(mut self, filters: SearchFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn excluding(mut self, range: ExclusionRange) -> Self {
        self.filters.exclusion_ranges.push(range);
        self
    }
}

/// Single-vector similarity search request
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub query: Vec<f32>,
    #[serde(default)]
    pub top_k: Option<usize>,
    /// Keep hits of the same shot together; `None` uses the configured default
    #[serde(default)]
    pub group_by_shot: Option<bool>,
    #[serde(flatten)]
    pub filters: SearchFilters,
}

impl SearchRequest {
    pub fn new(query: Vec<f32>) -> Self {
        Self {
            query,
            ..Default::default()
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_group_by_shot(mut self, group: bool) -> Self {
        self.group_by_shot = Some(group);
        self
    }

    pub fn with_filters(mut self, filters: SearchFilters) -> Self {
        self.filters = filters;
        self
    }
}

/// Boundary of a scroll range, either a frame number or a timestamp
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScrollBound {
    Frame(FrameNumber),
    /// `MM:SS`, `HH:MM:SS` or seconds, converted with the video's fps
    Time(String),
}

/// Browse the frames of one video without a query vector
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollRequest {
    pub video_id: VideoId,
    #[serde(default)]
    pub from: Option<ScrollBound>,
    #[serde(default)]
    pub to: Option<ScrollBound>,
    /// Maximum number of frames; `None` uses the configured top-k
    #[serde(default)]
    pub limit: Option<usize>,
    /// `videoFilter` is ignored; the scroll is already scoped to one video
    #[serde(flatten)]
    pub filters: SearchFilters,
}

impl ScrollRequest {
    pub fn new(video_id: &str) -> Self {
        Self {
            video_id: video_id.to_string(),
            ..Default::default()
        }
    }

    pub fn between(mut self, from: Option<ScrollBound>, to: Option<ScrollBound>) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_filters(mut self, filters: SearchFilters) -> Self {
        self.filters = filters;
        self
    }
}

// =============================================================================
// Response
// =============================================================================

/// Result of a temporal search, best chain first
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchTemporalResponse {
    pub chains: Vec<Chain>,
    pub stage_count: usize,
    pub elapsed_ms: u64,
}
