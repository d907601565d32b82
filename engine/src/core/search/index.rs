//! Vector Index Abstraction
//!
//! The seam between the search engine and the external approximate
//! nearest-neighbour store. Backends translate [`IndexFilter`] into their own
//! query language and return raw points; shaping them into hits is the
//! formatter's job.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::{
    normalize_video_id, CoreResult, FrameNumber, PointId, ShotClass, DEFAULT_RELATED_END_FRAME,
};

use super::DetectedObject;

// =============================================================================
// Raw Points
// =============================================================================

/// A point as returned by the vector store
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawPoint {
    pub id: PointId,
    /// Similarity score; absent for scroll results
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl RawPoint {
    pub fn new(id: PointId, score: Option<f64>, payload: serde_json::Value) -> Self {
        Self { id, score, payload }
    }
}

/// Payload schema written alongside every keyframe embedding
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PointPayload {
    /// Video file name, usually with the `.mp4` extension
    pub video_name: String,
    pub frame_name: FrameNumber,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    /// Batch folder the keyframe was extracted into
    #[serde(default)]
    pub idx_folder: u32,
    #[serde(default)]
    pub s2t: Vec<String>,
    #[serde(default)]
    pub object: Vec<DetectedObject>,
    #[serde(default = "default_frame_class")]
    pub frame_class: i64,
    #[serde(default)]
    pub related_start_frame: FrameNumber,
    #[serde(default = "default_related_end_frame")]
    pub related_end_frame: FrameNumber,
}

fn default_frame_class() -> i64 {
    ShotClass::Main.code()
}

fn default_related_end_frame() -> FrameNumber {
    DEFAULT_RELATED_END_FRAME
}

impl PointPayload {
    pub fn new(video_name: &str, frame_name: FrameNumber) -> Self {
        Self {
            video_name: video_name.to_string(),
            frame_name,
            fps: None,
            idx_folder: 0,
            s2t: Vec::new(),
            object: Vec::new(),
            frame_class: default_frame_class(),
            related_start_frame: 0,
            related_end_frame: DEFAULT_RELATED_END_FRAME,
        }
    }

    pub fn with_shot(mut self, class: ShotClass, start: FrameNumber, end: FrameNumber) -> Self {
        self.frame_class = class.code();
        self.related_start_frame = start;
        self.related_end_frame = end;
        self
    }

    pub fn with_fps(mut self, fps: f64) -> Self {
        self.fps = Some(fps);
        self
    }

    pub fn with_transcript(mut self, lines: Vec<String>) -> Self {
        self.s2t = lines;
        self
    }

    pub fn with_objects(mut self, objects: Vec<DetectedObject>) -> Self {
        self.object = objects;
        self
    }

    /// Video id without the container extension
    pub fn video_id(&self) -> String {
        normalize_video_id(&self.video_name)
    }

    /// Shot class, `None` for codes outside the known set
    pub fn shot_class(&self) -> Option<ShotClass> {
        ShotClass::from_code(self.frame_class)
    }
}

// =============================================================================
// Index Filter
// =============================================================================

/// Backend-neutral query filter
///
/// All conditions must hold. `include_ids = Some(empty)` matches nothing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IndexFilter {
    /// The video name must contain at least one pattern (ignored when empty)
    pub video_patterns: Vec<String>,
    /// Case-insensitive transcript substring
    pub transcript_contains: Option<String>,
    pub exclude_shot_classes: Vec<ShotClass>,
    /// Restrict to these point ids
    pub include_ids: Option<BTreeSet<PointId>>,
    pub exclude_ids: BTreeSet<PointId>,
}

impl IndexFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_video_patterns(mut self, patterns: Vec<String>) -> Self {
        self.video_patterns = patterns;
        self
    }

    pub fn with_transcript(mut self, text: Option<&str>) -> Self {
        self.transcript_contains = text.map(str::to_string);
        self
    }

    pub fn excluding_shot_class(mut self, class: ShotClass) -> Self {
        if !self.exclude_shot_classes.contains(&class) {
            self.exclude_shot_classes.push(class);
        }
        self
    }

    pub fn with_include_ids(mut self, ids: impl IntoIterator<Item = PointId>) -> Self {
        self.include_ids = Some(ids.into_iter().collect());
        self
    }

    pub fn excluding_ids(mut self, ids: impl IntoIterator<Item = PointId>) -> Self {
        self.exclude_ids.extend(ids);
        self
    }

    /// True when the id restriction alone already rules out every point
    pub fn is_unsatisfiable(&self) -> bool {
        match &self.include_ids {
            Some(ids) => ids.iter().all(|id| self.exclude_ids.contains(id)),
            None => false,
        }
    }

    /// Id conditions
    pub fn admits_id(&self, id: PointId) -> bool {
        if self.exclude_ids.contains(&id) {
            return false;
        }
        self.include_ids
            .as_ref()
            .map_or(true, |ids| ids.contains(&id))
    }

    /// Evaluates every condition against a typed payload
    pub fn admits(&self, id: PointId, payload: &PointPayload) -> bool {
        if !self.admits_id(id) {
            return false;
        }

        if !self.video_patterns.is_empty()
            && !self
                .video_patterns
                .iter()
                .any(|pattern| payload.video_name.contains(pattern.as_str()))
        {
            return false;
        }

        if let Some(class) = payload.shot_class() {
            if self.exclude_shot_classes.contains(&class) {
                return false;
            }
        }

        match &self.transcript_contains {
            Some(needle) => {
                let needle = needle.to_lowercase();
                payload
                    .s2t
                    .iter()
                    .any(|line| line.to_lowercase().contains(&needle))
            }
            None => true,
        }
    }
}

// =============================================================================
// Vector Index Trait
// =============================================================================

/// External approximate nearest-neighbour store
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Short backend name for logs
    fn backend_name(&self) -> &'static str;

    /// Top `limit` points by similarity, best first
    async fn query(
        &self,
        vector: &[f32],
        limit: usize,
        filter: &IndexFilter,
    ) -> CoreResult<Vec<RawPoint>>;

    /// Points matching the filter in id order, without scores
    async fn scroll(&self, filter: &IndexFilter, limit: usize) -> CoreResult<Vec<RawPoint>>;

    /// Verifies the store is reachable and the collection exists
    async fn health_check(&self) -> CoreResult<()>;
}
