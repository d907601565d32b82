//! Exclusion Filter
//!
//! Converts caller-supplied frame ranges ("already seen" regions) into the
//! set of sequence positions that must not appear in any stage.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::core::indexing::FrameIndex;
use crate::core::{
    normalize_video_id, CoreError, CoreResult, FrameNumber, PointId, SequencePosition, VideoId,
};

/// A frame range to exclude; `None` bounds are open
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExclusionRange {
    pub video_id: VideoId,
    #[serde(default)]
    pub start_frame: Option<FrameNumber>,
    #[serde(default)]
    pub end_frame: Option<FrameNumber>,
}

impl ExclusionRange {
    pub fn new(video_id: &str, start_frame: Option<FrameNumber>, end_frame: Option<FrameNumber>) -> Self {
        Self {
            video_id: video_id.to_string(),
            start_frame,
            end_frame,
        }
    }

    /// Every frame of a video
    pub fn whole_video(video_id: &str) -> Self {
        Self::new(video_id, None, None)
    }
}

// =============================================================================
// Exclusion Set
// =============================================================================

/// Excluded `(video, position)` pairs
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExclusionSet {
    entries: BTreeSet<(VideoId, SequencePosition)>,
}

impl ExclusionSet {
    pub fn contains(&self, video_id: &str, position: SequencePosition) -> bool {
        self.entries.contains(&(video_id.to_string(), position))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, SequencePosition)> {
        self.entries.iter().map(|(video, pos)| (video.as_str(), *pos))
    }

    /// Point ids of every excluded frame
    pub fn point_ids(&self, frames: &FrameIndex) -> BTreeSet<PointId> {
        self.iter()
            .filter_map(|(video, pos)| frames.point_id(video, pos).ok())
            .collect()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Resolves exclusion ranges against a frame index snapshot
pub struct ExclusionFilterBuilder<'a> {
    frames: &'a FrameIndex,
}

impl<'a> ExclusionFilterBuilder<'a> {
    pub fn new(frames: &'a FrameIndex) -> Self {
        Self { frames }
    }

    /// Builds the exclusion set
    ///
    /// A range with `start > end` rejects the request. Ranges naming an
    /// unknown video or lying outside its indexed frames contribute nothing.
    pub fn build(&self, ranges: &[ExclusionRange]) -> CoreResult<ExclusionSet> {
        let mut set = ExclusionSet::default();

        for range in ranges {
            if let (Some(start), Some(end)) = (range.start_frame, range.end_frame) {
                if start > end {
                    return Err(CoreError::InvalidRequest(format!(
                        "Exclusion range for {} starts at {} after its end {}",
                        range.video_id, start, end
                    )));
                }
            }

            let video_id = normalize_video_id(&range.video_id);
            match self
                .frames
                .positions_in_range(&video_id, range.start_frame, range.end_frame)
            {
                Ok(positions) => {
                    set.entries
                        .extend(positions.into_iter().map(|pos| (video_id.clone(), pos)));
                }
                Err(e) if !e.is_fatal() => {
                    tracing::warn!(video_id = %video_id, error = %e, "Ignoring exclusion range");
                }
                Err(e) => return Err(e),
            }
        }

        if !set.is_empty() {
            tracing::debug!(ranges = ranges.len(), excluded = set.len(), "Exclusion set built");
        }
        Ok(set)
    }
}
