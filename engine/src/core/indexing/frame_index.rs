//! Frame Index Module
//!
//! Maps sparse per-video frame numbers to dense sequence positions and to
//! vector store point ids. Built once from the storage layout and read-only
//! afterwards; a rebuild produces a new index that replaces the served
//! snapshot wholesale.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::core::{CoreError, CoreResult, FrameNumber, PointId, SequencePosition, VideoId};

// =============================================================================
// Boundary
// =============================================================================

/// How to resolve a frame number that is not indexed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Boundary {
    /// Only indexed frame numbers resolve
    Exact,
    /// Nearest indexed frame at or below the requested one (range starts)
    Floor,
    /// Nearest indexed frame at or above the requested one (range ends)
    Ceiling,
}

// =============================================================================
// Video Frames
// =============================================================================

/// Sorted unique frame numbers of one video
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoFrames {
    /// Point id of the first frame; later frames follow densely
    base_id: PointId,
    frames: Vec<FrameNumber>,
}

impl VideoFrames {
    /// Indexed frame numbers in ascending order
    pub fn frames(&self) -> &[FrameNumber] {
        &self.frames
    }

    pub fn first_frame(&self) -> Option<FrameNumber> {
        self.frames.first().copied()
    }

    pub fn last_frame(&self) -> Option<FrameNumber> {
        self.frames.last().copied()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    fn resolve(&self, frame: FrameNumber, boundary: Boundary) -> Option<SequencePosition> {
        match self.frames.binary_search(&frame) {
            Ok(position) => Some(position),
            Err(insert_at) => match boundary {
                Boundary::Exact => None,
                Boundary::Floor => insert_at.checked_sub(1),
                Boundary::Ceiling => (insert_at < self.frames.len()).then_some(insert_at),
            },
        }
    }
}

// =============================================================================
// Frame Index
// =============================================================================

/// Immutable per-video frame number index
#[derive(Clone, Debug, Default)]
pub struct FrameIndex {
    videos: HashMap<VideoId, VideoFrames>,
    /// (base point id, video) sorted by base id, for reverse lookups
    bases: Vec<(PointId, VideoId)>,
    total_frames: usize,
}

impl FrameIndex {
    /// Creates an empty index
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds an index from a `{video: [frames]}` manifest
    ///
    /// Videos are assigned point ids in sorted video id order.
    pub fn from_manifest(manifest: BTreeMap<VideoId, Vec<FrameNumber>>) -> CoreResult<Self> {
        let mut builder = FrameIndexBuilder::new();
        for (video_id, frames) in manifest {
            builder.add_video(&video_id, frames)?;
        }
        Ok(builder.build())
    }

    /// Returns the frames of a video
    pub fn frames_of(&self, video_id: &str) -> CoreResult<&VideoFrames> {
        self.videos
            .get(video_id)
            .ok_or_else(|| CoreError::NotFound(format!("Video not indexed: {}", video_id)))
    }

    pub fn contains_video(&self, video_id: &str) -> bool {
        self.videos.contains_key(video_id)
    }

    /// Returns all indexed video ids in sorted order
    pub fn video_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.videos.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn video_count(&self) -> usize {
        self.videos.len()
    }

    pub fn frame_count(&self) -> usize {
        self.total_frames
    }

    /// Resolves a frame number to its sequence position
    ///
    /// `Floor` and `Ceiling` fall back to the nearest indexed frame below or
    /// above the requested one; a request outside the indexed frames in that
    /// direction is `NotFound`.
    pub fn resolve(
        &self,
        video_id: &str,
        frame: FrameNumber,
        boundary: Boundary,
    ) -> CoreResult<SequencePosition> {
        let video = self.frames_of(video_id)?;
        video.resolve(frame, boundary).ok_or_else(|| {
            CoreError::NotFound(format!(
                "Frame {} of {} has no {:?} match",
                frame, video_id, boundary
            ))
        })
    }

    /// Exact sequence position of an indexed frame
    pub fn position_of(&self, video_id: &str, frame: FrameNumber) -> CoreResult<SequencePosition> {
        self.resolve(video_id, frame, Boundary::Exact)
    }

    /// Frame number at a sequence position
    pub fn frame_at(&self, video_id: &str, position: SequencePosition) -> CoreResult<FrameNumber> {
        let video = self.frames_of(video_id)?;
        video.frames.get(position).copied().ok_or_else(|| {
            CoreError::NotFound(format!("Position {} out of range for {}", position, video_id))
        })
    }

    /// Vector store point id of a sequence position
    pub fn point_id(&self, video_id: &str, position: SequencePosition) -> CoreResult<PointId> {
        let video = self.frames_of(video_id)?;
        if position >= video.frames.len() {
            return Err(CoreError::NotFound(format!(
                "Position {} out of range for {}",
                position, video_id
            )));
        }
        Ok(video.base_id + position as PointId)
    }

    /// Reverse lookup of a point id to `(video, position)`
    pub fn locate(&self, point_id: PointId) -> Option<(&str, SequencePosition)> {
        let idx = match self.bases.binary_search_by(|(base, _)| base.cmp(&point_id)) {
            Ok(idx) => idx,
            Err(0) => return None,
            Err(insert_at) => insert_at - 1,
        };
        let (base, video_id) = &self.bases[idx];
        let video = self.videos.get(video_id)?;
        let position = (point_id - base) as usize;
        (position < video.frames.len()).then_some((video_id.as_str(), position))
    }

    /// Sequence positions covered by a frame range
    ///
    /// `None` bounds mean the first / last indexed frame. The start resolves
    /// with `Floor` and the end with `Ceiling`; a range that only partially
    /// overlaps the indexed frames is clamped to them.
    pub fn positions_in_range(
        &self,
        video_id: &str,
        first_frame: Option<FrameNumber>,
        last_frame: Option<FrameNumber>,
    ) -> CoreResult<Vec<SequencePosition>> {
        if let (Some(first), Some(last)) = (first_frame, last_frame) {
            if first > last {
                return Err(CoreError::InvalidRequest(format!(
                    "Frame range start {} is after end {} for {}",
                    first, last, video_id
                )));
            }
        }

        let video = self.frames_of(video_id)?;
        let (Some(min_frame), Some(max_frame)) = (video.first_frame(), video.last_frame()) else {
            return Err(CoreError::NotFound(format!("Video has no frames: {}", video_id)));
        };

        let first = first_frame.unwrap_or(min_frame);
        let last = last_frame.unwrap_or(max_frame);
        if first > max_frame || last < min_frame {
            return Err(CoreError::NotFound(format!(
                "Frames {}..={} are outside the indexed range {}..={} of {}",
                first, last, min_frame, max_frame, video_id
            )));
        }

        let start = video.resolve(first, Boundary::Floor).unwrap_or(0);
        let end = video
            .resolve(last, Boundary::Ceiling)
            .unwrap_or(video.frames.len() - 1);

        Ok((start..=end).collect())
    }

    /// Point ids covered by a frame range (see [`positions_in_range`](Self::positions_in_range))
    pub fn point_ids_in_range(
        &self,
        video_id: &str,
        first_frame: Option<FrameNumber>,
        last_frame: Option<FrameNumber>,
    ) -> CoreResult<Vec<PointId>> {
        let base = self.frames_of(video_id)?.base_id;
        Ok(self
            .positions_in_range(video_id, first_frame, last_frame)?
            .into_iter()
            .map(|position| base + position as PointId)
            .collect())
    }

    /// Point ids of indexed frames `f` with `first <= f <= last`
    ///
    /// Unlike [`point_ids_in_range`](Self::point_ids_in_range) the bounds are
    /// never widened; an unknown video or an empty interval yields nothing.
    pub fn point_ids_within(
        &self,
        video_id: &str,
        first_frame: FrameNumber,
        last_frame: FrameNumber,
    ) -> Vec<PointId> {
        let Some(video) = self.videos.get(video_id) else {
            return Vec::new();
        };
        let start = video.frames.partition_point(|f| *f < first_frame);
        let end = video.frames.partition_point(|f| *f <= last_frame);
        (start..end.max(start))
            .map(|position| video.base_id + position as PointId)
            .collect()
    }
}

// =============================================================================
// Frame Index Builder
// =============================================================================

/// Incrementally collects videos, then freezes them into a [`FrameIndex`]
#[derive(Debug, Default)]
pub struct FrameIndexBuilder {
    videos: Vec<(VideoId, Vec<FrameNumber>)>,
    seen: HashMap<VideoId, usize>,
}

impl FrameIndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one video's frame numbers (any order)
    ///
    /// Fails with `IndexError` on duplicate frame numbers or a repeated video.
    pub fn add_video(&mut self, video_id: &str, mut frames: Vec<FrameNumber>) -> CoreResult<()> {
        if self.seen.contains_key(video_id) {
            return Err(CoreError::IndexError(format!(
                "Video {} was added twice",
                video_id
            )));
        }

        frames.sort_unstable();
        if let Some(pair) = frames.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(CoreError::IndexError(format!(
                "Duplicate frame number {} in {}",
                pair[0], video_id
            )));
        }

        if frames.is_empty() {
            warn!(video_id = %video_id, "Indexing video without frames");
        }

        self.seen.insert(video_id.to_string(), self.videos.len());
        self.videos.push((video_id.to_string(), frames));
        Ok(())
    }

    /// Number of videos added so far
    pub fn len(&self) -> usize {
        self.videos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.videos.is_empty()
    }

    /// Freezes the collected videos, assigning point ids in insertion order
    pub fn build(self) -> FrameIndex {
        let mut videos = HashMap::with_capacity(self.videos.len());
        let mut bases = Vec::with_capacity(self.videos.len());
        let mut next_id: PointId = 0;

        for (video_id, frames) in self.videos {
            let count = frames.len();
            if count > 0 {
                bases.push((next_id, video_id.clone()));
            }
            videos.insert(
                video_id,
                VideoFrames {
                    base_id: next_id,
                    frames,
                },
            );
            next_id += count as PointId;
        }

        FrameIndex {
            videos,
            bases,
            total_frames: next_id as usize,
        }
    }
}

// =============================================================================
// Frame Index Store
// =============================================================================

/// Shared, swappable frame index
///
/// Readers take an `Arc` snapshot and keep it for the whole request, so a
/// rebuild never mutates an index that is being read.
#[derive(Clone, Debug, Default)]
pub struct FrameIndexStore {
    current: Arc<RwLock<Arc<FrameIndex>>>,
}

impl FrameIndexStore {
    pub fn new(index: FrameIndex) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(index))),
        }
    }

    /// Returns the currently served index
    pub async fn snapshot(&self) -> Arc<FrameIndex> {
        self.current.read().await.clone()
    }

    /// Serves a new index to subsequent requests
    pub async fn replace(&self, index: FrameIndex) {
        let mut guard = self.current.write().await;
        info!(
            videos = index.video_count(),
            frames = index.frame_count(),
            "Frame index replaced"
        );
        *guard = Arc::new(index);
    }

    /// Builds a new index and serves it; on failure the previous index stays
    pub async fn rebuild_with<F>(&self, build: F) -> CoreResult<()>
    where
        F: FnOnce() -> CoreResult<FrameIndex>,
    {
        match build() {
            Ok(index) => {
                self.replace(index).await;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Frame index rebuild failed, keeping previous snapshot");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_index() -> FrameIndex {
        let mut builder = FrameIndexBuilder::new();
        builder.add_video("L01_V001", vec![10, 20, 30]).unwrap();
        builder.add_video("L01_V002", vec![0, 50, 100, 150]).unwrap();
        builder.build()
    }

    // -------------------------------------------------------------------------
    // Build Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_build_assigns_dense_positions() {
        let index = sample_index();

        assert_eq!(index.video_count(), 2);
        assert_eq!(index.frame_count(), 7);
        assert_eq!(index.position_of("L01_V001", 10).unwrap(), 0);
        assert_eq!(index.position_of("L01_V001", 30).unwrap(), 2);
        assert_eq!(index.position_of("L01_V002", 150).unwrap(), 3);
    }

    #[test]
    fn test_build_sorts_unordered_frames() {
        let mut builder = FrameIndexBuilder::new();
        builder.add_video("V", vec![30, 10, 20]).unwrap();
        let index = builder.build();

        assert_eq!(index.frames_of("V").unwrap().frames(), &[10, 20, 30]);
    }

    #[test]
    fn test_build_rejects_duplicate_frames() {
        let mut builder = FrameIndexBuilder::new();
        let result = builder.add_video("V", vec![10, 20, 20]);
        assert!(matches!(result, Err(CoreError::IndexError(_))));
    }

    #[test]
    fn test_build_rejects_duplicate_video() {
        let mut builder = FrameIndexBuilder::new();
        builder.add_video("V", vec![1]).unwrap();
        let result = builder.add_video("V", vec![2]);
        assert!(matches!(result, Err(CoreError::IndexError(_))));
    }

    #[test]
    fn test_point_ids_follow_insertion_order() {
        let index = sample_index();

        assert_eq!(index.point_id("L01_V001", 0).unwrap(), 0);
        assert_eq!(index.point_id("L01_V001", 2).unwrap(), 2);
        assert_eq!(index.point_id("L01_V002", 0).unwrap(), 3);
        assert!(index.point_id("L01_V001", 3).is_err());
    }

    #[test]
    fn test_locate_reverses_point_id() {
        let index = sample_index();

        assert_eq!(index.locate(0), Some(("L01_V001", 0)));
        assert_eq!(index.locate(4), Some(("L01_V002", 1)));
        assert_eq!(index.locate(6), Some(("L01_V002", 3)));
        assert_eq!(index.locate(7), None);
    }

    #[test]
    fn test_from_manifest_uses_sorted_video_order() {
        let mut manifest = BTreeMap::new();
        manifest.insert("B".to_string(), vec![1, 2]);
        manifest.insert("A".to_string(), vec![5]);
        let index = FrameIndex::from_manifest(manifest).unwrap();

        assert_eq!(index.point_id("A", 0).unwrap(), 0);
        assert_eq!(index.point_id("B", 0).unwrap(), 1);
        assert_eq!(index.video_ids(), vec!["A", "B"]);
    }

    // -------------------------------------------------------------------------
    // Resolve Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_resolve_floor_and_ceiling() {
        let index = sample_index();

        assert_eq!(index.resolve("L01_V001", 15, Boundary::Floor).unwrap(), 0);
        assert_eq!(index.resolve("L01_V001", 15, Boundary::Ceiling).unwrap(), 1);
        assert_eq!(index.resolve("L01_V001", 20, Boundary::Floor).unwrap(), 1);
        assert_eq!(index.resolve("L01_V001", 20, Boundary::Ceiling).unwrap(), 1);
    }

    #[test]
    fn test_resolve_outside_range_fails() {
        let index = sample_index();

        assert!(matches!(
            index.resolve("L01_V001", 5, Boundary::Floor),
            Err(CoreError::NotFound(_))
        ));
        assert!(matches!(
            index.resolve("L01_V001", 35, Boundary::Ceiling),
            Err(CoreError::NotFound(_))
        ));
        assert_eq!(index.resolve("L01_V001", 5, Boundary::Ceiling).unwrap(), 0);
        assert_eq!(index.resolve("L01_V001", 35, Boundary::Floor).unwrap(), 2);
    }

    #[test]
    fn test_resolve_exact_missing_frame() {
        let index = sample_index();
        assert!(index.resolve("L01_V001", 15, Boundary::Exact).is_err());
    }

    #[test]
    fn test_resolve_unknown_video() {
        let index = sample_index();
        assert!(matches!(
            index.resolve("L99_V999", 10, Boundary::Floor),
            Err(CoreError::NotFound(_))
        ));
    }

    // -------------------------------------------------------------------------
    // Range Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_positions_in_range_exact_bounds() {
        let index = sample_index();
        assert_eq!(
            index.positions_in_range("L01_V002", Some(50), Some(100)).unwrap(),
            vec![1, 2]
        );
    }

    #[test]
    fn test_positions_in_range_widens_to_enclosing_frames() {
        let index = sample_index();
        // 60 floors to 50, 110 ceils to 150
        assert_eq!(
            index.positions_in_range("L01_V002", Some(60), Some(110)).unwrap(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_positions_in_range_open_ended() {
        let index = sample_index();

        assert_eq!(
            index.positions_in_range("L01_V001", None, None).unwrap(),
            vec![0, 1, 2]
        );
        assert_eq!(
            index.positions_in_range("L01_V001", Some(20), None).unwrap(),
            vec![1, 2]
        );
        assert_eq!(
            index.positions_in_range("L01_V001", None, Some(10)).unwrap(),
            vec![0]
        );
    }

    #[test]
    fn test_positions_in_range_clamps_partial_overlap() {
        let index = sample_index();

        assert_eq!(
            index.positions_in_range("L01_V001", Some(0), Some(15)).unwrap(),
            vec![0, 1]
        );
        assert_eq!(
            index.positions_in_range("L01_V001", Some(25), Some(1000)).unwrap(),
            vec![1, 2]
        );
    }

    #[test]
    fn test_positions_in_range_fully_outside() {
        let index = sample_index();

        assert!(matches!(
            index.positions_in_range("L01_V001", Some(31), Some(1031)),
            Err(CoreError::NotFound(_))
        ));
        assert!(matches!(
            index.positions_in_range("L01_V001", Some(0), Some(5)),
            Err(CoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_positions_in_range_reversed_bounds() {
        let index = sample_index();
        assert!(matches!(
            index.positions_in_range("L01_V001", Some(30), Some(10)),
            Err(CoreError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_point_ids_in_range() {
        let index = sample_index();
        assert_eq!(
            index.point_ids_in_range("L01_V002", Some(50), Some(100)).unwrap(),
            vec![4, 5]
        );
    }

    #[test]
    fn test_point_ids_within_does_not_widen() {
        let index = sample_index();
        assert_eq!(index.point_ids_within("L01_V002", 1, 120), vec![4, 5]);
        assert_eq!(index.point_ids_within("L01_V002", 150, 900), vec![6]);
        assert!(index.point_ids_within("L01_V002", 151, 900).is_empty());
        assert!(index.point_ids_within("L01_V002", 60, 40).is_empty());
        assert!(index.point_ids_within("L09_V001", 0, 10).is_empty());
    }

    // -------------------------------------------------------------------------
    // Store Tests
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_store_snapshot_survives_replace() {
        let store = FrameIndexStore::new(sample_index());
        let before = store.snapshot().await;

        let mut builder = FrameIndexBuilder::new();
        builder.add_video("L02_V001", vec![1, 2, 3]).unwrap();
        store.replace(builder.build()).await;

        let after = store.snapshot().await;
        assert!(before.contains_video("L01_V001"));
        assert!(!after.contains_video("L01_V001"));
        assert!(after.contains_video("L02_V001"));
    }

    #[tokio::test]
    async fn test_store_failed_rebuild_keeps_previous() {
        let store = FrameIndexStore::new(sample_index());

        let result = store
            .rebuild_with(|| Err(CoreError::IndexError("duplicate frame".to_string())))
            .await;

        assert!(result.is_err());
        assert!(store.snapshot().await.contains_video("L01_V001"));
    }
}
