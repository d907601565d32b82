//! Keyframe Storage Layout
//!
//! Builds a [`FrameIndex`] from the extracted keyframe tree. Every directory
//! that directly holds keyframe images is a video; its name is the video id
//! and each image stem starts with the frame number (`00123.jpg`).

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::core::{parse_frame_number, CoreError, CoreResult, FrameNumber, VideoId};

use super::frame_index::{FrameIndex, FrameIndexBuilder};

/// Image extensions recognized as keyframes
const KEYFRAME_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "avif"];

/// Extracts the frame number from a keyframe file name
fn keyframe_number(path: &Path) -> Option<FrameNumber> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    if !KEYFRAME_EXTENSIONS.contains(&ext.as_str()) {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let digits: String = stem.chars().take_while(|c| c.is_ascii_digit()).collect();
    parse_frame_number(&digits)
}

// =============================================================================
// Layout Scanner
// =============================================================================

/// Recursive scanner for keyframe directories
pub struct LayoutScanner {
    root: PathBuf,
    max_depth: usize,
}

impl LayoutScanner {
    /// Create a scanner for the given keyframe root
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_depth: 8,
        }
    }

    /// Set the maximum directory depth for scanning
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Collects sorted frame numbers per video directory
    pub fn collect(&self) -> CoreResult<BTreeMap<VideoId, Vec<FrameNumber>>> {
        if !self.root.is_dir() {
            return Err(CoreError::NotFound(format!(
                "Keyframe root is not a directory: {}",
                self.root.display()
            )));
        }

        let mut by_dir: HashMap<PathBuf, Vec<FrameNumber>> = HashMap::new();

        for entry in WalkDir::new(&self.root)
            .max_depth(self.max_depth)
            .follow_links(false)
        {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping unreadable entry during scan");
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            match (keyframe_number(path), path.parent()) {
                (Some(frame), Some(parent)) => {
                    by_dir.entry(parent.to_path_buf()).or_default().push(frame);
                }
                _ => tracing::debug!(path = %path.display(), "Ignoring non-keyframe file"),
            }
        }

        let mut videos: BTreeMap<VideoId, Vec<FrameNumber>> = BTreeMap::new();
        let mut origins: HashMap<VideoId, PathBuf> = HashMap::new();

        for (dir, mut frames) in by_dir {
            let Some(video_id) = dir.file_name().and_then(|n| n.to_str()).map(str::to_string)
            else {
                continue;
            };

            if let Some(existing) = origins.get(&video_id) {
                return Err(CoreError::IndexError(format!(
                    "Video {} found in both {} and {}",
                    video_id,
                    existing.display(),
                    dir.display()
                )));
            }

            frames.sort_unstable();
            origins.insert(video_id.clone(), dir);
            videos.insert(video_id, frames);
        }

        Ok(videos)
    }

    /// Scans the layout and builds the frame index
    pub fn scan(&self) -> CoreResult<FrameIndex> {
        let videos = self.collect()?;

        let mut builder = FrameIndexBuilder::new();
        for (video_id, frames) in videos {
            builder.add_video(&video_id, frames)?;
        }

        let index = builder.build();
        tracing::info!(
            root = %self.root.display(),
            videos = index.video_count(),
            frames = index.frame_count(),
            "Keyframe layout scanned"
        );
        Ok(index)
    }
}

// =============================================================================
// Manifest
// =============================================================================

/// Loads a `{video: [frames]}` JSON manifest into a frame index
pub fn load_manifest(path: &Path) -> CoreResult<FrameIndex> {
    let content = fs::read_to_string(path).map_err(|e| {
        CoreError::NotFound(format!(
            "Failed to read frame manifest {}: {}",
            path.display(),
            e
        ))
    })?;
    let manifest: BTreeMap<VideoId, Vec<FrameNumber>> = serde_json::from_str(&content)?;
    FrameIndex::from_manifest(manifest)
}
