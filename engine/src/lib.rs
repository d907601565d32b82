//! Keyscout Core Library
//!
//! Temporal keyframe retrieval for news video archives.
//! Given one embedding per narrative segment, finds ordered keyframe chains
//! inside a single video whose frames follow each other within a bounded gap.
//!
//! The engine owns the frame numbering and the multi-stage search; the
//! embeddings themselves live in an external vector store (Qdrant) or in an
//! in-memory index loaded from an exported points file.

pub mod core;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::{
    indexing::{load_manifest, FrameIndex, FrameIndexStore, LayoutScanner, VideoCatalog},
    search::{MemoryIndex, TemporalSearchEngine, VectorIndex},
    settings::SearchSettings,
    CoreError, CoreResult,
};

// =============================================================================
// Engine Assembly
// =============================================================================

/// Overrides applied on top of [`SearchSettings`] when assembling an engine
#[derive(Clone, Debug, Default)]
pub struct EngineOptions {
    /// JSON lines points file; selects the in-memory backend
    pub points_file: Option<PathBuf>,
    /// Frame manifest, takes precedence over every keyframe root
    pub frame_manifest: Option<PathBuf>,
    /// Keyframe directory to scan
    pub keyframe_root: Option<PathBuf>,
}

/// Builds the frame index from options, then settings
///
/// A manifest wins over a keyframe root; options win over settings.
pub fn load_frame_index(settings: &SearchSettings, options: &EngineOptions) -> CoreResult<FrameIndex> {
    let storage = &settings.storage;
    if let Some(manifest) = options.frame_manifest.as_ref() {
        return load_manifest(manifest);
    }
    if let Some(root) = options.keyframe_root.as_ref() {
        return LayoutScanner::new(root).scan();
    }
    if let Some(manifest) = storage.frame_manifest.as_ref() {
        return load_manifest(manifest);
    }
    if let Some(root) = storage.keyframe_root.as_ref() {
        return LayoutScanner::new(root).scan();
    }
    Err(CoreError::ValidationError(
        "No frame manifest or keyframe root configured".to_string(),
    ))
}

/// Selects the vector index backend
pub fn open_vector_index(
    settings: &SearchSettings,
    points_file: Option<&Path>,
) -> CoreResult<Arc<dyn VectorIndex>> {
    if let Some(path) = points_file {
        return Ok(Arc::new(MemoryIndex::load_jsonl(path)?));
    }

    #[cfg(feature = "qdrant")]
    {
        let index = crate::core::search::qdrant::QdrantIndex::new(&settings.qdrant)?;
        tracing::info!(
            url = %settings.qdrant.url,
            collection = %settings.qdrant.collection,
            "Using Qdrant vector index"
        );
        Ok(Arc::new(index))
    }

    #[cfg(not(feature = "qdrant"))]
    {
        let _ = settings;
        Err(CoreError::ValidationError(
            "Qdrant support not enabled. Rebuild with --features qdrant or pass a points file"
                .to_string(),
        ))
    }
}

/// Assembles a ready-to-serve engine
pub fn build_engine(settings: SearchSettings, options: &EngineOptions) -> CoreResult<TemporalSearchEngine> {
    let frames = load_frame_index(&settings, options)?;
    let catalog = VideoCatalog::load(&settings.storage.fps_tables, settings.storage.default_fps)?;
    let index = open_vector_index(&settings, options.points_file.as_deref())?;

    tracing::info!(
        backend = index.backend_name(),
        videos = frames.video_count(),
        frames = frames.frame_count(),
        "Search engine assembled"
    );

    Ok(TemporalSearchEngine::new(index, FrameIndexStore::new(frames), settings).with_catalog(catalog))
}
