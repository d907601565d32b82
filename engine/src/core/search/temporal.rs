//! Temporal Search Engine
//!
//! Orchestrates multi-stage searches. Stage 1 queries the vector index with
//! the global filters only; each later stage is additionally restricted to
//! the frames lying within the window after some chain's last frame, and its
//! hits are fused into the running chains. Every request reads one frame
//! index snapshot from start to finish and runs under an overall deadline.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, info_span, warn, Instrument};
use ulid::Ulid;

use crate::core::indexing::{FrameIndex, FrameIndexStore, VideoCatalog};
use crate::core::settings::{SearchSettings, MAX_TOP_K};
use crate::core::{
    normalize_video_id, CoreError, CoreResult, FrameNumber, PointId, ShotClass,
};

use super::exclusion::ExclusionFilterBuilder;
use super::formatter::ResultFormatter;
use super::fusion::{finalize_chains, Chain, ScoreFusion};
use super::index::{IndexFilter, VectorIndex};
use super::{
    ScrollBound, ScrollRequest, SearchFilters, SearchHit, SearchRequest, SearchTemporalRequest,
    SearchTemporalResponse,
};

/// Snapshot of what the engine is serving
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub backend: String,
    pub videos: usize,
    pub frames: usize,
    pub catalog_entries: usize,
}

/// Multi-stage search over a vector index and a frame index
pub struct TemporalSearchEngine {
    index: Arc<dyn VectorIndex>,
    frames: FrameIndexStore,
    catalog: Arc<VideoCatalog>,
    settings: SearchSettings,
}

impl TemporalSearchEngine {
    pub fn new(index: Arc<dyn VectorIndex>, frames: FrameIndexStore, settings: SearchSettings) -> Self {
        let catalog = VideoCatalog::new(settings.storage.default_fps);
        Self {
            index,
            frames,
            catalog: Arc::new(catalog),
            settings,
        }
    }

    /// Uses per-video frame rates for timestamp boundaries
    pub fn with_catalog(mut self, catalog: VideoCatalog) -> Self {
        self.catalog = Arc::new(catalog);
        self
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    /// Shared frame index handle; rebuilds through it are seen by later requests
    pub fn frames(&self) -> &FrameIndexStore {
        &self.frames
    }

    pub async fn stats(&self) -> EngineStats {
        let frames = self.frames.snapshot().await;
        EngineStats {
            backend: self.index.backend_name().to_string(),
            videos: frames.video_count(),
            frames: frames.frame_count(),
            catalog_entries: self.catalog.len(),
        }
    }

    pub async fn health_check(&self) -> CoreResult<()> {
        self.index.health_check().await
    }

    /// Rebuilds the frame index; requests already running keep their snapshot
    pub async fn reload_frames<F>(&self, build: F) -> CoreResult<()>
    where
        F: FnOnce() -> CoreResult<FrameIndex>,
    {
        self.frames.rebuild_with(build).await
    }

    // =========================================================================
    // Temporal Search
    // =========================================================================

    /// Runs a multi-stage search and returns chains, best first
    pub async fn search_temporal(
        &self,
        request: &SearchTemporalRequest,
    ) -> CoreResult<SearchTemporalResponse> {
        let started = Instant::now();
        let span = info_span!(
            "search_temporal",
            request_id = %Ulid::new(),
            stages = request.queries.len()
        );

        let chains = self
            .with_deadline("temporal search", self.run_temporal(request))
            .instrument(span)
            .await?;

        Ok(SearchTemporalResponse {
            chains,
            stage_count: request.queries.len(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn run_temporal(&self, request: &SearchTemporalRequest) -> CoreResult<Vec<Chain>> {
        validate_queries(&request.queries)?;
        let top_k = self.resolve_top_k(request.top_k)?;
        let window_size = request.window_size.unwrap_or(self.settings.search.window_size);
        if window_size == 0 {
            return Err(CoreError::InvalidRequest(
                "Window size must be positive".to_string(),
            ));
        }

        let frames = self.frames.snapshot().await;
        let base_filter = self.base_filter(&frames, &request.filters, true)?;
        let formatter = ResultFormatter::new(&frames);
        let fusion = ScoreFusion::new(window_size);
        let over_fetch = self.settings.search.over_fetch;
        let stage_count = request.queries.len();

        let mut chains: Vec<Chain> = Vec::new();
        for (stage, query) in request.queries.iter().enumerate() {
            let stage_started = Instant::now();
            let limit = over_fetch.limit(top_k, stage, stage_count);

            let filter = if stage == 0 {
                base_filter.clone()
            } else {
                let allowed = window_point_ids(&frames, &chains, window_size);
                if allowed.is_empty() {
                    debug!(stage = stage + 1, "No frames inside any window, stopping");
                    return Ok(Vec::new());
                }
                base_filter.clone().with_include_ids(allowed)
            };

            let points = self.index.query(query, limit, &filter).await?;
            let fetched = points.len();
            let hits = formatter.format_all(points);

            chains = if stage == 0 {
                finalize_chains(hits.into_iter().map(Chain::seed).collect())
            } else {
                fusion.fuse(&chains, hits)
            };

            info!(
                stage = stage + 1,
                limit,
                fetched,
                chains = chains.len(),
                duration_ms = stage_started.elapsed().as_millis() as u64,
                "Temporal stage completed"
            );

            if chains.is_empty() {
                debug!(stage = stage + 1, "No chains survived, stopping");
                return Ok(Vec::new());
            }
        }

        Ok(chains)
    }

    // =========================================================================
    // Plain Search
    // =========================================================================

    /// Single-vector search with the same filters as temporal search
    pub async fn search(&self, request: &SearchRequest) -> CoreResult<Vec<SearchHit>> {
        let span = info_span!("search", request_id = %Ulid::new());
        self.with_deadline("search", self.run_search(request))
            .instrument(span)
            .await
    }

    async fn run_search(&self, request: &SearchRequest) -> CoreResult<Vec<SearchHit>> {
        validate_queries(std::slice::from_ref(&request.query))?;
        let top_k = self.resolve_top_k(request.top_k)?;

        let frames = self.frames.snapshot().await;
        let filter = self.base_filter(&frames, &request.filters, true)?;
        let points = self.index.query(&request.query, top_k, &filter).await?;
        let hits = ResultFormatter::new(&frames).format_all(points);

        let grouped = request
            .group_by_shot
            .unwrap_or(self.settings.search.group_by_shot);
        info!(hits = hits.len(), grouped, "Search completed");

        Ok(if grouped { group_hits_by_shot(hits) } else { hits })
    }

    // =========================================================================
    // Scroll
    // =========================================================================

    /// Lists frames of one video in frame order, without scores
    pub async fn scroll_video(&self, request: &ScrollRequest) -> CoreResult<Vec<SearchHit>> {
        let span = info_span!("scroll_video", request_id = %Ulid::new());
        self.with_deadline("scroll", self.run_scroll(request))
            .instrument(span)
            .await
    }

    async fn run_scroll(&self, request: &ScrollRequest) -> CoreResult<Vec<SearchHit>> {
        let video_id = normalize_video_id(&request.video_id);
        let limit = self.resolve_top_k(request.limit)?;

        let frames = self.frames.snapshot().await;
        if !frames.contains_video(&video_id) {
            return Err(CoreError::NotFound(format!("Unknown video: {}", video_id)));
        }

        let first = self.resolve_bound(&video_id, request.from.as_ref())?;
        let last = self.resolve_bound(&video_id, request.to.as_ref())?;
        let ids = match frames.point_ids_in_range(&video_id, first, last) {
            Ok(ids) => ids,
            Err(e) if !e.is_fatal() => {
                debug!(video_id = %video_id, error = %e, "Scroll range is empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let filter = self
            .base_filter(&frames, &request.filters, false)?
            .with_include_ids(ids);
        let points = self.index.scroll(&filter, limit).await?;
        let mut hits = ResultFormatter::new(&frames).format_all(points);
        hits.sort_by_key(|hit| hit.frame_number);

        info!(video_id = %video_id, hits = hits.len(), "Scroll completed");
        Ok(hits)
    }

    fn resolve_bound(
        &self,
        video_id: &str,
        bound: Option<&ScrollBound>,
    ) -> CoreResult<Option<FrameNumber>> {
        match bound {
            None => Ok(None),
            Some(ScrollBound::Frame(frame)) => Ok(Some(*frame)),
            Some(ScrollBound::Time(timestamp)) => {
                self.catalog.time_to_frame(video_id, timestamp).map(Some)
            }
        }
    }

    // =========================================================================
    // Shared Helpers
    // =========================================================================

    async fn with_deadline<T>(
        &self,
        operation: &str,
        work: impl std::future::Future<Output = CoreResult<T>>,
    ) -> CoreResult<T> {
        let deadline = self.settings.request_timeout();
        match tokio::time::timeout(deadline, work).await {
            Ok(result) => {
                if let Err(e) = &result {
                    warn!(operation, error = %e, "Request failed");
                }
                result
            }
            Err(_) => {
                warn!(operation, deadline_ms = deadline.as_millis() as u64, "Request timed out");
                Err(CoreError::Timeout(format!(
                    "{} exceeded {} ms",
                    operation,
                    deadline.as_millis()
                )))
            }
        }
    }

    fn resolve_top_k(&self, requested: Option<usize>) -> CoreResult<usize> {
        match requested {
            None => Ok(self.settings.search.default_top_k),
            Some(0) => Err(CoreError::InvalidRequest("topK must be positive".to_string())),
            Some(k) if k > MAX_TOP_K => Err(CoreError::InvalidRequest(format!(
                "topK {} exceeds the maximum of {}",
                k, MAX_TOP_K
            ))),
            Some(k) => Ok(k),
        }
    }

    /// Global filter shared by every stage of a request
    fn base_filter(
        &self,
        frames: &FrameIndex,
        filters: &SearchFilters,
        use_video_patterns: bool,
    ) -> CoreResult<IndexFilter> {
        let exclusions = ExclusionFilterBuilder::new(frames).build(&filters.exclusion_ranges)?;

        let mut filter = IndexFilter::new()
            .with_transcript(filters.transcript_filter())
            .excluding_ids(exclusions.point_ids(frames));
        if use_video_patterns {
            filter = filter.with_video_patterns(filters.video_patterns());
        }
        if filters
            .exclude_shot_class
            .unwrap_or(self.settings.search.exclude_anchor_shots)
        {
            filter = filter.excluding_shot_class(ShotClass::Anchor);
        }
        Ok(filter)
    }
}

/// Rejects empty, ragged or non-finite query sets
fn validate_queries(queries: &[Vec<f32>]) -> CoreResult<()> {
    let Some(first) = queries.first() else {
        return Err(CoreError::InvalidRequest(
            "At least one query vector is required".to_string(),
        ));
    };
    let dimension = first.len();

    for (idx, query) in queries.iter().enumerate() {
        if query.is_empty() {
            return Err(CoreError::InvalidRequest(format!("Query {} is empty", idx + 1)));
        }
        if query.len() != dimension {
            return Err(CoreError::InvalidRequest(format!(
                "Query {} has dimension {}, expected {}",
                idx + 1,
                query.len(),
                dimension
            )));
        }
        if query.iter().any(|v| !v.is_finite()) {
            return Err(CoreError::InvalidRequest(format!(
                "Query {} contains non-finite values",
                idx + 1
            )));
        }
    }
    Ok(())
}

/// Point ids within the window after each chain's last frame
fn window_point_ids(
    frames: &FrameIndex,
    chains: &[Chain],
    window_size: FrameNumber,
) -> BTreeSet<PointId> {
    let tails: BTreeSet<(&str, FrameNumber)> = chains.iter().map(Chain::terminal_key).collect();
    let mut ids = BTreeSet::new();

    for (video_id, frame) in tails {
        let Some(first) = frame.checked_add(1) else {
            continue;
        };
        let window = frames.point_ids_within(video_id, first, frame.saturating_add(window_size));
        if window.is_empty() {
            debug!(video_id, frame, "No frames inside window after chain tail");
        }
        ids.extend(window);
    }
    ids
}

/// Keeps hits of the same shot together, best shot first
///
/// Shots are ranked by their best hit; inside a shot, later frames come first.
pub fn group_hits_by_shot(hits: Vec<SearchHit>) -> Vec<SearchHit> {
    let shot_scores: Vec<f64> = {
        let mut best: HashMap<(&str, FrameNumber), f64> = HashMap::new();
        for hit in &hits {
            let entry = best
                .entry((hit.video_id.as_str(), hit.related_start_frame))
                .or_insert(hit.score);
            if hit.score > *entry {
                *entry = hit.score;
            }
        }
        hits.iter()
            .map(|hit| {
                best.get(&(hit.video_id.as_str(), hit.related_start_frame))
                    .copied()
                    .unwrap_or(hit.score)
            })
            .collect()
    };

    let mut ranked: Vec<(f64, SearchHit)> = shot_scores.into_iter().zip(hits).collect();
    ranked.sort_by(|(score_a, a), (score_b, b)| {
        score_b
            .total_cmp(score_a)
            .then_with(|| a.video_id.cmp(&b.video_id))
            .then_with(|| a.related_start_frame.cmp(&b.related_start_frame))
            .then_with(|| b.frame_number.cmp(&a.frame_number))
    });
    ranked.into_iter().map(|(_, hit)| hit).collect()
}
