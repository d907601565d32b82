//! End-to-End Temporal Search Scenarios
//!
//! Drives the engine against a scripted vector index whose per-stage results
//! are fixed up front, so chain totals and stage filters can be asserted
//! exactly.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::indexing::{FrameIndex, FrameIndexStore};
use crate::core::search::{
    ExclusionRange, IndexFilter, PointPayload, RawPoint, SearchTemporalRequest,
    TemporalSearchEngine, VectorIndex,
};
use crate::core::settings::{OverFetch, SearchSettings};
use crate::core::{CoreResult, FrameNumber, PointId};

// -----------------------------------------------------------------------------
// Scripted Index
// -----------------------------------------------------------------------------

/// Returns fixed `(id, score)` lists; the query's first component picks the stage
struct ScriptedIndex {
    stages: Vec<Vec<(PointId, f64)>>,
    payloads: HashMap<PointId, Value>,
    calls: Mutex<Vec<(usize, IndexFilter)>>,
}

impl ScriptedIndex {
    fn new(stages: Vec<Vec<(PointId, f64)>>) -> Self {
        let mut payloads = HashMap::new();
        for (id, video, frame) in FIXTURE_POINTS {
            let payload = PointPayload::new(&format!("{}.mp4", video), *frame);
            payloads.insert(*id, serde_json::to_value(payload).unwrap());
        }
        Self {
            stages,
            payloads,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn with_payload(mut self, id: PointId, payload: Value) -> Self {
        self.payloads.insert(id, payload);
        self
    }

    fn calls(&self) -> Vec<(usize, IndexFilter)> {
        self.calls.lock().unwrap().clone()
    }

    fn admits(&self, id: PointId, filter: &IndexFilter) -> bool {
        let typed = self
            .payloads
            .get(&id)
            .and_then(|v| serde_json::from_value::<PointPayload>(v.clone()).ok());
        match typed {
            Some(payload) => filter.admits(id, &payload),
            None => filter.admits_id(id),
        }
    }
}

#[async_trait]
impl VectorIndex for ScriptedIndex {
    fn backend_name(&self) -> &'static str {
        "scripted"
    }

    async fn query(
        &self,
        vector: &[f32],
        limit: usize,
        filter: &IndexFilter,
    ) -> CoreResult<Vec<RawPoint>> {
        self.calls.lock().unwrap().push((limit, filter.clone()));

        let stage = vector[0] as usize;
        let mut scored: Vec<(PointId, f64)> = self
            .stages
            .get(stage)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|(id, _)| self.admits(*id, filter))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(limit);

        Ok(scored
            .into_iter()
            .map(|(id, score)| {
                let payload = self.payloads.get(&id).cloned().unwrap_or(Value::Null);
                RawPoint::new(id, Some(score), payload)
            })
            .collect())
    }

    async fn scroll(&self, _: &IndexFilter, _: usize) -> CoreResult<Vec<RawPoint>> {
        Ok(Vec::new())
    }

    async fn health_check(&self) -> CoreResult<()> {
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Fixture
// -----------------------------------------------------------------------------

/// `(point id, video, frame)`; ids match [`fixture_frames`]
const FIXTURE_POINTS: &[(PointId, &str, FrameNumber)] = &[
    (0, "L01_V001", 100),
    (1, "L01_V001", 250),
    (2, "L01_V001", 300),
    (3, "L01_V001", 1200),
    (4, "L01_V001", 1250),
    (5, "L01_V001", 1400),
    (6, "L01_V002", 0),
    (7, "L01_V002", 10),
];

fn fixture_frames() -> FrameIndex {
    let mut manifest = BTreeMap::new();
    manifest.insert(
        "L01_V001".to_string(),
        vec![100, 250, 300, 1200, 1250, 1400],
    );
    manifest.insert("L01_V002".to_string(), vec![0, 10]);
    FrameIndex::from_manifest(manifest).unwrap()
}

fn queries(count: usize) -> Vec<Vec<f32>> {
    (0..count).map(|stage| vec![stage as f32, 1.0]).collect()
}

fn engine(index: Arc<ScriptedIndex>, settings: SearchSettings) -> TemporalSearchEngine {
    TemporalSearchEngine::new(index, FrameIndexStore::new(fixture_frames()), settings)
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

// -----------------------------------------------------------------------------
// Scenarios
// -----------------------------------------------------------------------------

#[tokio::test]
async fn test_two_stage_story_ranks_chains() {
    let index = Arc::new(ScriptedIndex::new(vec![
        vec![(0, 0.9), (3, 0.5)],
        vec![(2, 0.8), (4, 0.95), (7, 0.99)],
    ]));
    let engine = engine(index.clone(), SearchSettings::default());

    let response = engine
        .search_temporal(&SearchTemporalRequest::new(queries(2)).with_top_k(10))
        .await
        .unwrap();

    assert_eq!(response.chains.len(), 2);

    let best = &response.chains[0];
    assert!(approx(best.total_score(), 1.7));
    let frames: Vec<_> = best.stages().iter().map(|h| h.frame_number).collect();
    assert_eq!(frames, vec![100, 300]);

    // Frame 100 is 1150 frames before 1250, so only the 1200 seed qualifies
    let second = &response.chains[1];
    assert!(approx(second.total_score(), 1.45));
    let frames: Vec<_> = second.stages().iter().map(|h| h.frame_number).collect();
    assert_eq!(frames, vec![1200, 1250]);

    let calls = index.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].1.include_ids, None);
    let expected: BTreeSet<PointId> = [1, 2, 4, 5].into_iter().collect();
    assert_eq!(calls[1].1.include_ids, Some(expected));
}

#[tokio::test]
async fn test_three_stage_totals_and_over_fetch() {
    let index = Arc::new(ScriptedIndex::new(vec![
        vec![(0, 0.9)],
        vec![(2, 0.8)],
        vec![(4, 0.6), (5, 0.7)],
    ]));
    let engine = engine(index.clone(), SearchSettings::default());

    let response = engine
        .search_temporal(&SearchTemporalRequest::new(queries(3)).with_top_k(10))
        .await
        .unwrap();

    // 1400 is 1100 frames after 300
    assert_eq!(response.chains.len(), 1);
    assert!(approx(response.chains[0].total_score(), 2.3));
    assert_eq!(response.chains[0].terminal_key(), ("L01_V001", 1250));

    let limits: Vec<_> = index.calls().iter().map(|(limit, _)| *limit).collect();
    assert_eq!(limits, vec![30, 20, 10]);
}

#[tokio::test]
async fn test_fixed_over_fetch_policy() {
    let index = Arc::new(ScriptedIndex::new(vec![
        vec![(0, 0.9)],
        vec![(2, 0.8)],
        vec![(4, 0.6)],
    ]));
    let mut settings = SearchSettings::default();
    settings.search.over_fetch = OverFetch::Fixed(2);
    let engine = engine(index.clone(), settings);

    engine
        .search_temporal(&SearchTemporalRequest::new(queries(3)).with_top_k(10))
        .await
        .unwrap();

    let limits: Vec<_> = index.calls().iter().map(|(limit, _)| *limit).collect();
    assert_eq!(limits, vec![20, 20, 20]);
}

#[tokio::test]
async fn test_exclusions_hold_at_every_stage() {
    let index = Arc::new(ScriptedIndex::new(vec![
        vec![(0, 0.9), (3, 0.5)],
        vec![(2, 0.8), (4, 0.95)],
    ]));
    let engine = engine(index.clone(), SearchSettings::default());
    let request = SearchTemporalRequest::new(queries(2))
        .with_top_k(10)
        .excluding(ExclusionRange::new("L01_V001", Some(1200), Some(1250)));

    let response = engine.search_temporal(&request).await.unwrap();

    assert_eq!(response.chains.len(), 1);
    assert!(approx(response.chains[0].total_score(), 1.7));
    for (_, filter) in index.calls() {
        assert!(filter.exclude_ids.contains(&3));
        assert!(filter.exclude_ids.contains(&4));
    }
}

#[tokio::test]
async fn test_malformed_points_are_skipped() {
    let index = Arc::new(
        ScriptedIndex::new(vec![vec![(0, 0.9), (99, 0.95)], vec![(2, 0.8)]])
            .with_payload(99, json!({"video_name": "L01_V001.mp4"})),
    );
    let engine = engine(index, SearchSettings::default());

    let response = engine
        .search_temporal(&SearchTemporalRequest::new(queries(2)))
        .await
        .unwrap();

    assert_eq!(response.chains.len(), 1);
    assert!(approx(response.chains[0].total_score(), 1.7));
}

#[tokio::test]
async fn test_requests_see_replaced_frame_index() {
    let index = Arc::new(ScriptedIndex::new(vec![vec![(6, 0.9)]]));
    let mut manifest = BTreeMap::new();
    manifest.insert(
        "L01_V001".to_string(),
        vec![100, 250, 300, 1200, 1250, 1400],
    );
    let store = FrameIndexStore::new(FrameIndex::from_manifest(manifest).unwrap());
    let engine = TemporalSearchEngine::new(index, store.clone(), SearchSettings::default());
    let request = SearchTemporalRequest::new(queries(1));

    // L01_V002 is not indexed yet
    let before = engine.search_temporal(&request).await.unwrap();
    assert!(before.chains.is_empty());

    store.replace(fixture_frames()).await;

    let after = engine.search_temporal(&request).await.unwrap();
    assert_eq!(after.chains.len(), 1);
    assert_eq!(after.chains[0].terminal_key(), ("L01_V002", 0));
}

#[tokio::test]
async fn test_response_serializes_for_callers() {
    let index = Arc::new(ScriptedIndex::new(vec![vec![(0, 0.9)], vec![(2, 0.8)]]));
    let engine = engine(index, SearchSettings::default());

    let response = engine
        .search_temporal(&SearchTemporalRequest::new(queries(2)))
        .await
        .unwrap();
    let value = serde_json::to_value(&response).unwrap();

    assert_eq!(value["stageCount"], 2);
    assert_eq!(value["chains"][0]["stages"][1]["keyframeId"], "00300");
    assert!(value["chains"][0]["totalScore"].as_f64().is_some());
}
