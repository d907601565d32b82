//! In-Memory Vector Index
//!
//! Exact cosine-similarity search over points held in memory. Used for
//! offline runs against exported collections and as the reference backend in
//! tests.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::{CoreError, CoreResult, PointId};

use super::index::{IndexFilter, PointPayload, RawPoint, VectorIndex};

/// A stored embedding with its payload
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredPoint {
    pub id: PointId,
    pub vector: Vec<f32>,
    pub payload: PointPayload,
}

impl StoredPoint {
    pub fn new(id: PointId, vector: Vec<f32>, payload: PointPayload) -> Self {
        Self {
            id,
            vector,
            payload,
        }
    }
}

/// Brute-force vector index
#[derive(Debug, Default)]
pub struct MemoryIndex {
    points: Vec<StoredPoint>,
    ids: HashSet<PointId>,
    dimension: Option<usize>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an index from points, rejecting duplicates and ragged vectors
    pub fn from_points(points: impl IntoIterator<Item = StoredPoint>) -> CoreResult<Self> {
        let mut index = Self::new();
        for point in points {
            index.insert(point)?;
        }
        Ok(index)
    }

    /// Loads one JSON point per line; blank lines are skipped
    pub fn load_jsonl(path: &Path) -> CoreResult<Self> {
        let file = File::open(path).map_err(|e| {
            CoreError::NotFound(format!("Failed to open points file {}: {}", path.display(), e))
        })?;

        let mut index = Self::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let point: StoredPoint = serde_json::from_str(&line).map_err(|e| {
                CoreError::IndexError(format!(
                    "{}:{}: invalid point: {}",
                    path.display(),
                    line_no + 1,
                    e
                ))
            })?;
            index.insert(point)?;
        }

        tracing::info!(
            path = %path.display(),
            points = index.len(),
            dimension = ?index.dimension,
            "Loaded in-memory vector index"
        );
        Ok(index)
    }

    /// Adds a point
    pub fn insert(&mut self, point: StoredPoint) -> CoreResult<()> {
        if point.vector.is_empty() {
            return Err(CoreError::IndexError(format!("Point {} has an empty vector", point.id)));
        }
        match self.dimension {
            Some(dim) if dim != point.vector.len() => {
                return Err(CoreError::IndexError(format!(
                    "Point {} has dimension {}, expected {}",
                    point.id,
                    point.vector.len(),
                    dim
                )));
            }
            _ => self.dimension = Some(point.vector.len()),
        }
        if !self.ids.insert(point.id) {
            return Err(CoreError::IndexError(format!("Duplicate point id {}", point.id)));
        }
        self.points.push(point);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    fn to_raw(point: &StoredPoint, score: Option<f64>) -> CoreResult<RawPoint> {
        Ok(RawPoint::new(
            point.id,
            score,
            serde_json::to_value(&point.payload)?,
        ))
    }
}

/// Cosine similarity; zero vectors score 0
fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn query(
        &self,
        vector: &[f32],
        limit: usize,
        filter: &IndexFilter,
    ) -> CoreResult<Vec<RawPoint>> {
        if let Some(dim) = self.dimension {
            if dim != vector.len() {
                return Err(CoreError::InvalidRequest(format!(
                    "Query has dimension {}, index holds {}",
                    vector.len(),
                    dim
                )));
            }
        }
        if limit == 0 || filter.is_unsatisfiable() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(f64, &StoredPoint)> = self
            .points
            .iter()
            .filter(|p| filter.admits(p.id, &p.payload))
            .map(|p| (cosine_similarity(vector, &p.vector), p))
            .collect();

        scored.sort_by(|(sa, a), (sb, b)| sb.total_cmp(sa).then(a.id.cmp(&b.id)));
        scored.truncate(limit);

        scored
            .into_iter()
            .map(|(score, point)| Self::to_raw(point, Some(score)))
            .collect()
    }

    async fn scroll(&self, filter: &IndexFilter, limit: usize) -> CoreResult<Vec<RawPoint>> {
        let mut matched: Vec<&StoredPoint> = self
            .points
            .iter()
            .filter(|p| filter.admits(p.id, &p.payload))
            .collect();
        matched.sort_by_key(|p| p.id);

        matched
            .into_iter()
            .take(limit)
            .map(|point| Self::to_raw(point, None))
            .collect()
    }

    async fn health_check(&self) -> CoreResult<()> {
        Ok(())
    }
}
