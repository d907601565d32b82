//! Qdrant Vector Index
//!
//! REST adapter for a Qdrant collection holding one point per keyframe.
//! Filter translation is always compiled; the HTTP client is available only
//! when the `qdrant` feature is enabled.

use serde_json::{json, Value};

use super::index::IndexFilter;

/// Returns whether the Qdrant backend is compiled in
pub fn is_qdrant_available() -> bool {
    cfg!(feature = "qdrant")
}

/// Translates a filter into Qdrant's JSON filter language
///
/// Returns `None` when the filter has no conditions.
pub fn to_qdrant_filter(filter: &IndexFilter) -> Option<Value> {
    let mut must: Vec<Value> = Vec::new();
    let mut must_not: Vec<Value> = Vec::new();

    if !filter.video_patterns.is_empty() {
        let should: Vec<Value> = filter
            .video_patterns
            .iter()
            .map(|pattern| json!({"key": "video_name", "match": {"text": pattern}}))
            .collect();
        must.push(json!({ "should": should }));
    }

    if let Some(text) = &filter.transcript_contains {
        must.push(json!({"key": "s2t", "match": {"text": text}}));
    }

    if let Some(ids) = &filter.include_ids {
        must.push(json!({ "has_id": ids.iter().collect::<Vec<_>>() }));
    }

    for class in &filter.exclude_shot_classes {
        must_not.push(json!({"key": "frame_class", "match": {"value": class.code()}}));
    }

    if !filter.exclude_ids.is_empty() {
        must_not.push(json!({ "has_id": filter.exclude_ids.iter().collect::<Vec<_>>() }));
    }

    if must.is_empty() && must_not.is_empty() {
        return None;
    }

    let mut out = serde_json::Map::new();
    if !must.is_empty() {
        out.insert("must".to_string(), Value::Array(must));
    }
    if !must_not.is_empty() {
        out.insert("must_not".to_string(), Value::Array(must_not));
    }
    Some(Value::Object(out))
}

#[cfg(feature = "qdrant")]
pub use client::QdrantIndex;

#[cfg(feature = "qdrant")]
mod client {
    use std::time::{Duration, Instant};

    use async_trait::async_trait;
    use reqwest::{Client, Method, RequestBuilder};
    use serde::Deserialize;
    use serde_json::{json, Value};
    use tracing::{debug, warn};

    use crate::core::settings::QdrantSettings;
    use crate::core::{CoreError, CoreResult};

    use super::super::index::{IndexFilter, RawPoint, VectorIndex};
    use super::to_qdrant_filter;

    #[derive(Debug, Deserialize)]
    struct QueryResponse {
        result: QueryResult,
    }

    #[derive(Debug, Deserialize)]
    struct QueryResult {
        #[serde(default)]
        points: Vec<ScoredPoint>,
    }

    #[derive(Debug, Deserialize)]
    struct ScoredPoint {
        id: Value,
        #[serde(default)]
        score: Option<f64>,
        #[serde(default)]
        payload: Option<Value>,
    }

    impl ScoredPoint {
        fn into_raw(self) -> Option<RawPoint> {
            let Some(id) = self.id.as_u64() else {
                warn!(id = %self.id, "Skipping point with non-numeric id");
                return None;
            };
            Some(RawPoint::new(id, self.score, self.payload.unwrap_or(Value::Null)))
        }
    }

    /// Qdrant collection accessed over REST
    pub struct QdrantIndex {
        client: Client,
        base_url: String,
        collection: String,
        api_key: Option<String>,
    }

    impl QdrantIndex {
        /// Creates a client for the configured collection
        pub fn new(settings: &QdrantSettings) -> CoreResult<Self> {
            let client = Client::builder()
                .timeout(Duration::from_millis(settings.timeout_ms))
                .build()
                .map_err(|e| {
                    CoreError::UpstreamUnavailable(format!("Failed to create HTTP client: {}", e))
                })?;

            Ok(Self {
                client,
                base_url: settings.url.trim_end_matches('/').to_string(),
                collection: settings.collection.clone(),
                api_key: settings.api_key.clone().filter(|k| !k.is_empty()),
            })
        }

        pub fn collection(&self) -> &str {
            &self.collection
        }

        fn request(&self, method: Method, path: &str) -> RequestBuilder {
            let url = format!("{}/collections/{}{}", self.base_url, self.collection, path);
            let mut req = self.client.request(method, &url);
            if let Some(key) = &self.api_key {
                req = req.header("api-key", key);
            }
            req
        }

        async fn post_points(&self, operation: &str, path: &str, body: Value) -> CoreResult<Vec<RawPoint>> {
            let start = Instant::now();
            let resp = self
                .request(Method::POST, path)
                .json(&body)
                .send()
                .await
                .map_err(|e| {
                    warn!(operation, error = %e, "Qdrant request failed");
                    CoreError::UpstreamUnavailable(format!("Qdrant {} failed: {}", operation, e))
                })?;

            let status = resp.status();
            if !status.is_success() {
                let error_text = resp.text().await.unwrap_or_default();
                warn!(operation, status = %status, error = %error_text, "Qdrant returned an error");
                return Err(CoreError::UpstreamUnavailable(format!(
                    "Qdrant {} returned {}: {}",
                    operation, status, error_text
                )));
            }

            let parsed: QueryResponse = resp.json().await.map_err(|e| {
                CoreError::UpstreamUnavailable(format!(
                    "Qdrant {} response unreadable: {}",
                    operation, e
                ))
            })?;

            let points: Vec<RawPoint> = parsed
                .result
                .points
                .into_iter()
                .filter_map(ScoredPoint::into_raw)
                .collect();

            debug!(
                operation,
                points = points.len(),
                duration_ms = start.elapsed().as_millis() as u64,
                "Qdrant operation completed"
            );
            Ok(points)
        }
    }

    fn with_filter(mut body: Value, filter: &IndexFilter) -> Value {
        if let (Some(obj), Some(filter)) = (body.as_object_mut(), to_qdrant_filter(filter)) {
            obj.insert("filter".to_string(), filter);
        }
        body
    }

    #[async_trait]
    impl VectorIndex for QdrantIndex {
        fn backend_name(&self) -> &'static str {
            "qdrant"
        }

        async fn query(
            &self,
            vector: &[f32],
            limit: usize,
            filter: &IndexFilter,
        ) -> CoreResult<Vec<RawPoint>> {
            if limit == 0 || filter.is_unsatisfiable() {
                return Ok(Vec::new());
            }
            let body = with_filter(
                json!({
                    "query": vector,
                    "limit": limit,
                    "with_payload": true,
                }),
                filter,
            );
            self.post_points("query", "/points/query", body).await
        }

        async fn scroll(&self, filter: &IndexFilter, limit: usize) -> CoreResult<Vec<RawPoint>> {
            if limit == 0 || filter.is_unsatisfiable() {
                return Ok(Vec::new());
            }
            let body = with_filter(
                json!({
                    "limit": limit,
                    "with_payload": true,
                    "with_vector": false,
                }),
                filter,
            );
            self.post_points("scroll", "/points/scroll", body).await
        }

        async fn health_check(&self) -> CoreResult<()> {
            let resp = self.request(Method::GET, "").send().await.map_err(|e| {
                CoreError::UpstreamUnavailable(format!("Qdrant unreachable: {}", e))
            })?;

            if resp.status().is_success() {
                Ok(())
            } else {
                Err(CoreError::UpstreamUnavailable(format!(
                    "Collection {} not available: {}",
                    self.collection,
                    resp.status()
                )))
            }
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ShotClass;

    #[test]
    fn test_empty_filter_translates_to_none() {
        assert_eq!(to_qdrant_filter(&IndexFilter::new()), None);
    }

    #[test]
    fn test_full_filter_translation() {
        let filter = IndexFilter::new()
            .with_video_patterns(vec!["L01".into(), "L02_V003".into()])
            .with_transcript(Some("bão"))
            .excluding_shot_class(ShotClass::Anchor)
            .with_include_ids([3, 1])
            .excluding_ids([2]);

        let value = to_qdrant_filter(&filter).unwrap();

        assert_eq!(
            value,
            json!({
                "must": [
                    {"should": [
                        {"key": "video_name", "match": {"text": "L01"}},
                        {"key": "video_name", "match": {"text": "L02_V003"}}
                    ]},
                    {"key": "s2t", "match": {"text": "bão"}},
                    {"has_id": [1, 3]}
                ],
                "must_not": [
                    {"key": "frame_class", "match": {"value": 0}},
                    {"has_id": [2]}
                ]
            })
        );
    }

    #[test]
    fn test_must_not_only() {
        let filter = IndexFilter::new().excluding_shot_class(ShotClass::Anchor);
        let value = to_qdrant_filter(&filter).unwrap();

        assert!(value.get("must").is_none());
        assert_eq!(value["must_not"][0]["match"]["value"], 0);
    }

    #[test]
    fn test_backend_availability_matches_feature() {
        assert_eq!(is_qdrant_available(), cfg!(feature = "qdrant"));
    }
}
