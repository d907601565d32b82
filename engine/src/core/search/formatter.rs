//! Result Formatter
//!
//! Turns raw vector store points into [`SearchHit`]s. Stored payloads come
//! from several ingestion generations, so numbers may arrive as strings,
//! transcripts as a single string or a list, and detections as a list or a
//! JSON-encoded string. Every hit is anchored to the frame index; a point
//! whose frame is not indexed is malformed.

use serde_json::{Map, Value};

use crate::core::indexing::FrameIndex;
use crate::core::{
    normalize_video_id, parse_frame_number, CoreError, CoreResult, FrameNumber, ShotClass,
    DEFAULT_RELATED_END_FRAME,
};

use super::index::RawPoint;
use super::{DetectedObject, SearchHit};

/// Shapes raw points against a frame index snapshot
pub struct ResultFormatter<'a> {
    frames: &'a FrameIndex,
}

impl<'a> ResultFormatter<'a> {
    pub fn new(frames: &'a FrameIndex) -> Self {
        Self { frames }
    }

    /// Formats a single point
    pub fn format(&self, point: &RawPoint) -> CoreResult<SearchHit> {
        let payload = point.payload.as_object().ok_or_else(|| {
            CoreError::MalformedRecord(format!("Point {} has no payload object", point.id))
        })?;

        let video_name = payload
            .get("video_name")
            .and_then(Value::as_str)
            .ok_or_else(|| missing_field(point, "video_name"))?;
        let video_id = normalize_video_id(video_name);

        let frame_number = payload
            .get("frame_name")
            .and_then(lenient_frame)
            .ok_or_else(|| missing_field(point, "frame_name"))?;

        let sequence_position = self
            .frames
            .position_of(&video_id, frame_number)
            .map_err(|_| {
                CoreError::MalformedRecord(format!(
                    "Point {} refers to unindexed frame {} of {}",
                    point.id, frame_number, video_id
                ))
            })?;

        let expected_id = self.frames.point_id(&video_id, sequence_position)?;
        if point.id != expected_id {
            return Err(CoreError::MalformedRecord(format!(
                "Point {} is stored under the id of point {} ({} frame {})",
                point.id, expected_id, video_id, frame_number
            )));
        }

        let score = point.score.unwrap_or(0.0);
        if !score.is_finite() {
            return Err(CoreError::MalformedRecord(format!(
                "Point {} has a non-finite score",
                point.id
            )));
        }

        let shot_class = match payload.get("frame_class").filter(|v| !v.is_null()) {
            None => ShotClass::Main,
            Some(value) => lenient_i64(value)
                .and_then(ShotClass::from_code)
                .ok_or_else(|| {
                    CoreError::MalformedRecord(format!(
                        "Point {} has unknown frame_class {}",
                        point.id, value
                    ))
                })?,
        };

        let related_start = frame_field(payload, "related_start_frame").unwrap_or(0);
        let related_end =
            frame_field(payload, "related_end_frame").unwrap_or(DEFAULT_RELATED_END_FRAME);

        let mut hit = SearchHit::new(&video_id, frame_number, sequence_position, score)
            .with_point_id(point.id)
            .with_shot(shot_class, related_start, related_end)
            .with_transcript(transcript_lines(payload.get("s2t")))
            .with_objects(detected_objects(payload.get("object")));

        if let Some(fps) = payload
            .get("fps")
            .and_then(lenient_f64)
            .filter(|fps| *fps > 0.0)
        {
            hit = hit.with_fps(fps);
        }

        Ok(hit)
    }

    /// Formats a batch, dropping malformed points
    pub fn format_all(&self, points: Vec<RawPoint>) -> Vec<SearchHit> {
        let total = points.len();
        let hits: Vec<SearchHit> = points
            .iter()
            .filter_map(|point| match self.format(point) {
                Ok(hit) => Some(hit),
                Err(e) => {
                    tracing::warn!(point_id = point.id, error = %e, "Skipping malformed point");
                    None
                }
            })
            .collect();

        if hits.len() < total {
            tracing::debug!(kept = hits.len(), total, "Formatted points with drops");
        }
        hits
    }
}

fn missing_field(point: &RawPoint, field: &str) -> CoreError {
    CoreError::MalformedRecord(format!("Point {} is missing {}", point.id, field))
}

// =============================================================================
// Lenient Field Parsing
// =============================================================================

fn lenient_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn lenient_f64(value: &Value) -> Option<f64> {
    let parsed: Option<f64> = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.filter(|f| f.is_finite())
}

fn lenient_frame(value: &Value) -> Option<FrameNumber> {
    match value {
        Value::String(s) => parse_frame_number(s),
        other => lenient_i64(other).and_then(|n| FrameNumber::try_from(n).ok()),
    }
}

fn frame_field(payload: &Map<String, Value>, key: &str) -> Option<FrameNumber> {
    payload.get(key).and_then(lenient_frame)
}

fn transcript_lines(value: Option<&Value>) -> Vec<String> {
    let keep = |line: &str| {
        let line = line.trim();
        (!line.is_empty()).then(|| line.to_string())
    };

    match value {
        Some(Value::String(s)) => keep(s.as_str()).into_iter().collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .filter_map(keep)
            .collect(),
        _ => Vec::new(),
    }
}

fn detected_objects(value: Option<&Value>) -> Vec<DetectedObject> {
    let parsed = match value {
        Some(Value::Array(_)) => value.cloned(),
        // Older ingestions stored the detections as a JSON string
        Some(Value::String(s)) => serde_json::from_str::<Value>(s).ok(),
        _ => None,
    };

    let Some(Value::Array(items)) = parsed else {
        return Vec::new();
    };

    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<DetectedObject>(item) {
            Ok(object) => Some(object),
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring unreadable detection");
                None
            }
        })
        .collect()
}
