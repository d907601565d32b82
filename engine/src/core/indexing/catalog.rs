//! Video Catalog
//!
//! Immutable per-video metadata loaded once at startup. Currently holds the
//! frame rate of each video, used to turn `MM:SS` boundaries into frame
//! numbers.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::core::{normalize_video_id, CoreError, CoreResult, FrameNumber, VideoId};

fn time_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"^(?:(\d+):)?(\d+):(\d{1,2})(?:\.(\d+))?$|^(\d+)(?:\.(\d+))?$").ok()
        })
        .as_ref()
}

/// Parses `HH:MM:SS`, `MM:SS` or plain seconds (fractions allowed)
pub fn parse_timestamp(raw: &str) -> CoreResult<f64> {
    let raw = raw.trim();
    let pattern = time_pattern()
        .ok_or_else(|| CoreError::Internal("Timestamp pattern failed to compile".to_string()))?;
    let caps = pattern
        .captures(raw)
        .ok_or_else(|| CoreError::InvalidRequest(format!("Malformed timestamp: {}", raw)))?;

    let number = |idx: usize| -> f64 {
        caps.get(idx)
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .unwrap_or(0.0)
    };
    let fraction = |idx: usize| -> f64 {
        caps.get(idx)
            .and_then(|m| format!("0.{}", m.as_str()).parse::<f64>().ok())
            .unwrap_or(0.0)
    };

    if caps.get(5).is_some() {
        return Ok(number(5) + fraction(6));
    }

    let seconds = number(3);
    if seconds >= 60.0 {
        return Err(CoreError::InvalidRequest(format!(
            "Malformed timestamp (seconds >= 60): {}",
            raw
        )));
    }
    Ok(number(1) * 3600.0 + number(2) * 60.0 + seconds + fraction(4))
}

// =============================================================================
// Video Catalog
// =============================================================================

/// Per-video frame rates
#[derive(Clone, Debug)]
pub struct VideoCatalog {
    fps: HashMap<VideoId, f64>,
    default_fps: f64,
}

impl Default for VideoCatalog {
    fn default() -> Self {
        Self::new(25.0)
    }
}

impl VideoCatalog {
    /// Creates an empty catalog
    pub fn new(default_fps: f64) -> Self {
        Self {
            fps: HashMap::new(),
            default_fps,
        }
    }

    /// Loads and merges `{video: fps}` JSON tables; later tables win
    pub fn load(paths: &[impl AsRef<Path>], default_fps: f64) -> CoreResult<Self> {
        let mut catalog = Self::new(default_fps);
        for path in paths {
            let path = path.as_ref();
            let content = fs::read_to_string(path).map_err(|e| {
                CoreError::NotFound(format!("Failed to read fps table {}: {}", path.display(), e))
            })?;
            // Some tables are written with a UTF-8 BOM
            let table: HashMap<String, serde_json::Value> =
                serde_json::from_str(content.trim_start_matches('\u{feff}'))?;
            catalog.merge(table);
        }
        tracing::info!(videos = catalog.fps.len(), "Video catalog loaded");
        Ok(catalog)
    }

    /// Merges a table whose values are numbers or numeric strings
    pub fn merge(&mut self, table: HashMap<String, serde_json::Value>) {
        for (video, value) in table {
            let fps = match &value {
                serde_json::Value::Number(n) => n.as_f64(),
                serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            match fps {
                Some(fps) if fps.is_finite() && fps > 0.0 => {
                    self.fps.insert(normalize_video_id(&video), fps);
                }
                _ => tracing::warn!(video = %video, value = %value, "Ignoring invalid fps entry"),
            }
        }
    }

    /// Inserts a single entry
    pub fn with_fps(mut self, video_id: &str, fps: f64) -> Self {
        self.fps.insert(normalize_video_id(video_id), fps);
        self
    }

    /// Frame rate of a video, falling back to the default
    pub fn fps(&self, video_id: &str) -> f64 {
        self.fps
            .get(video_id)
            .copied()
            .unwrap_or(self.default_fps)
    }

    pub fn len(&self) -> usize {
        self.fps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fps.is_empty()
    }

    /// Converts a timestamp within a video to a frame number
    pub fn time_to_frame(&self, video_id: &str, timestamp: &str) -> CoreResult<FrameNumber> {
        let seconds = parse_timestamp(timestamp)?;
        let frame = (self.fps(video_id) * seconds).floor();
        if frame > FrameNumber::MAX as f64 {
            return Err(CoreError::InvalidRequest(format!(
                "Timestamp {} is beyond the last representable frame",
                timestamp
            )));
        }
        Ok(frame as FrameNumber)
    }
}
