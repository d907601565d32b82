//! Search Settings
//!
//! Provides engine configuration with:
//! - Schema validation with defaults
//! - Tolerant normalization of out-of-range values
//! - Atomic file writes (temp file + rename)
//!
//! Settings are loaded once at startup and handed to the engine by value.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use crate::core::{CoreError, CoreResult, FrameNumber, DEFAULT_TOP_K, DEFAULT_WINDOW_SIZE};

/// Settings schema version for migration support
pub const SETTINGS_VERSION: u32 = 1;

/// Upper bound for per-stage result counts
pub const MAX_TOP_K: usize = 10_000;

/// Engine settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchSettings {
    /// Schema version for migrations
    #[serde(default = "default_version")]
    pub version: u32,

    /// Search behavior
    #[serde(default)]
    pub search: SearchTuning,

    /// Qdrant connection
    #[serde(default)]
    pub qdrant: QdrantSettings,

    /// Keyframe storage layout
    #[serde(default)]
    pub storage: StorageSettings,
}

fn default_version() -> u32 {
    SETTINGS_VERSION
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            search: SearchTuning::default(),
            qdrant: QdrantSettings::default(),
            storage: StorageSettings::default(),
        }
    }
}

impl SearchSettings {
    /// Normalizes and clamps settings so loaded state is always valid.
    ///
    /// Bad values are corrected instead of rejected.
    pub fn normalize(&mut self) {
        self.version = SETTINGS_VERSION;

        self.search.default_top_k = self.search.default_top_k.clamp(1, MAX_TOP_K);
        self.search.window_size = self.search.window_size.max(1);
        self.search.request_timeout_ms = self.search.request_timeout_ms.clamp(100, 600_000);
        if let OverFetch::Fixed(factor) = self.search.over_fetch {
            self.search.over_fetch = OverFetch::Fixed(factor.clamp(1, 64));
        }

        self.qdrant.url = self.qdrant.url.trim().trim_end_matches('/').to_string();
        if self.qdrant.url.is_empty() {
            self.qdrant.url = default_qdrant_url();
        }
        self.qdrant.timeout_ms = self.qdrant.timeout_ms.clamp(100, 3_600_000);
        if self
            .qdrant
            .api_key
            .as_ref()
            .is_some_and(|key| key.trim().is_empty())
        {
            self.qdrant.api_key = None;
        }

        if !self.storage.default_fps.is_finite() || self.storage.default_fps <= 0.0 {
            self.storage.default_fps = default_fps();
        }
    }

    /// Returns the per-request deadline
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.search.request_timeout_ms)
    }

    /// Loads settings from a JSON file
    pub fn load(path: &Path) -> CoreResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            CoreError::ValidationError(format!(
                "Failed to read settings file {}: {}",
                path.display(),
                e
            ))
        })?;

        let mut settings: SearchSettings = serde_json::from_str(&content).map_err(|e| {
            CoreError::ValidationError(format!(
                "Failed to parse settings file {}: {}",
                path.display(),
                e
            ))
        })?;

        if settings.version < SETTINGS_VERSION {
            info!(
                "Migrating settings from version {} to {}",
                settings.version, SETTINGS_VERSION
            );
        }

        settings.normalize();
        Ok(settings)
    }

    /// Loads settings, returning defaults if the file is missing or unreadable
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            info!("Settings file not found, using defaults");
            return Self::default();
        }

        match Self::load(path) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Failed to load settings, using defaults: {}", e);
                Self::default()
            }
        }
    }

    /// Saves settings using atomic write (temp file + rename)
    pub fn save(&self, path: &Path) -> CoreResult<SearchSettings> {
        let mut normalized = self.clone();
        normalized.normalize();

        let content = serde_json::to_string_pretty(&normalized)?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let temp_path = path.with_extension("json.tmp");
        if temp_path.exists() {
            let _ = fs::remove_file(&temp_path);
        }

        let mut file = fs::File::create(&temp_path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;

        fs::rename(&temp_path, path)?;

        info!("Settings saved to {:?}", path);
        Ok(normalized)
    }
}

// =============================================================================
// Search Tuning
// =============================================================================

/// How many hits to request from the store per stage
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", tag = "mode", content = "factor")]
pub enum OverFetch {
    /// `top_k * (stages remaining, including the current one)`
    RemainingStages,
    /// `top_k * factor` for every stage
    Fixed(usize),
}

impl Default for OverFetch {
    fn default() -> Self {
        OverFetch::RemainingStages
    }
}

impl OverFetch {
    /// Computes the store limit for a 0-based stage index
    pub fn limit(&self, top_k: usize, stage: usize, stage_count: usize) -> usize {
        let factor = match self {
            OverFetch::RemainingStages => stage_count.saturating_sub(stage).max(1),
            OverFetch::Fixed(factor) => (*factor).max(1),
        };
        top_k.saturating_mul(factor)
    }
}

/// Search behavior settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchTuning {
    /// Hits per stage when a request does not specify one
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    /// Maximum frame gap between consecutive stages
    #[serde(default = "default_window_size")]
    pub window_size: FrameNumber,

    /// Over-fetch policy for stage queries
    #[serde(default)]
    pub over_fetch: OverFetch,

    /// Overall deadline per search request
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Keep hits of the same shot together in plain search results
    #[serde(default = "default_true")]
    pub group_by_shot: bool,

    /// Exclude anchor shots unless a request says otherwise
    #[serde(default = "default_true")]
    pub exclude_anchor_shots: bool,
}

impl Default for SearchTuning {
    fn default() -> Self {
        Self {
            default_top_k: default_top_k(),
            window_size: default_window_size(),
            over_fetch: OverFetch::default(),
            request_timeout_ms: default_request_timeout_ms(),
            group_by_shot: true,
            exclude_anchor_shots: true,
        }
    }
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_window_size() -> FrameNumber {
    DEFAULT_WINDOW_SIZE
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

// =============================================================================
// Qdrant Settings
// =============================================================================

/// Qdrant connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QdrantSettings {
    /// Base URL of the REST endpoint
    #[serde(default = "default_qdrant_url")]
    pub url: String,

    /// Collection holding keyframe embeddings
    #[serde(default = "default_collection")]
    pub collection: String,

    /// Optional `api-key` header value
    #[serde(default)]
    pub api_key: Option<String>,

    /// Per-call HTTP timeout
    #[serde(default = "default_qdrant_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for QdrantSettings {
    fn default() -> Self {
        Self {
            url: default_qdrant_url(),
            collection: default_collection(),
            api_key: None,
            timeout_ms: default_qdrant_timeout_ms(),
        }
    }
}

fn default_qdrant_url() -> String {
    "http://localhost:6333".to_string()
}

fn default_collection() -> String {
    "keyframes".to_string()
}

fn default_qdrant_timeout_ms() -> u64 {
    60_000
}

// =============================================================================
// Storage Settings
// =============================================================================

/// Keyframe storage layout settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageSettings {
    /// Root directory of extracted keyframes
    #[serde(default)]
    pub keyframe_root: Option<PathBuf>,

    /// JSON manifest `{video: [frames]}` used instead of scanning
    #[serde(default)]
    pub frame_manifest: Option<PathBuf>,

    /// JSON tables `{video: fps}`, merged in order
    #[serde(default)]
    pub fps_tables: Vec<PathBuf>,

    /// Frame rate assumed for videos missing from the fps tables
    #[serde(default = "default_fps")]
    pub default_fps: f64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            keyframe_root: None,
            frame_manifest: None,
            fps_tables: Vec::new(),
            default_fps: default_fps(),
        }
    }
}

fn default_fps() -> f64 {
    25.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // -------------------------------------------------------------------------
    // Defaults
    // -------------------------------------------------------------------------

    #[test]
    fn test_default_settings() {
        let settings = SearchSettings::default();

        assert_eq!(settings.version, SETTINGS_VERSION);
        assert_eq!(settings.search.default_top_k, 100);
        assert_eq!(settings.search.window_size, 1000);
        assert_eq!(settings.search.over_fetch, OverFetch::RemainingStages);
        assert!(settings.search.group_by_shot);
        assert!(settings.search.exclude_anchor_shots);
        assert_eq!(settings.qdrant.url, "http://localhost:6333");
        assert!(settings.qdrant.api_key.is_none());
        assert_eq!(settings.storage.default_fps, 25.0);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{"search": {"windowSize": 500}}"#;
        let settings: SearchSettings = serde_json::from_str(json).unwrap();

        assert_eq!(settings.search.window_size, 500);
        assert_eq!(settings.search.default_top_k, 100);
        assert_eq!(settings.qdrant.collection, "keyframes");
    }

    #[test]
    fn test_over_fetch_serialization() {
        let json = serde_json::to_string(&OverFetch::Fixed(3)).unwrap();
        assert_eq!(json, r#"{"mode":"fixed","factor":3}"#);

        let parsed: OverFetch = serde_json::from_str(r#"{"mode":"remainingStages"}"#).unwrap();
        assert_eq!(parsed, OverFetch::RemainingStages);
    }

    // -------------------------------------------------------------------------
    // Over-fetch
    // -------------------------------------------------------------------------

    #[test]
    fn test_over_fetch_remaining_stages() {
        let policy = OverFetch::RemainingStages;
        assert_eq!(policy.limit(100, 0, 3), 300);
        assert_eq!(policy.limit(100, 1, 3), 200);
        assert_eq!(policy.limit(100, 2, 3), 100);
        assert_eq!(policy.limit(100, 0, 1), 100);
    }

    #[test]
    fn test_over_fetch_fixed() {
        let policy = OverFetch::Fixed(4);
        assert_eq!(policy.limit(10, 0, 3), 40);
        assert_eq!(policy.limit(10, 2, 3), 40);
        assert_eq!(OverFetch::Fixed(0).limit(10, 0, 1), 10);
    }

    // -------------------------------------------------------------------------
    // Normalization
    // -------------------------------------------------------------------------

    #[test]
    fn test_normalize_clamps_values() {
        let mut settings = SearchSettings::default();
        settings.version = 0;
        settings.search.default_top_k = 0;
        settings.search.window_size = 0;
        settings.search.request_timeout_ms = 1;
        settings.search.over_fetch = OverFetch::Fixed(1000);
        settings.qdrant.url = "  http://qdrant:6333/ ".to_string();
        settings.qdrant.api_key = Some("   ".to_string());
        settings.storage.default_fps = f64::NAN;

        settings.normalize();

        assert_eq!(settings.version, SETTINGS_VERSION);
        assert_eq!(settings.search.default_top_k, 1);
        assert_eq!(settings.search.window_size, 1);
        assert_eq!(settings.search.request_timeout_ms, 100);
        assert_eq!(settings.search.over_fetch, OverFetch::Fixed(64));
        assert_eq!(settings.qdrant.url, "http://qdrant:6333");
        assert!(settings.qdrant.api_key.is_none());
        assert_eq!(settings.storage.default_fps, 25.0);
    }

    // -------------------------------------------------------------------------
    // Persistence
    // -------------------------------------------------------------------------

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("settings.json");

        let mut settings = SearchSettings::default();
        settings.search.window_size = 750;
        settings.qdrant.collection = "siglip_v2".to_string();
        settings.save(&path).unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());

        let loaded = SearchSettings::load(&path).unwrap();
        assert_eq!(loaded.search.window_size, 750);
        assert_eq!(loaded.qdrant.collection, "siglip_v2");
    }

    #[test]
    fn test_load_invalid_json_fails() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();

        let result = SearchSettings::load(&path);
        assert!(matches!(result, Err(CoreError::ValidationError(_))));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let settings = SearchSettings::load_or_default(&temp_dir.path().join("missing.json"));
        assert_eq!(settings, SearchSettings::default());
    }

    #[test]
    fn test_request_timeout() {
        let mut settings = SearchSettings::default();
        settings.search.request_timeout_ms = 2_500;
        assert_eq!(settings.request_timeout(), Duration::from_millis(2_500));
    }
}
