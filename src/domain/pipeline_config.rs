// ============================================================
// PIPELINE CONFIGURATION
// ============================================================
// Tunables for profiling, matching, suggestion and execution

use serde::{Deserialize, Serialize};

/// Thresholds used by the schema profiler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilerConfig {
    /// Share of non-null cells that must look temporal (default: 0.9)
    pub temporal_ratio: f32,

    /// Share of non-null cells that must be numeric (default: 0.9)
    pub numeric_ratio: f32,

    /// Minimum rows before an all-unique text column counts as an identifier (default: 20)
    pub identifier_min_rows: usize,

    /// Distinct sample values kept per column (default: 5)
    pub sample_size: usize,

    /// Maximum rows inspected per column; larger datasets are sampled evenly (default: 10000)
    pub max_profile_rows: usize,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            temporal_ratio: 0.9,
            numeric_ratio: 0.9,
            identifier_min_rows: 20,
            sample_size: 5,
            max_profile_rows: 10_000,
        }
    }
}

/// Configuration for the query pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Rows returned by the preview fallback (default: 100)
    pub preview_rows: usize,

    /// Primary plus alternatives shown to the user (default: 3)
    pub max_suggestions: usize,

    /// N used by "top" queries that do not name one (default: 5)
    pub default_top_n: usize,

    /// Bound on fallback model inference in milliseconds (default: 5000)
    pub fallback_timeout_ms: u64,

    /// Dataset profiles kept in the fingerprint cache (default: 16)
    pub profile_cache_size: usize,

    pub profiler: ProfilerConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            preview_rows: 100,
            max_suggestions: 3,
            default_top_n: 5,
            fallback_timeout_ms: 5_000,
            profile_cache_size: 16,
            profiler: ProfilerConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Alternatives allowed next to the primary suggestion.
    pub fn max_alternatives(&self) -> usize {
        self.max_suggestions.saturating_sub(1)
    }
}
