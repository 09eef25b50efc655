//! # Streaming Configuration
//!
//! TOML-backed configuration for distances, thresholds, and scheduler
//! limits. Missing fields fall back to defaults so older config files
//! keep working.

use std::path::Path;

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// A spherical region whose contained assets get a priority multiplier,
/// e.g. the area around a spawn point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorityZone {
    pub center: Vec3,
    pub radius: f32,
    pub multiplier: f32,
}

impl PriorityZone {
    pub fn contains(&self, point: Vec3) -> bool {
        self.center.distance(point) <= self.radius
    }
}

/// Streaming pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Assets within this distance of the viewpoint are queued for load.
    #[serde(default = "default_load_distance")]
    pub load_distance: f32,

    /// Assets beyond this distance become eviction candidates.
    #[serde(default = "default_unload_distance")]
    pub unload_distance: f32,

    /// Spatial assets closer than this are grouped into one bundle.
    #[serde(default = "default_proximity_threshold")]
    pub proximity_threshold: f32,

    /// Assets with priority strictly above this block scene readiness.
    #[serde(default = "default_critical_threshold")]
    pub critical_threshold: f32,

    /// Boost priority for assets the viewpoint is moving toward.
    #[serde(default = "default_true")]
    pub predictive_loading: bool,

    /// Seconds of camera velocity to look ahead when predicting.
    #[serde(default = "default_prediction_weight")]
    pub prediction_weight: f32,

    /// Priority zones applied on top of distance-based priority.
    #[serde(default)]
    pub priority_zones: Vec<PriorityZone>,

    /// Upper bound on simultaneously loading assets. The bandwidth tier
    /// may gate this further at run time.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_loads: usize,

    /// Per-asset attempt budget in seconds.
    #[serde(default = "default_timeout")]
    pub load_timeout_secs: u64,

    /// Substitute synthetic payloads for failed assets.
    #[serde(default = "default_true")]
    pub placeholders_enabled: bool,
}

fn default_load_distance() -> f32 { 100.0 }
fn default_unload_distance() -> f32 { 150.0 }
fn default_proximity_threshold() -> f32 { 50.0 }
fn default_critical_threshold() -> f32 { 0.8 }
fn default_prediction_weight() -> f32 { 0.5 }
fn default_max_concurrent() -> usize { 4 }
fn default_timeout() -> u64 { 30 }
fn default_true() -> bool { true }

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            load_distance: default_load_distance(),
            unload_distance: default_unload_distance(),
            proximity_threshold: default_proximity_threshold(),
            critical_threshold: default_critical_threshold(),
            predictive_loading: true,
            prediction_weight: default_prediction_weight(),
            priority_zones: Vec::new(),
            max_concurrent_loads: default_max_concurrent(),
            load_timeout_secs: default_timeout(),
            placeholders_enabled: true,
        }
    }
}

impl StreamingConfig {
    /// Load from a TOML file, falling back to defaults on any failure.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("failed to parse streaming config: {}", e);
                    }
                },
                Err(e) => {
                    tracing::warn!("failed to read streaming config: {}", e);
                }
            }
        }
        Self::default()
    }

    /// Save to a TOML file.
    pub fn save(&self, path: &Path) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Preset for local development: generous distances, short timeouts.
    pub fn development() -> Self {
        Self {
            load_distance: 500.0,
            unload_distance: 800.0,
            load_timeout_secs: 10,
            max_concurrent_loads: 8,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_roundtrip() {
        let mut config = StreamingConfig::default();
        config.priority_zones.push(PriorityZone {
            center: Vec3::new(0.0, 0.0, 0.0),
            radius: 25.0,
            multiplier: 1.2,
        });

        let text = toml::to_string_pretty(&config).unwrap();
        let back: StreamingConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.load_distance, 100.0);
        assert_eq!(back.priority_zones.len(), 1);
        assert_eq!(back.priority_zones[0].multiplier, 1.2);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let config: StreamingConfig = toml::from_str("load_distance = 42.0").unwrap();
        assert_eq!(config.load_distance, 42.0);
        assert_eq!(config.unload_distance, 150.0);
        assert_eq!(config.critical_threshold, 0.8);
        assert!(config.placeholders_enabled);
    }

    #[test]
    fn load_or_default_missing_file() {
        let config = StreamingConfig::load_or_default(Path::new("/nonexistent/streaming.toml"));
        assert_eq!(config.max_concurrent_loads, 4);
    }
}
