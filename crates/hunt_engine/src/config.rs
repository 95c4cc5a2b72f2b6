use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pricing::{PricingConfig, RadiusProgression};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchAreaLimits {
    pub min_radius_m: f64,
    pub max_radius_m: f64,
}

impl Default for SearchAreaLimits {
    fn default() -> Self {
        Self {
            min_radius_m: 100.0,
            max_radius_m: 500_000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub reconcile_delay_ms: u64,
    pub refresh_interval_ms: u64,
    pub max_unconfirmed_fetches: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reconcile_delay_ms: 500,
            refresh_interval_ms: 5_000,
            max_unconfirmed_fetches: 3,
        }
    }
}

impl SyncConfig {
    pub fn reconcile_delay(&self) -> Duration {
        Duration::from_millis(self.reconcile_delay_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}

/// Which prior generated areas count towards the next generation's price.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterScope {
    #[default]
    Lifetime,
    Weekly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub progression: RadiusProgression,
    pub pricing: PricingConfig,
    pub search_area: SearchAreaLimits,
    pub sync: SyncConfig,
    pub counter_scope: CounterScope,
    pub notice_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            progression: RadiusProgression::default(),
            pricing: PricingConfig::default(),
            search_area: SearchAreaLimits::default(),
            sync: SyncConfig::default(),
            counter_scope: CounterScope::default(),
            notice_capacity: 32,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse config json at {path}: {message}")]
    Parse { path: String, message: String },
    #[error("invalid config at {path}: {message}")]
    Invalid { path: &'static str, message: String },
}

impl EngineConfig {
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let mut deserializer = serde_json::Deserializer::from_str(raw);
        let config = serde_path_to_error::deserialize::<_, EngineConfig>(&mut deserializer)
            .map_err(|error| {
                let path = error.path().to_string();
                ConfigError::Parse {
                    path: if path.is_empty() { ".".to_string() } else { path },
                    message: error.into_inner().to_string(),
                }
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let progression = &self.progression;
        if !(progression.decay_factor > 0.0 && progression.decay_factor <= 1.0) {
            return Err(invalid(
                "progression.decay_factor",
                format!("expected (0, 1], got {}", progression.decay_factor),
            ));
        }
        if !(progression.radius_floor_km > 0.0)
            || progression.radius_floor_km > progression.base_radius_km
        {
            return Err(invalid(
                "progression.radius_floor_km",
                format!(
                    "expected (0, {}], got {}",
                    progression.base_radius_km, progression.radius_floor_km
                ),
            ));
        }

        let map_area = &self.pricing.map_area;
        if map_area.base > map_area.max {
            return Err(invalid(
                "pricing.map_area.max",
                format!("expected >= base {}, got {}", map_area.base, map_area.max),
            ));
        }

        let tiers = &self.pricing.clue_tiers;
        if tiers.is_empty() {
            return Err(invalid("pricing.clue_tiers", "expected at least one tier"));
        }
        for pair in tiers.windows(2) {
            if pair[1].min_clues <= pair[0].min_clues {
                return Err(invalid(
                    "pricing.clue_tiers",
                    format!(
                        "min_clues must be strictly ascending, got {} after {}",
                        pair[1].min_clues, pair[0].min_clues
                    ),
                ));
            }
            if pair[1].price < pair[0].price {
                return Err(invalid(
                    "pricing.clue_tiers",
                    format!(
                        "tier prices must not decrease, got {} after {}",
                        pair[1].price, pair[0].price
                    ),
                ));
            }
        }
        if let Some(tier) = tiers
            .iter()
            .find(|tier| tier.price < map_area.base || tier.price > map_area.max)
        {
            return Err(invalid(
                "pricing.clue_tiers",
                format!(
                    "tier price {} outside [{}, {}]",
                    tier.price, map_area.base, map_area.max
                ),
            ));
        }

        let limits = &self.search_area;
        if !(limits.min_radius_m > 0.0) || limits.min_radius_m > limits.max_radius_m {
            return Err(invalid(
                "search_area",
                format!(
                    "expected 0 < min_radius_m <= max_radius_m, got {} and {}",
                    limits.min_radius_m, limits.max_radius_m
                ),
            ));
        }

        if self.notice_capacity == 0 {
            return Err(invalid("notice_capacity", "expected at least 1"));
        }
        Ok(())
    }
}

fn invalid(path: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        path,
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::model::Cents;

    #[test]
    fn empty_object_yields_production_defaults() {
        let config = EngineConfig::from_json_str("{}").expect("parse");
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.progression.base_radius_km, 500.0);
        assert_eq!(config.pricing.map_area.max, Cents(2999));
        assert_eq!(config.sync.refresh_interval(), Duration::from_secs(5));
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = EngineConfig::from_json_str(
            r#"{ "sync": { "reconcile_delay_ms": 0 }, "counter_scope": "weekly" }"#,
        )
        .expect("parse");
        assert_eq!(config.sync.reconcile_delay_ms, 0);
        assert_eq!(config.sync.refresh_interval_ms, 5_000);
        assert_eq!(config.counter_scope, CounterScope::Weekly);
    }

    #[test]
    fn parse_error_names_offending_path() {
        let error = EngineConfig::from_json_str(r#"{ "pricing": { "map_area": { "max": "lots" } } }"#)
            .expect_err("should fail");
        match error {
            ConfigError::Parse { path, .. } => assert_eq!(path, "pricing.map_area.max"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn validation_rejects_inverted_price_bounds() {
        let error = EngineConfig::from_json_str(
            r#"{ "pricing": { "map_area": { "base": 3000, "max": 2999 } } }"#,
        )
        .expect_err("should fail");
        assert!(matches!(
            error,
            ConfigError::Invalid {
                path: "pricing.map_area.max",
                ..
            }
        ));
    }

    #[test]
    fn validation_rejects_unsorted_tiers_and_bad_decay() {
        let unsorted = EngineConfig::from_json_str(
            r#"{ "pricing": { "clue_tiers": [
                { "min_clues": 10, "price": 999 },
                { "min_clues": 5, "price": 1299 }
            ] } }"#,
        );
        assert!(matches!(
            unsorted,
            Err(ConfigError::Invalid {
                path: "pricing.clue_tiers",
                ..
            })
        ));

        let decay = EngineConfig::from_json_str(r#"{ "progression": { "decay_factor": 1.5 } }"#);
        assert!(matches!(
            decay,
            Err(ConfigError::Invalid {
                path: "progression.decay_factor",
                ..
            })
        ));
    }

    #[test]
    fn load_from_path_reads_file_and_reports_missing() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("hunt.json");
        fs::write(&path, r#"{ "notice_capacity": 4 }"#).expect("write config");

        let config = EngineConfig::load_from_path(&path).expect("load");
        assert_eq!(config.notice_capacity, 4);

        let missing = EngineConfig::load_from_path(&temp.path().join("missing.json"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }
}
