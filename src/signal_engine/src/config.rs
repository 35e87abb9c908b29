//! Engine configuration: TOML parsing, environment overrides and validation.
//!
//! Every field has a default, so an empty document (or no file at all) yields
//! the stock setup: 1-minute base bars, a 3000-bar buffer per symbol, derived
//! 5m/15m/1h timeframes and the classic indicator periods.
//!
//! Entrypoints:
//! - Parse + validate from a TOML string: [`load_config_str`]
//! - Parse + validate from a file path: [`load_config_path`]
//! - Optional path, falling back to defaults: [`load_config`]
//!
//! `SIGNAL_ENGINE_DATA_DIR` overrides `persistence.data_dir` after parsing.

use std::{
    collections::HashSet,
    num::NonZeroU32,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use market_data::models::timeframe::{Timeframe, TimeframeUnit};
use serde::{Deserialize, Serialize};
use shared_utils::env::{EnvParseError, env_override};
use thiserror::Error;
use toml::from_str;

use crate::crossing::SignalThresholds;
use crate::indicators::IndicatorParams;

pub const DATA_DIR_ENV: &str = "SIGNAL_ENGINE_DATA_DIR";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be greater than zero")]
    ZeroValue { name: &'static str },

    #[error("macd_fast ({fast}) must be shorter than macd_slow ({slow})")]
    MacdPeriods { fast: usize, slow: usize },

    #[error("rsi_oversold ({oversold}) must be below rsi_overbought ({overbought}), both within 0..=100")]
    RsiThresholds { oversold: f64, overbought: f64 },

    #[error("{name} must be a positive finite number, got {value}")]
    NotPositive { name: &'static str, value: f64 },

    #[error("buffer_capacity {capacity} cannot hold the {required} bars needed for {timeframe}")]
    CapacityTooSmall {
        capacity: usize,
        required: usize,
        timeframe: Timeframe,
    },

    #[error("timeframe multiple {multiple} must be at least 2")]
    BadMultiple { multiple: u32 },

    #[error("timeframe multiple {multiple} is listed twice")]
    DuplicateMultiple { multiple: u32 },
}

/// Durable-storage and scheduling settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PersistenceConfig {
    /// Root directory of the file store.
    pub data_dir: PathBuf,
    /// Seconds between persistence cycles.
    pub interval_secs: u64,
    /// Newest bars written per series each cycle; 0 writes the whole buffer.
    pub flush_tail: usize,
    /// Retries after a failed store operation (total attempts = 1 + retries).
    pub max_retries: u32,
    /// First retry delay; doubles on every further retry.
    pub base_delay_ms: u64,
    /// How far back cold-start backfill reads.
    pub backfill_days: u32,
    /// Run one last cycle when the scheduler is told to stop.
    pub flush_on_shutdown: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            interval_secs: 60,
            flush_tail: 100,
            max_retries: 3,
            base_delay_ms: 500,
            backfill_days: 7,
            flush_on_shutdown: true,
        }
    }
}

impl PersistenceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn backfill_window(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.backfill_days))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EngineConfig {
    /// Timeframe of ingested bars.
    pub base_timeframe: Timeframe,
    /// Bars retained per symbol.
    pub buffer_capacity: usize,
    /// Derived timeframes, as multiples of the base timeframe.
    pub multiples: Vec<u32>,
    pub indicators: IndicatorParams,
    pub thresholds: SignalThresholds,
    pub persistence: PersistenceConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_timeframe: Timeframe::new(NonZeroU32::MIN, TimeframeUnit::Minute),
            buffer_capacity: 3000,
            multiples: vec![5, 15, 60],
            indicators: IndicatorParams::default(),
            thresholds: SignalThresholds::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Number of base bars in one bar of `timeframe`, if `timeframe` is queryable.
    pub fn multiple_for(&self, timeframe: Timeframe) -> Option<u32> {
        if timeframe == self.base_timeframe {
            return Some(1);
        }
        timeframe
            .multiple_of(self.base_timeframe)
            .filter(|m| self.multiples.contains(m))
    }

    /// The base timeframe followed by every derived one.
    pub fn supported_timeframes(&self) -> Vec<Timeframe> {
        std::iter::once(self.base_timeframe)
            .chain(
                self.multiples
                    .iter()
                    .filter_map(|m| NonZeroU32::new(*m))
                    .map(|m| self.base_timeframe.scaled(m)),
            )
            .collect()
    }

    /// Checks that the numbers make sense together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.indicators;
        for (name, value) in [
            ("ema_period", p.ema_period),
            ("sma_period", p.sma_period),
            ("macd_fast", p.macd_fast),
            ("macd_slow", p.macd_slow),
            ("macd_signal", p.macd_signal),
            ("rsi_period", p.rsi_period),
            ("bb_period", p.bb_period),
            ("buffer_capacity", self.buffer_capacity),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroValue { name });
            }
        }
        if self.persistence.interval_secs == 0 {
            return Err(ConfigError::ZeroValue {
                name: "persistence.interval_secs",
            });
        }
        if p.macd_fast >= p.macd_slow {
            return Err(ConfigError::MacdPeriods {
                fast: p.macd_fast,
                slow: p.macd_slow,
            });
        }
        for (name, value) in [
            ("bb_std_dev", p.bb_std_dev),
            ("bb_squeeze_width", self.thresholds.bb_squeeze_width),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::NotPositive { name, value });
            }
        }
        let t = &self.thresholds;
        let in_range = |v: f64| (0.0..=100.0).contains(&v);
        if !(in_range(t.rsi_oversold) && in_range(t.rsi_overbought))
            || t.rsi_oversold >= t.rsi_overbought
        {
            return Err(ConfigError::RsiThresholds {
                oversold: t.rsi_oversold,
                overbought: t.rsi_overbought,
            });
        }

        let mut seen = HashSet::new();
        for &multiple in &self.multiples {
            if multiple < 2 {
                return Err(ConfigError::BadMultiple { multiple });
            }
            if !seen.insert(multiple) {
                return Err(ConfigError::DuplicateMultiple { multiple });
            }
        }

        // The widest timeframe must fit its warm-up in closed windows even when
        // the oldest buffered bar sits just past a window boundary.
        let widest = self.multiples.iter().copied().max().unwrap_or(1) as usize;
        let required = self.min_capacity_for(widest);
        if required > self.buffer_capacity {
            let timeframe = u32::try_from(widest)
                .ok()
                .and_then(NonZeroU32::new)
                .map(|m| self.base_timeframe.scaled(m))
                .unwrap_or(self.base_timeframe);
            return Err(ConfigError::CapacityTooSmall {
                capacity: self.buffer_capacity,
                required,
                timeframe,
            });
        }
        Ok(())
    }

    /// Smallest buffer that always holds `required_bars` complete windows of
    /// `multiple` base bars, whatever the alignment of its oldest bar.
    pub fn min_capacity_for(&self, multiple: usize) -> usize {
        let need = self.indicators.required_bars();
        need.saturating_add(1)
            .saturating_mul(multiple)
            .saturating_sub(1)
            .max(need)
    }

    /// Applies environment overrides on top of the parsed values.
    pub fn apply_env_overrides(&mut self) -> Result<(), EnvParseError> {
        if let Some(dir) = env_override::<PathBuf>(DATA_DIR_ENV)? {
            self.persistence.data_dir = dir;
        }
        Ok(())
    }
}

fn finish(mut cfg: EngineConfig) -> anyhow::Result<EngineConfig> {
    cfg.apply_env_overrides()
        .context("failed to apply environment overrides")?;
    cfg.validate().context("invalid engine configuration")?;
    Ok(cfg)
}

/// Parse a TOML document into a validated [`EngineConfig`].
pub fn load_config_str(toml_str: &str) -> anyhow::Result<EngineConfig> {
    let cfg: EngineConfig = from_str(toml_str).context("failed to parse engine config TOML")?;
    finish(cfg)
}

/// Read an engine config TOML file from disk, parse, and validate it.
pub fn load_config_path(path: impl AsRef<Path>) -> anyhow::Result<EngineConfig> {
    let text = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("read config file {}", path.as_ref().display()))?;
    load_config_str(&text)
}

/// Loads `path` when given, otherwise the defaults (still subject to overrides).
pub fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(path) => load_config_path(path),
        None => finish(EngineConfig::default()),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let cfg: EngineConfig = from_str("").unwrap();
        assert_eq!(cfg, EngineConfig::default());
        assert_eq!(cfg.base_timeframe.to_string(), "1m");
        assert_eq!(cfg.buffer_capacity, 3000);
        assert_eq!(cfg.thresholds.rsi_overbought, 70.0);
        assert_eq!(cfg.persistence.flush_tail, 100);
        cfg.validate().unwrap();
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg: EngineConfig = from_str(
            r#"
            base_timeframe = "5m"
            multiples = [3, 12]

            [indicators]
            rsi_period = 7

            [thresholds]
            rsi_overbought = 80.0

            [persistence]
            data_dir = "/var/lib/signals"
            interval_secs = 30
            "#,
        )
        .unwrap();
        assert_eq!(cfg.base_timeframe, Timeframe::minutes(5).unwrap());
        assert_eq!(cfg.indicators.rsi_period, 7);
        assert_eq!(cfg.indicators.macd_slow, 26);
        assert_eq!(cfg.thresholds.rsi_overbought, 80.0);
        assert_eq!(cfg.thresholds.rsi_oversold, 30.0);
        assert_eq!(cfg.persistence.data_dir, PathBuf::from("/var/lib/signals"));
        assert_eq!(cfg.persistence.flush_tail, 100);
        assert_eq!(
            cfg.supported_timeframes(),
            vec![
                Timeframe::minutes(5).unwrap(),
                Timeframe::minutes(15).unwrap(),
                Timeframe::hours(1).unwrap(),
            ]
        );
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(load_config_str("buffer_size = 10").is_err());
        assert!(load_config_str("[indicators]\nrsi = 14").is_err());
    }

    #[test]
    fn multiple_lookup() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.multiple_for(Timeframe::minutes(1).unwrap()), Some(1));
        assert_eq!(cfg.multiple_for(Timeframe::minutes(15).unwrap()), Some(15));
        assert_eq!(cfg.multiple_for(Timeframe::hours(1).unwrap()), Some(60));
        assert_eq!(cfg.multiple_for(Timeframe::minutes(3).unwrap()), None);
        assert_eq!(cfg.multiple_for(Timeframe::days(1).unwrap()), None);
    }

    #[test]
    fn validation_catches_inconsistent_values() {
        let mut cfg = EngineConfig::default();
        cfg.indicators.macd_fast = 30;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::MacdPeriods { fast: 30, slow: 26 })
        );

        let mut cfg = EngineConfig::default();
        cfg.thresholds.rsi_oversold = 75.0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::RsiThresholds { .. })
        ));

        let mut cfg = EngineConfig::default();
        cfg.multiples = vec![5, 5];
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::DuplicateMultiple { multiple: 5 })
        );

        let mut cfg = EngineConfig::default();
        cfg.indicators.rsi_period = 0;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::ZeroValue { name: "rsi_period" })
        );

        let mut cfg = EngineConfig::default();
        cfg.buffer_capacity = 500;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::CapacityTooSmall { required: 2159, .. })
        ));

        let mut cfg = EngineConfig::default();
        cfg.buffer_capacity = 2158;
        assert!(cfg.validate().is_err());
        cfg.buffer_capacity = 2159;
        assert_eq!(cfg.validate(), Ok(()));
        cfg.multiples.clear();
        cfg.buffer_capacity = 35;
        assert_eq!(cfg.validate(), Ok(()));
    }

    #[test]
    fn load_from_path_reports_missing_file() {
        let err = load_config_path("/definitely/not/here.toml").unwrap_err();
        assert!(format!("{err:#}").contains("read config file"));
    }

    #[test]
    fn load_from_path_parses_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "buffer_capacity = 4000").unwrap();
        let cfg = load_config_path(file.path()).unwrap();
        assert_eq!(cfg.buffer_capacity, 4000);
    }
}
