use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    effect::BASELINE_SPEED,
    persist::{read_json, read_json_or_default, write_json},
    GridDimensions, Result, RgbColor, TickRate, WaveParams,
};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub grid: GridDimensions,
    pub pattern: PatternConfig,
}

impl AppConfig {
    /// Reads a config file. Missing fields fall back to their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        read_json(path.as_ref())
    }

    /// Like [`AppConfig::load`] but never fails: any problem is logged and
    /// the defaults are used instead.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        read_json_or_default(path.as_ref(), "configuration")
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        write_json(path.as_ref(), self)
    }
}

/// Configuration specific to the effect engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub tick_rate: TickRate,
    /// Speed setting that maps to wall-clock effect time.
    pub baseline_speed: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_rate: TickRate::Normal,
            baseline_speed: BASELINE_SPEED,
        }
    }
}

/// Configuration for the pattern tester.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    /// Minimum time between re-evaluations of a continuous pattern.
    pub interval_ms: u64,
    /// Pause between positions during a layer sweep.
    pub layer_delay_ms: u64,
    #[serde(with = "crate::color::packed")]
    pub test_color: RgbColor,
    pub wave: WaveParams,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            interval_ms: 33,
            layer_delay_ms: 200,
            test_color: RgbColor::WHITE,
            wave: WaveParams::default(),
        }
    }
}
