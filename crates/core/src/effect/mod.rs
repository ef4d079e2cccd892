//! Color generators keyed by grid position and effect time.
//!
//! An effect is a deterministic function of `(position, time, settings)`; the
//! engine and the preview both call the same [`EffectInstance::color_at`], so
//! they can never disagree.

mod distance;
mod explosion;
mod wave;

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use distance::{falloff, DistanceFalloff};
pub use explosion::{Explosion, ExplosionParams};
pub use wave::{wave_intensity, Wave, WaveParams};

use crate::{color::sample_palette, GridPosition, Result, RgbColor, SpatialError};

/// Speed at which effect time runs at wall-clock rate.
pub const BASELINE_SPEED: f32 = 50.0;

/// Degrees of hue travelled per second of effect time with random colors.
const HUE_DEGREES_PER_SECOND: f32 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    Distance,
    Wave,
    Explosion,
    Custom,
}

impl EffectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EffectKind::Distance => "distance",
            EffectKind::Wave => "wave",
            EffectKind::Explosion => "explosion",
            EffectKind::Custom => "custom",
        }
    }

    /// Builds the stock implementation of a kind. `Custom` has none.
    pub fn instantiate(&self) -> Option<Box<dyn SpatialEffect>> {
        match self {
            EffectKind::Distance => Some(Box::new(DistanceFalloff::new())),
            EffectKind::Wave => Some(Box::new(Wave::default())),
            EffectKind::Explosion => Some(Box::new(Explosion::default())),
            EffectKind::Custom => None,
        }
    }
}

impl FromStr for EffectKind {
    type Err = SpatialError;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "distance" | "distance_falloff" => Ok(EffectKind::Distance),
            "wave" => Ok(EffectKind::Wave),
            "explosion" => Ok(EffectKind::Explosion),
            "custom" => Ok(EffectKind::Custom),
            other => Err(SpatialError::msg(format!("unknown effect kind `{other}`"))),
        }
    }
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-facing knobs shared by every effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectSettings {
    /// 0..=100; [`BASELINE_SPEED`] runs at wall-clock rate.
    pub speed: u32,
    /// 0..=100 percent applied to every output color.
    pub brightness: u8,
    #[serde(rename = "randomColors", default)]
    pub random_colors: bool,
    #[serde(rename = "referencePoint", default)]
    pub reference_point: Option<GridPosition>,
    #[serde(default = "default_colors")]
    pub colors: Vec<RgbColor>,
}

impl Default for EffectSettings {
    fn default() -> Self {
        Self {
            speed: BASELINE_SPEED as u32,
            brightness: 100,
            random_colors: false,
            reference_point: None,
            colors: default_colors(),
        }
    }
}

impl EffectSettings {
    pub fn with_color(color: RgbColor) -> Self {
        Self {
            colors: vec![color],
            ..Self::default()
        }
    }

    /// Palette color at `fraction` along the gradient. Random colors rotate
    /// the hue with effect time instead.
    pub fn base_color(&self, time: f32, fraction: f32) -> RgbColor {
        if self.random_colors {
            RgbColor::from_hue(time * HUE_DEGREES_PER_SECOND + fraction * 360.0)
        } else {
            sample_palette(&self.colors, fraction)
        }
    }

    fn sanitize(&mut self) {
        self.speed = self.speed.min(100);
        self.brightness = self.brightness.min(100);
        if self.colors.is_empty() {
            self.colors = default_colors();
        }
    }
}

fn default_colors() -> Vec<RgbColor> {
    vec![RgbColor::WHITE]
}

/// Positions an effect drives plus the resolved origin.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EffectLayout {
    pub reference: Option<GridPosition>,
    pub positions: Vec<GridPosition>,
}

impl EffectLayout {
    pub fn new(reference: Option<GridPosition>, positions: Vec<GridPosition>) -> Self {
        Self {
            reference,
            positions,
        }
    }

    /// Largest distance from the reference to any driven position.
    pub fn max_distance(&self) -> f32 {
        let Some(reference) = self.reference else {
            return 0.0;
        };
        self.positions
            .iter()
            .map(|p| p.distance_to(reference))
            .fold(0.0, f32::max)
    }
}

/// A color algorithm. Implementations must be pure given their prepared
/// layout, `position`, `time` and `settings`: no hidden randomness.
pub trait SpatialEffect: Send {
    fn kind(&self) -> EffectKind;

    fn name(&self) -> &str;

    fn requires_reference_point(&self) -> bool {
        true
    }

    /// Frame rate for a dedicated worker thread; `None` rides the shared tick.
    fn target_fps(&self) -> Option<u32> {
        None
    }

    /// Called whenever the driven positions or the reference change.
    fn prepare(&mut self, layout: &EffectLayout);

    /// Unscaled color at `position`; brightness is applied by the caller.
    fn color_at(
        &self,
        position: GridPosition,
        time: f32,
        settings: &EffectSettings,
    ) -> Result<RgbColor>;

    /// Self-terminating effects report completion here.
    fn is_finished(&self, _time: f32) -> bool {
        false
    }

    /// Algorithm specific parameters for profiles.
    fn params(&self) -> Value {
        Value::Null
    }

    fn apply_params(&mut self, _params: &Value) -> Result<()> {
        Ok(())
    }
}

/// Runtime state of one effect: the algorithm, its settings and its clock.
pub struct EffectInstance {
    effect: Box<dyn SpatialEffect>,
    settings: EffectSettings,
    layout: EffectLayout,
    baseline: f32,
    enabled: bool,
    time: f32,
}

impl EffectInstance {
    pub fn new(effect: Box<dyn SpatialEffect>) -> Self {
        Self::with_settings(effect, EffectSettings::default())
    }

    pub fn with_settings(effect: Box<dyn SpatialEffect>, mut settings: EffectSettings) -> Self {
        settings.sanitize();
        Self {
            effect,
            settings,
            layout: EffectLayout::default(),
            baseline: BASELINE_SPEED,
            enabled: false,
            time: 0.0,
        }
    }

    pub fn of_kind(kind: EffectKind, settings: EffectSettings) -> Option<Self> {
        kind.instantiate()
            .map(|effect| Self::with_settings(effect, settings))
    }

    pub fn kind(&self) -> EffectKind {
        self.effect.kind()
    }

    pub fn name(&self) -> &str {
        self.effect.name()
    }

    pub fn effect(&self) -> &dyn SpatialEffect {
        self.effect.as_ref()
    }

    pub fn effect_mut(&mut self) -> &mut dyn SpatialEffect {
        self.effect.as_mut()
    }

    pub fn settings(&self) -> &EffectSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, mut settings: EffectSettings) {
        settings.sanitize();
        self.settings = settings;
    }

    pub fn layout(&self) -> &EffectLayout {
        &self.layout
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    /// Speed setting at which effect time matches wall-clock time.
    pub fn set_baseline_speed(&mut self, baseline: f32) {
        if baseline.is_finite() && baseline > 0.0 {
            self.baseline = baseline;
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn requires_reference_point(&self) -> bool {
        self.effect.requires_reference_point()
    }

    pub fn target_fps(&self) -> Option<u32> {
        self.effect.target_fps()
    }

    pub fn is_finished(&self) -> bool {
        self.effect.is_finished(self.time)
    }

    /// Enables the clock. A finished self-terminating effect restarts from
    /// zero.
    pub fn start(&mut self) {
        if self.is_finished() {
            self.time = 0.0;
        }
        self.enabled = true;
    }

    pub fn stop(&mut self) {
        self.enabled = false;
    }

    /// Advances effect time by `delta * speed / baseline` while enabled.
    pub fn update(&mut self, delta_seconds: f32) {
        if !self.enabled || !delta_seconds.is_finite() || delta_seconds <= 0.0 {
            return;
        }
        self.time += delta_seconds * self.settings.speed as f32 / self.baseline;
    }

    pub fn prepare(&mut self, layout: EffectLayout) {
        self.effect.prepare(&layout);
        self.layout = layout;
    }

    /// Final color at `position` for the current effect time.
    pub fn color_for_position(&self, position: GridPosition) -> Result<RgbColor> {
        self.color_at(position, self.time)
    }

    /// Final color at `position` for an arbitrary time, brightness applied.
    pub fn color_at(&self, position: GridPosition, time: f32) -> Result<RgbColor> {
        let raw = self.effect.color_at(position, time, &self.settings)?;
        Ok(raw.scaled(self.settings.brightness as f32 / 100.0))
    }
}

impl fmt::Debug for EffectInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectInstance")
            .field("kind", &self.effect.kind())
            .field("name", &self.effect.name())
            .field("settings", &self.settings)
            .field("enabled", &self.enabled)
            .field("time", &self.time)
            .finish()
    }
}

/// Looks up the reference point or reports why it is missing.
pub(crate) fn require_reference(
    layout_reference: Option<GridPosition>,
    name: &str,
) -> Result<GridPosition> {
    layout_reference
        .ok_or_else(|| SpatialError::msg(format!("{name} effect has no reference point")))
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn time_only_advances_while_enabled() {
        let mut instance = EffectInstance::new(Box::new(Wave::default()));
        instance.update(1.0);
        assert_eq!(instance.time(), 0.0);

        instance.start();
        instance.update(0.5);
        assert_relative_eq!(instance.time(), 0.5);

        instance.stop();
        instance.update(10.0);
        assert_relative_eq!(instance.time(), 0.5);
    }

    #[test]
    fn speed_scales_relative_to_baseline() {
        let settings = EffectSettings {
            speed: 100,
            ..EffectSettings::default()
        };
        let mut instance = EffectInstance::with_settings(Box::new(Wave::default()), settings);
        instance.start();
        instance.update(1.0);
        assert_relative_eq!(instance.time(), 2.0);

        instance.set_baseline_speed(25.0);
        instance.set_baseline_speed(0.0);
        instance.update(1.0);
        assert_relative_eq!(instance.time(), 6.0);
    }

    #[test]
    fn brightness_scales_output() {
        let settings = EffectSettings {
            brightness: 50,
            ..EffectSettings::with_color(RgbColor::new(200, 100, 0))
        };
        let mut instance =
            EffectInstance::with_settings(Box::new(DistanceFalloff::new()), settings);
        let origin = GridPosition::ORIGIN;
        instance.prepare(EffectLayout::new(Some(origin), vec![origin]));
        assert_eq!(instance.color_for_position(origin).unwrap(), RgbColor::new(100, 50, 0));
    }

    #[test]
    fn settings_are_sanitized() {
        let settings = EffectSettings {
            speed: 400,
            brightness: 250,
            colors: Vec::new(),
            ..EffectSettings::default()
        };
        let instance = EffectInstance::with_settings(Box::new(Wave::default()), settings);
        assert_eq!(instance.settings().speed, 100);
        assert_eq!(instance.settings().brightness, 100);
        assert_eq!(instance.settings().colors, vec![RgbColor::WHITE]);
    }

    #[test]
    fn kinds_parse_and_instantiate() {
        for kind in [EffectKind::Distance, EffectKind::Wave, EffectKind::Explosion] {
            let parsed: EffectKind = kind.as_str().parse().unwrap();
            assert_eq!(parsed, kind);
            assert_eq!(kind.instantiate().unwrap().kind(), kind);
        }
        assert!(EffectKind::Custom.instantiate().is_none());
        assert!("sparkle".parse::<EffectKind>().is_err());
    }

    #[test]
    fn random_colors_are_deterministic() {
        let settings = EffectSettings {
            random_colors: true,
            ..EffectSettings::default()
        };
        assert_eq!(settings.base_color(1.5, 0.25), settings.base_color(1.5, 0.25));
        assert_ne!(settings.base_color(0.0, 0.0), settings.base_color(1.0, 0.0));
    }
}
