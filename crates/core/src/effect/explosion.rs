use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{GridPosition, Result, RgbColor};

use super::{require_reference, EffectKind, EffectLayout, EffectSettings, SpatialEffect};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExplosionParams {
    /// Seconds of effect time until the blast is over.
    pub duration: f32,
    /// Final radius in grid units. Defaults to the farthest driven position.
    #[serde(default)]
    pub max_radius: Option<f32>,
    pub intensity: f32,
}

impl Default for ExplosionParams {
    fn default() -> Self {
        Self {
            duration: 2.0,
            max_radius: None,
            intensity: 1.0,
        }
    }
}

/// A single expanding shell of light that ends on its own.
#[derive(Debug, Clone, Default)]
pub struct Explosion {
    pub params: ExplosionParams,
    reference: Option<GridPosition>,
    layout_radius: f32,
}

impl Explosion {
    pub fn new(params: ExplosionParams) -> Self {
        Self {
            params,
            ..Self::default()
        }
    }

    pub fn progress(&self, time: f32) -> f32 {
        if self.params.duration <= f32::EPSILON {
            return 1.0;
        }
        (time / self.params.duration).max(0.0)
    }

    /// Ease-out growth: `max_radius * (1 - (1 - progress)^2)`.
    pub fn radius(&self, time: f32) -> f32 {
        let progress = self.progress(time).min(1.0);
        self.max_radius() * (1.0 - (1.0 - progress).powi(2))
    }

    pub fn max_radius(&self) -> f32 {
        self.params
            .max_radius
            .unwrap_or(self.layout_radius)
            .max(1.0)
    }
}

impl SpatialEffect for Explosion {
    fn kind(&self) -> EffectKind {
        EffectKind::Explosion
    }

    fn name(&self) -> &str {
        "Explosion"
    }

    fn prepare(&mut self, layout: &EffectLayout) {
        self.reference = layout.reference;
        self.layout_radius = layout.max_distance();
    }

    fn color_at(
        &self,
        position: GridPosition,
        time: f32,
        settings: &EffectSettings,
    ) -> Result<RgbColor> {
        let reference = require_reference(self.reference, self.name())?;
        if self.is_finished(time) {
            return Ok(RgbColor::BLACK);
        }
        let radius = self.radius(time);
        let distance = position.distance_to(reference);
        if radius <= f32::EPSILON || distance > radius {
            return Ok(RgbColor::BLACK);
        }
        let shell = (1.0 - distance / radius).powi(2);
        let fraction = distance / self.max_radius();
        Ok(settings
            .base_color(time, fraction)
            .scaled(shell * self.params.intensity))
    }

    fn is_finished(&self, time: f32) -> bool {
        self.progress(time) >= 1.0
    }

    fn params(&self) -> Value {
        serde_json::to_value(self.params).unwrap_or(Value::Null)
    }

    fn apply_params(&mut self, params: &Value) -> Result<()> {
        self.params = serde_json::from_value(params.clone())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn blast() -> Explosion {
        let mut effect = Explosion::new(ExplosionParams {
            duration: 1.0,
            max_radius: Some(4.0),
            intensity: 1.0,
        });
        effect.prepare(&EffectLayout::new(
            Some(GridPosition::ORIGIN),
            vec![GridPosition::new(4, 0, 0)],
        ));
        effect
    }

    #[test]
    fn finishes_exactly_at_duration() {
        let effect = blast();
        for step in 0..100 {
            let t = step as f32 / 100.0;
            assert!(!effect.is_finished(t), "finished early at {t}");
        }
        assert!(effect.is_finished(1.0));
        assert!(effect.is_finished(1.5));
    }

    #[test]
    fn radius_never_shrinks_before_the_end() {
        let effect = blast();
        let mut last = 0.0;
        for step in 0..100 {
            let radius = effect.radius(step as f32 / 100.0);
            assert!(radius >= last);
            last = radius;
        }
        assert_relative_eq!(effect.radius(0.5), 3.0);
        assert_relative_eq!(effect.radius(1.0), 4.0);
    }

    #[test]
    fn dark_outside_the_shell() {
        let effect = blast();
        let settings = EffectSettings::with_color(RgbColor::new(255, 255, 255));
        let inside = effect.color_at(GridPosition::ORIGIN, 0.5, &settings).unwrap();
        let edge = effect.color_at(GridPosition::new(3, 0, 0), 0.5, &settings).unwrap();
        let outside = effect.color_at(GridPosition::new(4, 0, 0), 0.5, &settings).unwrap();
        assert_eq!(inside, RgbColor::WHITE);
        assert_eq!(edge, RgbColor::BLACK);
        assert_eq!(outside, RgbColor::BLACK);
        assert_eq!(effect.color_at(GridPosition::ORIGIN, 0.0, &settings).unwrap(), RgbColor::BLACK);
        assert_eq!(effect.color_at(GridPosition::ORIGIN, 1.0, &settings).unwrap(), RgbColor::BLACK);
    }

    #[test]
    fn quadratic_falloff_inside() {
        let effect = blast();
        let settings = EffectSettings::with_color(RgbColor::new(200, 0, 0));
        let color = effect.color_at(GridPosition::new(0, 0, 0), 0.5, &settings).unwrap();
        assert_eq!(color, RgbColor::new(200, 0, 0));
        let mut half = effect.clone();
        half.params.max_radius = Some(6.0);
        // radius 4.5 at t = 0.5, distance 3 -> (1 - 2/3)^2 = 1/9.
        let color = half.color_at(GridPosition::new(3, 0, 0), 0.5, &settings).unwrap();
        assert_eq!(color, RgbColor::new(22, 0, 0));
    }

    #[test]
    fn radius_defaults_to_layout() {
        let mut effect = Explosion::default();
        effect.prepare(&EffectLayout::new(
            Some(GridPosition::ORIGIN),
            vec![GridPosition::new(0, 5, 0)],
        ));
        assert_relative_eq!(effect.max_radius(), 5.0);
    }
}
