use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{GridPosition, Result, RgbColor};

use super::{require_reference, EffectKind, EffectLayout, EffectSettings, SpatialEffect};

/// `0.5 + 0.5 * sin(time * frequency - distance * spacing)`.
pub fn wave_intensity(time: f32, distance: f32, frequency: f32, spacing: f32) -> f32 {
    0.5 + 0.5 * (time * frequency - distance * spacing).sin()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaveParams {
    /// Radians per second of effect time.
    pub frequency: f32,
    /// Radians per grid unit of distance.
    pub spacing: f32,
}

impl Default for WaveParams {
    fn default() -> Self {
        Self {
            frequency: 2.0,
            spacing: 1.0,
        }
    }
}

/// Sine rings travelling outward from the reference point.
#[derive(Debug, Clone, Default)]
pub struct Wave {
    pub params: WaveParams,
    reference: Option<GridPosition>,
    max_distance: f32,
}

impl Wave {
    pub fn new(params: WaveParams) -> Self {
        Self {
            params,
            ..Self::default()
        }
    }
}

impl SpatialEffect for Wave {
    fn kind(&self) -> EffectKind {
        EffectKind::Wave
    }

    fn name(&self) -> &str {
        "Wave"
    }

    fn prepare(&mut self, layout: &EffectLayout) {
        self.reference = layout.reference;
        self.max_distance = layout.max_distance();
    }

    fn color_at(
        &self,
        position: GridPosition,
        time: f32,
        settings: &EffectSettings,
    ) -> Result<RgbColor> {
        let reference = require_reference(self.reference, self.name())?;
        let distance = position.distance_to(reference);
        let intensity = wave_intensity(time, distance, self.params.frequency, self.params.spacing);
        let fraction = if self.max_distance > f32::EPSILON {
            (distance / self.max_distance).min(1.0)
        } else {
            0.0
        };
        Ok(settings.base_color(time, fraction).scaled(intensity))
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
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use std::f32::consts::FRAC_PI_2;

    use super::*;

    #[test]
    fn intensity_follows_sine() {
        assert_abs_diff_eq!(wave_intensity(0.0, 0.0, 2.0, 1.0), 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(wave_intensity(FRAC_PI_2, 0.0, 1.0, 1.0), 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(wave_intensity(0.0, FRAC_PI_2, 1.0, 1.0), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn same_inputs_same_color() {
        let mut wave = Wave::default();
        let origin = GridPosition::ORIGIN;
        let far = GridPosition::new(2, 1, 0);
        wave.prepare(&EffectLayout::new(Some(origin), vec![origin, far]));
        let settings = EffectSettings::with_color(RgbColor::new(0, 255, 0));
        let a = wave.color_at(far, 1.25, &settings).unwrap();
        let b = wave.color_at(far, 1.25, &settings).unwrap();
        assert_eq!(a, b);
        assert_eq!(wave.color_at(origin, 0.0, &settings).unwrap(), RgbColor::new(0, 128, 0));
    }

    #[test]
    fn params_round_trip_through_json() {
        let mut wave = Wave::new(WaveParams {
            frequency: 3.5,
            spacing: 0.25,
        });
        let stored = wave.params();
        wave.params = WaveParams::default();
        wave.apply_params(&stored).unwrap();
        assert_relative_eq!(wave.params.frequency, 3.5);
        assert!(wave.apply_params(&Value::String("bad".into())).is_err());
    }
}
