use crate::{GridPosition, Result, RgbColor};

use super::{require_reference, EffectKind, EffectLayout, EffectSettings, SpatialEffect};

/// Brightness for a cell `distance` away when the farthest driven cell sits
/// at `max_distance`: `1 - distance / max_distance`, clamped to `[0, 1]`.
pub fn falloff(distance: f32, max_distance: f32) -> f32 {
    if max_distance <= f32::EPSILON {
        return if distance <= f32::EPSILON { 1.0 } else { 0.0 };
    }
    (1.0 - distance / max_distance).clamp(0.0, 1.0)
}

/// Full color at the reference point, fading to dark at the farthest
/// driven position.
#[derive(Debug, Clone, Default)]
pub struct DistanceFalloff {
    reference: Option<GridPosition>,
    max_distance: f32,
}

impl DistanceFalloff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_distance(&self) -> f32 {
        self.max_distance
    }
}

impl SpatialEffect for DistanceFalloff {
    fn kind(&self) -> EffectKind {
        EffectKind::Distance
    }

    fn name(&self) -> &str {
        "Distance Falloff"
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
        let brightness = falloff(distance, self.max_distance);
        let fraction = if self.max_distance > f32::EPSILON {
            (distance / self.max_distance).min(1.0)
        } else {
            0.0
        };
        Ok(settings.base_color(time, fraction).scaled(brightness))
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    const RED: RgbColor = RgbColor::new(255, 0, 0);

    fn prepared(reference: GridPosition, positions: Vec<GridPosition>) -> DistanceFalloff {
        let mut effect = DistanceFalloff::new();
        effect.prepare(&EffectLayout::new(Some(reference), positions));
        effect
    }

    #[test]
    fn reference_point_gets_full_color() {
        let origin = GridPosition::ORIGIN;
        let effect = prepared(origin, vec![origin, GridPosition::new(2, 2, 2)]);
        let settings = EffectSettings::with_color(RED);
        assert_eq!(effect.color_at(origin, 0.0, &settings).unwrap(), RED);
        assert_eq!(
            effect.color_at(GridPosition::new(2, 2, 2), 0.0, &settings).unwrap(),
            RgbColor::BLACK
        );
    }

    #[test]
    fn single_far_assignment_is_dark() {
        let settings = EffectSettings::with_color(RED);
        let far = GridPosition::new(1, 1, 0);
        let effect = prepared(GridPosition::ORIGIN, vec![far]);
        assert_relative_eq!(effect.max_distance(), 2.0_f32.sqrt());
        assert_eq!(effect.color_at(far, 0.0, &settings).unwrap(), RgbColor::BLACK);

        let effect = prepared(GridPosition::ORIGIN, vec![far, GridPosition::ORIGIN]);
        assert_relative_eq!(effect.max_distance(), 2.0_f32.sqrt());
        assert_eq!(effect.color_at(far, 0.0, &settings).unwrap(), RgbColor::BLACK);
        assert_eq!(effect.color_at(GridPosition::ORIGIN, 0.0, &settings).unwrap(), RED);
    }

    #[test]
    fn falloff_is_linear_and_clamped() {
        assert_relative_eq!(falloff(0.0, 4.0), 1.0);
        assert_relative_eq!(falloff(1.0, 4.0), 0.75);
        assert_relative_eq!(falloff(8.0, 4.0), 0.0);
        assert_relative_eq!(falloff(0.0, 0.0), 1.0);
        assert_relative_eq!(falloff(1.0, 0.0), 0.0);
    }

    #[test]
    fn refuses_without_reference() {
        let effect = DistanceFalloff::new();
        assert!(effect
            .color_at(GridPosition::ORIGIN, 0.0, &EffectSettings::default())
            .is_err());
    }
}
