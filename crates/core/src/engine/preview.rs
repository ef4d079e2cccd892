use std::{collections::BTreeMap, sync::Arc};

use parking_lot::Mutex;

use super::EffectId;
use crate::{DevicePlacement, GridPosition, RgbColor};

#[derive(Debug, Default)]
struct PreviewState {
    effect: Option<EffectId>,
    colors: BTreeMap<GridPosition, RgbColor>,
    frames: u64,
}

/// Latest frame of the displayed effect, filled from the same computation
/// that drives the hardware.
#[derive(Debug, Clone, Default)]
pub struct PreviewBuffer {
    state: Arc<Mutex<PreviewState>>,
}

impl PreviewBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selected(&self) -> Option<EffectId> {
        self.state.lock().effect.clone()
    }

    pub fn select(&self, effect: Option<EffectId>) {
        let mut state = self.state.lock();
        if state.effect != effect {
            state.effect = effect;
            state.colors.clear();
        }
    }

    /// Stores `frame` when it belongs to the displayed effect.
    pub fn publish(&self, effect: &EffectId, frame: &[(DevicePlacement, RgbColor)]) -> bool {
        let mut state = self.state.lock();
        if state.effect.as_ref() != Some(effect) {
            return false;
        }
        state.colors.clear();
        for (placement, color) in frame {
            state.colors.insert(placement.position, *color);
        }
        state.frames += 1;
        true
    }

    pub fn colors(&self) -> BTreeMap<GridPosition, RgbColor> {
        self.state.lock().colors.clone()
    }

    pub fn color(&self, position: GridPosition) -> Option<RgbColor> {
        self.state.lock().colors.get(&position).copied()
    }

    /// Number of frames accepted since creation.
    pub fn frames(&self) -> u64 {
        self.state.lock().frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DeviceKind, DeviceReference};

    #[test]
    fn ignores_frames_from_other_effects() {
        let preview = PreviewBuffer::new();
        let shown = EffectId::from("shown");
        preview.select(Some(shown.clone()));
        let placement = DevicePlacement {
            reference: DeviceReference::whole(0, DeviceKind::Rgb),
            position: GridPosition::ORIGIN,
        };
        let frame = [(placement, RgbColor::WHITE)];

        assert!(!preview.publish(&EffectId::from("hidden"), &frame));
        assert!(preview.colors().is_empty());
        assert!(preview.publish(&shown, &frame));
        assert_eq!(preview.color(GridPosition::ORIGIN), Some(RgbColor::WHITE));

        preview.select(None);
        assert!(preview.colors().is_empty());
    }
}
