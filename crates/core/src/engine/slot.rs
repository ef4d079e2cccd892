use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use parking_lot::Mutex;

use super::{EffectId, PreviewBuffer, SharedEvents};
use crate::{
    DeviceBus, DevicePlacement, EffectInstance, EffectLayout, EngineEvent, Result, RgbColor,
    SharedGrid, SpatialError, SpatialGrid,
};

pub(crate) type SharedSlot = Arc<Mutex<EffectSlot>>;

pub(crate) type Frame = Vec<(DevicePlacement, RgbColor)>;

/// Engine-side state of one registered effect.
#[derive(Debug)]
pub(crate) struct EffectSlot {
    pub instance: EffectInstance,
    /// Driven devices in binding order.
    pub bindings: Vec<DevicePlacement>,
    faulted: bool,
    output_failed: bool,
    write_failed: bool,
}

impl EffectSlot {
    pub fn new(instance: EffectInstance) -> Self {
        Self {
            instance,
            bindings: Vec::new(),
            faulted: false,
            output_failed: false,
            write_failed: false,
        }
    }

    pub fn into_shared(self) -> SharedSlot {
        Arc::new(Mutex::new(self))
    }

    /// Drops bindings whose assignment vanished from the grid, re-resolves
    /// the reference point and re-prepares the algorithm. Returns how many
    /// bindings were dropped.
    pub fn refresh(&mut self, grid: &SpatialGrid) -> usize {
        let before = self.bindings.len();
        self.bindings
            .retain(|b| grid.find_assignment(b.position, &b.reference).is_some());

        let reference = self
            .instance
            .settings()
            .reference_point
            .filter(|p| grid.contains(*p))
            .or_else(|| grid.user_position());
        let mut positions: Vec<_> = self.bindings.iter().map(|b| b.position).collect();
        positions.sort();
        positions.dedup();
        self.instance.prepare(EffectLayout::new(reference, positions));

        before - self.bindings.len()
    }

    /// Computes one color per binding at the current effect time. Panics in
    /// the algorithm are caught and turned into [`SpatialError::EffectFault`].
    pub fn render(&self, id: &EffectId) -> Result<Frame> {
        let mut frame = Vec::with_capacity(self.bindings.len());
        for placement in &self.bindings {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                self.instance.color_for_position(placement.position)
            }));
            match outcome {
                Ok(color) => frame.push((*placement, color?)),
                Err(payload) => {
                    return Err(SpatialError::EffectFault {
                        id: id.clone(),
                        reason: panic_message(payload.as_ref()),
                    })
                }
            }
        }
        Ok(frame)
    }
}

/// Everything a computed frame is delivered to.
#[derive(Clone)]
pub(crate) struct Outputs {
    pub grid: SharedGrid,
    pub devices: DeviceBus,
    pub preview: PreviewBuffer,
    pub events: SharedEvents,
}

impl Outputs {
    pub fn publish(&self, event: EngineEvent) {
        self.events.lock().publish(event);
    }

    /// Renders the slot and fans the frame out to the devices, the grid's
    /// color record and the preview. On a fault nothing is written, so the
    /// devices keep their last good colors. Returns the number of device
    /// writes.
    pub fn render_and_deliver(&self, id: &EffectId, slot: &mut EffectSlot) -> usize {
        let frame = match slot.render(id) {
            Ok(frame) => {
                if slot.faulted {
                    tracing::info!(effect = %id, "effect recovered");
                    slot.faulted = false;
                }
                frame
            }
            Err(err) => {
                if !slot.faulted {
                    tracing::error!(effect = %id, error = %err, "effect computation failed");
                    slot.faulted = true;
                    self.publish(EngineEvent::Fault {
                        id: id.clone(),
                        reason: err.to_string(),
                    });
                }
                return 0;
            }
        };

        let writes: Vec<_> = frame.iter().map(|(p, color)| (p.reference, *color)).collect();
        let written = match self.devices.apply(&writes) {
            Ok(report) => {
                slot.output_failed = false;
                match report.failed.first() {
                    Some(&reference) if !slot.write_failed => {
                        tracing::warn!(
                            effect = %id,
                            %reference,
                            failed = report.failed.len(),
                            "device rejected write"
                        );
                        slot.write_failed = true;
                        let error = SpatialError::DeviceWrite { reference };
                        self.publish(EngineEvent::Rejected(Arc::new(error)));
                    }
                    Some(_) => {}
                    None => slot.write_failed = false,
                }
                report.written
            }
            Err(err) => {
                if !slot.output_failed {
                    tracing::warn!(effect = %id, error = %err, "cannot reach devices");
                    slot.output_failed = true;
                    self.publish(EngineEvent::Rejected(Arc::new(err)));
                }
                0
            }
        };

        {
            let mut grid = self.grid.write();
            for (placement, color) in &frame {
                let found = grid.find_assignment(placement.position, &placement.reference);
                if let Some(index) = found {
                    grid.update_assignment_color(placement.position, index, *color);
                }
            }
        }
        self.preview.publish(id, &frame);
        written
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "effect panicked".to_string()
    }
}
