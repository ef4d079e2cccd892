//! Effect execution engine.
//!
//! [`EffectManager`] owns the registered effects, their device bindings and
//! the shared tick. Effects that ask for their own frame rate get a worker
//! thread; everything else is advanced by [`EffectManager::tick`].
//!
//! Lock order is slot, then grid. The device lock is only ever taken on its
//! own inside [`DeviceBus::apply`].

mod clock;
mod preview;
mod slot;
mod worker;

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use clock::{TickLoop, TickRate};
pub use preview::PreviewBuffer;

use slot::{EffectSlot, Outputs, SharedSlot};
use worker::Worker;

use crate::{
    effect::BASELINE_SPEED, DeviceBus, DevicePlacement, DeviceReference, EffectInstance, EffectKind,
    EffectSettings, EngineConfig, EngineEvent, EventBus, GridPosition, Result, RgbColor, SharedGrid,
    SpatialError,
};

pub(crate) type SharedEvents = Arc<Mutex<EventBus<EngineEvent>>>;

/// Caller-chosen name of a registered effect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EffectId(String);

impl EffectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EffectId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for EffectId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Point-in-time copy of an effect's state, used for profiles and UIs.
#[derive(Debug, Clone)]
pub struct EffectSnapshot {
    pub id: EffectId,
    pub kind: EffectKind,
    pub name: String,
    pub running: bool,
    pub time: f32,
    pub settings: EffectSettings,
    pub params: Value,
    pub bindings: Vec<DevicePlacement>,
}

/// What one call to [`EffectManager::tick`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub effects: usize,
    pub writes: usize,
    pub finished: Vec<EffectId>,
}

struct EffectEntry {
    id: EffectId,
    slot: SharedSlot,
    worker: Option<Worker>,
}

pub struct EffectManager {
    entries: Vec<EffectEntry>,
    outputs: Outputs,
    tick_rate: TickRate,
    baseline_speed: f32,
    grid_revision: Option<u64>,
}

impl EffectManager {
    pub fn new(grid: SharedGrid, devices: DeviceBus) -> Self {
        Self {
            entries: Vec::new(),
            outputs: Outputs {
                grid,
                devices,
                preview: PreviewBuffer::new(),
                events: Arc::new(Mutex::new(EventBus::new())),
            },
            tick_rate: TickRate::default(),
            baseline_speed: BASELINE_SPEED,
            grid_revision: None,
        }
    }

    pub fn grid(&self) -> &SharedGrid {
        &self.outputs.grid
    }

    pub fn devices(&self) -> &DeviceBus {
        &self.outputs.devices
    }

    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        self.outputs.events.lock().subscribe(callback);
    }

    pub fn event_channel(&self) -> Receiver<EngineEvent> {
        self.outputs.events.lock().channel()
    }

    pub fn tick_rate(&self) -> TickRate {
        self.tick_rate
    }

    /// Effects already running keep their current worker arrangement until
    /// restarted.
    pub fn set_tick_rate(&mut self, rate: TickRate) {
        self.tick_rate = rate;
    }

    /// Applies the engine section of the application config.
    pub fn configure(&mut self, config: &EngineConfig) {
        self.set_tick_rate(config.tick_rate);
        self.set_baseline_speed(config.baseline_speed);
    }

    pub fn set_baseline_speed(&mut self, baseline: f32) {
        self.baseline_speed = baseline;
        for entry in &self.entries {
            entry.slot.lock().instance.set_baseline_speed(baseline);
        }
    }

    /// Registered ids in registration order.
    pub fn ids(&self) -> Vec<EffectId> {
        self.entries.iter().map(|e| e.id.clone()).collect()
    }

    pub fn is_registered(&self, id: &EffectId) -> bool {
        self.position(id).is_some()
    }

    pub fn is_running(&self, id: &EffectId) -> bool {
        self.entry(id)
            .is_some_and(|e| e.slot.lock().instance.is_enabled())
    }

    pub fn running_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.slot.lock().instance.is_enabled())
            .count()
    }

    pub fn has_worker(&self, id: &EffectId) -> bool {
        self.entry(id).is_some_and(|e| e.worker.is_some())
    }

    /// Adds an effect in the stopped state.
    pub fn register(&mut self, id: impl Into<EffectId>, instance: EffectInstance) -> Result<()> {
        let id = id.into();
        if self.is_registered(&id) {
            return self.reject(|| SpatialError::DuplicateEffect(id.clone()));
        }
        let mut instance = instance;
        instance.stop();
        instance.set_baseline_speed(self.baseline_speed);
        let mut slot = EffectSlot::new(instance);
        slot.refresh(&self.outputs.grid.read());
        tracing::debug!(effect = %id, kind = %slot.instance.kind(), "effect registered");
        self.entries.push(EffectEntry {
            id: id.clone(),
            slot: slot.into_shared(),
            worker: None,
        });
        self.outputs.publish(EngineEvent::Registered(id));
        Ok(())
    }

    /// Stops the effect if needed, then forgets it and its bindings.
    pub fn unregister(&mut self, id: &EffectId) -> Result<EffectInstance> {
        self.stop(id)?;
        let index = self.position(id).ok_or_else(|| SpatialError::UnknownEffect(id.clone()))?;
        let entry = self.entries.remove(index);
        if self.outputs.preview.selected().as_ref() == Some(id) {
            self.outputs.preview.select(None);
        }
        self.outputs.publish(EngineEvent::Unregistered(id.clone()));

        let instance = match Arc::try_unwrap(entry.slot) {
            Ok(slot) => slot.into_inner().instance,
            Err(_) => return Err(SpatialError::msg(format!("effect `{id}` is still shared"))),
        };
        Ok(instance)
    }

    /// Starts the effect and immediately pushes its colors. Effects that
    /// need a reference point are refused while none is set.
    pub fn start(&mut self, id: &EffectId) -> Result<()> {
        let Some(index) = self.position(id) else {
            return self.reject(|| SpatialError::UnknownEffect(id.clone()));
        };
        let slot = Arc::clone(&self.entries[index].slot);
        let fps = {
            let mut slot = slot.lock();
            if slot.instance.is_enabled() {
                return Ok(());
            }
            slot.refresh(&self.outputs.grid.read());
            if slot.instance.requires_reference_point()
                && slot.instance.layout().reference.is_none()
            {
                drop(slot);
                tracing::warn!(effect = %id, "refusing to start without a reference point");
                return self.reject(|| SpatialError::MissingReferencePoint(id.clone()));
            }
            slot.instance.start();
            self.outputs.render_and_deliver(id, &mut slot);
            slot.instance.target_fps()
        };

        if let Some(fps) = fps.filter(|fps| *fps != self.tick_rate.hz()) {
            match Worker::spawn(id.clone(), Arc::clone(&slot), self.outputs.clone(), fps) {
                Ok(worker) => self.entries[index].worker = Some(worker),
                Err(err) => {
                    tracing::warn!(
                        effect = %id,
                        error = %err,
                        "worker spawn failed, using shared tick"
                    );
                }
            }
        }
        tracing::debug!(effect = %id, "effect started");
        self.outputs.publish(EngineEvent::Started(id.clone()));
        Ok(())
    }

    /// Stops the effect, joining its worker first. Bindings are kept.
    pub fn stop(&mut self, id: &EffectId) -> Result<()> {
        let Some(index) = self.position(id) else {
            return self.reject(|| SpatialError::UnknownEffect(id.clone()));
        };
        let entry = &mut self.entries[index];
        if let Some(mut worker) = entry.worker.take() {
            worker.stop();
        }
        let was_running = {
            let mut slot = entry.slot.lock();
            let was_running = slot.instance.is_enabled();
            slot.instance.stop();
            was_running
        };
        if was_running {
            tracing::debug!(effect = %id, "effect stopped");
            self.outputs.publish(EngineEvent::Stopped(id.clone()));
        }
        Ok(())
    }

    pub fn stop_all(&mut self) {
        for id in self.ids() {
            let _ = self.stop(&id);
        }
    }

    /// Replaces the devices an effect drives. A device may belong to only
    /// one effect; a request touching another effect's device is refused as
    /// a whole. Placements missing from the grid are dropped.
    pub fn bind_devices(&mut self, id: &EffectId, placements: Vec<DevicePlacement>) -> Result<()> {
        let Some(index) = self.position(id) else {
            return self.reject(|| SpatialError::UnknownEffect(id.clone()));
        };

        if let Some((reference, owner)) = self.binding_conflict(id, &placements) {
            return self.reject(|| SpatialError::DeviceAlreadyBound {
                reference,
                owner: owner.clone(),
            });
        }

        let mut unique: Vec<DevicePlacement> = Vec::with_capacity(placements.len());
        for placement in placements {
            if !unique.contains(&placement) {
                unique.push(placement);
            }
        }
        let requested = unique.len();

        let dropped = {
            let mut slot = self.entries[index].slot.lock();
            slot.bindings = unique;
            let dropped = slot.refresh(&self.outputs.grid.read());
            if slot.instance.is_enabled() {
                self.outputs.render_and_deliver(id, &mut slot);
            }
            dropped
        };
        tracing::debug!(effect = %id, requested, dropped, "devices bound");
        if dropped > 0 {
            self.outputs.publish(EngineEvent::BindingsInvalidated {
                id: id.clone(),
                dropped,
            });
        }
        Ok(())
    }

    /// First placement already driven by an effect other than `id`, with
    /// that effect's id.
    pub(crate) fn binding_conflict(
        &self,
        id: &EffectId,
        placements: &[DevicePlacement],
    ) -> Option<(DeviceReference, EffectId)> {
        self.entries.iter().filter(|e| &e.id != id).find_map(|other| {
            let slot = other.slot.lock();
            placements
                .iter()
                .find(|p| slot.bindings.iter().any(|b| b.reference == p.reference))
                .map(|p| (p.reference, other.id.clone()))
        })
    }

    /// Binds every grid placement of the given devices, in grid order.
    pub fn bind_references(&mut self, id: &EffectId, references: &[DeviceReference]) -> Result<()> {
        let placements: Vec<_> = self
            .outputs
            .grid
            .read()
            .placements()
            .into_iter()
            .filter(|p| references.contains(&p.reference))
            .collect();
        self.bind_devices(id, placements)
    }

    pub fn bindings(&self, id: &EffectId) -> Vec<DevicePlacement> {
        self.entry(id)
            .map(|e| e.slot.lock().bindings.clone())
            .unwrap_or_default()
    }

    /// Edits an effect's settings; a running effect re-pushes at once.
    pub fn update_settings(
        &mut self,
        id: &EffectId,
        edit: impl FnOnce(&mut EffectSettings),
    ) -> Result<()> {
        let Some(index) = self.position(id) else {
            return self.reject(|| SpatialError::UnknownEffect(id.clone()));
        };
        let mut slot = self.entries[index].slot.lock();
        let mut settings = slot.instance.settings().clone();
        edit(&mut settings);
        slot.instance.set_settings(settings);
        slot.refresh(&self.outputs.grid.read());
        if slot.instance.is_enabled() {
            self.outputs.render_and_deliver(id, &mut slot);
        }
        Ok(())
    }

    /// Sets algorithm specific parameters (see [`SpatialEffect::params`]).
    ///
    /// [`SpatialEffect::params`]: crate::SpatialEffect::params
    pub fn apply_params(&mut self, id: &EffectId, params: &Value) -> Result<()> {
        let Some(index) = self.position(id) else {
            return self.reject(|| SpatialError::UnknownEffect(id.clone()));
        };
        let mut slot = self.entries[index].slot.lock();
        slot.instance.effect_mut().apply_params(params)?;
        slot.refresh(&self.outputs.grid.read());
        Ok(())
    }

    pub fn snapshot(&self, id: &EffectId) -> Option<EffectSnapshot> {
        let entry = self.entry(id)?;
        let slot = entry.slot.lock();
        Some(EffectSnapshot {
            id: id.clone(),
            kind: slot.instance.kind(),
            name: slot.instance.name().to_string(),
            running: slot.instance.is_enabled(),
            time: slot.instance.time(),
            settings: slot.instance.settings().clone(),
            params: slot.instance.effect().params(),
            bindings: slot.bindings.clone(),
        })
    }

    /// Advances every running effect on the shared tick by `delta` and
    /// writes its colors, one effect at a time in registration order.
    /// Effects with a worker thread are skipped here.
    pub fn tick(&mut self, delta: Duration) -> TickSummary {
        self.reap_workers();
        self.sync_layout();

        let mut summary = TickSummary::default();
        let seconds = delta.as_secs_f32();
        for entry in self.entries.iter().filter(|e| e.worker.is_none()) {
            let mut slot = entry.slot.lock();
            if !slot.instance.is_enabled() {
                continue;
            }
            slot.instance.update(seconds);
            summary.effects += 1;
            summary.writes += self.outputs.render_and_deliver(&entry.id, &mut slot);
            if slot.instance.is_finished() {
                summary.finished.push(entry.id.clone());
            }
        }

        for id in &summary.finished {
            let _ = self.stop(id);
            tracing::debug!(effect = %id, "effect finished");
            self.outputs.publish(EngineEvent::Finished(id.clone()));
        }
        summary
    }

    /// Chooses which effect feeds the preview buffer.
    pub fn set_preview_effect(&mut self, id: Option<EffectId>) -> Result<()> {
        if let Some(id) = &id {
            if !self.is_registered(id) {
                return self.reject(|| SpatialError::UnknownEffect(id.clone()));
            }
        }
        self.outputs.preview.select(id);
        Ok(())
    }

    pub fn preview(&self) -> &PreviewBuffer {
        &self.outputs.preview
    }

    /// Colors of the last frame delivered for the displayed effect.
    pub fn preview_colors(&self) -> std::collections::BTreeMap<GridPosition, RgbColor> {
        self.outputs.preview.colors()
    }

    /// Color an effect would show at any position right now, without
    /// touching the hardware.
    pub fn color_for_position(&self, id: &EffectId, position: GridPosition) -> Option<RgbColor> {
        let entry = self.entry(id)?;
        let slot = entry.slot.lock();
        slot.instance.color_for_position(position).ok()
    }

    fn sync_layout(&mut self) {
        let revision = self.outputs.grid.read().revision();
        if self.grid_revision == Some(revision) {
            return;
        }
        self.grid_revision = Some(revision);

        let mut invalidated = Vec::new();
        for entry in &self.entries {
            let mut slot = entry.slot.lock();
            let dropped = slot.refresh(&self.outputs.grid.read());
            if dropped > 0 {
                tracing::warn!(effect = %entry.id, dropped, "bindings lost their grid assignment");
                invalidated.push((entry.id.clone(), dropped));
            }
        }
        for (id, dropped) in invalidated {
            self.outputs
                .publish(EngineEvent::BindingsInvalidated { id, dropped });
        }
    }

    /// Joins workers whose effect finished on its own.
    fn reap_workers(&mut self) {
        for entry in &mut self.entries {
            if entry.worker.as_ref().is_some_and(|w| !w.is_alive()) {
                if let Some(mut worker) = entry.worker.take() {
                    worker.stop();
                }
            }
        }
    }

    fn position(&self, id: &EffectId) -> Option<usize> {
        self.entries.iter().position(|e| &e.id == id)
    }

    fn entry(&self, id: &EffectId) -> Option<&EffectEntry> {
        self.entries.iter().find(|e| &e.id == id)
    }

    fn reject<T>(&self, make: impl Fn() -> SpatialError) -> Result<T> {
        let error = make();
        tracing::debug!(%error, "engine request rejected");
        self.outputs
            .publish(EngineEvent::Rejected(Arc::new(error)));
        Err(make())
    }
}

impl Drop for EffectManager {
    fn drop(&mut self) {
        for entry in &mut self.entries {
            if let Some(mut worker) = entry.worker.take() {
                worker.stop();
            }
        }
    }
}

impl fmt::Debug for EffectManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectManager")
            .field("effects", &self.ids())
            .field("tick_rate", &self.tick_rate)
            .field("devices", &self.outputs.devices)
            .finish()
    }
}
