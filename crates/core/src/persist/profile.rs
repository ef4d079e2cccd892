use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{read_json, read_json_or_default, write_json};
use crate::{
    DeviceKind, DevicePlacement, DeviceReference, EffectId, EffectInstance, EffectKind,
    EffectManager, EffectSettings, EffectSnapshot, GridPosition, Result, SpatialError,
};

pub const PROFILE_VERSION: u32 = 1;

/// Saved set of effects with their settings, bindings and run state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectProfile {
    pub version: u32,
    #[serde(default)]
    pub effects: Vec<ProfileEffect>,
}

impl Default for EffectProfile {
    fn default() -> Self {
        Self {
            version: PROFILE_VERSION,
            effects: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileEffect {
    pub id: EffectId,
    /// Absent in older files; the id is tried as a kind name instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<EffectKind>,
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub settings: EffectSettings,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
    #[serde(default)]
    pub devices: Vec<ProfileDevice>,
}

impl ProfileEffect {
    pub fn resolved_kind(&self) -> Option<EffectKind> {
        self.kind.or_else(|| self.id.as_str().parse().ok())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfileDevice {
    pub index: usize,
    #[serde(rename = "type")]
    pub kind: DeviceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub led_index: Option<usize>,
    pub position: GridPosition,
}

impl ProfileDevice {
    pub fn placement(&self) -> DevicePlacement {
        DevicePlacement {
            reference: DeviceReference::from_parts(
                self.index,
                self.kind,
                self.zone_index,
                self.led_index,
            ),
            position: self.position,
        }
    }
}

impl From<DevicePlacement> for ProfileDevice {
    fn from(placement: DevicePlacement) -> Self {
        let reference = placement.reference;
        Self {
            index: reference.device_index,
            kind: reference.kind,
            zone_index: reference.zone_index(),
            led_index: reference.led_index(),
            position: placement.position,
        }
    }
}

/// Outcome of [`EffectManager::load_profile`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileReport {
    pub loaded: Vec<EffectId>,
    pub started: Vec<EffectId>,
    /// Entries that could not be applied, with the reason.
    pub skipped: Vec<(EffectId, String)>,
}

impl EffectProfile {
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        write_json(path.as_ref(), self)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        read_json(path.as_ref())
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        read_json_or_default(path.as_ref(), "effect profile")
    }
}

impl EffectManager {
    /// Captures every registered effect in registration order.
    pub fn save_profile(&self) -> EffectProfile {
        let effects = self
            .ids()
            .iter()
            .filter_map(|id| self.snapshot(id))
            .map(|snapshot| ProfileEffect {
                id: snapshot.id,
                kind: Some(snapshot.kind),
                running: snapshot.running,
                settings: snapshot.settings,
                params: snapshot.params,
                devices: snapshot.bindings.into_iter().map(ProfileDevice::from).collect(),
            })
            .collect();
        EffectProfile {
            version: PROFILE_VERSION,
            effects,
        }
    }

    /// Registers (or updates) and binds every effect in `profile`, then
    /// starts the ones saved as running. A bad entry is skipped without
    /// affecting the rest.
    pub fn load_profile(&mut self, profile: &EffectProfile) -> ProfileReport {
        if profile.version > PROFILE_VERSION {
            tracing::warn!(
                version = profile.version,
                "profile is newer than this build, loading anyway"
            );
        }
        let mut report = ProfileReport::default();
        for entry in &profile.effects {
            match self.load_profile_entry(entry) {
                Ok(()) => report.loaded.push(entry.id.clone()),
                Err(err) => {
                    tracing::warn!(effect = %entry.id, error = %err, "skipping profile entry");
                    report.skipped.push((entry.id.clone(), err.to_string()));
                    continue;
                }
            }
            if !entry.running {
                continue;
            }
            match self.start(&entry.id) {
                Ok(()) => report.started.push(entry.id.clone()),
                Err(err) => {
                    tracing::warn!(
                        effect = %entry.id,
                        error = %err,
                        "saved effect could not be started"
                    );
                }
            }
        }
        report
    }

    /// Applies one entry as a unit: on failure a new effect is not left
    /// registered and an existing one gets its previous state back.
    fn load_profile_entry(&mut self, entry: &ProfileEffect) -> Result<()> {
        let placements: Vec<_> = entry.devices.iter().map(ProfileDevice::placement).collect();
        if let Some((reference, owner)) = self.binding_conflict(&entry.id, &placements) {
            return Err(SpatialError::DeviceAlreadyBound { reference, owner });
        }
        let Some(previous) = self.snapshot(&entry.id) else {
            return self.register_profile_entry(entry, placements);
        };
        let reloaded = self.reload_profile_entry(entry, placements);
        if reloaded.is_err() {
            self.restore_snapshot(previous);
        }
        reloaded
    }

    fn register_profile_entry(
        &mut self,
        entry: &ProfileEffect,
        placements: Vec<DevicePlacement>,
    ) -> Result<()> {
        let kind = entry
            .resolved_kind()
            .ok_or_else(|| format!("cannot tell which effect `{}` is", entry.id))?;
        let mut instance = EffectInstance::of_kind(kind, entry.settings.clone())
            .ok_or_else(|| format!("no built-in implementation for {kind} effects"))?;
        if !entry.params.is_null() {
            instance.effect_mut().apply_params(&entry.params)?;
        }
        self.register(entry.id.clone(), instance)?;
        if let Err(err) = self.bind_devices(&entry.id, placements) {
            let _ = self.unregister(&entry.id);
            return Err(err);
        }
        Ok(())
    }

    fn reload_profile_entry(
        &mut self,
        entry: &ProfileEffect,
        placements: Vec<DevicePlacement>,
    ) -> Result<()> {
        self.stop(&entry.id)?;
        let settings = entry.settings.clone();
        self.update_settings(&entry.id, move |current| *current = settings)?;
        if !entry.params.is_null() {
            self.apply_params(&entry.id, &entry.params)?;
        }
        self.bind_devices(&entry.id, placements)
    }

    fn restore_snapshot(&mut self, previous: EffectSnapshot) {
        let EffectSnapshot {
            id,
            running,
            settings,
            params,
            bindings,
            ..
        } = previous;
        tracing::debug!(effect = %id, "profile entry failed, restoring previous state");
        let _ = self.update_settings(&id, move |current| *current = settings);
        if !params.is_null() {
            let _ = self.apply_params(&id, &params);
        }
        let _ = self.bind_devices(&id, bindings);
        if running {
            let _ = self.start(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        Assignment, DeviceBus, GridDimensions, MemoryDevice, MemoryDevices, RgbColor, SharedGrid,
        SpatialGrid,
    };

    fn led(index: usize) -> DeviceReference {
        DeviceReference::led(0, DeviceKind::Rgb, index)
    }

    fn setup() -> (SharedGrid, MemoryDevices, EffectManager) {
        let grid = SpatialGrid::with_dimensions(GridDimensions::new(3, 1, 1))
            .unwrap()
            .into_shared();
        {
            let mut g = grid.write();
            for x in 0..3 {
                g.add_assignment(GridPosition::new(x, 0, 0), Assignment::new(led(x as usize)))
                    .unwrap();
            }
            g.set_user_position(GridPosition::ORIGIN).unwrap();
        }
        let devices = MemoryDevices::new(vec![MemoryDevice::strip("bar", 3)]);
        let manager = EffectManager::new(Arc::clone(&grid), DeviceBus::new(devices.clone()));
        (grid, devices, manager)
    }

    #[test]
    fn json_uses_the_profile_field_names() {
        let device = ProfileDevice::from(DevicePlacement {
            reference: led(2),
            position: GridPosition::new(2, 0, 0),
        });
        let entry = ProfileEffect {
            id: "glow".into(),
            kind: Some(EffectKind::Distance),
            running: true,
            settings: EffectSettings::with_color(RgbColor::new(1, 2, 3)),
            params: Value::Null,
            devices: vec![device],
        };
        let json = serde_json::to_value(&entry).unwrap();

        assert_eq!(json["settings"]["randomColors"], false);
        assert!(json["settings"]["referencePoint"].is_null());
        assert_eq!(json["settings"]["colors"][0]["g"], 2);
        assert_eq!(json["devices"][0]["type"], "rgb");
        assert_eq!(json["devices"][0]["led_index"], 2);
        assert!(json["devices"][0].get("zone_index").is_none());
        assert_eq!(json["devices"][0]["position"]["x"], 2);
        assert!(json.get("params").is_none());
    }

    #[test]
    fn save_and_load_restores_effects() {
        let (_grid, _devices, mut manager) = setup();
        let wave = EffectId::from("wave");
        let blue = EffectSettings::with_color(RgbColor::new(0, 0, 255));
        let instance = EffectInstance::of_kind(EffectKind::Wave, blue).unwrap();
        manager.register(wave.clone(), instance).unwrap();
        manager
            .apply_params(&wave, &serde_json::json!({ "frequency": 4.0, "spacing": 0.5 }))
            .unwrap();
        manager.bind_references(&wave, &[led(0), led(2)]).unwrap();
        manager.start(&wave).unwrap();
        let profile = manager.save_profile();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("effects.json");
        profile.save(&path).unwrap();

        let (_grid, devices, mut fresh) = setup();
        let report = fresh.load_profile(&EffectProfile::load(&path).unwrap());

        assert_eq!(report.loaded, vec![wave.clone()]);
        assert_eq!(report.started, vec![wave.clone()]);
        assert!(fresh.is_running(&wave));
        assert_eq!(fresh.bindings(&wave), manager.bindings(&wave));
        let snapshot = fresh.snapshot(&wave).unwrap();
        assert_eq!(snapshot.params["frequency"], 4.0);
        assert_eq!(snapshot.settings.colors, vec![RgbColor::new(0, 0, 255)]);
        assert!(devices.commits(0) > 0);
    }

    #[test]
    fn kind_falls_back_to_the_id() {
        let json = r#"{
            "version": 1,
            "effects": [
                { "id": "explosion", "running": false,
                  "settings": { "speed": 80, "brightness": 40, "randomColors": true,
                                "referencePoint": { "x": 1, "y": 0, "z": 0 },
                                "colors": [ { "r": 255, "g": 0, "b": 0 } ] },
                  "devices": [ { "index": 0, "type": "rgb", "led_index": 1,
                                 "position": { "x": 1, "y": 0, "z": 0 } } ] },
                { "id": "mystery", "running": true, "devices": [] }
            ]
        }"#;
        let profile: EffectProfile = serde_json::from_str(json).unwrap();
        let (_grid, _devices, mut manager) = setup();

        let report = manager.load_profile(&profile);

        let id = EffectId::from("explosion");
        assert_eq!(report.loaded, vec![id.clone()]);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].0, EffectId::from("mystery"));
        let snapshot = manager.snapshot(&id).unwrap();
        assert_eq!(snapshot.kind, EffectKind::Explosion);
        assert_eq!(snapshot.settings.speed, 80);
        assert_eq!(snapshot.settings.reference_point, Some(GridPosition::new(1, 0, 0)));
        assert!(!snapshot.running);
        assert_eq!(snapshot.bindings.len(), 1);
    }

    #[test]
    fn loading_over_a_registered_effect_updates_it() {
        let (_grid, _devices, mut manager) = setup();
        let id = EffectId::from("distance");
        manager
            .register(id.clone(), built_in(EffectKind::Distance))
            .unwrap();
        let mut profile = manager.save_profile();
        profile.effects[0].settings.brightness = 10;
        profile.effects[0].devices = vec![ProfileDevice::from(DevicePlacement {
            reference: led(1),
            position: GridPosition::new(1, 0, 0),
        })];

        let report = manager.load_profile(&profile);

        assert_eq!(report.loaded, vec![id.clone()]);
        assert_eq!(manager.ids().len(), 1);
        assert_eq!(manager.snapshot(&id).unwrap().settings.brightness, 10);
        assert_eq!(manager.bindings(&id).len(), 1);
    }

    fn built_in(kind: EffectKind) -> EffectInstance {
        EffectInstance::of_kind(kind, EffectSettings::default()).unwrap()
    }

    fn entry(id: &str, kind: EffectKind, leds: &[usize]) -> ProfileEffect {
        ProfileEffect {
            id: id.into(),
            kind: Some(kind),
            running: false,
            settings: EffectSettings::default(),
            params: Value::Null,
            devices: leds
                .iter()
                .map(|&i| {
                    ProfileDevice::from(DevicePlacement {
                        reference: led(i),
                        position: GridPosition::new(i as i32, 0, 0),
                    })
                })
                .collect(),
        }
    }

    #[test]
    fn entries_sharing_a_device_leave_no_partial_effect() {
        let (_grid, _devices, mut manager) = setup();
        let profile = EffectProfile {
            version: PROFILE_VERSION,
            effects: vec![
                entry("a", EffectKind::Distance, &[0]),
                entry("b", EffectKind::Wave, &[0, 1]),
            ],
        };

        let report = manager.load_profile(&profile);

        assert_eq!(report.loaded, vec![EffectId::from("a")]);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].0, EffectId::from("b"));
        assert!(!manager.is_registered(&EffectId::from("b")));
        assert_eq!(manager.bindings(&EffectId::from("a")).len(), 1);
        assert!(manager.binding_conflict(&"c".into(), &manager.bindings(&"a".into())).is_some());
    }

    #[test]
    fn failed_reload_keeps_the_previous_state() {
        let (_grid, _devices, mut manager) = setup();
        let first = EffectId::from("first");
        let other = EffectId::from("other");
        manager
            .register(first.clone(), built_in(EffectKind::Distance))
            .unwrap();
        manager.bind_references(&first, &[led(1)]).unwrap();
        manager.start(&first).unwrap();
        manager
            .register(other.clone(), built_in(EffectKind::Wave))
            .unwrap();
        manager.bind_references(&other, &[led(0)]).unwrap();
        let before = manager.bindings(&first);

        let mut stolen = entry("first", EffectKind::Distance, &[0]);
        stolen.settings.brightness = 10;
        let report = manager.load_profile(&EffectProfile {
            version: PROFILE_VERSION,
            effects: vec![stolen],
        });

        assert!(report.loaded.is_empty());
        assert_eq!(report.skipped[0].0, first);
        let snapshot = manager.snapshot(&first).unwrap();
        assert_eq!(snapshot.settings.brightness, 100);
        assert_eq!(snapshot.bindings, before);
        assert!(snapshot.running);
        assert_eq!(manager.bindings(&other).len(), 1);
    }

    #[test]
    fn bad_params_roll_an_existing_effect_back() {
        let (_grid, _devices, mut manager) = setup();
        let id = EffectId::from("wave");
        manager
            .register(id.clone(), built_in(EffectKind::Wave))
            .unwrap();
        manager
            .apply_params(&id, &serde_json::json!({ "frequency": 4.0, "spacing": 0.5 }))
            .unwrap();
        manager.bind_references(&id, &[led(2)]).unwrap();
        manager.start(&id).unwrap();

        let mut broken = entry("wave", EffectKind::Wave, &[1]);
        broken.settings.brightness = 5;
        broken.params = serde_json::json!({ "frequency": "fast" });
        let report = manager.load_profile(&EffectProfile {
            version: PROFILE_VERSION,
            effects: vec![broken],
        });

        assert_eq!(report.skipped.len(), 1);
        let snapshot = manager.snapshot(&id).unwrap();
        assert_eq!(snapshot.settings.brightness, 100);
        assert_eq!(snapshot.params["frequency"], 4.0);
        assert_eq!(snapshot.bindings[0].reference, led(2));
        assert!(snapshot.running);
    }

    #[test]
    fn bad_params_on_a_new_entry_register_nothing() {
        let (_grid, _devices, mut manager) = setup();
        let mut broken = entry("wave", EffectKind::Wave, &[1]);
        broken.params = serde_json::json!({ "spacing": [] });

        let report = manager.load_profile(&EffectProfile {
            version: PROFILE_VERSION,
            effects: vec![broken],
        });

        assert_eq!(report.skipped.len(), 1);
        assert!(manager.ids().is_empty());
    }

    #[test]
    fn missing_profile_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let profile = EffectProfile::load_or_default(dir.path().join("nope.json"));
        assert_eq!(profile, EffectProfile::default());
        assert_eq!(profile.version, PROFILE_VERSION);
    }
}
