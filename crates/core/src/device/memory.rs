use std::sync::Arc;

use parking_lot::Mutex;

use super::{DeviceController, DeviceKind, DeviceReference};
use crate::RgbColor;

/// Simulated device with named zones laid out back to back.
#[derive(Debug, Clone)]
pub struct MemoryDevice {
    pub name: String,
    pub zones: Vec<(String, usize)>,
    leds: Vec<RgbColor>,
    commits: usize,
}

impl MemoryDevice {
    pub fn new(name: impl Into<String>, zones: Vec<(String, usize)>) -> Self {
        let led_count = zones.iter().map(|(_, count)| count).sum();
        Self {
            name: name.into(),
            zones,
            leds: vec![RgbColor::BLACK; led_count],
            commits: 0,
        }
    }

    /// A single-zone device with `leds` LEDs.
    pub fn strip(name: impl Into<String>, leds: usize) -> Self {
        Self::new(name, vec![("Main".to_string(), leds)])
    }

    fn zone_range(&self, zone: usize) -> Option<std::ops::Range<usize>> {
        let (_, count) = self.zones.get(zone)?;
        let start: usize = self.zones[..zone].iter().map(|(_, c)| c).sum();
        Some(start..start + count)
    }
}

/// In-memory [`DeviceController`]. Clones share state, so a test can keep
/// one handle while the engine owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryDevices {
    devices: Arc<Mutex<Vec<MemoryDevice>>>,
    history: Arc<Mutex<Vec<(DeviceReference, RgbColor)>>>,
}

impl MemoryDevices {
    pub fn new(devices: Vec<MemoryDevice>) -> Self {
        Self {
            devices: Arc::new(Mutex::new(devices)),
            history: Arc::default(),
        }
    }

    pub fn led_color(&self, device: usize, led: usize) -> Option<RgbColor> {
        self.devices.lock().get(device)?.leds.get(led).copied()
    }

    pub fn commits(&self, device: usize) -> usize {
        self.devices.lock().get(device).map_or(0, |d| d.commits)
    }

    /// Every successful write in the order it happened.
    pub fn history(&self) -> Vec<(DeviceReference, RgbColor)> {
        self.history.lock().clone()
    }

    pub fn clear_history(&self) {
        self.history.lock().clear();
    }

    fn record(&self, reference: DeviceReference, color: RgbColor) {
        self.history.lock().push((reference, color));
    }
}

impl DeviceController for MemoryDevices {
    fn device_count(&self) -> usize {
        self.devices.lock().len()
    }

    fn zone_count(&self, device: usize) -> usize {
        self.devices.lock().get(device).map_or(0, |d| d.zones.len())
    }

    fn led_count(&self, device: usize) -> usize {
        self.devices.lock().get(device).map_or(0, |d| d.leds.len())
    }

    fn set_led_color(&mut self, device: usize, led: usize, color: RgbColor) -> bool {
        let written = {
            let mut devices = self.devices.lock();
            match devices.get_mut(device).and_then(|d| d.leds.get_mut(led)) {
                Some(slot) => {
                    *slot = color;
                    true
                }
                None => false,
            }
        };
        if written {
            self.record(DeviceReference::led(device, DeviceKind::Rgb, led), color);
        }
        written
    }

    fn set_zone_color(&mut self, device: usize, zone: usize, color: RgbColor) -> bool {
        let written = {
            let mut devices = self.devices.lock();
            let Some(target) = devices.get_mut(device) else {
                return false;
            };
            match target.zone_range(zone) {
                Some(range) => {
                    target.leds[range].fill(color);
                    true
                }
                None => false,
            }
        };
        if written {
            self.record(DeviceReference::zone(device, DeviceKind::Rgb, zone), color);
        }
        written
    }

    fn set_device_color(&mut self, device: usize, color: RgbColor) -> bool {
        let written = {
            let mut devices = self.devices.lock();
            match devices.get_mut(device) {
                Some(target) => {
                    target.leds.fill(color);
                    true
                }
                None => false,
            }
        };
        if written {
            self.record(DeviceReference::whole(device, DeviceKind::Rgb), color);
        }
        written
    }

    fn update_device(&mut self, device: usize) -> bool {
        match self.devices.lock().get_mut(device) {
            Some(target) => {
                target.commits += 1;
                true
            }
            None => false,
        }
    }

    fn device_name(&self, device: usize) -> Option<String> {
        self.devices.lock().get(device).map(|d| d.name.clone())
    }

    fn zone_name(&self, device: usize, zone: usize) -> Option<String> {
        self.devices
            .lock()
            .get(device)?
            .zones
            .get(zone)
            .map(|(name, _)| name.clone())
    }

    fn led_name(&self, device: usize, led: usize) -> Option<String> {
        let devices = self.devices.lock();
        let target = devices.get(device)?;
        (led < target.leds.len()).then(|| format!("LED {}", led + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_writes_fill_their_range_only() {
        let mut devices = MemoryDevices::new(vec![MemoryDevice::new(
            "desk",
            vec![("Left".to_string(), 2), ("Right".to_string(), 3)],
        )]);
        let blue = RgbColor::new(0, 0, 255);
        assert!(devices.set_zone_color(0, 1, blue));
        assert!(!devices.set_zone_color(0, 2, blue));
        assert_eq!(devices.led_color(0, 1), Some(RgbColor::BLACK));
        assert_eq!(devices.led_color(0, 2), Some(blue));
        assert_eq!(devices.led_color(0, 4), Some(blue));
        assert_eq!(devices.zone_name(0, 1).as_deref(), Some("Right"));
        assert_eq!(devices.led_count(0), 5);
    }

    #[test]
    fn clones_share_state() {
        let devices = MemoryDevices::new(vec![MemoryDevice::strip("s", 1)]);
        let mut writer = devices.clone();
        writer.set_device_color(0, RgbColor::WHITE);
        assert_eq!(devices.led_color(0, 0), Some(RgbColor::WHITE));
        assert_eq!(devices.history().len(), 1);
    }
}
