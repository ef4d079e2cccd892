//! Boundary to the host's device manager.
//!
//! All color output funnels through [`DeviceBus::apply`], which holds the one
//! process-wide device lock for the whole frame so a device is never written
//! from two threads at once.

mod memory;

use std::{fmt, sync::Arc};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

pub use memory::{MemoryDevice, MemoryDevices};

use crate::{Result, RgbColor, SpatialError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Rgb,
    NonRgb,
}

/// Granularity of a color write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeviceTarget {
    Device,
    Zone(usize),
    Led(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceReference {
    pub device_index: usize,
    pub kind: DeviceKind,
    pub target: DeviceTarget,
}

impl DeviceReference {
    pub const fn whole(device_index: usize, kind: DeviceKind) -> Self {
        Self {
            device_index,
            kind,
            target: DeviceTarget::Device,
        }
    }

    pub const fn zone(device_index: usize, kind: DeviceKind, zone: usize) -> Self {
        Self {
            device_index,
            kind,
            target: DeviceTarget::Zone(zone),
        }
    }

    pub const fn led(device_index: usize, kind: DeviceKind, led: usize) -> Self {
        Self {
            device_index,
            kind,
            target: DeviceTarget::Led(led),
        }
    }

    /// Builds a reference from the optional zone/LED pair used on disk. When
    /// both are present the LED wins.
    pub fn from_parts(
        device_index: usize,
        kind: DeviceKind,
        zone: Option<usize>,
        led: Option<usize>,
    ) -> Self {
        let target = match (zone, led) {
            (_, Some(led)) => DeviceTarget::Led(led),
            (Some(zone), None) => DeviceTarget::Zone(zone),
            (None, None) => DeviceTarget::Device,
        };
        Self {
            device_index,
            kind,
            target,
        }
    }

    pub fn zone_index(&self) -> Option<usize> {
        match self.target {
            DeviceTarget::Zone(zone) => Some(zone),
            _ => None,
        }
    }

    pub fn led_index(&self) -> Option<usize> {
        match self.target {
            DeviceTarget::Led(led) => Some(led),
            _ => None,
        }
    }

    pub fn is_rgb(&self) -> bool {
        self.kind == DeviceKind::Rgb
    }
}

impl fmt::Display for DeviceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device {}", self.device_index)?;
        match self.target {
            DeviceTarget::Device => Ok(()),
            DeviceTarget::Zone(zone) => write!(f, " zone {zone}"),
            DeviceTarget::Led(led) => write!(f, " led {led}"),
        }
    }
}

/// Operations the core needs from the host device manager.
pub trait DeviceController: Send {
    fn device_count(&self) -> usize;
    fn zone_count(&self, device: usize) -> usize;
    fn led_count(&self, device: usize) -> usize;
    fn set_led_color(&mut self, device: usize, led: usize, color: RgbColor) -> bool;
    fn set_zone_color(&mut self, device: usize, zone: usize, color: RgbColor) -> bool;
    fn set_device_color(&mut self, device: usize, color: RgbColor) -> bool;
    /// Commits pending writes for one device.
    fn update_device(&mut self, device: usize) -> bool;
    fn device_name(&self, device: usize) -> Option<String>;

    fn zone_name(&self, _device: usize, _zone: usize) -> Option<String> {
        None
    }

    fn led_name(&self, _device: usize, _led: usize) -> Option<String> {
        None
    }
}

/// Writes one color at the granularity named by `reference`.
pub fn write_color(
    controller: &mut dyn DeviceController,
    reference: &DeviceReference,
    color: RgbColor,
) -> bool {
    let device = reference.device_index;
    if device >= controller.device_count() {
        return false;
    }
    match reference.target {
        DeviceTarget::Device => controller.set_device_color(device, color),
        DeviceTarget::Zone(zone) => controller.set_zone_color(device, zone, color),
        DeviceTarget::Led(led) => controller.set_led_color(device, led, color),
    }
}

/// Outcome of writing one frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub written: usize,
    pub skipped: usize,
    pub failed: Vec<DeviceReference>,
}

/// Shared, lock-protected handle to the device controller.
#[derive(Clone, Default)]
pub struct DeviceBus {
    controller: Arc<Mutex<Option<Box<dyn DeviceController>>>>,
}

impl DeviceBus {
    pub fn new(controller: impl DeviceController + 'static) -> Self {
        let bus = Self::default();
        bus.attach(controller);
        bus
    }

    /// A bus with no controller; every write reports
    /// [`SpatialError::NoDeviceController`].
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn attach(&self, controller: impl DeviceController + 'static) {
        *self.controller.lock() = Some(Box::new(controller));
    }

    pub fn detach(&self) {
        *self.controller.lock() = None;
    }

    pub fn is_attached(&self) -> bool {
        self.controller.lock().is_some()
    }

    /// Runs `f` with exclusive access to the controller.
    pub fn with_controller<R>(&self, f: impl FnOnce(&mut dyn DeviceController) -> R) -> Result<R> {
        let mut guard = self.controller.lock();
        let controller = guard.as_mut().ok_or(SpatialError::NoDeviceController)?;
        Ok(f(controller.as_mut()))
    }

    /// Writes every color in order, then commits each touched device once.
    /// Non-RGB references are skipped.
    pub fn apply(&self, writes: &[(DeviceReference, RgbColor)]) -> Result<ApplyReport> {
        self.with_controller(|controller| {
            let mut report = ApplyReport::default();
            let mut touched: Vec<usize> = Vec::new();
            for (reference, color) in writes {
                if !reference.is_rgb() {
                    report.skipped += 1;
                    continue;
                }
                if write_color(controller, reference, *color) {
                    report.written += 1;
                    if !touched.contains(&reference.device_index) {
                        touched.push(reference.device_index);
                    }
                } else {
                    report.failed.push(*reference);
                }
            }
            for device in touched {
                if !controller.update_device(device) {
                    tracing::debug!(device, "device refused commit");
                }
            }
            report
        })
    }
}

impl fmt::Debug for DeviceBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBus")
            .field("attached", &self.is_attached())
            .finish()
    }
}
