use std::{collections::BTreeMap, path::Path};

use serde::{Deserialize, Serialize};

use super::{read_json, read_json_or_default, write_json};
use crate::{
    Assignment, DeviceController, DeviceKind, DeviceReference, GridDimensions, GridPosition, Result,
    RgbColor, SpatialError, SpatialGrid,
};

/// On-disk form of a [`SpatialGrid`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutFile {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_position: Option<GridPosition>,
    #[serde(default)]
    pub layer_labels: BTreeMap<u32, String>,
    #[serde(default)]
    pub assignments: Vec<CellRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellRecord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub assignments: Vec<AssignmentRecord>,
}

impl CellRecord {
    pub fn position(&self) -> GridPosition {
        GridPosition::new(self.x, self.y, self.z)
    }
}

/// One assignment plus the names it had when saved, so it can be found
/// again if the devices enumerate in a different order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentRecord {
    pub device_index: usize,
    pub device_type: DeviceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub led_index: Option<usize>,
    #[serde(with = "crate::color::packed", default)]
    pub color: RgbColor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub led_name: Option<String>,
}

impl AssignmentRecord {
    pub fn reference(&self) -> DeviceReference {
        DeviceReference::from_parts(
            self.device_index,
            self.device_type,
            self.zone_index,
            self.led_index,
        )
    }
}

/// What [`LayoutFile::restore`] did with the saved assignments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: usize,
    /// Restored under a different index than the one saved.
    pub remapped: usize,
    pub skipped: usize,
}

impl Default for LayoutFile {
    fn default() -> Self {
        Self::empty(GridDimensions::default())
    }
}

impl LayoutFile {
    pub fn empty(dimensions: GridDimensions) -> Self {
        Self {
            width: dimensions.width,
            height: dimensions.height,
            depth: dimensions.depth,
            user_position: None,
            layer_labels: BTreeMap::new(),
            assignments: Vec::new(),
        }
    }

    pub fn dimensions(&self) -> GridDimensions {
        GridDimensions::new(self.width, self.height, self.depth)
    }

    /// Snapshots `grid`. With a controller at hand, device, zone and LED
    /// names are stored alongside the indices.
    pub fn capture(grid: &SpatialGrid, devices: Option<&dyn DeviceController>) -> Self {
        let mut file = Self::empty(grid.dimensions());
        file.user_position = grid.user_position();
        file.layer_labels = grid.custom_layer_labels().clone();
        file.assignments = grid
            .iter()
            .map(|(position, list)| CellRecord {
                x: position.x,
                y: position.y,
                z: position.z,
                assignments: list.iter().map(|a| record(a, devices)).collect(),
            })
            .collect();
        file
    }

    /// Replaces the contents of `grid` with this layout. Assignments whose
    /// device cannot be found any more, or that fall outside the grid, are
    /// skipped.
    pub fn restore(
        &self,
        grid: &mut SpatialGrid,
        devices: Option<&dyn DeviceController>,
    ) -> Result<RestoreReport> {
        let dimensions = self.dimensions();
        if !dimensions.is_valid() {
            return Err(SpatialError::InvalidDimensions(dimensions));
        }
        grid.clear_all();
        grid.clear_user_position();
        grid.clear_labels();
        grid.set_dimensions(dimensions)?;
        for (z, label) in &self.layer_labels {
            if grid.set_layer_label(*z, label.clone()).is_err() {
                tracing::warn!(layer = z, "ignoring label for a layer outside the grid");
            }
        }
        if let Some(position) = self.user_position {
            if grid.set_user_position(position).is_err() {
                tracing::warn!(%position, "saved reference point is outside the grid");
            }
        }

        let mut report = RestoreReport::default();
        for cell in &self.assignments {
            let position = cell.position();
            for saved in &cell.assignments {
                let reference = match devices {
                    Some(devices) => resolve(saved, devices),
                    None => Some(saved.reference()),
                };
                let Some(reference) = reference else {
                    tracing::warn!(
                        %position,
                        device = saved.device_name.as_deref().unwrap_or("?"),
                        "device no longer present, skipping assignment"
                    );
                    report.skipped += 1;
                    continue;
                };
                let assignment = Assignment::with_color(reference, saved.color);
                if grid.add_assignment(position, assignment).is_err() {
                    report.skipped += 1;
                    continue;
                }
                if reference != saved.reference() {
                    tracing::debug!(
                        %position,
                        from = %saved.reference(),
                        to = %reference,
                        "assignment remapped"
                    );
                    report.remapped += 1;
                }
                report.restored += 1;
            }
        }
        tracing::debug!(?report, %dimensions, "layout restored");
        Ok(report)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        write_json(path.as_ref(), self)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        read_json(path.as_ref())
    }

    /// Missing or malformed files yield an empty default-sized layout.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        read_json_or_default(path.as_ref(), "layout")
    }
}

fn record(assignment: &Assignment, devices: Option<&dyn DeviceController>) -> AssignmentRecord {
    let reference = assignment.reference;
    let device = reference.device_index;
    AssignmentRecord {
        device_index: device,
        device_type: reference.kind,
        zone_index: reference.zone_index(),
        led_index: reference.led_index(),
        color: assignment.color,
        device_name: devices.and_then(|d| d.device_name(device)),
        zone_name: reference
            .zone_index()
            .and_then(|zone| devices.and_then(|d| d.zone_name(device, zone))),
        led_name: reference
            .led_index()
            .and_then(|led| devices.and_then(|d| d.led_name(device, led))),
    }
}

/// Maps a saved assignment onto the devices present now, preferring the
/// saved index when its name still matches.
fn resolve(saved: &AssignmentRecord, devices: &dyn DeviceController) -> Option<DeviceReference> {
    let device = locate(
        saved.device_index,
        devices.device_count(),
        saved.device_name.as_deref(),
        |i| devices.device_name(i),
    )?;
    let zone = match saved.zone_index {
        Some(zone) => Some(locate(
            zone,
            devices.zone_count(device),
            saved.zone_name.as_deref(),
            |i| devices.zone_name(device, i),
        )?),
        None => None,
    };
    let led = match saved.led_index {
        Some(led) => Some(locate(
            led,
            devices.led_count(device),
            saved.led_name.as_deref(),
            |i| devices.led_name(device, i),
        )?),
        None => None,
    };
    Some(DeviceReference::from_parts(device, saved.device_type, zone, led))
}

fn locate(
    index: usize,
    count: usize,
    name: Option<&str>,
    name_of: impl Fn(usize) -> Option<String>,
) -> Option<usize> {
    let agrees = |i: usize| match (name, name_of(i)) {
        (Some(wanted), Some(actual)) => wanted == actual,
        _ => true,
    };
    if index < count && agrees(index) {
        return Some(index);
    }
    let wanted = name?;
    (0..count).find(|&i| name_of(i).as_deref() == Some(wanted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryDevice, MemoryDevices};

    fn led(device: usize, index: usize) -> DeviceReference {
        DeviceReference::led(device, DeviceKind::Rgb, index)
    }

    fn sample_grid() -> SpatialGrid {
        let mut grid = SpatialGrid::with_dimensions(GridDimensions::new(4, 2, 2)).unwrap();
        grid.add_assignment(GridPosition::new(0, 0, 0), Assignment::new(led(0, 1)))
            .unwrap();
        grid.add_assignment(
            GridPosition::new(3, 1, 1),
            Assignment::with_color(led(1, 0), RgbColor::new(10, 20, 30)),
        )
        .unwrap();
        grid.add_assignment(
            GridPosition::new(3, 1, 1),
            Assignment::new(DeviceReference::zone(1, DeviceKind::Rgb, 0)),
        )
        .unwrap();
        grid.set_user_position(GridPosition::new(1, 1, 0)).unwrap();
        grid.set_layer_label(1, "Ceiling").unwrap();
        grid
    }

    fn desk_and_case() -> MemoryDevices {
        MemoryDevices::new(vec![MemoryDevice::strip("desk", 4), MemoryDevice::strip("case", 2)])
    }

    #[test]
    fn json_shape() {
        let grid = sample_grid();
        let devices = desk_and_case();
        let file = LayoutFile::capture(&grid, Some(&devices));
        let json = serde_json::to_value(&file).unwrap();

        assert_eq!(json["width"], 4);
        assert_eq!(json["user_position"]["x"], 1);
        assert_eq!(json["layer_labels"]["1"], "Ceiling");
        let cell = &json["assignments"][1];
        assert_eq!(cell["z"], 1);
        let first = &cell["assignments"][0];
        assert_eq!(first["device_type"], "rgb");
        assert_eq!(first["led_index"], 0);
        assert_eq!(first["color"], 10 | 20 << 8 | 30 << 16);
        assert_eq!(first["device_name"], "case");
        assert_eq!(first["led_name"], "LED 1");
        assert_eq!(cell["assignments"][1]["zone_name"], "Main");
    }

    #[test]
    fn restore_round_trip_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layout.json");
        let devices = desk_and_case();
        let original = sample_grid();
        LayoutFile::capture(&original, Some(&devices)).save(&path).unwrap();

        let mut restored = SpatialGrid::new();
        let report = LayoutFile::load(&path)
            .unwrap()
            .restore(&mut restored, Some(&devices))
            .unwrap();

        assert_eq!(report, RestoreReport { restored: 3, remapped: 0, skipped: 0 });
        assert_eq!(restored.dimensions(), original.dimensions());
        assert_eq!(restored.placements(), original.placements());
        assert_eq!(
            restored.assignments(GridPosition::new(3, 1, 1))[0].color,
            RgbColor::new(10, 20, 30)
        );
        assert_eq!(restored.user_position(), Some(GridPosition::new(1, 1, 0)));
        assert_eq!(restored.layer_label(1), "Ceiling");
    }

    #[test]
    fn restore_replaces_stale_labels() {
        let saved = LayoutFile::capture(&sample_grid(), None);
        let mut grid = SpatialGrid::with_dimensions(GridDimensions::new(4, 2, 2)).unwrap();
        grid.set_layer_label(0, "Desk level").unwrap();
        grid.set_position_label(GridPosition::new(2, 0, 0), "Monitor").unwrap();

        saved.restore(&mut grid, None).unwrap();

        assert_eq!(grid.layer_label(0), "Layer 1");
        assert_eq!(grid.layer_label(1), "Ceiling");
        assert_eq!(grid.position_label(GridPosition::new(2, 0, 0)), "Front-Right");
        assert_eq!(grid.custom_layer_labels().len(), 1);
    }

    #[test]
    fn devices_are_found_again_by_name() {
        let saved = LayoutFile::capture(&sample_grid(), Some(&desk_and_case()));
        let reordered = MemoryDevices::new(vec![
            MemoryDevice::strip("case", 2),
            MemoryDevice::strip("desk", 4),
        ]);

        let mut grid = SpatialGrid::new();
        let report = saved.restore(&mut grid, Some(&reordered)).unwrap();

        assert_eq!(report.restored, 3);
        assert_eq!(report.remapped, 3);
        assert_eq!(grid.device_position(&led(1, 1)), Some(GridPosition::ORIGIN));
        assert_eq!(grid.device_position(&led(0, 0)), Some(GridPosition::new(3, 1, 1)));
    }

    #[test]
    fn vanished_devices_are_skipped() {
        let saved = LayoutFile::capture(&sample_grid(), Some(&desk_and_case()));
        let only_desk = MemoryDevices::new(vec![MemoryDevice::strip("desk", 4)]);

        let mut grid = SpatialGrid::new();
        let report = saved.restore(&mut grid, Some(&only_desk)).unwrap();

        assert_eq!(report, RestoreReport { restored: 1, remapped: 0, skipped: 2 });
        assert_eq!(grid.assignment_count(), 1);
    }

    #[test]
    fn without_a_controller_indices_are_trusted() {
        let saved = LayoutFile::capture(&sample_grid(), None);
        assert!(saved.assignments[0].assignments[0].device_name.is_none());

        let mut grid = SpatialGrid::new();
        let report = saved.restore(&mut grid, None).unwrap();
        assert_eq!(report.restored, 3);
    }

    #[test]
    fn unreadable_files_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layout.json");
        std::fs::write(&path, "[1, 2").unwrap();

        let file = LayoutFile::load_or_default(&path);

        assert_eq!(file, LayoutFile::default());
        assert_eq!(file.dimensions(), GridDimensions::default());
    }

    #[test]
    fn zero_sized_layouts_are_refused() {
        let mut file = LayoutFile::default();
        file.depth = 0;
        let mut grid = sample_grid();
        assert!(matches!(
            file.restore(&mut grid, None),
            Err(SpatialError::InvalidDimensions(_))
        ));
        assert_eq!(grid.assignment_count(), 3);
    }
}
