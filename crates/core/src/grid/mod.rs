//! 3D coordinate system and device-to-position bookkeeping.
//!
//! [`SpatialGrid`] is a plain data store with validation. Every operation is
//! total: invalid input yields an `Err`/`false`/empty value and a
//! [`GridEvent::Rejected`] notification instead of a panic.

mod labels;

use std::{cmp::Ordering, collections::BTreeMap, fmt, sync::Arc};

use serde::{Deserialize, Serialize};

pub use labels::{compass_label, default_layer_label};

use crate::{DeviceReference, EventBus, GridEvent, Result, RgbColor, SpatialError};

/// Lock-protected grid shared between the UI side and the effect engine.
pub type SharedGrid = Arc<parking_lot::RwLock<SpatialGrid>>;

/// Extent of the grid along each axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridDimensions {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl GridDimensions {
    pub const fn new(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    /// Every axis must be non-empty and addressable by an `i32` coordinate.
    pub fn is_valid(&self) -> bool {
        [self.width, self.height, self.depth]
            .iter()
            .all(|extent| (1..=i32::MAX as u32).contains(extent))
    }

    pub fn contains(&self, position: GridPosition) -> bool {
        position.x >= 0
            && position.y >= 0
            && position.z >= 0
            && (position.x as u32) < self.width
            && (position.y as u32) < self.height
            && (position.z as u32) < self.depth
    }

    pub fn cell_count(&self) -> usize {
        self.width as usize * self.height as usize * self.depth as usize
    }

    /// Every in-bounds position in z, y, x order.
    pub fn positions(&self) -> impl Iterator<Item = GridPosition> {
        let Self {
            width,
            height,
            depth,
        } = *self;
        (0..depth as i32).flat_map(move |z| {
            (0..height as i32)
                .flat_map(move |y| (0..width as i32).map(move |x| GridPosition::new(x, y, z)))
        })
    }
}

impl Default for GridDimensions {
    fn default() -> Self {
        Self::new(3, 3, 3)
    }
}

impl fmt::Display for GridDimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.depth)
    }
}

/// Integer cell coordinate. Ordered by z, then y, then x.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridPosition {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl GridPosition {
    pub const ORIGIN: GridPosition = GridPosition::new(0, 0, 0);

    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn distance_to(&self, other: GridPosition) -> f32 {
        let dx = (i64::from(self.x) - i64::from(other.x)) as f32;
        let dy = (i64::from(self.y) - i64::from(other.y)) as f32;
        let dz = (i64::from(self.z) - i64::from(other.z)) as f32;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

impl Ord for GridPosition {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.z, self.y, self.x).cmp(&(other.z, other.y, other.x))
    }
}

impl PartialOrd for GridPosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for GridPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// A device (or part of one) placed at a position, with the last color
/// written to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub reference: DeviceReference,
    pub color: RgbColor,
}

impl Assignment {
    pub fn new(reference: DeviceReference) -> Self {
        Self {
            reference,
            color: RgbColor::BLACK,
        }
    }

    pub fn with_color(reference: DeviceReference, color: RgbColor) -> Self {
        Self { reference, color }
    }
}

/// A device reference paired with the cell it occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DevicePlacement {
    pub reference: DeviceReference,
    pub position: GridPosition,
}

#[derive(Debug, Default)]
pub struct SpatialGrid {
    dimensions: GridDimensions,
    cells: BTreeMap<GridPosition, Vec<Assignment>>,
    position_labels: BTreeMap<GridPosition, String>,
    layer_labels: BTreeMap<u32, String>,
    user_position: Option<GridPosition>,
    revision: u64,
    events: EventBus<GridEvent>,
}

impl SpatialGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dimensions(dimensions: GridDimensions) -> Result<Self> {
        if !dimensions.is_valid() {
            return Err(SpatialError::InvalidDimensions(dimensions));
        }
        Ok(Self {
            dimensions,
            ..Self::default()
        })
    }

    pub fn into_shared(self) -> SharedGrid {
        Arc::new(parking_lot::RwLock::new(self))
    }

    pub fn events(&mut self) -> &mut EventBus<GridEvent> {
        &mut self.events
    }

    pub fn dimensions(&self) -> GridDimensions {
        self.dimensions
    }

    /// Counter bumped by every structural change (dimensions, assignments,
    /// user position). Color write-backs leave it untouched.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn contains(&self, position: GridPosition) -> bool {
        self.dimensions.contains(position)
    }

    /// Replaces the dimensions, pruning everything that no longer fits.
    /// Returns how many assignments were dropped.
    pub fn set_dimensions(&mut self, dimensions: GridDimensions) -> Result<usize> {
        if !dimensions.is_valid() {
            return self.reject(|| SpatialError::InvalidDimensions(dimensions));
        }
        if dimensions == self.dimensions {
            return Ok(0);
        }

        self.dimensions = dimensions;
        let mut removed = 0;
        self.cells.retain(|position, assignments| {
            let keep = dimensions.contains(*position);
            if !keep {
                removed += assignments.len();
            }
            keep
        });
        self.position_labels
            .retain(|position, _| dimensions.contains(*position));
        self.layer_labels.retain(|z, _| *z < dimensions.depth);
        self.bump();

        self.events.publish(GridEvent::DimensionsChanged(dimensions));
        if removed > 0 {
            tracing::warn!(removed, %dimensions, "resize dropped out-of-range assignments");
            self.events.publish(GridEvent::AssignmentsPruned { removed });
        }
        if let Some(user) = self.user_position {
            if !dimensions.contains(user) {
                tracing::warn!(%user, "reference point fell outside the grid and was cleared");
                self.user_position = None;
                self.events.publish(GridEvent::UserPositionChanged(None));
            }
        }
        Ok(removed)
    }

    /// Appends an assignment and returns its index in the cell's list.
    pub fn add_assignment(
        &mut self,
        position: GridPosition,
        assignment: Assignment,
    ) -> Result<usize> {
        self.check_bounds(position)?;
        let list = self.cells.entry(position).or_default();
        list.push(assignment);
        let index = list.len() - 1;
        self.bump();
        Ok(index)
    }

    /// Removes one assignment; later entries shift down by one.
    pub fn remove_assignment(
        &mut self,
        position: GridPosition,
        index: usize,
    ) -> Result<Assignment> {
        self.check_bounds(position)?;
        let len = self.cells.get(&position).map_or(0, Vec::len);
        if index >= len {
            return self.reject(|| SpatialError::InvalidIndex {
                position,
                index,
                len,
            });
        }

        let mut removed = None;
        if let Some(list) = self.cells.get_mut(&position) {
            removed = Some(list.remove(index));
            if list.is_empty() {
                self.cells.remove(&position);
            }
        }
        self.bump();
        removed.ok_or_else(|| SpatialError::InvalidIndex {
            position,
            index,
            len,
        })
    }

    /// Drops every assignment at `position`, returning how many there were.
    pub fn clear_assignments(&mut self, position: GridPosition) -> usize {
        if self.check_bounds(position).is_err() {
            return 0;
        }
        let removed = self.cells.remove(&position).map_or(0, |list| list.len());
        if removed > 0 {
            self.bump();
        }
        removed
    }

    pub fn clear_all(&mut self) {
        if !self.cells.is_empty() {
            self.cells.clear();
            self.bump();
        }
    }

    /// Records the color last applied to an assignment. Returns false if the
    /// index does not exist.
    pub fn update_assignment_color(
        &mut self,
        position: GridPosition,
        index: usize,
        color: RgbColor,
    ) -> bool {
        match self.cells.get_mut(&position).and_then(|list| list.get_mut(index)) {
            Some(assignment) => {
                assignment.color = color;
                true
            }
            None => {
                let len = self.cells.get(&position).map_or(0, Vec::len);
                let _ = self.reject::<()>(|| SpatialError::InvalidIndex {
                    position,
                    index,
                    len,
                });
                false
            }
        }
    }

    pub fn has_assignments(&self, position: GridPosition) -> bool {
        self.cells.get(&position).is_some_and(|list| !list.is_empty())
    }

    /// Snapshot of the assignments at `position`.
    pub fn assignments(&self, position: GridPosition) -> Vec<Assignment> {
        self.cells.get(&position).cloned().unwrap_or_default()
    }

    pub fn assignment_count(&self) -> usize {
        self.cells.values().map(Vec::len).sum()
    }

    /// Positions holding at least one assignment, in z, y, x order.
    pub fn assigned_positions(&self) -> Vec<GridPosition> {
        self.cells.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (GridPosition, &[Assignment])> {
        self.cells
            .iter()
            .map(|(position, list)| (*position, list.as_slice()))
    }

    /// Every `(device, position)` pair currently placed on the grid.
    pub fn placements(&self) -> Vec<DevicePlacement> {
        self.iter()
            .flat_map(|(position, list)| {
                list.iter().map(move |assignment| DevicePlacement {
                    reference: assignment.reference,
                    position,
                })
            })
            .collect()
    }

    /// First position (in z, y, x order) holding `reference`.
    pub fn device_position(&self, reference: &DeviceReference) -> Option<GridPosition> {
        self.iter()
            .find(|(_, list)| list.iter().any(|a| a.reference == *reference))
            .map(|(position, _)| position)
    }

    /// Index of `reference` within the list at `position`.
    pub fn find_assignment(
        &self,
        position: GridPosition,
        reference: &DeviceReference,
    ) -> Option<usize> {
        self.cells
            .get(&position)?
            .iter()
            .position(|a| a.reference == *reference)
    }

    pub fn user_position(&self) -> Option<GridPosition> {
        self.user_position
    }

    pub fn set_user_position(&mut self, position: GridPosition) -> Result<()> {
        self.check_bounds(position)?;
        if self.user_position != Some(position) {
            self.user_position = Some(position);
            self.bump();
            self.events
                .publish(GridEvent::UserPositionChanged(Some(position)));
        }
        Ok(())
    }

    pub fn clear_user_position(&mut self) {
        if self.user_position.take().is_some() {
            self.bump();
            self.events.publish(GridEvent::UserPositionChanged(None));
        }
    }

    pub fn position_label(&self, position: GridPosition) -> String {
        self.position_labels
            .get(&position)
            .cloned()
            .unwrap_or_else(|| compass_label(self.dimensions, position))
    }

    pub fn set_position_label(
        &mut self,
        position: GridPosition,
        label: impl Into<String>,
    ) -> Result<()> {
        self.check_bounds(position)?;
        self.position_labels.insert(position, label.into());
        Ok(())
    }

    pub fn layer_label(&self, z: u32) -> String {
        self.layer_labels
            .get(&z)
            .cloned()
            .unwrap_or_else(|| default_layer_label(z))
    }

    pub fn set_layer_label(&mut self, z: u32, label: impl Into<String>) -> Result<()> {
        if z >= self.dimensions.depth {
            let dimensions = self.dimensions;
            return self.reject(|| SpatialError::OutOfBounds {
                position: GridPosition::new(0, 0, z as i32),
                dimensions,
            });
        }
        self.layer_labels.insert(z, label.into());
        Ok(())
    }

    /// Drops every custom position and layer label.
    pub fn clear_labels(&mut self) {
        self.position_labels.clear();
        self.layer_labels.clear();
    }

    /// Layer labels that differ from the default scheme.
    pub fn custom_layer_labels(&self) -> &BTreeMap<u32, String> {
        &self.layer_labels
    }

    fn check_bounds(&mut self, position: GridPosition) -> Result<()> {
        if self.dimensions.contains(position) {
            return Ok(());
        }
        let dimensions = self.dimensions;
        self.reject(|| SpatialError::OutOfBounds {
            position,
            dimensions,
        })
    }

    fn reject<T>(&mut self, make: impl Fn() -> SpatialError) -> Result<T> {
        let error = make();
        tracing::debug!(%error, "grid operation rejected");
        self.events.publish(GridEvent::Rejected(Arc::new(error)));
        Err(make())
    }

    fn bump(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }
}
