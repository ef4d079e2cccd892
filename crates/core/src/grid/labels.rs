//! Default cosmetic names for grid cells and layers.

use crate::{GridDimensions, GridPosition};

/// Compass style label for the column at `(x, y)`, relative to the grid
/// centre. Row zero is the front of the room, column zero its left side.
pub fn compass_label(dimensions: GridDimensions, position: GridPosition) -> String {
    let horizontal = side(position.x, dimensions.width, "Left", "Right");
    let vertical = side(position.y, dimensions.height, "Front", "Back");

    match (vertical, horizontal) {
        (None, None) => "Center".to_string(),
        (Some(v), None) => v.to_string(),
        (None, Some(h)) => h.to_string(),
        (Some(v), Some(h)) => format!("{v}-{h}"),
    }
}

pub fn default_layer_label(z: u32) -> String {
    format!("Layer {}", z + 1)
}

fn side(
    coordinate: i32,
    extent: u32,
    low: &'static str,
    high: &'static str,
) -> Option<&'static str> {
    // Twice the coordinate keeps the centre an integer for even extents too.
    let doubled = i64::from(coordinate) * 2;
    let centre = i64::from(extent) - 1;
    match doubled.cmp(&centre) {
        std::cmp::Ordering::Less => Some(low),
        std::cmp::Ordering::Greater => Some(high),
        std::cmp::Ordering::Equal => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_by_three_compass() {
        let dims = GridDimensions::default();
        let label = |x, y| compass_label(dims, GridPosition::new(x, y, 0));
        assert_eq!(label(0, 0), "Front-Left");
        assert_eq!(label(1, 0), "Front");
        assert_eq!(label(2, 0), "Front-Right");
        assert_eq!(label(0, 1), "Left");
        assert_eq!(label(1, 1), "Center");
        assert_eq!(label(2, 2), "Back-Right");
    }

    #[test]
    fn even_extents_have_no_centre_column() {
        let dims = GridDimensions::new(2, 1, 1);
        assert_eq!(compass_label(dims, GridPosition::new(0, 0, 0)), "Left");
        assert_eq!(compass_label(dims, GridPosition::new(1, 0, 0)), "Right");
    }

    #[test]
    fn extreme_coordinates_still_get_a_side() {
        let dims = GridDimensions::default();
        assert_eq!(compass_label(dims, GridPosition::new(i32::MAX, 0, 0)), "Front-Right");
        assert_eq!(compass_label(dims, GridPosition::new(1, i32::MIN, 0)), "Front");
        assert_eq!(compass_label(dims, GridPosition::new(i32::MIN, i32::MAX, 0)), "Back-Left");
    }

    #[test]
    fn layers_count_from_one() {
        assert_eq!(default_layer_label(0), "Layer 1");
        assert_eq!(default_layer_label(4), "Layer 5");
    }
}
