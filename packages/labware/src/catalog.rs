//! A small set of concrete labware definitions.
//!
//! The broad labware catalog lives outside this crate; these are the
//! definitions the backends' own tests and demos need. Grids are built
//! column-major (A1, B1, .. H1, A2, ..), matching the child-index math in
//! [`GridData`](crate::tree::GridData).

use crate::coordinate::Coordinate;
use crate::errors::LabwareError;
use crate::tip::{Tip, TipSpotState};
use crate::tree::{GridData, NodeId, ResourceData, ResourceInit, ResourceTree};
use crate::well::WellState;

/// Shape of one 96-position grid: 12 columns and 8 rows, 9 mm pitch.
const GRID_96: GridData = GridData {
    num_cols: 12,
    num_rows: 8,
};
const ITEM_PITCH: f64 = 9.0;

/// Build a 96-position tip rack with the given tip in every spot.
///
/// `first_spot` is the origin of spot H1 (front left); spot z is negative
/// because tips hang below the rack's mounting plane.
pub fn tip_rack_96(
    tree: &mut ResourceTree,
    name: &str,
    tip: Tip,
    first_spot: Coordinate,
    with_tips: bool,
    model: &str,
) -> Result<NodeId, LabwareError> {
    let rack = tree.add(
        ResourceInit::new(name, 122.4, 82.6, 20.0)
            .category("tip_rack")
            .model(model)
            .data(ResourceData::TipRack(GRID_96)),
    );
    for col in 0..GRID_96.num_cols {
        for row in 0..GRID_96.num_rows {
            let spot = tree.add(
                ResourceInit::new(format!("{name}_tipspot_{row}_{col}"), 9.0, 9.0, 0.0)
                    .category("tip_spot")
                    .data(ResourceData::TipSpot(TipSpotState::new(
                        tip.clone(),
                        with_tips,
                    ))),
            );
            let location = Coordinate::new(
                first_spot.x + col as f64 * ITEM_PITCH,
                first_spot.y + (GRID_96.num_rows - 1 - row) as f64 * ITEM_PITCH,
                first_spot.z,
            );
            tree.assign_child(rack, spot, Some(location), false)?;
        }
    }
    Ok(rack)
}

/// STF: standard volume tips with filter, full rack.
pub fn stf_tip_rack(tree: &mut ResourceTree, name: &str) -> Result<NodeId, LabwareError> {
    tip_rack_96(
        tree,
        name,
        Tip::standard_volume_with_filter(),
        Coordinate::new(7.2, 5.3, -50.5),
        true,
        "STF",
    )
}

/// ST: standard volume tips without filter, full rack.
pub fn st_tip_rack(tree: &mut ResourceTree, name: &str) -> Result<NodeId, LabwareError> {
    tip_rack_96(
        tree,
        name,
        Tip::standard_volume(),
        Coordinate::new(7.2, 5.3, -50.5),
        true,
        "ST",
    )
}

/// A 96-well round-bottom plate with 6.35 mm wells.
pub fn round_bottom_plate_96(
    tree: &mut ResourceTree,
    name: &str,
) -> Result<NodeId, LabwareError> {
    let plate = tree.add(
        ResourceInit::new(name, 127.76, 85.48, 14.1)
            .category("plate")
            .model("round_bottom_96")
            .data(ResourceData::Plate(GRID_96)),
    );
    for col in 0..GRID_96.num_cols {
        for row in 0..GRID_96.num_rows {
            let well = tree.add(
                ResourceInit::new(format!("{name}_well_{row}_{col}"), 6.35, 6.35, 11.0)
                    .category("well")
                    .data(ResourceData::Well(WellState::new(1.0, 350.0))),
            );
            let location = Coordinate::new(
                11.05 + col as f64 * ITEM_PITCH,
                7.68 + (GRID_96.num_rows - 1 - row) as f64 * ITEM_PITCH,
                2.0,
            );
            tree.assign_child(plate, well, Some(location), false)?;
        }
    }
    Ok(plate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{XAnchor, YAnchor, ZAnchor};

    #[test]
    fn stf_geometry_matches_recorded_runs() {
        let mut tree = ResourceTree::new();
        let rack = stf_tip_rack(&mut tree, "tr").unwrap();
        tree.set_location(rack, Some(Coordinate::new(140.9, 98.53, 49.57)))
            .unwrap();

        // Centers of A1 and C1 as seen in recorded firmware traffic.
        let a1 = tree.item(rack, "A1").unwrap();
        let center = tree
            .absolute_location(a1, XAnchor::Center, YAnchor::Center, ZAnchor::Top)
            .unwrap();
        assert!((center.x - 152.6).abs() < 1e-9);
        assert!((center.y - 171.33).abs() < 1e-9);

        let c1 = tree.item(rack, "C1").unwrap();
        let center = tree
            .absolute_location(c1, XAnchor::Center, YAnchor::Center, ZAnchor::Top)
            .unwrap();
        assert!((center.x - 152.6).abs() < 1e-9);
        assert!((center.y - 153.33).abs() < 1e-9);
        assert!((center.z - -0.93).abs() < 1e-9);
    }

    #[test]
    fn plate_well_centers() {
        let mut tree = ResourceTree::new();
        let plate = round_bottom_plate_96(&mut tree, "plate").unwrap();
        tree.set_location(plate, Some(Coordinate::new(1.55, 76.58, 0.0)))
            .unwrap();
        let a1 = tree.item(plate, "A1").unwrap();
        let center = tree
            .absolute_location(a1, XAnchor::Center, YAnchor::Center, ZAnchor::Bottom)
            .unwrap();
        assert!((center.x - 15.775).abs() < 1e-9);
        assert!((center.y - 150.435).abs() < 1e-9);
    }

    #[test]
    fn all_96_spots_have_tips() {
        let mut tree = ResourceTree::new();
        let rack = stf_tip_rack(&mut tree, "tr").unwrap();
        assert_eq!(tree.children(rack).unwrap().len(), 96);
        for &spot in tree.children(rack).unwrap() {
            match tree.data(spot).unwrap() {
                ResourceData::TipSpot(s) => assert!(s.has_tip),
                _ => panic!("expected tip spot"),
            }
        }
    }
}
