//! Carriers and their sites.
//!
//! A carrier is a rail-mounted frame with a fixed, ordered set of sites.
//! Each site is a holder node; plates sit on a pedestal inside the holder,
//! so the held resource's z is the holder origin plus the pedestal height.

use crate::coordinate::Coordinate;
use crate::errors::LabwareError;
use crate::tree::{NodeId, ResourceData, ResourceInit, ResourceTree};

/// One site of a carrier under construction.
#[derive(Debug, Clone)]
pub struct SiteInit {
    /// Site origin in the carrier frame.
    pub location: Coordinate,
    pub size_x: f64,
    pub size_y: f64,
    /// Height of the pedestal the held resource rests on.
    pub pedestal_size_z: f64,
}

/// Build a carrier with holder children at the given sites. Sites are
/// named `<carrier>_site_<i>` and keep their construction order.
pub fn build_carrier(
    tree: &mut ResourceTree,
    init: ResourceInit,
    sites: Vec<SiteInit>,
) -> Result<NodeId, LabwareError> {
    let name = init.name.clone();
    let carrier = tree.add(init.category("carrier").data(ResourceData::Carrier));
    for (i, site) in sites.into_iter().enumerate() {
        let holder = tree.add(
            ResourceInit::new(
                format!("{name}_site_{i}"),
                site.size_x,
                site.size_y,
                site.pedestal_size_z,
            )
            .category("resource_holder")
            .data(ResourceData::Holder {
                pedestal_size_z: site.pedestal_size_z,
            }),
        );
        tree.assign_child(carrier, holder, Some(site.location), false)?;
    }
    Ok(carrier)
}

/// Number of sites on a carrier.
pub fn site_count(tree: &ResourceTree, carrier: NodeId) -> Result<usize, LabwareError> {
    Ok(site_ids(tree, carrier)?.len())
}

fn site_ids(tree: &ResourceTree, carrier: NodeId) -> Result<Vec<NodeId>, LabwareError> {
    Ok(tree
        .children(carrier)?
        .iter()
        .copied()
        .filter(|&c| matches!(tree.data(c), Ok(ResourceData::Holder { .. })))
        .collect())
}

/// The holder node for a site index.
pub fn site(tree: &ResourceTree, carrier: NodeId, index: usize) -> Result<NodeId, LabwareError> {
    site_ids(tree, carrier)?
        .get(index)
        .copied()
        .ok_or_else(|| LabwareError::InvalidArgument(format!("carrier has no site {index}")))
}

/// The resource held at a site, if any.
pub fn site_occupant(
    tree: &ResourceTree,
    carrier: NodeId,
    index: usize,
) -> Result<Option<NodeId>, LabwareError> {
    let holder = site(tree, carrier, index)?;
    Ok(tree.children(holder)?.first().copied())
}

/// Put a resource on a carrier site. Occupied sites are refused unless
/// `replace` is set, in which case the occupant is unassigned first.
pub fn assign_to_site(
    tree: &mut ResourceTree,
    carrier: NodeId,
    index: usize,
    resource: NodeId,
    replace: bool,
) -> Result<(), LabwareError> {
    let holder = site(tree, carrier, index)?;
    if let Some(occupant) = tree.children(holder)?.first().copied() {
        if !replace {
            return Err(LabwareError::InvalidAssignment(format!(
                "site {index} of '{}' is already occupied by '{}'",
                tree.name(carrier)?,
                tree.name(occupant)?
            )));
        }
        tree.unassign_child(holder, occupant)?;
    }
    // Holders place children themselves: rotation compensation plus the
    // pedestal height.
    tree.assign_child(holder, resource, None, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rotation::Rotation;
    use crate::tree::{XAnchor, YAnchor, ZAnchor};

    fn carrier_with_sites(tree: &mut ResourceTree) -> NodeId {
        build_carrier(
            tree,
            ResourceInit::new("carrier", 135.0, 497.0, 130.0),
            vec![
                SiteInit {
                    location: Coordinate::new(10.0, 20.0, 30.0),
                    size_x: 127.0,
                    size_y: 86.0,
                    pedestal_size_z: 2.5,
                },
                SiteInit {
                    location: Coordinate::new(10.0, 120.0, 30.0),
                    size_x: 127.0,
                    size_y: 86.0,
                    pedestal_size_z: 2.5,
                },
            ],
        )
        .unwrap()
    }

    #[test]
    fn sites_are_ordered_holders() {
        let mut tree = ResourceTree::new();
        let carrier = carrier_with_sites(&mut tree);
        assert_eq!(site_count(&tree, carrier).unwrap(), 2);
        let first = site(&tree, carrier, 0).unwrap();
        assert_eq!(tree.name(first).unwrap(), "carrier_site_0");
        assert_eq!(
            tree.location(first).unwrap(),
            Some(Coordinate::new(10.0, 20.0, 30.0))
        );
    }

    #[test]
    fn occupied_site_needs_replace() {
        let mut tree = ResourceTree::new();
        let carrier = carrier_with_sites(&mut tree);
        let plate_a = tree.add(ResourceInit::new("plate_a", 127.0, 86.0, 14.0));
        let plate_b = tree.add(ResourceInit::new("plate_b", 127.0, 86.0, 14.0));

        assign_to_site(&mut tree, carrier, 0, plate_a, false).unwrap();
        assert!(assign_to_site(&mut tree, carrier, 0, plate_b, false).is_err());
        assign_to_site(&mut tree, carrier, 0, plate_b, true).unwrap();
        assert_eq!(site_occupant(&tree, carrier, 0).unwrap(), Some(plate_b));
        assert_eq!(tree.parent(plate_a).unwrap(), None);
    }

    #[test]
    fn pedestal_raises_the_plate() {
        let mut tree = ResourceTree::new();
        let carrier = carrier_with_sites(&mut tree);
        tree.set_location(carrier, Some(Coordinate::zero())).unwrap();
        let plate = tree.add(ResourceInit::new("plate", 127.0, 86.0, 14.0));
        assign_to_site(&mut tree, carrier, 0, plate, false).unwrap();
        let origin = tree.absolute_origin(plate).unwrap();
        assert_eq!(origin.z, 32.5); // site z 30 + pedestal 2.5
    }

    #[test]
    fn rotated_plate_keeps_positive_footprint() {
        let mut tree = ResourceTree::new();
        let carrier = carrier_with_sites(&mut tree);
        tree.set_location(carrier, Some(Coordinate::zero())).unwrap();
        let plate = tree.add(
            ResourceInit::new("plate", 127.0, 86.0, 14.0)
                .rotation(Rotation::new(0.0, 0.0, 90.0)),
        );
        assign_to_site(&mut tree, carrier, 0, plate, false).unwrap();
        // Origin compensated by the rotated footprint, so the front left
        // of the rotated plate is back at the site origin.
        let abs = tree
            .absolute_location(plate, XAnchor::Left, YAnchor::Front, ZAnchor::Bottom)
            .unwrap();
        assert_eq!(
            tree.location(plate).unwrap(),
            Some(Coordinate::new(86.0, 0.0, 2.5))
        );
        assert!((abs.x - 96.0).abs() < 1e-9);
    }
}
