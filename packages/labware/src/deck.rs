//! The deck: root of a machine's resource tree.
//!
//! The deck keeps a name to node index so lookups and name-collision
//! checks are O(1). The index is maintained by the deck's own assignment
//! hooks, which fire for every (un)assignment anywhere below the deck,
//! carriers and racks included.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::coordinate::Coordinate;
use crate::errors::LabwareError;
use crate::tree::{NodeId, ResourceData, ResourceInit, ResourceTree};

type NameIndex = Arc<RwLock<HashMap<String, NodeId>>>;

fn read_index(index: &NameIndex) -> std::sync::RwLockReadGuard<'_, HashMap<String, NodeId>> {
    match index.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_index(index: &NameIndex) -> std::sync::RwLockWriteGuard<'_, HashMap<String, NodeId>> {
    match index.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// A liquid handler deck. Owns the resource tree it is the root of.
pub struct Deck {
    tree: ResourceTree,
    root: NodeId,
    index: NameIndex,
}

impl Deck {
    pub const DEFAULT_SIZE_X: f64 = 1360.0;
    pub const DEFAULT_SIZE_Y: f64 = 653.5;
    pub const DEFAULT_SIZE_Z: f64 = 900.0;

    pub fn new(name: impl Into<String>, size_x: f64, size_y: f64, size_z: f64) -> Self {
        let mut tree = ResourceTree::new();
        let root = tree.add(
            ResourceInit::new(name, size_x, size_y, size_z)
                .category("deck")
                .data(ResourceData::Deck),
        );
        // The deck is the origin of machine space.
        tree.set_location(root, Some(Coordinate::zero()))
            .unwrap_or_default();

        let index: NameIndex = Arc::new(RwLock::new(HashMap::new()));

        let check_index = index.clone();
        tree.register_will_assign(
            root,
            Arc::new(move |tree, candidate| {
                let taken = read_index(&check_index);
                for id in std::iter::once(candidate)
                    .chain(tree.descendants(candidate)?)
                {
                    let name = tree.name(id)?;
                    if taken.contains_key(name) {
                        return Err(LabwareError::InvalidAssignment(format!(
                            "resource '{name}' already assigned to deck"
                        )));
                    }
                }
                Ok(())
            }),
        )
        .unwrap_or_default();

        let register_index = index.clone();
        tree.register_did_assign(
            root,
            Arc::new(move |tree, assigned| {
                let mut map = write_index(&register_index);
                for id in std::iter::once(assigned)
                    .chain(tree.descendants(assigned).unwrap_or_default())
                {
                    if let Ok(name) = tree.name(id) {
                        map.insert(name.to_string(), id);
                    }
                }
            }),
        )
        .unwrap_or_default();

        let deregister_index = index.clone();
        tree.register_did_unassign(
            root,
            Arc::new(move |tree, unassigned| {
                let mut map = write_index(&deregister_index);
                for id in std::iter::once(unassigned)
                    .chain(tree.descendants(unassigned).unwrap_or_default())
                {
                    if let Ok(name) = tree.name(id) {
                        map.remove(name);
                    }
                }
            }),
        )
        .unwrap_or_default();

        Self { tree, root, index }
    }

    pub fn tree(&self) -> &ResourceTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut ResourceTree {
        &mut self.tree
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Assign a resource directly to the deck.
    pub fn assign_child(
        &mut self,
        resource: NodeId,
        location: Coordinate,
        reassign: bool,
    ) -> Result<(), LabwareError> {
        self.tree
            .assign_child(self.root, resource, Some(location), reassign)
    }

    /// Unassign a resource from wherever it sits below the deck.
    pub fn unassign(&mut self, resource: NodeId) -> Result<(), LabwareError> {
        self.tree.unassign(resource)
    }

    pub fn has_resource(&self, name: &str) -> bool {
        read_index(&self.index).contains_key(name)
    }

    /// Look up a resource anywhere on the deck by name.
    pub fn get_resource(&self, name: &str) -> Result<NodeId, LabwareError> {
        read_index(&self.index)
            .get(name)
            .copied()
            .ok_or_else(|| LabwareError::ResourceNotFound(name.to_string()))
    }

    /// Every resource on the deck, in no particular order.
    pub fn all_resources(&self) -> Vec<NodeId> {
        read_index(&self.index).values().copied().collect()
    }

    /// Remove everything from the deck.
    pub fn clear(&mut self) -> Result<(), LabwareError> {
        while let Some(&child) = self.tree.children(self.root)?.first() {
            self.tree.unassign_child(self.root, child)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deck() -> Deck {
        Deck::new("deck", 100.0, 100.0, 100.0)
    }

    #[test]
    fn index_follows_assignment() {
        let mut deck = deck();
        let carrier = deck
            .tree_mut()
            .add(ResourceInit::new("carrier", 20.0, 20.0, 20.0));
        let rack = deck
            .tree_mut()
            .add(ResourceInit::new("rack", 10.0, 10.0, 10.0));
        deck.tree_mut()
            .assign_child(carrier, rack, Some(Coordinate::zero()), false)
            .unwrap();

        deck.assign_child(carrier, Coordinate::new(1.0, 1.0, 0.0), false)
            .unwrap();
        // Nested resources are indexed too.
        assert!(deck.has_resource("carrier"));
        assert!(deck.has_resource("rack"));
        assert_eq!(deck.get_resource("rack").unwrap(), rack);

        deck.unassign(carrier).unwrap();
        assert!(!deck.has_resource("carrier"));
        assert!(!deck.has_resource("rack"));
    }

    #[test]
    fn duplicate_names_are_rejected_and_tree_unchanged() {
        let mut deck = deck();
        let first = deck
            .tree_mut()
            .add(ResourceInit::new("tip_rack", 10.0, 10.0, 10.0));
        let second = deck
            .tree_mut()
            .add(ResourceInit::new("tip_rack", 10.0, 10.0, 10.0));
        deck.assign_child(first, Coordinate::zero(), false).unwrap();

        let err = deck
            .assign_child(second, Coordinate::new(50.0, 0.0, 0.0), false)
            .unwrap_err();
        assert!(err.to_string().contains("tip_rack"));
        // The original resource is still the one on the deck.
        assert_eq!(deck.get_resource("tip_rack").unwrap(), first);
        assert_eq!(deck.tree().parent(second).unwrap(), None);
    }

    #[test]
    fn duplicate_name_in_candidate_subtree_is_rejected() {
        let mut deck = deck();
        let a = deck
            .tree_mut()
            .add(ResourceInit::new("a", 10.0, 10.0, 10.0));
        deck.assign_child(a, Coordinate::zero(), false).unwrap();

        let parent = deck
            .tree_mut()
            .add(ResourceInit::new("parent", 20.0, 20.0, 20.0));
        let nested = deck.tree_mut().add(ResourceInit::new("a", 5.0, 5.0, 5.0));
        deck.tree_mut()
            .assign_child(parent, nested, Some(Coordinate::zero()), false)
            .unwrap();
        assert!(deck
            .assign_child(parent, Coordinate::new(40.0, 0.0, 0.0), false)
            .is_err());
        assert!(!deck.has_resource("parent"));
    }

    #[test]
    fn clear_empties_the_deck() {
        let mut deck = deck();
        for (i, x) in [0.0, 30.0, 60.0].iter().enumerate() {
            let r = deck
                .tree_mut()
                .add(ResourceInit::new(format!("r{i}"), 10.0, 10.0, 10.0));
            deck.assign_child(r, Coordinate::new(*x, 0.0, 0.0), false)
                .unwrap();
        }
        deck.clear().unwrap();
        assert!(deck.all_resources().is_empty());
        assert!(deck.tree().children(deck.root()).unwrap().is_empty());
    }
}
