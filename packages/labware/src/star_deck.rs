//! Hamilton STAR and STARlet decks.
//!
//! Rail geometry: rail 1 sits at absolute x = 100 mm and rails are
//! 22.5 mm apart. Placement validates right-edge overflow and rejects
//! overlap with resources already on the deck; resources reaching above
//! the traversal or grip height only get a warning, the machine can still
//! work around them.

use tracing::warn;

use crate::coordinate::Coordinate;
use crate::deck::Deck;
use crate::errors::LabwareError;
use crate::tree::{NodeId, ResourceData, ResourceInit, ResourceTree, XAnchor, YAnchor, ZAnchor};

/// Space between two rails (mm).
pub const RAILS_WIDTH: f64 = 22.5;
/// Absolute x of rail 1 (mm).
pub const RAIL_ONE_X: f64 = 100.0;

/// Channels must stay below this when traversing the deck (mm).
pub const Z_MOVEMENT_LIMIT: f64 = 245.0;
/// Upper bound for gripping resources (mm).
pub const Z_GRAB_LIMIT: f64 = 285.0;

pub const STARLET_NUM_RAILS: u8 = 32;
pub const STARLET_SIZE_X: f64 = 1360.0;
pub const STAR_NUM_RAILS: u8 = 56;
pub const STAR_SIZE_X: f64 = 1900.0;
pub const STAR_SIZE_Y: f64 = 653.5;
pub const STAR_SIZE_Z: f64 = 900.0;

/// Placement flags for [`StarDeck::assign_at_rails`] and
/// [`StarDeck::assign_at_location`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PlacementOptions {
    /// Replace a resource already assigned under the same name.
    pub replace: bool,
    /// Skip overflow and overlap checks.
    pub ignore_collision: bool,
}

/// A STAR(let) deck: rail-indexed placement over a [`Deck`].
pub struct StarDeck {
    deck: Deck,
    num_rails: u8,
    trash: NodeId,
    trash96: Option<NodeId>,
}

impl StarDeck {
    /// STARlet: 32 rails, 1360 mm wide.
    pub fn starlet(name: impl Into<String>) -> Self {
        Self::new(name, STARLET_NUM_RAILS, STARLET_SIZE_X, true)
    }

    /// STAR: 56 rails, 1900 mm wide.
    pub fn star(name: impl Into<String>) -> Self {
        Self::new(name, STAR_NUM_RAILS, STAR_SIZE_X, true)
    }

    fn new(name: impl Into<String>, num_rails: u8, size_x: f64, with_trash96: bool) -> Self {
        let mut deck = Deck::new(name, size_x, STAR_SIZE_Y, STAR_SIZE_Z);
        let root = deck.root();

        // Warn about resources that end up dangerously high. Convenience
        // only, so failures to compute a height are ignored.
        deck.tree_mut()
            .register_did_assign(
                root,
                std::sync::Arc::new(|tree, assigned| {
                    for id in std::iter::once(assigned)
                        .chain(tree.descendants(assigned).unwrap_or_default())
                    {
                        let Ok(top) =
                            tree.absolute_location(id, XAnchor::Left, YAnchor::Front, ZAnchor::Top)
                        else {
                            continue;
                        };
                        let Ok(name) = tree.name(id) else { continue };
                        if top.z > Z_GRAB_LIMIT {
                            warn!(
                                "resource '{name}' is very high on the deck ({:.1} mm), \
                                 grabbing it may not be possible",
                                top.z
                            );
                        } else if top.z > Z_MOVEMENT_LIMIT {
                            warn!(
                                "resource '{name}' is very high on the deck ({:.1} mm), \
                                 be careful when traversing",
                                top.z
                            );
                        }
                    }
                }),
            )
            .unwrap_or_default();

        // Trash for channel tips, at the fixed factory location.
        let trash = deck.tree_mut().add(
            ResourceInit::new("trash", 0.0, 241.2, 0.0)
                .category("trash")
                .data(ResourceData::Trash),
        );
        let trash_x = size_x - 560.0;
        deck.assign_child(trash, Coordinate::new(trash_x, 190.6, 137.1), false)
            .unwrap_or_default();

        // Trash for the 96 head, left of the deck.
        let trash96 = with_trash96.then(|| {
            let t = deck.tree_mut().add(
                ResourceInit::new("trash_core96", 122.4, 82.6, 0.0)
                    .category("trash")
                    .data(ResourceData::Trash),
            );
            deck.assign_child(t, Coordinate::new(-58.2, 106.0, 229.0), false)
                .unwrap_or_default();
            t
        });

        Self {
            deck,
            num_rails,
            trash,
            trash96,
        }
    }

    pub fn num_rails(&self) -> u8 {
        self.num_rails
    }

    pub fn deck(&self) -> &Deck {
        &self.deck
    }

    pub fn deck_mut(&mut self) -> &mut Deck {
        &mut self.deck
    }

    pub fn tree(&self) -> &ResourceTree {
        self.deck.tree()
    }

    pub fn tree_mut(&mut self) -> &mut ResourceTree {
        self.deck.tree_mut()
    }

    pub fn root(&self) -> NodeId {
        self.deck.root()
    }

    pub fn get_resource(&self, name: &str) -> Result<NodeId, LabwareError> {
        self.deck.get_resource(name)
    }

    pub fn has_resource(&self, name: &str) -> bool {
        self.deck.has_resource(name)
    }

    /// Absolute location of a rail.
    pub fn rails_to_location(&self, rails: i32) -> Coordinate {
        Coordinate::new(RAIL_ONE_X + (rails - 1) as f64 * RAILS_WIDTH, 63.0, 100.0)
    }

    /// Rail a given absolute x coordinate falls on.
    pub fn rails_for_x(&self, x: f64) -> i32 {
        ((x - RAIL_ONE_X) / RAILS_WIDTH) as i32 + 1
    }

    /// Assign a resource with its left edge on the given rail.
    pub fn assign_at_rails(
        &mut self,
        resource: NodeId,
        rails: i32,
        options: PlacementOptions,
    ) -> Result<(), LabwareError> {
        if !(0..=self.num_rails as i32).contains(&rails) {
            return Err(LabwareError::InvalidArgument(format!(
                "rails must be between 0 and {}",
                self.num_rails
            )));
        }
        let location = self.rails_to_location(rails);
        self.place(resource, location, true, options)
    }

    /// Assign a resource at an explicit deck location.
    pub fn assign_at_location(
        &mut self,
        resource: NodeId,
        location: Coordinate,
        options: PlacementOptions,
    ) -> Result<(), LabwareError> {
        self.place(resource, location, false, options)
    }

    fn place(
        &mut self,
        resource: NodeId,
        location: Coordinate,
        on_rails: bool,
        options: PlacementOptions,
    ) -> Result<(), LabwareError> {
        let name = self.tree().name(resource)?.to_string();
        if self.has_resource(&name) {
            if options.replace {
                let existing = self.get_resource(&name)?;
                self.deck.unassign(existing)?;
            } else {
                return Err(LabwareError::InvalidAssignment(format!(
                    "resource with name '{name}' already defined"
                )));
            }
        }

        if !options.ignore_collision {
            let size_x = self.tree().absolute_size_x(resource)?;
            let size_y = self.tree().absolute_size_y(resource)?;

            // Past the right edge of the last rail?
            if on_rails
                && location.x + size_x > self.rails_to_location(self.num_rails as i32 + 1).x
            {
                return Err(LabwareError::InvalidAssignment(format!(
                    "resource '{name}' with width {size_x} does not fit at x {}",
                    location.x
                )));
            }

            // No overlap with anything already on the deck.
            for &other in self.tree().children(self.root())? {
                let Some(other_location) = self.tree().location(other)? else {
                    continue;
                };
                let other_size_x = self.tree().absolute_size_x(other)?;
                let other_size_y = self.tree().absolute_size_y(other)?;
                let overlap_x = location.x < other_location.x + other_size_x
                    && other_location.x < location.x + size_x;
                let overlap_y = location.y < other_location.y + other_size_y
                    && other_location.y < location.y + size_y;
                if overlap_x && overlap_y {
                    return Err(LabwareError::InvalidAssignment(format!(
                        "location {location} is already occupied by resource '{}'",
                        self.tree().name(other)?
                    )));
                }
            }
        }

        self.deck.assign_child(resource, location, false)
    }

    /// The channel-tip trash area.
    pub fn get_trash_area(&self) -> NodeId {
        self.trash
    }

    /// The 96-head trash area, when the deck was built with one.
    pub fn get_trash_area96(&self) -> Result<NodeId, LabwareError> {
        self.trash96
            .ok_or_else(|| LabwareError::ResourceNotFound("trash_core96".to_string()))
    }

    /// Human-readable deck layout, one line per resource, rail numbers for
    /// resources sitting directly on the deck.
    pub fn summary(&self) -> Result<String, LabwareError> {
        let mut out = String::new();
        out.push_str(&format!(
            "{:<6}{:<32}{:<16}{}\n",
            "Rail", "Resource", "Type", "Location (mm)"
        ));
        out.push_str(&"=".repeat(80));
        out.push('\n');

        let mut top_level: Vec<NodeId> = self.tree().children(self.root())?.to_vec();
        top_level.sort_by(|&a, &b| {
            let ax = self
                .tree()
                .location(a)
                .ok()
                .flatten()
                .map(|c| c.x)
                .unwrap_or(f64::MAX);
            let bx = self
                .tree()
                .location(b)
                .ok()
                .flatten()
                .map(|c| c.x)
                .unwrap_or(f64::MAX);
            ax.total_cmp(&bx)
        });

        for id in top_level {
            self.summary_line(&mut out, id, 0)?;
        }
        Ok(out)
    }

    fn summary_line(
        &self,
        out: &mut String,
        id: NodeId,
        depth: usize,
    ) -> Result<(), LabwareError> {
        // Wells and tip spots would flood the output.
        if matches!(
            self.tree().category(id)?,
            Some("well") | Some("tip_spot") | Some("resource_holder")
        ) {
            return Ok(());
        }
        let rail = if depth == 0 {
            match self.tree().location(id)? {
                Some(c) => format!("({})", self.rails_for_x(c.x)),
                None => String::new(),
            }
        } else {
            String::new()
        };
        let indent = "    ".repeat(depth);
        let location = match self.tree().absolute_origin(id) {
            Ok(c) => c.to_string(),
            Err(_) => "undefined".to_string(),
        };
        out.push_str(&format!(
            "{:<6}{:<32}{:<16}{}\n",
            rail,
            format!("{indent}{}", self.tree().name(id)?),
            self.tree().data(id)?.type_name(),
            location
        ));
        for &child in self.tree().children(id)? {
            self.summary_line(out, child, depth + 1)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::ResourceInit;

    #[test]
    fn rails_map_to_absolute_x() {
        let deck = StarDeck::starlet("deck");
        assert_eq!(deck.rails_to_location(1), Coordinate::new(100.0, 63.0, 100.0));
        assert_eq!(
            deck.rails_to_location(7),
            Coordinate::new(235.0, 63.0, 100.0)
        );
        assert_eq!(deck.rails_for_x(235.0), 7);
    }

    #[test]
    fn overflow_past_last_rail_is_rejected() {
        let mut deck = StarDeck::starlet("deck");
        let wide = deck
            .tree_mut()
            .add(ResourceInit::new("wide", 200.0, 100.0, 10.0));
        let err = deck
            .assign_at_rails(wide, 32, PlacementOptions::default())
            .unwrap_err();
        assert!(err.to_string().contains("does not fit"));
        assert!(!deck.has_resource("wide"));
    }

    #[test]
    fn overlapping_placement_is_rejected() {
        let mut deck = StarDeck::starlet("deck");
        let a = deck
            .tree_mut()
            .add(ResourceInit::new("a", 100.0, 200.0, 10.0));
        let b = deck
            .tree_mut()
            .add(ResourceInit::new("b", 100.0, 200.0, 10.0));
        deck.assign_at_rails(a, 1, PlacementOptions::default())
            .unwrap();
        // Rail 3 is 45 mm right of rail 1, well inside a's 100 mm width.
        assert!(deck
            .assign_at_rails(b, 3, PlacementOptions::default())
            .is_err());
        // Rail 7 is 135 mm to the right, clear of a.
        deck.assign_at_rails(b, 7, PlacementOptions::default())
            .unwrap();
    }

    #[test]
    fn adjacent_resources_do_not_collide() {
        let mut deck = StarDeck::starlet("deck");
        let a = deck
            .tree_mut()
            .add(ResourceInit::new("a", 22.5, 200.0, 10.0));
        let b = deck
            .tree_mut()
            .add(ResourceInit::new("b", 22.5, 200.0, 10.0));
        deck.assign_at_rails(a, 1, PlacementOptions::default())
            .unwrap();
        deck.assign_at_rails(b, 2, PlacementOptions::default())
            .unwrap();
    }

    #[test]
    fn replace_swaps_out_the_old_resource() {
        let mut deck = StarDeck::starlet("deck");
        let a = deck
            .tree_mut()
            .add(ResourceInit::new("rack", 50.0, 100.0, 10.0));
        deck.assign_at_rails(a, 1, PlacementOptions::default())
            .unwrap();
        let b = deck
            .tree_mut()
            .add(ResourceInit::new("rack", 50.0, 100.0, 10.0));
        assert!(deck
            .assign_at_rails(b, 10, PlacementOptions::default())
            .is_err());
        deck.assign_at_rails(
            b,
            10,
            PlacementOptions {
                replace: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(deck.get_resource("rack").unwrap(), b);
    }

    #[test]
    fn trash_areas_exist() {
        let deck = StarDeck::starlet("deck");
        let trash = deck.get_trash_area();
        assert_eq!(deck.tree().name(trash).unwrap(), "trash");
        assert!(deck.get_trash_area96().is_ok());
        // STARlet trash x is 1360 - 560.
        let origin = deck.tree().absolute_origin(trash).unwrap();
        assert_eq!(origin.x, 800.0);
    }
}
