//! # labware
//!
//! Shared resource model for the pipetting backends: millimeter geometry,
//! a slot-arena resource tree with assignment hooks, deck placement with
//! collision checks, and the tip/well state the orchestrators track.
//!
//! Everything a backend touches is grounded here: an operation targets a
//! node in the tree, the tree produces absolute coordinates, and the
//! backend turns those into firmware parameters.

pub mod carrier;
pub mod catalog;
pub mod coordinate;
pub mod deck;
pub mod errors;
pub mod liquid;
pub mod rotation;
pub mod serialize;
pub mod star_deck;
pub mod tip;
pub mod tree;
pub mod well;

pub use coordinate::Coordinate;
pub use deck::Deck;
pub use errors::LabwareError;
pub use liquid::Liquid;
pub use rotation::Rotation;
pub use star_deck::{PlacementOptions, StarDeck};
pub use tip::{Tip, TipDropMethod, TipPickupMethod, TipSize, TipSpotState};
pub use tree::{
    GridData, NodeId, ResourceData, ResourceInit, ResourceTree, StackDirection, XAnchor, YAnchor,
    ZAnchor,
};
pub use well::WellState;
