//! Error types for tree and deck operations.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LabwareError {
    /// No resource with this name exists in the searched subtree.
    #[error("resource with name '{0}' does not exist")]
    ResourceNotFound(String),

    /// A stale or foreign node id was passed to the tree.
    #[error("node id is no longer valid")]
    StaleNodeId,

    /// The operation needs a location but the resource has none.
    #[error("resource '{0}' has no location")]
    NoLocation(String),

    /// Assignment rejected: name collision, self assignment, existing
    /// parent, occupied site, deck overflow or AABB collision.
    #[error("invalid assignment: {0}")]
    InvalidAssignment(String),

    /// An argument was out of range or otherwise malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Serialized data could not be interpreted.
    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
