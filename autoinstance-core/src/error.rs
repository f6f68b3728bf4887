//! Error types for autoinstance

use crate::node::NodeId;
use thiserror::Error;

/// Main error type for autoinstance operations
///
/// Geometric non-matches are never reported through this type; they are plain
/// `None` results. Errors are reserved for invalid arguments and for scene
/// graph operations the host rejected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Stale node reference: {0}")]
    StaleNode(NodeId),

    #[error("Node {0} has no mesh")]
    NotAMesh(NodeId),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Algorithm error: {0}")]
    Algorithm(String),

    #[error("Scene graph error: {0}")]
    Scene(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

/// Result type alias for autoinstance operations
pub type Result<T> = std::result::Result<T, Error>;
