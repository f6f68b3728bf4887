//! # Autoinstance Algorithms
//!
//! Pure geometry for duplicate detection and assembly reconstruction.
//!
//! This crate provides shape signatures, tolerance-aware mesh comparison
//! (rigid, and optionally non-uniformly scaled), grouping of identical meshes,
//! clustering of loose shells into assemblies, and the instancing decision
//! table. Nothing here touches a scene graph.

pub mod nearest_neighbor;
pub mod pca;
pub mod registration;
pub mod signature;
pub mod matcher;
pub mod grouping;
pub mod clustering;
pub mod strategy;

// Re-export commonly used items
pub use nearest_neighbor::*;
pub use pca::*;
pub use registration::*;
pub use signature::*;
pub use matcher::*;
pub use grouping::*;
pub use clustering::*;
pub use strategy::*;
