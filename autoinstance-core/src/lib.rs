//! Core data structures and traits for autoinstance
//!
//! This crate provides the fundamental types shared by the matching engine and
//! the scene orchestrator: mesh fragment snapshots, hierarchy snapshots,
//! affine transforms, and the scene graph provider trait.

pub mod point;
pub mod mesh;
pub mod node;
pub mod traits;
pub mod transform;
pub mod error;

pub use point::*;
pub use mesh::*;
pub use node::*;
pub use traits::*;
pub use transform::*;
pub use error::*;

/// Re-export commonly used types from nalgebra
pub use nalgebra::{Point3, Vector3, Matrix3, Matrix4, Isometry3, UnitQuaternion};
