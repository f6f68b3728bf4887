//! # Autoinstance Instancer
//!
//! The scene-mutating half of autoinstance. [`AutoInstancer`] drives a
//! [`SceneGraph`](autoinstance_core::SceneGraph): it separates combined meshes,
//! reassembles the shells, canonicalizes placements, and replaces identical
//! copies with instances of one prototype. [`MemoryScene`] is an in-process
//! scene graph for tests and headless use.

pub mod config;
pub mod memory;
pub mod snapshot;
pub mod separator;
pub mod reassembly;
pub mod instancer;

pub use config::*;
pub use memory::*;
pub use snapshot::*;
pub use separator::*;
pub use reassembly::*;
pub use instancer::*;
