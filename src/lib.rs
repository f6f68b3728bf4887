//! # Autoinstance
//!
//! Duplicate mesh detection and automatic instancing for 3D scenes.
//!
//! This is the umbrella crate that provides convenient access to all autoinstance
//! functionality. You can use this crate to get everything in one place, or use
//! individual crates for more granular control over dependencies.
//!
//! ## Features
//!
//! - **Core**: Data model (transforms, mesh fragments, node snapshots) and the `SceneGraph` trait
//! - **Algorithms**: Signatures, geometry matching, grouping, assembly clustering, instancing strategy
//! - **Instancer**: The orchestrator and an in-memory scene graph
//!
//! ## Quick Start
//!
//! ```rust
//! use autoinstance::prelude::*;
//!
//! let mut scene = MemoryScene::new();
//! let cube = MeshData::cuboid(1.0, 1.0, 1.0);
//! scene.add_mesh("a", cube.clone(), Transform3D::identity(), None).unwrap();
//! scene
//!     .add_mesh("b", cube, Transform3D::translation(Vector3d::new(10.0, 0.0, 0.0)), None)
//!     .unwrap();
//!
//! let report = AutoInstancer::default().run(&mut scene, None);
//! assert_eq!(report.instances_created, 1);
//! assert_eq!(scene.geometry_count(), 1);
//! ```
//!
//! ## Feature Flags
//!
//! - `default`: Enables algorithms and instancer
//! - `algorithms`: Pure geometry algorithms
//! - `instancer`: Scene orchestration (implies `algorithms`)
//! - `all`: Enables all features

// Re-export core functionality
pub use autoinstance_core::*;

// Re-export sub-crates
#[cfg(feature = "algorithms")]
pub use autoinstance_algorithms as algorithms;

#[cfg(feature = "instancer")]
pub use autoinstance_instancer as instancer;

/// Convenient imports for common use cases
pub mod prelude {
    pub use autoinstance_core::*;

    #[cfg(feature = "algorithms")]
    pub use autoinstance_algorithms::*;

    #[cfg(feature = "instancer")]
    pub use autoinstance_instancer::*;
}
