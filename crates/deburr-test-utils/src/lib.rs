//! Shared test fixtures and utilities for deburr crates.
//!
//! Provides small URDF arms with known geometry, ready-built designers for
//! them, and a controller configuration that can be written to a scratch
//! directory.

pub mod config;
pub mod robots;

// ---------------------------------------------------------------------------
// Re-exports for convenience
// ---------------------------------------------------------------------------

pub use config::{CONTROLLER_TOML, write_controller_fixture};
pub use robots::{
    ARM6_JOINTS, ARM6_URDF, PLANAR_ARM_URDF, PLANAR_JOINTS, arm_designer,
    massless_wrist_designer, planar_designer, reaching_target,
};
