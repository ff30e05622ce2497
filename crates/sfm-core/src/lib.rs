//! Core parameter-block infrastructure and scene entities for `sfm-rs`.
//!
//! This crate contains:
//! - linear algebra type aliases and generic rotation helpers (`math`),
//! - explicit, validated layout descriptors for flat parameter blocks (`layout`),
//! - the flat parameter block with its symbolic offset table (`block`),
//! - the scene entities consumed by projection models (`entities`).
//!
//! A camera or image is stored as one contiguous `Vec<f64>` so an optimizer can
//! hand it to a residual function as a plain numeric array. Symbolic fields are
//! addressed through an offset table that projection models establish and
//! repair with their own [`BlockLayout`].

/// Flat parameter block with symbolic offsets.
pub mod block;
/// Camera, image, point and observation entities.
pub mod entities;
/// Layout descriptors and layout errors.
pub mod layout;
/// Linear algebra type aliases and generic rotation helpers.
pub mod math;

pub use block::*;
pub use entities::*;
pub use layout::*;
pub use math::*;
