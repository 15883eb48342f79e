//! Static per-resource metadata and write-time validation.
//!
//! # Responsibility
//! - Describe fields, primary keys, default scoping and projections.
//! - Check and coerce caller input against declared field types.
//!
//! # Invariants
//! - Descriptors are built once and never mutated.

mod descriptor;
pub mod validate;

pub use descriptor::{BeforeCreate, DescriptorBuilder, FieldDef, FieldType, ResourceDescriptor};
