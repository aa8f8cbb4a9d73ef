//! Entity model shared by every data-access component.
//!
//! # Responsibility
//! - Define the `Entity` contract that replaces runtime reflection.
//! - Define the `FieldValue` scalar moved between entities and the store.
//!
//! # Invariants
//! - Entity shapes are fixed at build time; descriptors are `'static`.

pub mod entity;
pub mod value;
