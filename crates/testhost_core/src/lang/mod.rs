//! Testing-framework vocabulary registries.
//!
//! This module is the "front door" for framework-level vocabulary: marker attributes, data-source capability
//! interfaces, and well-known trait keys.
//!
//! The design goal is to avoid stringly-typed checks scattered across the discovery engine. Instead, callers work
//! with **stable IDs** (e.g. `AttributeId`) and look up spellings/metadata via registry tables.
//!
//! ## Notes
//! - Registries are intentionally **pure**: no metadata types, no IO, no side effects.
//!
//! ## Examples
//! ```rust
//! use testhost_core::lang::attributes::{self, AttributeId};
//!
//! assert_eq!(attributes::from_type_name("TestFramework.TestClassAttribute"), Some(AttributeId::TestClass));
//! assert_eq!(attributes::as_str(AttributeId::TestClass), "TestClassAttribute");
//! ```

pub mod attributes;
pub mod interfaces;
pub mod registry;
pub mod traits;
