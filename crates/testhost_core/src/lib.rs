//! Provide the shared, pure data model for the testhost adapter.
//!
//! This crate is intentionally small and dependency-light. It contains the types that both:
//! - the discovery engine uses to reason about reflected assemblies, and
//! - the isolation boundary uses to ship discovery results between processes.
//!
//! ## Notes
//!
//! - This is a "model core" crate: **no IO**, no global state, and no transport-specific types.
//! - Everything that crosses a process boundary here is plain `serde` data. Nothing in this crate holds a live
//!   handle into a loaded assembly.
//! - Current scope: the recognized attribute vocabulary (`lang`), the reflected metadata model (`metadata`), and the
//!   discoverable test element model (`element`).

pub mod element;
pub mod lang;
pub mod metadata;

pub use element::{
    DataType, DeploymentItem, DiscoveryResult, FixtureKind, RowPayload, TestMethod, TestTrait, UnitTestElement,
};
pub use metadata::{
    AssemblyMetadata, AttributeData, DataMember, DataRowEntry, DataValue, MethodMetadata, ParameterMetadata,
    PropertyMetadata, ReturnKind, SerializationError, TestDataRow, TypeKind, TypeMetadata, Visibility,
};

/// Simple name of the testing framework assembly a test assembly must reference to be considered for discovery.
pub const FRAMEWORK_ASSEMBLY_NAME: &str = "TestFramework";
