//! Shareable metadata for `testhost_core::lang` registries.
//!
//! Each registry in `testhost_core::lang` is a `const` table of entries. This submodule provides the small,
//! dependency-free metadata shape reused by all of them.
//!
//! ## Notes
//! - These types are `Copy` so registries can live in `const` tables.
//! - Metadata is meant for resolution and diagnostics; enforcement of discovery rules lives in the discovery engine.

/// Where an attribute may legally appear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeTarget {
    Assembly,
    Class,
    Method,
    /// Accepted on both classes and methods.
    ClassOrMethod,
}

/// Shared metadata shape for "registry-first" vocabulary items.
///
/// - stable identity (`id`)
/// - accepted spellings (`canonical` + `aliases`)
/// - documentation (`description`)
///
/// ## Notes
/// - Spellings are simple type names without namespace; callers strip namespaces before lookup.
#[derive(Debug, Clone, Copy)]
pub struct LangItemInfo<Id> {
    pub id: Id,
    pub canonical: &'static str,
    pub aliases: &'static [&'static str],
    pub description: &'static str,
    pub target: AttributeTarget,
}

/// Strip a namespace (and generic arity suffix) from a reflected type name.
///
/// ## Examples
/// ```rust
/// use testhost_core::lang::registry::simple_name;
///
/// assert_eq!(simple_name("TestFramework.DataRowAttribute"), "DataRowAttribute");
/// assert_eq!(simple_name("My.Generic`1"), "Generic");
/// assert_eq!(simple_name("Plain"), "Plain");
/// ```
pub fn simple_name(type_name: &str) -> &str {
    let last = type_name.rsplit(['.', '+']).next().unwrap_or(type_name);
    match last.find('`') {
        Some(idx) => &last[..idx],
        None => last,
    }
}
