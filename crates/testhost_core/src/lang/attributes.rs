//! Marker attribute vocabulary registry.
//!
//! This module centralizes recognized framework attribute spellings so the discovery engine doesn't need
//! stringly-typed comparisons. User-defined attributes that derive from a framework attribute are resolved by
//! walking their base-type chain against this table (see [`resolve`]).

use crate::lang::registry::{AttributeTarget, LangItemInfo, simple_name};

/// Stable identifier for recognized framework attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeId {
    TestClass,
    TestMethod,
    Ignore,
    TestCategory,
    TestProperty,
    Owner,
    Priority,
    Description,
    WorkItem,
    DoNotParallelize,
    Timeout,
    DataRow,
    DynamicData,
    AssemblyInitialize,
    AssemblyCleanup,
    ClassInitialize,
    ClassCleanup,
    TestInitialize,
    TestCleanup,
    DeploymentItem,
    DiscoverInternals,
    TestDataSourceDiscovery,
    TestDataSourceOptions,
    AsyncStateMachine,
}

/// Named argument for `TestMethod(DisplayName = ...)` and `DataRow(DisplayName = ...)`.
pub const DISPLAY_NAME_ARG: &str = "DisplayName";

/// Named argument carrying an ignore message on data rows and data sources.
pub const IGNORE_MESSAGE_ARG: &str = "IgnoreMessage";

/// Named argument for per-row categories on `DataRow`.
pub const TEST_CATEGORIES_ARG: &str = "TestCategories";

/// Named argument for the per-source unfolding strategy.
pub const UNFOLDING_STRATEGY_ARG: &str = "UnfoldingStrategy";

/// Named argument for `ClassInitialize(InheritanceBehavior = ...)`.
pub const INHERITANCE_BEHAVIOR_ARG: &str = "InheritanceBehavior";

/// `InheritanceBehavior` value that makes a base-class initializer run for every derived class.
pub const INHERITANCE_BEFORE_EACH_DERIVED_CLASS: &str = "BeforeEachDerivedClass";

/// Named argument for `DynamicData(DynamicDataSourceType = ...)` naming the type that declares the data member.
pub const DYNAMIC_DATA_DECLARING_TYPE_ARG: &str = "DynamicDataDeclaringType";

/// Named argument for `DynamicData(DynamicDataDisplayName = ...)`.
pub const DYNAMIC_DATA_DISPLAY_NAME_ARG: &str = "DynamicDataDisplayName";

/// Named argument holding a display-name format on custom data source attributes.
pub const DISPLAY_NAME_FORMAT_ARG: &str = "DisplayNameFormat";

/// Named argument recording a failure raised while a custom source produced its rows.
pub const DATA_ERROR_ARG: &str = "DataError";

/// Legacy discovery option value that folds data rows at discovery time.
pub const DISCOVERY_OPTION_DURING_EXECUTION: &str = "DuringExecution";

/// Metadata entry for an attribute.
pub type AttributeInfo = LangItemInfo<AttributeId>;

/// Registry of recognized attributes.
pub const ATTRIBUTES: &[AttributeInfo] = &[
    info(
        AttributeId::TestClass,
        "TestClassAttribute",
        &["TestClass"],
        "Marks a type as a test container.",
        AttributeTarget::Class,
    ),
    info(
        AttributeId::TestMethod,
        "TestMethodAttribute",
        &["TestMethod", "DataTestMethodAttribute", "DataTestMethod"],
        "Marks a method as a test.",
        AttributeTarget::Method,
    ),
    info(
        AttributeId::Ignore,
        "IgnoreAttribute",
        &["Ignore"],
        "Skips a test or every test of a class.",
        AttributeTarget::ClassOrMethod,
    ),
    info(
        AttributeId::TestCategory,
        "TestCategoryAttribute",
        &["TestCategory"],
        "Adds categories to a test, class or assembly.",
        AttributeTarget::ClassOrMethod,
    ),
    info(
        AttributeId::TestProperty,
        "TestPropertyAttribute",
        &["TestProperty"],
        "Attaches a key/value trait to a test.",
        AttributeTarget::Method,
    ),
    info(
        AttributeId::Owner,
        "OwnerAttribute",
        &["Owner"],
        "Names the owner of a test.",
        AttributeTarget::Method,
    ),
    info(
        AttributeId::Priority,
        "PriorityAttribute",
        &["Priority"],
        "Assigns an integer priority to a test.",
        AttributeTarget::Method,
    ),
    info(
        AttributeId::Description,
        "DescriptionAttribute",
        &["Description"],
        "Describes a test.",
        AttributeTarget::Method,
    ),
    info(
        AttributeId::WorkItem,
        "WorkItemAttribute",
        &["WorkItem"],
        "Links a test to a work item id.",
        AttributeTarget::Method,
    ),
    info(
        AttributeId::DoNotParallelize,
        "DoNotParallelizeAttribute",
        &["DoNotParallelize"],
        "Opts a test, class or assembly out of parallel execution.",
        AttributeTarget::ClassOrMethod,
    ),
    info(
        AttributeId::Timeout,
        "TimeoutAttribute",
        &["Timeout"],
        "Limits the execution time of a test.",
        AttributeTarget::Method,
    ),
    info(
        AttributeId::DataRow,
        "DataRowAttribute",
        &["DataRow"],
        "Supplies one inline row of arguments.",
        AttributeTarget::Method,
    ),
    info(
        AttributeId::DynamicData,
        "DynamicDataAttribute",
        &["DynamicData"],
        "Supplies rows from a static data member.",
        AttributeTarget::Method,
    ),
    info(
        AttributeId::AssemblyInitialize,
        "AssemblyInitializeAttribute",
        &["AssemblyInitialize"],
        "Runs once before any test of the assembly.",
        AttributeTarget::Method,
    ),
    info(
        AttributeId::AssemblyCleanup,
        "AssemblyCleanupAttribute",
        &["AssemblyCleanup"],
        "Runs once after every test of the assembly.",
        AttributeTarget::Method,
    ),
    info(
        AttributeId::ClassInitialize,
        "ClassInitializeAttribute",
        &["ClassInitialize"],
        "Runs once before the tests of a class.",
        AttributeTarget::Method,
    ),
    info(
        AttributeId::ClassCleanup,
        "ClassCleanupAttribute",
        &["ClassCleanup"],
        "Runs once after the tests of a class.",
        AttributeTarget::Method,
    ),
    info(
        AttributeId::TestInitialize,
        "TestInitializeAttribute",
        &["TestInitialize"],
        "Runs before each test of a class.",
        AttributeTarget::Method,
    ),
    info(
        AttributeId::TestCleanup,
        "TestCleanupAttribute",
        &["TestCleanup"],
        "Runs after each test of a class.",
        AttributeTarget::Method,
    ),
    info(
        AttributeId::DeploymentItem,
        "DeploymentItemAttribute",
        &["DeploymentItem"],
        "Copies a file or directory next to the test run.",
        AttributeTarget::ClassOrMethod,
    ),
    info(
        AttributeId::DiscoverInternals,
        "DiscoverInternalsAttribute",
        &["DiscoverInternals"],
        "Allows internal classes and methods to be discovered.",
        AttributeTarget::Assembly,
    ),
    info(
        AttributeId::TestDataSourceDiscovery,
        "TestDataSourceDiscoveryAttribute",
        &["TestDataSourceDiscovery"],
        "Legacy switch choosing when data rows are expanded.",
        AttributeTarget::Assembly,
    ),
    info(
        AttributeId::TestDataSourceOptions,
        "TestDataSourceOptionsAttribute",
        &["TestDataSourceOptions"],
        "Chooses the data-source unfolding strategy for an assembly.",
        AttributeTarget::Assembly,
    ),
    info(
        AttributeId::AsyncStateMachine,
        "AsyncStateMachineAttribute",
        &["AsyncStateMachine"],
        "Compiler marker naming the state machine of an async method.",
        AttributeTarget::Method,
    ),
];

/// Resolve a (possibly namespace-qualified) attribute type name to its stable id.
pub fn from_type_name(type_name: &str) -> Option<AttributeId> {
    let name = simple_name(type_name);
    if let Some(info) = ATTRIBUTES.iter().find(|a| a.canonical == name) {
        return Some(info.id);
    }
    ATTRIBUTES
        .iter()
        .find(|a| {
            let aliases: &[&str] = a.aliases;
            aliases.contains(&name)
        })
        .map(|a| a.id)
}

/// Resolve an attribute by its own type name first, then by the nearest recognized base type.
///
/// This is how "has an attribute derived from X" is answered: a user-defined `MyTestAttribute` whose chain contains
/// `TestMethodAttribute` resolves to [`AttributeId::TestMethod`].
pub fn resolve<'a>(type_name: &str, base_types: impl IntoIterator<Item = &'a String>) -> Option<AttributeId> {
    from_type_name(type_name).or_else(|| base_types.into_iter().find_map(|base| from_type_name(base)))
}

/// Return the canonical spelling for an attribute.
pub fn as_str(id: AttributeId) -> &'static str {
    info_for(id).map_or("UnknownAttribute", |info| info.canonical)
}

/// Return the metadata entry for an attribute.
pub fn info_for(id: AttributeId) -> Option<&'static AttributeInfo> {
    ATTRIBUTES.iter().find(|a| a.id == id)
}

const fn info(
    id: AttributeId,
    canonical: &'static str,
    aliases: &'static [&'static str],
    description: &'static str,
    target: AttributeTarget,
) -> AttributeInfo {
    LangItemInfo {
        id,
        canonical,
        aliases,
        description,
        target,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_id_has_an_entry() {
        for entry in ATTRIBUTES {
            assert_eq!(info_for(entry.id).map(|i| i.canonical), Some(entry.canonical));
        }
    }

    #[test]
    fn test_aliases_resolve() {
        assert_eq!(from_type_name("DataTestMethod"), Some(AttributeId::TestMethod));
        assert_eq!(from_type_name("Fw.Sub.IgnoreAttribute"), Some(AttributeId::Ignore));
        assert_eq!(from_type_name("NotAnAttribute"), None);
    }

    #[test]
    fn test_resolve_walks_base_chain() {
        let chain = vec!["My.BaseAttribute".to_string(), "TestFramework.TestMethodAttribute".to_string()];
        assert_eq!(resolve("My.RetryTestAttribute", &chain), Some(AttributeId::TestMethod));
        assert_eq!(resolve("My.RetryTestAttribute", &Vec::new()), None);
    }

    #[test]
    fn test_own_name_wins_over_chain() {
        let chain = vec!["TestFramework.TestMethodAttribute".to_string()];
        assert_eq!(resolve("TestFramework.DataRowAttribute", &chain), Some(AttributeId::DataRow));
    }
}
