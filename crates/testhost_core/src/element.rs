//! Discoverable test element model.
//!
//! A [`UnitTestElement`] is what discovery hands to the runner. It wraps a [`TestMethod`] descriptor (which method,
//! in which type, in which assembly) plus everything the runner shows or filters on: display name, categories,
//! traits, priority, deployment items, and, once a data-driven test has been unfolded, the data row payload.
//!
//! ## Notes
//! - Elements are plain data and serialize with `serde`; they are the unit that crosses the isolation boundary.
//! - Unfolded rows are produced by [`UnitTestElement::with_data_row`], a pure constructor over a base element. The
//!   base element is never mutated.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::lang::traits;

/// Origin of the data payload carried by an element.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// Not data-driven, or folded: rows are expanded at execution time.
    #[default]
    None,
    /// Row comes from an inline `DataRow` attribute.
    DataRow,
    /// Row comes from any other `ITestDataSource`.
    TestDataSource,
}

/// Identity of a candidate test method.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestMethod {
    /// Method name.
    pub name: String,
    /// Full name of the enumerated (concrete) type.
    pub full_class_name: String,
    /// Full name of the type that declares the method, when it differs from `full_class_name`.
    pub declaring_class_full_name: Option<String>,
    /// Location of the assembly holding the type.
    pub assembly_path: String,
    pub is_async: bool,
    /// Parameter type names, in declaration order.
    pub parameter_types: Vec<String>,
    pub data_type: DataType,
    /// One serialized JSON document per argument of the row.
    pub serialized_data: Option<Vec<String>>,
    /// Zero-based index of the row across every data source of the method.
    pub test_case_index: Option<usize>,
    pub test_data_source_ignore_message: Option<String>,
}

impl TestMethod {
    pub fn new(name: impl Into<String>, full_class_name: impl Into<String>, assembly_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            full_class_name: full_class_name.into(),
            assembly_path: assembly_path.into(),
            ..Self::default()
        }
    }

    /// `Namespace.Class.Method`
    pub fn fully_qualified_name(&self) -> String {
        format!("{}.{}", self.full_class_name, self.name)
    }

    /// Namespace / class / method path used by runners to build a tree view.
    pub fn hierarchy(&self) -> [String; 3] {
        let (namespace, class) = match self.full_class_name.rsplit_once('.') {
            Some((ns, class)) => (ns.to_string(), class.to_string()),
            None => (String::new(), self.full_class_name.clone()),
        };
        [namespace, class, self.name.clone()]
    }
}

/// Key/value pair attached to an element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TestTrait {
    pub name: String,
    pub value: String,
}

impl TestTrait {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A file or directory deployed next to the test run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentItem {
    pub source_path: String,
    pub relative_output_directory: String,
}

/// Kind of fixture surfaced as a pseudo-test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FixtureKind {
    AssemblyInitialize,
    AssemblyCleanup,
    ClassInitialize,
    ClassCleanup,
}

impl FixtureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FixtureKind::AssemblyInitialize => "AssemblyInitialize",
            FixtureKind::AssemblyCleanup => "AssemblyCleanup",
            FixtureKind::ClassInitialize => "ClassInitialize",
            FixtureKind::ClassCleanup => "ClassCleanup",
        }
    }
}

/// Data attached to one unfolded row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowPayload {
    pub display_name: String,
    /// Categories contributed by the row; placed before the element's own categories.
    pub categories: Vec<String>,
    pub data_type: DataType,
    pub serialized_data: Vec<String>,
    pub test_case_index: usize,
    pub ignore_message: Option<String>,
}

/// The discoverable unit surfaced to the runner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitTestElement {
    pub test_method: TestMethod,
    pub display_name: String,
    pub ignored: bool,
    pub test_categories: Vec<String>,
    pub traits: Vec<TestTrait>,
    pub priority: Option<i32>,
    pub deployment_items: Vec<DeploymentItem>,
    /// Compiler-generated state machine type of an async method; used for source navigation only.
    pub async_state_machine_type: Option<String>,
    pub description: Option<String>,
    pub work_items: Vec<String>,
    pub do_not_parallelize: bool,
}

impl UnitTestElement {
    pub fn new(test_method: TestMethod) -> Self {
        let display_name = test_method.name.clone();
        Self {
            test_method,
            display_name,
            ..Self::default()
        }
    }

    /// Build the element for one unfolded data row of `base`.
    pub fn with_data_row(base: &UnitTestElement, row: RowPayload) -> Self {
        let mut test_categories = row.categories;
        test_categories.extend(base.test_categories.iter().cloned());

        Self {
            test_method: TestMethod {
                data_type: row.data_type,
                serialized_data: Some(row.serialized_data),
                test_case_index: Some(row.test_case_index),
                test_data_source_ignore_message: row.ignore_message,
                ..base.test_method.clone()
            },
            display_name: row.display_name,
            test_categories,
            ..base.clone()
        }
    }

    /// Build the single element kept for a data source that produced no rows.
    pub fn without_data(base: &UnitTestElement, display_name: String, ignore_message: Option<String>) -> Self {
        Self {
            test_method: TestMethod {
                data_type: DataType::None,
                serialized_data: None,
                test_case_index: None,
                test_data_source_ignore_message: ignore_message,
                ..base.test_method.clone()
            },
            display_name,
            ..base.clone()
        }
    }

    /// Build a fixture pseudo-test.
    pub fn fixture(kind: FixtureKind, class_full_name: &str, method_name: &str, assembly_path: &str) -> Self {
        let test_method = TestMethod::new(method_name, class_full_name, assembly_path);
        Self {
            display_name: format!("[{}] {}", kind.as_str(), method_name),
            traits: vec![TestTrait::new(traits::FIXTURES_TEST, kind.as_str())],
            ..Self::new(test_method)
        }
    }

    /// Fixture kind, when this element is a fixture pseudo-test.
    pub fn fixture_kind(&self) -> Option<&str> {
        self.traits
            .iter()
            .find(|t| t.name == traits::FIXTURES_TEST)
            .map(|t| t.value.as_str())
    }

    pub fn is_fixture(&self) -> bool {
        self.fixture_kind().is_some()
    }
}

/// Outcome of discovering one assembly: elements in discovery order plus warnings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryResult {
    pub tests: Vec<UnitTestElement>,
    pub warnings: Vec<String>,
    /// Test run parameters in effect for the assembly: its own parameters overlaid by the run settings.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub test_run_parameters: BTreeMap<String, String>,
}
