//! Runner-facing test cases.

use serde::Serialize;
use testhost_core::lang::traits;
use testhost_core::{DataType, DeploymentItem, TestTrait, UnitTestElement};
use uuid::Uuid;

use crate::filter::PropertyProvider;

/// Namespace for test-case ids.
const TEST_CASE_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a8e_5d47_4b0e_9c3a_1e8f_7b2d_40a6);

/// Property names understood by filters.
pub mod properties {
    pub const FULLY_QUALIFIED_NAME: &str = "FullyQualifiedName";
    pub const NAME: &str = "Name";
    pub const CLASS_NAME: &str = "ClassName";
    pub const TEST_CATEGORY: &str = "TestCategory";
    pub const PRIORITY: &str = "Priority";
}

/// A discovered test as reported to the runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestCase {
    /// Stable across runs for the same source, name, display name and data row.
    pub id: Uuid,
    pub fully_qualified_name: String,
    pub display_name: String,
    /// Assembly path the test was discovered in.
    pub source: String,
    pub categories: Vec<String>,
    pub traits: Vec<TestTrait>,
    pub priority: Option<i32>,
    pub ignored: bool,
    /// Declaring type, when the method is inherited from a base class.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub declaring_class_full_name: Option<String>,
    pub is_async: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub async_state_machine_type: Option<String>,
    pub data_type: DataType,
    /// One JSON document per argument of the unfolded row. Together with `test_case_index` this is enough to
    /// re-run a single row.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serialized_data: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_case_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_data_source_ignore_message: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub deployment_items: Vec<DeploymentItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub work_items: Vec<String>,
    pub do_not_parallelize: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixture: Option<String>,
}

impl TestCase {
    pub fn from_element(element: &UnitTestElement, source: &str) -> Self {
        let method = &element.test_method;
        let fully_qualified_name = method.fully_qualified_name();
        let index = method.test_case_index;
        Self {
            id: test_case_id(source, &fully_qualified_name, &element.display_name, index),
            fully_qualified_name,
            display_name: element.display_name.clone(),
            source: source.to_string(),
            categories: element.test_categories.clone(),
            traits: element.traits.clone(),
            priority: element.priority,
            ignored: element.ignored,
            declaring_class_full_name: method.declaring_class_full_name.clone(),
            is_async: method.is_async,
            async_state_machine_type: element.async_state_machine_type.clone(),
            data_type: method.data_type,
            serialized_data: method.serialized_data.clone(),
            test_case_index: index,
            test_data_source_ignore_message: method.test_data_source_ignore_message.clone(),
            deployment_items: element.deployment_items.clone(),
            description: element.description.clone(),
            work_items: element.work_items.clone(),
            do_not_parallelize: element.do_not_parallelize,
            fixture: element.fixture_kind().map(str::to_string),
        }
    }

    pub fn is_fixture(&self) -> bool {
        self.fixture.is_some()
    }

    /// Everything before the last `.` of the fully qualified name.
    pub fn class_name(&self) -> &str {
        self.fully_qualified_name
            .rsplit_once('.')
            .map_or(self.fully_qualified_name.as_str(), |(class, _)| class)
    }
}

impl PropertyProvider for TestCase {
    fn property_values(&self, name: &str) -> Vec<String> {
        let is = |property: &str| name.eq_ignore_ascii_case(property);
        if is(properties::FULLY_QUALIFIED_NAME) {
            vec![self.fully_qualified_name.clone()]
        } else if is(properties::NAME) {
            vec![self.display_name.clone()]
        } else if is(properties::CLASS_NAME) {
            vec![self.class_name().to_string()]
        } else if is(properties::TEST_CATEGORY) {
            self.categories.clone()
        } else if is(properties::PRIORITY) {
            self.priority.map(|p| p.to_string()).into_iter().collect()
        } else {
            self.traits
                .iter()
                .filter(|t| t.name.eq_ignore_ascii_case(name) && t.name != traits::FIXTURES_TEST)
                .map(|t| t.value.clone())
                .collect()
        }
    }
}

fn test_case_id(source: &str, fully_qualified_name: &str, display_name: &str, index: Option<usize>) -> Uuid {
    let index = index.map(|i| i.to_string()).unwrap_or_default();
    let key = format!("{}\n{}\n{}\n{}", source, fully_qualified_name, display_name, index);
    Uuid::new_v5(&TEST_CASE_NAMESPACE, key.as_bytes())
}
