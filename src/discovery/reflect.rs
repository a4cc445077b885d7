//! Attribute resolution with a per-discovery cache.
//!
//! Reflected attributes arrive as raw [`AttributeData`]. Each one is resolved once into an [`Attribute`], a tagged
//! enum of everything discovery cares about, and the resolved list is memoized per member. The helper is owned by
//! one enumeration call and dropped with it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use testhost_core::lang::attributes::{
    AttributeId, DISCOVERY_OPTION_DURING_EXECUTION, DISPLAY_NAME_ARG, IGNORE_MESSAGE_ARG,
    INHERITANCE_BEFORE_EACH_DERIVED_CLASS, INHERITANCE_BEHAVIOR_ARG,
};
use testhost_core::lang::interfaces::InterfaceId;
use testhost_core::{AssemblyMetadata, AttributeData, DataValue, MethodMetadata, TypeMetadata};

use super::data_source::{DataSource, UnfoldingStrategy};

/// A resolved attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    TestClass,
    TestMethod { display_name: Option<String> },
    Ignore { message: Option<String> },
    TestCategory(Vec<String>),
    TestProperty { name: String, value: String },
    Owner(String),
    Priority(i32),
    Description(String),
    WorkItem(String),
    DoNotParallelize,
    DataRow(DataSource),
    DynamicData(DataSource),
    CustomDataSource(DataSource),
    AssemblyInitialize,
    AssemblyCleanup,
    ClassInitialize { before_each_derived_class: bool },
    ClassCleanup { before_each_derived_class: bool },
    DeploymentItem { path: String, output_directory: String },
    DiscoverInternals,
    TestDataSourceDiscovery { during_execution: bool },
    TestDataSourceOptions { strategy: UnfoldingStrategy },
    AsyncStateMachine(String),
    /// A framework attribute discovery does not act on.
    Other(AttributeId),
    Unknown(String),
}

impl Attribute {
    /// Resolve one reflected attribute.
    pub fn resolve(data: &AttributeData) -> Self {
        let Some(id) = data.resolve_id() else {
            if data.implements(InterfaceId::TestDataSource) {
                return Attribute::CustomDataSource(DataSource::custom(data));
            }
            return Attribute::Unknown(data.type_name.clone());
        };

        match id {
            AttributeId::TestClass => Attribute::TestClass,
            AttributeId::TestMethod => Attribute::TestMethod {
                display_name: data
                    .named_str(DISPLAY_NAME_ARG)
                    .or_else(|| data.positional_str(0))
                    .map(str::to_string),
            },
            AttributeId::Ignore => Attribute::Ignore {
                message: data
                    .positional_str(0)
                    .or_else(|| data.named_str(IGNORE_MESSAGE_ARG))
                    .map(str::to_string),
            },
            AttributeId::TestCategory => Attribute::TestCategory(strings(&data.arguments)),
            AttributeId::TestProperty => Attribute::TestProperty {
                name: data.positional_str(0).unwrap_or_default().to_string(),
                value: data.arguments.get(1).map(plain_text).unwrap_or_default(),
            },
            AttributeId::Owner => Attribute::Owner(data.positional_str(0).unwrap_or_default().to_string()),
            AttributeId::Priority => match data.arguments.first().and_then(DataValue::as_i64) {
                Some(priority) => Attribute::Priority(priority.clamp(i32::MIN as i64, i32::MAX as i64) as i32),
                None => Attribute::Other(id),
            },
            AttributeId::Description => Attribute::Description(data.positional_str(0).unwrap_or_default().to_string()),
            AttributeId::WorkItem => Attribute::WorkItem(data.arguments.first().map(plain_text).unwrap_or_default()),
            AttributeId::DoNotParallelize => Attribute::DoNotParallelize,
            AttributeId::DataRow => Attribute::DataRow(DataSource::data_row(data)),
            AttributeId::DynamicData => Attribute::DynamicData(DataSource::dynamic_data(data)),
            AttributeId::AssemblyInitialize => Attribute::AssemblyInitialize,
            AttributeId::AssemblyCleanup => Attribute::AssemblyCleanup,
            AttributeId::ClassInitialize => Attribute::ClassInitialize {
                before_each_derived_class: before_each_derived_class(data),
            },
            AttributeId::ClassCleanup => Attribute::ClassCleanup {
                before_each_derived_class: before_each_derived_class(data),
            },
            AttributeId::DeploymentItem => Attribute::DeploymentItem {
                path: data.positional_str(0).unwrap_or_default().to_string(),
                output_directory: data.positional_str(1).unwrap_or_default().to_string(),
            },
            AttributeId::DiscoverInternals => Attribute::DiscoverInternals,
            AttributeId::TestDataSourceDiscovery => Attribute::TestDataSourceDiscovery {
                during_execution: data.positional_str(0) == Some(DISCOVERY_OPTION_DURING_EXECUTION),
            },
            AttributeId::TestDataSourceOptions => Attribute::TestDataSourceOptions {
                strategy: data
                    .positional_str(0)
                    .and_then(UnfoldingStrategy::parse)
                    .unwrap_or_default(),
            },
            AttributeId::AsyncStateMachine => {
                Attribute::AsyncStateMachine(data.positional_str(0).unwrap_or_default().to_string())
            }
            AttributeId::Timeout | AttributeId::TestInitialize | AttributeId::TestCleanup => Attribute::Other(id),
        }
    }

    /// The data source behind this attribute, if it is one.
    pub fn as_data_source(&self) -> Option<&DataSource> {
        match self {
            Attribute::DataRow(source) | Attribute::DynamicData(source) | Attribute::CustomDataSource(source) => {
                Some(source)
            }
            _ => None,
        }
    }
}

fn before_each_derived_class(data: &AttributeData) -> bool {
    data.named_str(INHERITANCE_BEHAVIOR_ARG)
        .or_else(|| data.positional_str(0))
        .is_some_and(|v| v == INHERITANCE_BEFORE_EACH_DERIVED_CLASS)
}

fn strings(values: &[DataValue]) -> Vec<String> {
    values
        .iter()
        .flat_map(|v| match v {
            DataValue::Array(items) => items.iter().filter_map(DataValue::as_str).map(str::to_string).collect(),
            DataValue::String(s) => vec![s.clone()],
            _ => Vec::new(),
        })
        .collect()
}

/// Render a value without the quotes `Display` puts around strings.
fn plain_text(value: &DataValue) -> String {
    match value {
        DataValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum MemberKey {
    Assembly(String),
    Type(String),
    Method {
        owner: String,
        name: String,
        signature: String,
    },
}

/// Memoizing attribute resolver for one discovery call.
#[derive(Debug, Default)]
pub struct ReflectHelper {
    cache: RefCell<HashMap<MemberKey, Arc<[Attribute]>>>,
}

impl ReflectHelper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assembly_attributes(&self, assembly: &AssemblyMetadata) -> Arc<[Attribute]> {
        self.resolve_cached(MemberKey::Assembly(assembly.name.clone()), &assembly.attributes)
    }

    pub fn type_attributes(&self, ty: &TypeMetadata) -> Arc<[Attribute]> {
        self.resolve_cached(MemberKey::Type(ty.full_name.clone()), &ty.attributes)
    }

    /// Attributes of `method`. `owner` is the type the method is listed on; the method's own declaring type wins.
    pub fn method_attributes(&self, owner: &str, method: &MethodMetadata) -> Arc<[Attribute]> {
        let key = MemberKey::Method {
            owner: method.declaring_type.clone().unwrap_or_else(|| owner.to_string()),
            name: method.name.clone(),
            signature: method.parameter_signature(),
        };
        self.resolve_cached(key, &method.attributes)
    }

    /// Number of members resolved so far.
    pub fn cached_members(&self) -> usize {
        self.cache.borrow().len()
    }

    fn resolve_cached(&self, key: MemberKey, attributes: &[AttributeData]) -> Arc<[Attribute]> {
        if let Some(hit) = self.cache.borrow().get(&key) {
            return Arc::clone(hit);
        }
        let resolved: Arc<[Attribute]> = attributes.iter().map(Attribute::resolve).collect();
        self.cache.borrow_mut().insert(key, Arc::clone(&resolved));
        resolved
    }

    pub fn is_test_class(&self, ty: &TypeMetadata) -> bool {
        self.type_attributes(ty).iter().any(|a| matches!(a, Attribute::TestClass))
    }

    pub fn is_test_method(&self, owner: &str, method: &MethodMetadata) -> bool {
        self.method_attributes(owner, method)
            .iter()
            .any(|a| matches!(a, Attribute::TestMethod { .. }))
    }

    pub fn discover_internals(&self, assembly: &AssemblyMetadata) -> bool {
        self.assembly_attributes(assembly)
            .iter()
            .any(|a| matches!(a, Attribute::DiscoverInternals))
    }

    /// Data sources of `method` in declaration order.
    pub fn data_sources(&self, owner: &str, method: &MethodMetadata) -> Vec<DataSource> {
        self.method_attributes(owner, method)
            .iter()
            .filter_map(Attribute::as_data_source)
            .cloned()
            .collect()
    }

    /// Categories of a test: method-level first, then class, then assembly.
    pub fn test_categories(
        &self,
        owner: &TypeMetadata,
        method: &MethodMetadata,
        assembly: &AssemblyMetadata,
    ) -> Vec<String> {
        let levels = [
            self.method_attributes(&owner.full_name, method),
            self.type_attributes(owner),
            self.assembly_attributes(assembly),
        ];
        levels
            .iter()
            .flat_map(|attrs| attrs.iter())
            .filter_map(|a| match a {
                Attribute::TestCategory(categories) => Some(categories.iter().cloned()),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

/// First attribute in `attributes` for which `pick` returns `Some`.
pub fn find_map<'a, T>(attributes: &'a [Attribute], pick: impl FnMut(&'a Attribute) -> Option<T>) -> Option<T> {
    attributes.iter().find_map(pick)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolves_derived_marker() {
        let data = AttributeData::new("My.Custom.SlowTestAttribute").with_base("TestFramework.TestMethodAttribute");
        assert_eq!(Attribute::resolve(&data), Attribute::TestMethod { display_name: None });
    }

    #[test]
    fn test_custom_source_by_interface() {
        let data = AttributeData::new("My.CsvSourceAttribute").with_interface("ITestDataSource");
        assert!(matches!(Attribute::resolve(&data), Attribute::CustomDataSource(_)));
        assert!(matches!(
            Attribute::resolve(&AttributeData::new("My.Unrelated")),
            Attribute::Unknown(name) if name == "My.Unrelated"
        ));
    }

    #[test]
    fn test_argument_extraction() {
        let priority = AttributeData::new("Priority").with_argument(2);
        assert_eq!(Attribute::resolve(&priority), Attribute::Priority(2));

        let property = AttributeData::new("TestProperty").with_argument("Area").with_argument(5);
        assert_eq!(
            Attribute::resolve(&property),
            Attribute::TestProperty {
                name: "Area".to_string(),
                value: "5".to_string()
            }
        );

        let init = AttributeData::new("ClassInitialize").with_argument("BeforeEachDerivedClass");
        assert_eq!(
            Attribute::resolve(&init),
            Attribute::ClassInitialize {
                before_each_derived_class: true
            }
        );

        let legacy = AttributeData::new("TestDataSourceDiscovery").with_argument("DuringExecution");
        assert_eq!(
            Attribute::resolve(&legacy),
            Attribute::TestDataSourceDiscovery { during_execution: true }
        );
    }

    #[test]
    fn test_cache_resolves_each_member_once() {
        let helper = ReflectHelper::new();
        let ty = TypeMetadata {
            full_name: "Ns.Tests".to_string(),
            attributes: vec![AttributeData::new("TestClass")],
            ..TypeMetadata::default()
        };
        assert!(helper.is_test_class(&ty));
        assert!(helper.is_test_class(&ty));
        assert_eq!(helper.cached_members(), 1);

        let first = helper.type_attributes(&ty);
        let second = helper.type_attributes(&ty);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_category_order_is_method_class_assembly() {
        let helper = ReflectHelper::new();
        let assembly = AssemblyMetadata {
            name: "Asm".to_string(),
            attributes: vec![AttributeData::new("TestCategory").with_argument("asm")],
            ..AssemblyMetadata::default()
        };
        let ty = TypeMetadata {
            full_name: "Ns.Tests".to_string(),
            attributes: vec![AttributeData::new("TestCategory").with_argument("class")],
            ..TypeMetadata::default()
        };
        let method = MethodMetadata {
            name: "M".to_string(),
            attributes: vec![
                AttributeData::new("TestCategory").with_argument("m1"),
                AttributeData::new("TestCategory").with_argument("m2"),
            ],
            ..MethodMetadata::default()
        };
        assert_eq!(helper.test_categories(&ty, &method, &assembly), vec!["m1", "m2", "class", "asm"]);
    }
}
