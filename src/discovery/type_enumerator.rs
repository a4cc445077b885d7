//! Builds the test elements of one type.

use std::cell::OnceCell;
use std::collections::HashSet;

use testhost_core::lang::traits;
use testhost_core::{AssemblyMetadata, MethodMetadata, ReturnKind, TestMethod, TestTrait, TypeMetadata, UnitTestElement};

use super::deployment::DeploymentResolver;
use super::method_validator::TestMethodValidator;
use super::reflect::{Attribute, ReflectHelper};
use super::type_validator::TypeValidator;
use crate::settings::AdapterSettings;

/// Everything shared by the enumerators of one assembly.
#[derive(Clone, Copy)]
pub struct DiscoveryContext<'a> {
    pub assembly: &'a AssemblyMetadata,
    pub reflect: &'a ReflectHelper,
    pub deployment: &'a dyn DeploymentResolver,
    pub settings: &'a AdapterSettings,
    /// Whether internal classes and methods are discoverable.
    pub discover_internals: bool,
}

/// A method reachable from the enumerated type, with the full name of the type that declares it.
struct Candidate<'a> {
    method: &'a MethodMetadata,
    declaring_type: String,
}

pub struct TypeEnumerator<'a> {
    ty: &'a TypeMetadata,
    context: DiscoveryContext<'a>,
    class_ignored: OnceCell<bool>,
}

impl<'a> TypeEnumerator<'a> {
    pub fn new(ty: &'a TypeMetadata, context: DiscoveryContext<'a>) -> Self {
        Self {
            ty,
            context,
            class_ignored: OnceCell::new(),
        }
    }

    /// Elements for every valid test method of the type, in reflected method order.
    ///
    /// Returns `None` when the type is not a valid test class.
    pub fn enumerate(&self, warnings: &mut Vec<String>) -> Option<Vec<UnitTestElement>> {
        let type_validator = TypeValidator::new(self.context.reflect, self.context.discover_internals);
        if !type_validator.is_valid_test_class(self.ty, warnings) {
            return None;
        }

        let method_validator = TestMethodValidator::new(self.context.reflect, self.context.discover_internals);
        let mut tests = Vec::new();
        for candidate in self.candidates() {
            if !self.is_from_allowed_assembly(candidate.method) {
                continue;
            }
            if method_validator.is_valid_test_method(candidate.method, self.ty, warnings) {
                tests.push(self.build_element(&candidate, warnings));
            }
        }
        Some(tests)
    }

    /// Declared methods first, then methods inherited through base types found in the same assembly. A method hides
    /// any base method with the same name and parameter signature.
    fn candidates(&self) -> Vec<Candidate<'a>> {
        let mut seen = HashSet::new();
        let mut visited = HashSet::new();
        let mut candidates = Vec::new();

        let mut current = Some(self.ty);
        while let Some(ty) = current {
            if !visited.insert(ty.full_name.as_str()) {
                break;
            }
            for method in &ty.methods {
                if seen.insert((method.name.as_str(), method.parameter_signature())) {
                    candidates.push(Candidate {
                        method,
                        declaring_type: method.declaring_type.clone().unwrap_or_else(|| ty.full_name.clone()),
                    });
                }
            }
            current = ty.base_type.as_deref().and_then(|base| self.context.assembly.find_type(base));
        }
        candidates
    }

    fn is_from_allowed_assembly(&self, method: &MethodMetadata) -> bool {
        match &method.declaring_assembly {
            Some(assembly) if *assembly != self.context.assembly.name => {
                self.context.settings.enable_base_class_test_methods_from_other_assemblies
            }
            _ => true,
        }
    }

    fn is_class_ignored(&self) -> bool {
        *self.class_ignored.get_or_init(|| {
            self.context
                .reflect
                .type_attributes(self.ty)
                .iter()
                .any(|a| matches!(a, Attribute::Ignore { .. }))
        })
    }

    fn build_element(&self, candidate: &Candidate<'_>, warnings: &mut Vec<String>) -> UnitTestElement {
        let reflect = self.context.reflect;
        let method = candidate.method;
        let attributes = reflect.method_attributes(&self.ty.full_name, method);

        let mut test_method = TestMethod::new(&method.name, &self.ty.full_name, &self.context.assembly.location);
        if candidate.declaring_type != self.ty.full_name {
            test_method.declaring_class_full_name = Some(candidate.declaring_type.clone());
        }
        test_method.is_async = matches!(method.return_kind(), ReturnKind::AwaitableUnit | ReturnKind::AwaitableValue);
        test_method.parameter_types = method.parameters.iter().map(|p| p.type_name.clone()).collect();

        let mut element = UnitTestElement::new(test_method);
        element.test_categories = reflect.test_categories(self.ty, method, self.context.assembly);
        element.deployment_items = self.context.deployment.deployment_items(method, self.ty, warnings);

        let mut properties = Vec::new();
        let mut owner = None;
        let mut method_ignored = false;
        let mut method_serial = false;
        for attribute in attributes.iter() {
            match attribute {
                Attribute::TestMethod {
                    display_name: Some(name),
                } => element.display_name = name.clone(),
                Attribute::Ignore { .. } => method_ignored = true,
                Attribute::TestProperty { name, value } => properties.push(TestTrait::new(name, value)),
                Attribute::Owner(name) => owner = Some(name.clone()),
                Attribute::Priority(priority) => element.priority = Some(*priority),
                Attribute::Description(text) => element.description = Some(text.clone()),
                Attribute::WorkItem(id) => element.work_items.push(id.clone()),
                Attribute::DoNotParallelize => method_serial = true,
                Attribute::AsyncStateMachine(name) => element.async_state_machine_type = Some(name.clone()),
                _ => {}
            }
        }

        element.ignored = self.is_class_ignored() || method_ignored;
        element.traits = properties;
        if let Some(owner) = owner {
            element.traits.push(TestTrait::new(traits::OWNER, owner));
        }
        if let Some(priority) = element.priority {
            element.traits.push(TestTrait::new(traits::PRIORITY, priority.to_string()));
        }
        element.do_not_parallelize = method_serial || self.is_serial_by_scope();
        element
    }

    fn is_serial_by_scope(&self) -> bool {
        let reflect = self.context.reflect;
        let serial = |attrs: &[Attribute]| attrs.iter().any(|a| matches!(a, Attribute::DoNotParallelize));
        serial(&*reflect.type_attributes(self.ty)) || serial(&*reflect.assembly_attributes(self.context.assembly))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::deployment::AttributeDeploymentResolver;
    use testhost_core::{AttributeData, DeploymentItem, Visibility};

    fn marked(name: &str, extra: Vec<AttributeData>) -> MethodMetadata {
        let mut attributes = vec![AttributeData::new("TestMethod")];
        attributes.extend(extra);
        MethodMetadata {
            name: name.to_string(),
            attributes,
            ..MethodMetadata::default()
        }
    }

    fn class(name: &str, methods: Vec<MethodMetadata>) -> TypeMetadata {
        TypeMetadata {
            full_name: name.to_string(),
            attributes: vec![AttributeData::new("TestClass")],
            methods,
            ..TypeMetadata::default()
        }
    }

    fn assembly(types: Vec<TypeMetadata>) -> AssemblyMetadata {
        AssemblyMetadata {
            name: "Calc.Tests".to_string(),
            location: "/bin/Calc.Tests.dll".to_string(),
            types: Some(types),
            ..AssemblyMetadata::default()
        }
    }

    fn enumerate(
        assembly: &AssemblyMetadata,
        type_name: &str,
        settings: &AdapterSettings,
    ) -> (Option<Vec<UnitTestElement>>, Vec<String>) {
        let reflect = ReflectHelper::new();
        let context = DiscoveryContext {
            assembly,
            reflect: &reflect,
            deployment: &AttributeDeploymentResolver,
            settings,
            discover_internals: reflect.discover_internals(assembly),
        };
        let ty = assembly.find_type(type_name).unwrap();
        let mut warnings = Vec::new();
        let tests = TypeEnumerator::new(ty, context).enumerate(&mut warnings);
        (tests, warnings)
    }

    #[test]
    fn test_invalid_type_yields_none() {
        let asm = assembly(vec![TypeMetadata {
            full_name: "Ns.Plain".to_string(),
            methods: vec![marked("A", vec![])],
            ..TypeMetadata::default()
        }]);
        let (tests, warnings) = enumerate(&asm, "Ns.Plain", &AdapterSettings::default());
        assert!(tests.is_none());
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_element_metadata() {
        let method = marked(
            "Adds",
            vec![
                AttributeData::new("TestProperty").with_argument("Area").with_argument("math"),
                AttributeData::new("Owner").with_argument("ana"),
                AttributeData::new("Priority").with_argument(1),
                AttributeData::new("TestCategory").with_argument("fast"),
                AttributeData::new("Description").with_argument("adds numbers"),
                AttributeData::new("WorkItem").with_argument(42),
                AttributeData::new("DeploymentItem").with_argument("data.csv"),
            ],
        );
        let helper = MethodMetadata {
            name: "Helper".to_string(),
            ..MethodMetadata::default()
        };
        let mut ty = class("Calc.MathTests", vec![method, helper]);
        ty.attributes.push(AttributeData::new("TestCategory").with_argument("unit"));
        let asm = assembly(vec![ty]);

        let (tests, warnings) = enumerate(&asm, "Calc.MathTests", &AdapterSettings::default());
        let tests = tests.unwrap();
        assert!(warnings.is_empty());
        assert_eq!(tests.len(), 1);

        let element = &tests[0];
        assert_eq!(element.display_name, "Adds");
        assert_eq!(element.test_method.assembly_path, "/bin/Calc.Tests.dll");
        assert_eq!(element.test_method.declaring_class_full_name, None);
        assert_eq!(element.test_categories, vec!["fast", "unit"]);
        assert_eq!(
            element.traits,
            vec![
                TestTrait::new("Area", "math"),
                TestTrait::new(traits::OWNER, "ana"),
                TestTrait::new(traits::PRIORITY, "1"),
            ]
        );
        assert_eq!(element.priority, Some(1));
        assert_eq!(element.description.as_deref(), Some("adds numbers"));
        assert_eq!(element.work_items, vec!["42"]);
        assert_eq!(
            element.deployment_items,
            vec![DeploymentItem {
                source_path: "data.csv".to_string(),
                relative_output_directory: String::new(),
            }]
        );
        assert!(!element.ignored);
    }

    #[test]
    fn test_display_name_override_and_async() {
        let method = MethodMetadata {
            return_type: "System.Threading.Tasks.Task".to_string(),
            ..marked(
                "Loads",
                vec![
                    AttributeData::new("TestMethod").with_named("DisplayName", "loads data"),
                    AttributeData::new("AsyncStateMachineAttribute").with_argument("Ns.T+<Loads>d__1"),
                ],
            )
        };
        let asm = assembly(vec![class("Ns.T", vec![method])]);
        let (tests, _) = enumerate(&asm, "Ns.T", &AdapterSettings::default());
        let element = &tests.unwrap()[0];
        assert_eq!(element.display_name, "loads data");
        assert!(element.test_method.is_async);
        assert_eq!(element.async_state_machine_type.as_deref(), Some("Ns.T+<Loads>d__1"));
    }

    #[test]
    fn test_class_ignore_wins() {
        let mut ty = class("Ns.Skipped", vec![marked("A", vec![]), marked("B", vec![])]);
        ty.attributes.push(AttributeData::new("Ignore"));
        ty.attributes.push(AttributeData::new("DoNotParallelize"));
        let asm = assembly(vec![ty]);
        let (tests, _) = enumerate(&asm, "Ns.Skipped", &AdapterSettings::default());
        let tests = tests.unwrap();
        assert!(tests.iter().all(|t| t.ignored && t.do_not_parallelize));
    }

    #[test]
    fn test_inherited_methods_follow_declared_ones() {
        let base = TypeMetadata {
            is_abstract: true,
            ..class("Ns.Base", vec![marked("Shared", vec![]), marked("Overridden", vec![])])
        };
        let derived = TypeMetadata {
            base_type: Some("Ns.Base".to_string()),
            ..class("Ns.Derived", vec![marked("Own", vec![]), marked("Overridden", vec![])])
        };
        let asm = assembly(vec![base, derived]);

        let (tests, warnings) = enumerate(&asm, "Ns.Derived", &AdapterSettings::default());
        let tests = tests.unwrap();
        assert!(warnings.is_empty());
        let names: Vec<_> = tests.iter().map(|t| t.test_method.name.as_str()).collect();
        assert_eq!(names, vec!["Own", "Overridden", "Shared"]);
        assert_eq!(tests[2].test_method.declaring_class_full_name.as_deref(), Some("Ns.Base"));
        assert_eq!(tests[2].test_method.full_class_name, "Ns.Derived");

        let (abstract_tests, abstract_warnings) = enumerate(&asm, "Ns.Base", &AdapterSettings::default());
        assert!(abstract_tests.is_none());
        assert!(abstract_warnings.is_empty());
    }

    #[test]
    fn test_cross_assembly_methods_need_opt_in() {
        let external = MethodMetadata {
            declaring_type: Some("Shared.BaseTests".to_string()),
            declaring_assembly: Some("Shared.Tests".to_string()),
            ..marked("FromShared", vec![])
        };
        let asm = assembly(vec![class("Ns.Local", vec![marked("Local", vec![]), external])]);

        let (tests, _) = enumerate(&asm, "Ns.Local", &AdapterSettings::default());
        assert_eq!(tests.unwrap().len(), 1);

        let settings = AdapterSettings {
            enable_base_class_test_methods_from_other_assemblies: true,
            ..AdapterSettings::default()
        };
        let (tests, _) = enumerate(&asm, "Ns.Local", &settings);
        let tests = tests.unwrap();
        assert_eq!(tests.len(), 2);
        assert_eq!(tests[1].test_method.declaring_class_full_name.as_deref(), Some("Shared.BaseTests"));
    }

    #[test]
    fn test_internals_follow_assembly_switch() {
        let ty = TypeMetadata {
            visibility: Visibility::Internal,
            ..class("Ns.Internal", vec![marked("A", vec![])])
        };
        let mut asm = assembly(vec![ty]);
        let (tests, warnings) = enumerate(&asm, "Ns.Internal", &AdapterSettings::default());
        assert!(tests.is_none());
        assert_eq!(warnings.len(), 1);

        asm.attributes.push(AttributeData::new("DiscoverInternals"));
        let (tests, warnings) = enumerate(&asm, "Ns.Internal", &AdapterSettings::default());
        assert_eq!(tests.unwrap().len(), 1);
        assert!(warnings.is_empty());
    }
}
