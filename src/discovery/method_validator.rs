//! Decides whether a reflected method is a runnable test.

use testhost_core::{MethodMetadata, ReturnKind, TypeMetadata};

use super::reflect::{Attribute, ReflectHelper};

pub struct TestMethodValidator<'a> {
    reflect: &'a ReflectHelper,
    discover_internals: bool,
}

impl<'a> TestMethodValidator<'a> {
    pub fn new(reflect: &'a ReflectHelper, discover_internals: bool) -> Self {
        Self {
            reflect,
            discover_internals,
        }
    }

    /// Whether `method`, listed on `ty`, is a valid test method.
    ///
    /// Methods without the test-method marker are rejected silently. Marked methods that cannot run push a warning.
    pub fn is_valid_test_method(&self, method: &MethodMetadata, ty: &TypeMetadata, warnings: &mut Vec<String>) -> bool {
        if !self.reflect.is_test_method(&ty.full_name, method) {
            return false;
        }

        if method.is_generic_definition {
            warnings.push(format!(
                "The method {}.{} is a generic test method; generic test methods are not supported",
                ty.full_name, method.name
            ));
            return false;
        }

        if !self.has_valid_signature(&ty.full_name, method) {
            warnings.push(format!(
                "Method {}.{} has an incorrect signature. Test methods must be public, non-static, non-abstract, \
                 non-generic, and return void, Task or ValueTask. Async methods must not return void.",
                ty.full_name, method.name
            ));
            return false;
        }

        true
    }

    fn has_valid_signature(&self, owner: &str, method: &MethodMetadata) -> bool {
        if method.is_abstract || method.is_static || method.is_generic {
            return false;
        }
        let visible =
            method.visibility.is_public() || (self.discover_internals && method.visibility.is_internal());
        if !visible {
            return false;
        }
        match method.return_kind() {
            ReturnKind::AwaitableUnit => true,
            ReturnKind::Void => !self.is_async_state_machine(owner, method),
            ReturnKind::AwaitableValue | ReturnKind::Other => false,
        }
    }

    fn is_async_state_machine(&self, owner: &str, method: &MethodMetadata) -> bool {
        self.reflect
            .method_attributes(owner, method)
            .iter()
            .any(|a| matches!(a, Attribute::AsyncStateMachine(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testhost_core::{AttributeData, Visibility};

    fn test_method(name: &str) -> MethodMetadata {
        MethodMetadata {
            name: name.to_string(),
            attributes: vec![AttributeData::new("TestMethod")],
            ..MethodMetadata::default()
        }
    }

    fn validate(method: &MethodMetadata, discover_internals: bool) -> (bool, usize) {
        let reflect = ReflectHelper::new();
        let ty = TypeMetadata {
            full_name: "Ns.Tests".to_string(),
            ..TypeMetadata::default()
        };
        let mut warnings = Vec::new();
        let validator = TestMethodValidator::new(&reflect, discover_internals);
        let valid = validator.is_valid_test_method(method, &ty, &mut warnings);
        (valid, warnings.len())
    }

    #[test]
    fn test_plain_and_task_returning_methods_are_valid() {
        assert_eq!(validate(&test_method("Sync"), false), (true, 0));

        let task = MethodMetadata {
            return_type: "System.Threading.Tasks.Task".to_string(),
            ..test_method("Async")
        };
        assert_eq!(validate(&task, false), (true, 0));
    }

    #[test]
    fn test_unmarked_method_is_silently_skipped() {
        let helper = MethodMetadata {
            name: "Helper".to_string(),
            ..MethodMetadata::default()
        };
        assert_eq!(validate(&helper, false), (false, 0));
    }

    #[test]
    fn test_generic_definition_warns() {
        let generic = MethodMetadata {
            is_generic_definition: true,
            ..test_method("Generic")
        };
        assert_eq!(validate(&generic, false), (false, 1));
    }

    #[test]
    fn test_bad_signatures_warn() {
        let cases = [
            MethodMetadata {
                is_static: true,
                ..test_method("Static")
            },
            MethodMetadata {
                is_abstract: true,
                ..test_method("Abstract")
            },
            MethodMetadata {
                visibility: Visibility::Private,
                ..test_method("Private")
            },
            MethodMetadata {
                return_type: "System.Int32".to_string(),
                ..test_method("ReturnsInt")
            },
            MethodMetadata {
                return_type: "System.Threading.Tasks.Task`1[System.Int32]".to_string(),
                ..test_method("ReturnsTaskOfInt")
            },
            MethodMetadata {
                is_generic: true,
                ..test_method("Constructed")
            },
        ];
        for method in &cases {
            assert_eq!(validate(method, false), (false, 1), "{}", method.name);
        }
    }

    #[test]
    fn test_async_void_rejected() {
        let mut method = test_method("AsyncVoid");
        method
            .attributes
            .push(AttributeData::new("AsyncStateMachineAttribute").with_argument("Ns.Tests+<AsyncVoid>d__0"));
        assert_eq!(validate(&method, false), (false, 1));
    }

    #[test]
    fn test_internal_method_needs_opt_in() {
        let internal = MethodMetadata {
            visibility: Visibility::Internal,
            ..test_method("Internal")
        };
        assert_eq!(validate(&internal, false), (false, 1));
        assert_eq!(validate(&internal, true), (true, 0));
    }
}
