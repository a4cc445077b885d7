//! Decides whether a reflected type is a test container.

use testhost_core::TypeMetadata;
use testhost_core::lang::registry::simple_name;

use super::reflect::ReflectHelper;

/// Name and type of the optional context property a test class may declare.
pub const TEST_CONTEXT_PROPERTY: &str = "TestContext";

pub struct TypeValidator<'a> {
    reflect: &'a ReflectHelper,
    discover_internals: bool,
}

impl<'a> TypeValidator<'a> {
    pub fn new(reflect: &'a ReflectHelper, discover_internals: bool) -> Self {
        Self {
            reflect,
            discover_internals,
        }
    }

    /// Whether `ty` holds discoverable tests. Rejections that deserve the user's attention push a warning.
    ///
    /// Rules, in order:
    /// 1. a class carrying the test-class marker (silently rejected otherwise);
    /// 2. public, or internal when the assembly opts into internals discovery;
    /// 3. not an open generic definition unless abstract;
    /// 4. a declared `TestContext` property must be instance, non-private, non-abstract, and settable;
    /// 5. not abstract (silently rejected: its tests surface through concrete subclasses).
    pub fn is_valid_test_class(&self, ty: &TypeMetadata, warnings: &mut Vec<String>) -> bool {
        if !ty.is_class() || !self.reflect.is_test_class(ty) {
            return false;
        }

        if !self.is_visible(ty) {
            warnings.push(format!("TestClass attribute defined on non-public class {}", ty.full_name));
            return false;
        }

        if ty.is_generic_definition && !ty.is_abstract {
            warnings.push(format!("TestClass attribute defined on generic non-abstract class {}", ty.full_name));
            return false;
        }

        if !has_valid_test_context(ty) {
            warnings.push(format!(
                "Class {} does not have a valid TestContext property. TestContext must be of type TestContext, must be \
                 non-static, non-abstract, settable, and must not be private.",
                ty.full_name
            ));
            return false;
        }

        !ty.is_abstract
    }

    fn is_visible(&self, ty: &TypeMetadata) -> bool {
        ty.visibility.is_public() || (self.discover_internals && ty.visibility.is_internal())
    }
}

fn has_valid_test_context(ty: &TypeMetadata) -> bool {
    let Some(property) = ty.find_property(TEST_CONTEXT_PROPERTY) else {
        return true;
    };
    if simple_name(&property.type_name) != TEST_CONTEXT_PROPERTY {
        // An unrelated property that happens to share the name.
        return true;
    }
    !property.visibility.is_private() && !property.is_static && !property.is_abstract && property.has_setter
}
