//! Resolves the execution context of a discovered test: the method itself plus the class and assembly fixtures
//! that run around it.
//!
//! Fixture methods are validated here. A fixture with a signature the runner could never call fails the lookup
//! with [`DiscoveryError::InvalidFixture`], which the assembly enumerator reports against the owning type.

use std::cell::{OnceCell, RefCell};
use std::collections::{HashMap, HashSet};

use testhost_core::lang::registry::simple_name;
use testhost_core::{FixtureKind, MethodMetadata, ReturnKind, TypeMetadata, UnitTestElement};

use super::DiscoveryError;
use super::reflect::Attribute;
use super::type_enumerator::DiscoveryContext;
use super::type_validator::TEST_CONTEXT_PROPERTY;

/// A validated fixture method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixtureMethod {
    pub name: String,
    /// Full name of the type declaring the method.
    pub declaring_type: String,
}

/// Class-scoped fixtures, in the order they run.
///
/// A class runs its own fixtures plus those of every same-assembly base type declared with
/// `BeforeEachDerivedClass`. Initializers run from the outermost base down to the class; cleanups run in the
/// reverse order. Each type contributes at most one of each.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassInfo {
    pub initialize: Vec<FixtureMethod>,
    pub cleanup: Vec<FixtureMethod>,
}

/// Assembly-scoped fixtures, found on the assembly's test classes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssemblyInfo {
    pub initialize: Option<FixtureMethod>,
    pub cleanup: Option<FixtureMethod>,
}

/// Everything discovery needs to know about one test beyond its element.
#[derive(Debug, Clone)]
pub struct TestMethodInfo<'a> {
    pub method: &'a MethodMetadata,
    /// Full name of the type declaring the method.
    pub declaring_type: String,
    pub class: ClassInfo,
    pub assembly: AssemblyInfo,
}

#[derive(Debug, Clone)]
struct FixtureIssue {
    type_name: String,
    method: String,
    reason: String,
}

impl From<FixtureIssue> for DiscoveryError {
    fn from(issue: FixtureIssue) -> Self {
        DiscoveryError::InvalidFixture {
            type_name: issue.type_name,
            method: issue.method,
            reason: issue.reason,
        }
    }
}

/// Per-invocation cache of class and assembly fixture lookups.
pub struct TypeCache<'a> {
    context: DiscoveryContext<'a>,
    assembly_info: OnceCell<Result<AssemblyInfo, FixtureIssue>>,
    class_infos: RefCell<HashMap<String, ClassInfo>>,
}

impl<'a> TypeCache<'a> {
    pub fn new(context: DiscoveryContext<'a>) -> Self {
        Self {
            context,
            assembly_info: OnceCell::new(),
            class_infos: RefCell::new(HashMap::new()),
        }
    }

    /// Resolve the method behind `element`, enumerated from `ty`.
    ///
    /// `Ok(None)` means the method could not be located; the caller keeps the element as it is.
    pub fn method_info<'t>(
        &self,
        ty: &'t TypeMetadata,
        element: &UnitTestElement,
    ) -> Result<Option<TestMethodInfo<'t>>, DiscoveryError>
    where
        'a: 't,
    {
        let Some((method, declaring_type)) = self.find_method(ty, element) else {
            return Ok(None);
        };
        let class = self.class_info(ty)?;
        let assembly = self.assembly_info()?;
        Ok(Some(TestMethodInfo {
            method,
            declaring_type,
            class,
            assembly,
        }))
    }

    fn find_method<'t>(&self, ty: &'t TypeMetadata, element: &UnitTestElement) -> Option<(&'t MethodMetadata, String)>
    where
        'a: 't,
    {
        let wanted = &element.test_method;
        self.type_chain(ty).into_iter().find_map(|owner| {
            owner
                .methods
                .iter()
                .find(|m| {
                    let parameters = m.parameters.iter().map(|p| p.type_name.as_str());
                    m.name == wanted.name && parameters.eq(wanted.parameter_types.iter().map(String::as_str))
                })
                .map(|m| (m, m.declaring_type.clone().unwrap_or_else(|| owner.full_name.clone())))
        })
    }

    /// `ty` followed by its base types that live in the same assembly.
    fn type_chain<'t>(&self, ty: &'t TypeMetadata) -> Vec<&'t TypeMetadata>
    where
        'a: 't,
    {
        let mut chain = Vec::new();
        let mut visited = HashSet::new();
        let mut current = Some(ty);
        while let Some(t) = current {
            if !visited.insert(t.full_name.as_str()) {
                break;
            }
            chain.push(t);
            current = t.base_type.as_deref().and_then(|base| self.context.assembly.find_type(base));
        }
        chain
    }

    fn class_info(&self, ty: &TypeMetadata) -> Result<ClassInfo, DiscoveryError> {
        if let Some(info) = self.class_infos.borrow().get(&ty.full_name) {
            return Ok(info.clone());
        }

        let mut info = ClassInfo::default();
        for (depth, owner) in self.type_chain(ty).into_iter().enumerate() {
            let mut initialize = None;
            let mut cleanup = None;
            for method in &owner.methods {
                for attribute in self.context.reflect.method_attributes(&owner.full_name, method).iter() {
                    let (slot, kind, inherited) = match attribute {
                        Attribute::ClassInitialize {
                            before_each_derived_class,
                        } => (&mut initialize, FixtureKind::ClassInitialize, *before_each_derived_class),
                        Attribute::ClassCleanup {
                            before_each_derived_class,
                        } => (&mut cleanup, FixtureKind::ClassCleanup, *before_each_derived_class),
                        _ => continue,
                    };
                    if slot.is_some() || (depth > 0 && !inherited) {
                        continue;
                    }
                    *slot = Some(validate_fixture(owner, method, kind)?);
                }
            }
            info.initialize.extend(initialize);
            info.cleanup.extend(cleanup);
        }
        // Collected class first; initializers run base first.
        info.initialize.reverse();

        self.class_infos.borrow_mut().insert(ty.full_name.clone(), info.clone());
        Ok(info)
    }

    fn assembly_info(&self) -> Result<AssemblyInfo, DiscoveryError> {
        self.assembly_info
            .get_or_init(|| self.resolve_assembly_info())
            .clone()
            .map_err(DiscoveryError::from)
    }

    fn resolve_assembly_info(&self) -> Result<AssemblyInfo, FixtureIssue> {
        let reflect = self.context.reflect;
        let mut info = AssemblyInfo::default();
        let types = self.context.assembly.types.as_deref().unwrap_or_default();
        for ty in types.iter().filter(|t| t.is_class() && reflect.is_test_class(t)) {
            for method in &ty.methods {
                for attribute in reflect.method_attributes(&ty.full_name, method).iter() {
                    let (slot, kind) = match attribute {
                        Attribute::AssemblyInitialize => (&mut info.initialize, FixtureKind::AssemblyInitialize),
                        Attribute::AssemblyCleanup => (&mut info.cleanup, FixtureKind::AssemblyCleanup),
                        _ => continue,
                    };
                    if slot.is_some() {
                        return Err(FixtureIssue {
                            type_name: ty.full_name.clone(),
                            method: method.name.clone(),
                            reason: format!("only one {} method is allowed per assembly", kind.as_str()),
                        });
                    }
                    *slot = Some(validate_fixture(ty, method, kind)?);
                }
            }
        }
        Ok(info)
    }
}

fn validate_fixture(
    ty: &TypeMetadata,
    method: &MethodMetadata,
    kind: FixtureKind,
) -> Result<FixtureMethod, FixtureIssue> {
    let issue = |reason: &str| FixtureIssue {
        type_name: ty.full_name.clone(),
        method: method.name.clone(),
        reason: format!("{} method {}", kind.as_str(), reason),
    };

    if !method.is_static {
        return Err(issue("must be static"));
    }
    if !method.visibility.is_public() {
        return Err(issue("must be public"));
    }
    if method.is_generic_definition {
        return Err(issue("must not be generic"));
    }
    if !matches!(method.return_kind(), ReturnKind::Void | ReturnKind::AwaitableUnit) {
        return Err(issue("must return void, Task or ValueTask"));
    }

    let takes_context = matches!(
        method.parameters.as_slice(),
        [only] if simple_name(&only.type_name) == TEST_CONTEXT_PROPERTY
    );
    let parameters_ok = match kind {
        FixtureKind::AssemblyInitialize | FixtureKind::ClassInitialize => takes_context,
        FixtureKind::AssemblyCleanup | FixtureKind::ClassCleanup => method.parameters.is_empty() || takes_context,
    };
    if !parameters_ok {
        return Err(issue(match kind {
            FixtureKind::AssemblyInitialize | FixtureKind::ClassInitialize => {
                "must take exactly one TestContext parameter"
            }
            FixtureKind::AssemblyCleanup | FixtureKind::ClassCleanup => {
                "must take no parameters or a single TestContext parameter"
            }
        }));
    }

    Ok(FixtureMethod {
        name: method.name.clone(),
        declaring_type: method.declaring_type.clone().unwrap_or_else(|| ty.full_name.clone()),
    })
}
