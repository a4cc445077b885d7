//! Discovery driver for one assembly.
//!
//! Loads the assembly, runs the type enumerator over every type, then post-processes each element:
//!
//! 1. resolve its fixtures through the [`TypeCache`] (an unresolvable method is kept as is);
//! 2. emit fixture pseudo-tests, at most once per assembly and once per class;
//! 3. unfold data-driven tests into one element per data row.
//!
//! ## Unfolding
//!
//! The assembly-wide strategy comes from `TestDataSourceOptions`, else the legacy `TestDataSourceDiscovery`
//! option (`DuringExecution` folds), else `Unfold`. A source marked `Fold`, or left on `Auto` under a folding
//! assembly, folds the whole method: the original element is kept alone, since it runs every source at execution
//! time.
//!
//! Rows of every source of a method share one case index counter starting at 0. When a source fails (its rows
//! cannot be produced, it is empty, or a row cannot be serialized) unfolding stops: elements built from earlier
//! sources are kept, none of the failing source's rows are, the original element is appended, and one warning is
//! recorded.

use std::collections::HashSet;
use std::path::Path;

use testhost_core::{
    AssemblyMetadata, DataValue, DiscoveryResult, FixtureKind, RowPayload, TypeMetadata, UnitTestElement,
};
use tracing::{debug, info, warn};

use super::DiscoveryError;
use super::data_source::{DataSource, UnfoldingStrategy, arguments_for};
use super::deployment::{AttributeDeploymentResolver, DeploymentResolver};
use super::reflect::{self, Attribute, ReflectHelper};
use super::type_cache::{FixtureMethod, TestMethodInfo, TypeCache};
use super::type_enumerator::{DiscoveryContext, TypeEnumerator};
use crate::loader::FileOperations;
use crate::settings::AdapterSettings;

pub struct AssemblyEnumerator<'a> {
    files: &'a dyn FileOperations,
    settings: &'a AdapterSettings,
    deployment: &'a dyn DeploymentResolver,
}

impl<'a> AssemblyEnumerator<'a> {
    pub fn new(files: &'a dyn FileOperations, settings: &'a AdapterSettings) -> Self {
        Self {
            files,
            settings,
            deployment: &AttributeDeploymentResolver,
        }
    }

    /// Use a different deployment resolver
    pub fn with_deployment(mut self, deployment: &'a dyn DeploymentResolver) -> Self {
        self.deployment = deployment;
        self
    }

    /// Discover every test in the assembly at `path`.
    ///
    /// ## Errors
    ///
    /// Fails when the assembly cannot be loaded or none of its types can be resolved. Problems local to one type or
    /// one data source are reported as warnings in the result instead.
    #[tracing::instrument(skip_all, fields(path = %path.display()))]
    pub fn enumerate_assembly(&self, path: &Path) -> Result<DiscoveryResult, DiscoveryError> {
        let assembly = self.files.load_assembly(path)?;
        self.enumerate_loaded(&assembly)
    }

    /// Discover every test in an already loaded assembly.
    pub fn enumerate_loaded(&self, assembly: &AssemblyMetadata) -> Result<DiscoveryResult, DiscoveryError> {
        let mut warnings = Vec::new();
        let types = loadable_types(assembly, &mut warnings)?;

        let reflect = ReflectHelper::new();
        let context = DiscoveryContext {
            assembly,
            reflect: &reflect,
            deployment: self.deployment,
            settings: self.settings,
            discover_internals: reflect.discover_internals(assembly),
        };
        let strategy = unfolding_strategy(&reflect, assembly);
        debug!(assembly = %assembly.name, strategy = strategy.as_str(), types = types.len(), "enumerating assembly");

        let mut run = Enumeration {
            context,
            cache: TypeCache::new(context),
            strategy,
            fixtures_emitted: HashSet::new(),
            tests: Vec::new(),
            warnings,
        };
        for ty in types {
            if let Err(err) = run.discover_type(ty) {
                info!(type_name = %ty.full_name, error = %err, "could not inspect type");
                run.warnings
                    .push(format!("Could not inspect type {} in {}: {}", ty.full_name, assembly.location, err));
            }
        }

        Ok(DiscoveryResult {
            tests: run.tests,
            warnings: run.warnings,
            test_run_parameters: assembly.run_parameters.clone(),
        })
    }
}

/// Types that can be enumerated. Partial loads record a warning per loader error and continue.
fn loadable_types<'m>(
    assembly: &'m AssemblyMetadata,
    warnings: &mut Vec<String>,
) -> Result<&'m [TypeMetadata], DiscoveryError> {
    if let Some(types) = &assembly.types {
        for message in &assembly.loader_exceptions {
            warn!(assembly = %assembly.name, "{}", message);
            warnings.push(format!("Some types in {} could not be loaded: {}", assembly.location, message));
        }
        return Ok(types);
    }

    match assembly.loader_exceptions.as_slice() {
        [] => Err(DiscoveryError::TypeLoad(format!(
            "unable to load one or more of the requested types from '{}'",
            assembly.location
        ))),
        [single] => Err(DiscoveryError::TypeLoad(single.clone())),
        many => {
            for message in many {
                warn!(assembly = %assembly.name, "{}", message);
            }
            Err(DiscoveryError::TypeLoadAggregate {
                assembly: assembly.location.clone(),
                errors: many.to_vec(),
            })
        }
    }
}

/// Assembly-wide unfolding strategy.
fn unfolding_strategy(reflect: &ReflectHelper, assembly: &AssemblyMetadata) -> UnfoldingStrategy {
    let attributes = reflect.assembly_attributes(assembly);
    let options = reflect::find_map(&attributes, |a| match a {
        Attribute::TestDataSourceOptions { strategy } => Some(*strategy),
        _ => None,
    });
    if let Some(strategy) = options {
        return strategy;
    }
    let legacy = reflect::find_map(&attributes, |a| match a {
        Attribute::TestDataSourceDiscovery { during_execution } => Some(*during_execution),
        _ => None,
    });
    match legacy {
        Some(true) => UnfoldingStrategy::Fold,
        Some(false) | None => UnfoldingStrategy::Unfold,
    }
}

/// What happened to one data source of a method.
enum SourceOutcome {
    Unfolded,
    Failed,
}

/// Mutable state of one `enumerate_loaded` call.
struct Enumeration<'a> {
    context: DiscoveryContext<'a>,
    cache: TypeCache<'a>,
    strategy: UnfoldingStrategy,
    /// Assembly locations and `location + class` keys whose fixtures were already emitted.
    fixtures_emitted: HashSet<String>,
    tests: Vec<UnitTestElement>,
    warnings: Vec<String>,
}

impl<'a> Enumeration<'a> {
    fn discover_type(&mut self, ty: &'a TypeMetadata) -> Result<(), DiscoveryError> {
        let Some(elements) = TypeEnumerator::new(ty, self.context).enumerate(&mut self.warnings) else {
            return Ok(());
        };

        for element in elements {
            let Some(info) = self.cache.method_info(ty, &element)? else {
                self.tests.push(element);
                continue;
            };

            if self.context.settings.consider_fixtures_as_special_tests {
                self.add_fixture_tests(ty, &info);
            }

            if !self.try_unfold(&info, &element) {
                self.tests.push(element);
            }
        }
        Ok(())
    }

    fn add_fixture_tests(&mut self, ty: &TypeMetadata, info: &TestMethodInfo<'_>) {
        let location = self.context.assembly.location.clone();

        if self.fixtures_emitted.insert(location.clone()) {
            let assembly_fixtures = [
                (FixtureKind::AssemblyInitialize, &info.assembly.initialize),
                (FixtureKind::AssemblyCleanup, &info.assembly.cleanup),
            ];
            for (kind, method) in assembly_fixtures {
                if let Some(method) = method {
                    self.tests.push(fixture_element(kind, &method.declaring_type, method, &location));
                }
            }
        }

        if self.fixtures_emitted.insert(format!("{}{}", location, ty.full_name)) {
            let class_fixtures = [
                (FixtureKind::ClassInitialize, &info.class.initialize),
                (FixtureKind::ClassCleanup, &info.class.cleanup),
            ];
            for (kind, methods) in class_fixtures {
                for method in methods {
                    self.tests.push(fixture_element(kind, &ty.full_name, method, &location));
                }
            }
        }
    }

    /// Unfold `element` into its data rows. Returns `false` when the method has no data source and the caller must
    /// keep the original element.
    fn try_unfold(&mut self, info: &TestMethodInfo<'_>, element: &UnitTestElement) -> bool {
        let sources = self
            .context
            .reflect
            .data_sources(&element.test_method.full_class_name, info.method);
        if sources.is_empty() {
            return false;
        }
        if sources.iter().any(|source| self.folds(source)) {
            debug!(test = %element.test_method.fully_qualified_name(), "data sources folded");
            self.tests.push(element.clone());
            return true;
        }

        let mut unfolded = Vec::new();
        let mut index = 0;
        for source in &sources {
            if let SourceOutcome::Failed = self.unfold_source(source, info, element, &mut unfolded, &mut index) {
                unfolded.push(element.clone());
                break;
            }
        }
        self.tests.append(&mut unfolded);
        true
    }

    fn folds(&self, source: &DataSource) -> bool {
        match source.unfolding {
            UnfoldingStrategy::Fold => true,
            UnfoldingStrategy::Auto => self.strategy == UnfoldingStrategy::Fold,
            UnfoldingStrategy::Unfold => false,
        }
    }

    fn unfold_source(
        &mut self,
        source: &DataSource,
        info: &TestMethodInfo<'_>,
        element: &UnitTestElement,
        unfolded: &mut Vec<UnitTestElement>,
        index: &mut usize,
    ) -> SourceOutcome {
        let method = info.method;
        let owner = info.declaring_type.as_str();
        let assembly = self.context.assembly;
        let test_name = element.test_method.fully_qualified_name();

        let rows = match source.get_data(owner, assembly) {
            Ok(rows) => rows,
            Err(message) => {
                self.warn_source_failed(&test_name, source, &message);
                return SourceOutcome::Failed;
            }
        };

        if rows.is_empty() {
            if !self.context.settings.consider_empty_data_source_as_inconclusive {
                self.warn_source_failed(&test_name, source, "the data source returned no rows");
                return SourceOutcome::Failed;
            }
            let display_name = source
                .display_name(method, owner, assembly, None)
                .unwrap_or_else(|| element.display_name.clone());
            unfolded.push(UnitTestElement::without_data(element, display_name, source.ignore_message.clone()));
            return SourceOutcome::Unfolded;
        }

        let mut built = Vec::with_capacity(rows.len());
        for row in rows {
            let case_index = *index + built.len();
            let display_name = row
                .display_name
                .clone()
                .or_else(|| source.display_name(method, owner, assembly, Some(&row.values)))
                .unwrap_or_else(|| element.display_name.clone());

            let arguments = arguments_for(method, row.values);
            let serialized = match arguments.iter().map(DataValue::to_serialized).collect::<Result<Vec<_>, _>>() {
                Ok(serialized) => serialized,
                Err(err) => {
                    warn!(test = %test_name, index = case_index, error = %err, "data row cannot be serialized");
                    self.warnings.push(format!(
                        "Data row {} of {} cannot be serialized ({}); the test is discovered without its data rows",
                        case_index, test_name, err
                    ));
                    return SourceOutcome::Failed;
                }
            };

            built.push(UnitTestElement::with_data_row(
                element,
                RowPayload {
                    display_name,
                    categories: row.categories,
                    data_type: source.data_type(),
                    serialized_data: serialized,
                    test_case_index: case_index,
                    ignore_message: row.ignore_message.or_else(|| source.ignore_message.clone()),
                },
            ));
        }

        *index += built.len();
        unfolded.append(&mut built);
        SourceOutcome::Unfolded
    }

    fn warn_source_failed(&mut self, test_name: &str, source: &DataSource, message: &str) {
        warn!(test = %test_name, source = %source.label(), "{}", message);
        self.warnings.push(format!(
            "Could not expand the data of {} from {}: {}; the test is discovered without its data rows",
            test_name,
            source.label(),
            message
        ));
    }
}

fn fixture_element(kind: FixtureKind, class_name: &str, method: &FixtureMethod, location: &str) -> UnitTestElement {
    let mut element = UnitTestElement::fixture(kind, class_name, &method.name, location);
    if method.declaring_type != class_name {
        element.test_method.declaring_class_full_name = Some(method.declaring_type.clone());
    }
    element
}
