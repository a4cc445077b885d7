//! Runner-facing discovery: sources in, test cases and messages out.

use testhost_core::DiscoveryResult;
use tracing::info;

use super::test_case::TestCase;
use super::wrapper::AssemblyEnumeratorWrapper;
use crate::filter::TestCaseFilter;
use crate::settings::RunSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLevel {
    Informational,
    Warning,
    Error,
}

/// Receives user-facing discovery messages.
pub trait MessageLogger {
    fn send_message(&mut self, level: MessageLevel, message: &str);
}

/// Receives discovered test cases, in discovery order.
pub trait DiscoverySink {
    fn send_test_case(&mut self, test_case: TestCase);
}

/// Discovers every source and reports the surviving test cases.
pub struct UnitTestDiscoverer {
    wrapper: AssemblyEnumeratorWrapper,
}

impl UnitTestDiscoverer {
    pub fn new(wrapper: AssemblyEnumeratorWrapper) -> Self {
        Self { wrapper }
    }

    /// Discover `sources` one after the other and return the number of test cases sent.
    ///
    /// A source that fails is reported through `logger` and skipped. Warnings are sent at warning level, or at error
    /// level when the settings say so. Fixture pseudo-tests of a source are only sent when at least one of its real
    /// tests survives `filter`.
    pub fn discover_tests(
        &self,
        sources: &[String],
        settings: &RunSettings,
        logger: &mut dyn MessageLogger,
        sink: &mut dyn DiscoverySink,
        filter: Option<&TestCaseFilter>,
    ) -> usize {
        let warning_level = if settings.adapter.treat_discovery_warnings_as_errors {
            MessageLevel::Error
        } else {
            MessageLevel::Warning
        };

        let mut sent = 0;
        for source in sources {
            let result = match self.wrapper.get_tests(source, settings) {
                Ok(Some(result)) => result,
                Ok(None) => continue,
                Err(e) => {
                    let message = format!("Failed to discover tests from {}: {}", source, e);
                    logger.send_message(MessageLevel::Warning, &message);
                    continue;
                }
            };

            for warning in &result.warnings {
                logger.send_message(warning_level, warning);
            }

            let cases = select(source, &result, filter);
            info!(source = %source, discovered = result.tests.len(), sent = cases.len(), "discovery finished");
            sent += cases.len();
            for case in cases {
                sink.send_test_case(case);
            }
        }
        sent
    }
}

fn select(source: &str, result: &DiscoveryResult, filter: Option<&TestCaseFilter>) -> Vec<TestCase> {
    let cases: Vec<TestCase> = result
        .tests
        .iter()
        .map(|element| TestCase::from_element(element, source))
        .filter(|case| case.is_fixture() || filter.is_none_or(|filter| filter.matches(case)))
        .collect();

    if cases.iter().any(|case| !case.is_fixture()) {
        cases
    } else {
        Vec::new()
    }
}
