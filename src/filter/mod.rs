//! Test-case filter expressions.
//!
//! The syntax follows the common runner convention:
//!
//! - `Property=value`, `Property!=value`: exact match, ignoring ASCII case;
//! - `Property~value`, `Property!~value`: substring match, ignoring ASCII case;
//! - `a&b`, `a|b`, `!a`, parentheses for grouping (`&` binds tighter than `|`);
//! - a bare `value` means `FullyQualifiedName~value`.
//!
//! Special characters inside values are escaped with `\`.
//!
//! A property with several values (for example `TestCategory`) matches `=` and `~` when any value matches, and
//! matches `!=` and `!~` when no value does.

mod lexer;
mod parser;

use thiserror::Error;

pub use crate::discovery::test_case::properties;

/// Errors raised while parsing a filter expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("filter expression is empty")]
    Empty,

    #[error("unexpected {found} at position {position}, expected {expected}")]
    Unexpected {
        position: usize,
        expected: String,
        found: String,
    },

    #[error("escape character at position {position} is not followed by a character")]
    DanglingEscape { position: usize },
}

/// Supplies the values a filter condition is evaluated against.
pub trait PropertyProvider {
    /// Values of `name`, looked up ignoring ASCII case. Unknown properties have no values.
    fn property_values(&self, name: &str) -> Vec<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Equal,
    NotEqual,
    Contains,
    NotContains,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub property: String,
    pub operation: Operation,
    pub value: String,
}

impl Condition {
    fn matches(&self, provider: &dyn PropertyProvider) -> bool {
        let values = provider.property_values(&self.property);
        let wanted = self.value.to_lowercase();
        let equal = || values.iter().any(|v| v.to_lowercase() == wanted);
        let contains = || values.iter().any(|v| v.to_lowercase().contains(&wanted));
        match self.operation {
            Operation::Equal => equal(),
            Operation::NotEqual => !equal(),
            Operation::Contains => contains(),
            Operation::NotContains => !contains(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterExpr {
    Condition(Condition),
    And(Box<FilterExpr>, Box<FilterExpr>),
    Or(Box<FilterExpr>, Box<FilterExpr>),
    Not(Box<FilterExpr>),
}

impl FilterExpr {
    fn matches(&self, provider: &dyn PropertyProvider) -> bool {
        match self {
            FilterExpr::Condition(condition) => condition.matches(provider),
            FilterExpr::And(left, right) => left.matches(provider) && right.matches(provider),
            FilterExpr::Or(left, right) => left.matches(provider) || right.matches(provider),
            FilterExpr::Not(inner) => !inner.matches(provider),
        }
    }
}

/// A parsed filter expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCaseFilter {
    source: String,
    expr: FilterExpr,
}

impl TestCaseFilter {
    pub fn parse(source: &str) -> Result<Self, FilterError> {
        let tokens = lexer::tokenize(source)?;
        let expr = parser::Parser::new(tokens).parse()?;
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn matches(&self, provider: &dyn PropertyProvider) -> bool {
        self.expr.matches(provider)
    }

    /// The expression as written.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expr(&self) -> &FilterExpr {
        &self.expr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Props(HashMap<&'static str, Vec<&'static str>>);

    impl PropertyProvider for Props {
        fn property_values(&self, name: &str) -> Vec<String> {
            self.0
                .iter()
                .filter(|(key, _)| key.eq_ignore_ascii_case(name))
                .flat_map(|(_, values)| values.iter().map(|v| v.to_string()))
                .collect()
        }
    }

    fn case() -> Props {
        Props(HashMap::from([
            ("FullyQualifiedName", vec!["Calc.Tests.MathTests.Adds"]),
            ("TestCategory", vec!["fast", "unit"]),
            ("Priority", vec!["1"]),
        ]))
    }

    fn matches(expr: &str) -> bool {
        TestCaseFilter::parse(expr).unwrap().matches(&case())
    }

    #[test]
    fn test_conditions() {
        assert!(matches("TestCategory=Fast"));
        assert!(!matches("TestCategory=slow"));
        assert!(matches("TestCategory!=slow"));
        assert!(!matches("TestCategory!=unit"));
        assert!(matches("FullyQualifiedName~MathTests"));
        assert!(matches("FullyQualifiedName!~StringTests"));
        assert!(matches("adds"));
        assert!(!matches("Owner=ana"));
    }

    #[test]
    fn test_precedence_and_grouping() {
        // `&` binds tighter than `|`.
        assert!(matches("TestCategory=slow&Priority=2|Priority=1"));
        assert!(!matches("TestCategory=slow&(Priority=2|Priority=1)"));
        assert!(matches("!(TestCategory=slow)"));
        assert!(!matches("!TestCategory=fast"));
    }

    #[test]
    fn test_parse_shape() {
        let filter = TestCaseFilter::parse("A=1|B~2&!C!=3").unwrap();
        let condition = |property: &str, operation, value: &str| {
            Box::new(FilterExpr::Condition(Condition {
                property: property.to_string(),
                operation,
                value: value.to_string(),
            }))
        };
        assert_eq!(
            filter.expr(),
            &FilterExpr::Or(
                condition("A", Operation::Equal, "1"),
                Box::new(FilterExpr::And(
                    condition("B", Operation::Contains, "2"),
                    Box::new(FilterExpr::Not(condition("C", Operation::NotEqual, "3"))),
                )),
            )
        );
        assert_eq!(filter.source(), "A=1|B~2&!C!=3");
    }

    #[test]
    fn test_errors() {
        assert_eq!(TestCaseFilter::parse("   ").unwrap_err(), FilterError::Empty);
        assert!(matches!(
            TestCaseFilter::parse("(A=1").unwrap_err(),
            FilterError::Unexpected { position: 4, .. }
        ));
        assert!(matches!(
            TestCaseFilter::parse("A=").unwrap_err(),
            FilterError::Unexpected { position: 2, .. }
        ));
        assert!(matches!(
            TestCaseFilter::parse("A=1)").unwrap_err(),
            FilterError::Unexpected { position: 3, .. }
        ));
        assert_eq!(
            TestCaseFilter::parse("A=1|").unwrap_err().to_string(),
            "unexpected end of expression at position 4, expected a property or value"
        );
    }
}
