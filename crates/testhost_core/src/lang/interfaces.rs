//! Data-source capability interfaces.
//!
//! Custom data sources are recognized by the interfaces their attribute type implements rather than by name, so the
//! vocabulary here is matched against `AttributeData::interfaces`.

use crate::lang::registry::simple_name;

/// Stable identifier for recognized capability interfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterfaceId {
    /// Produces rows of arguments for a test method.
    TestDataSource,
    /// Carries a per-source unfolding strategy.
    UnfoldingCapability,
    /// Carries a per-source ignore message.
    IgnoreCapability,
}

const INTERFACES: &[(InterfaceId, &str)] = &[
    (InterfaceId::TestDataSource, "ITestDataSource"),
    (InterfaceId::UnfoldingCapability, "ITestDataSourceUnfoldingCapability"),
    (InterfaceId::IgnoreCapability, "ITestDataSourceIgnoreCapability"),
];

/// Resolve a (possibly namespace-qualified) interface name.
pub fn from_type_name(type_name: &str) -> Option<InterfaceId> {
    let name = simple_name(type_name);
    INTERFACES.iter().find(|(_, spelling)| *spelling == name).map(|(id, _)| *id)
}

/// Return the canonical spelling of an interface.
pub fn as_str(id: InterfaceId) -> &'static str {
    INTERFACES
        .iter()
        .find(|(candidate, _)| *candidate == id)
        .map_or("IUnknown", |(_, spelling)| spelling)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_spelling() {
        for (id, spelling) in INTERFACES {
            assert_eq!(from_type_name(spelling), Some(*id));
            assert_eq!(as_str(*id), *spelling);
        }
        assert_eq!(from_type_name("TestFramework.ITestDataSource"), Some(InterfaceId::TestDataSource));
    }
}
