//! Well-known trait keys attached to discovered elements.

/// Trait key carrying the owner of a test.
pub const OWNER: &str = "Owner";

/// Trait key carrying the priority of a test.
pub const PRIORITY: &str = "Priority";

/// Trait key marking a fixture pseudo-test; the value is the fixture kind.
pub const FIXTURES_TEST: &str = "FixturesTest";
