use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies the test framework a test ran under.
///
/// Distinct frameworks are fully isolated: a JUnit test and a TestNG test
/// with the same class and method names are different tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameworkId(pub u8);

impl fmt::Display for FrameworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "framework#{}", self.0)
    }
}

/// Names one test method under one framework, in interned form.
///
/// Enumerated directly as a struct (structural equality and hash), not via
/// string concatenation, so identities stay dense and unambiguous.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TestIdentity {
    pub class_id: u32,
    pub method_id: u32,
    pub framework_id: u8,
}
