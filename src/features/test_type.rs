use serde::{Deserialize, Serialize};
use std::fmt;

/// Diagnostic domains the app knows how to scan.
///
/// `Unset` is never produced by the link parser; it only appears when a host
/// clears the picker or builds a selection by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestType {
    Covid,
    Influenza,
    Pregnancy,
    Unset,
}

/// Used when a capture happens before any link was opened.
pub const DEFAULT_TEST_TYPE: TestType = TestType::Covid;

impl TestType {
    /// Link vocabulary, in listing order.
    pub const LINKABLE: [TestType; 3] = [TestType::Covid, TestType::Influenza, TestType::Pregnancy];

    #[cfg(test)]
    pub const ALL: [TestType; 4] = [
        TestType::Covid,
        TestType::Influenza,
        TestType::Pregnancy,
        TestType::Unset,
    ];

    /// Exact, case-sensitive lookup of a link token.
    pub fn from_token(token: &str) -> Option<TestType> {
        Self::LINKABLE.into_iter().find(|t| t.token() == token)
    }

    pub fn token(self) -> &'static str {
        match self {
            TestType::Covid => "covid",
            TestType::Influenza => "influenza",
            TestType::Pregnancy => "pregnancy",
            TestType::Unset => "unset",
        }
    }

    pub fn is_set(self) -> bool {
        !matches!(self, TestType::Unset)
    }
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Which model resource backs a test type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClassifierConfig {
    pub test_type: TestType,
    pub model_identifier: &'static str,
}

const CLASSIFIER_TABLE: &[ClassifierConfig] = &[
    ClassifierConfig {
        test_type: TestType::Covid,
        model_identifier: "antibody_covid5",
    },
    ClassifierConfig {
        test_type: TestType::Pregnancy,
        model_identifier: "antibody_preg1",
    },
];

/// Static model lookup. `None` means there is no model for that type and the
/// caller must not substitute another one.
pub fn classifier_config(test_type: TestType) -> Option<ClassifierConfig> {
    CLASSIFIER_TABLE
        .iter()
        .copied()
        .find(|c| c.test_type == test_type)
}
