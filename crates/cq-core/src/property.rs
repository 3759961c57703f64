//! Property results and the checker trait.

use crate::counterexample::Counterexample;

/// Outcome of checking one named property.
#[derive(Debug, Clone)]
pub struct PropertyResult {
    /// Property name, e.g. `NoLostElements`.
    pub name: &'static str,
    /// Whether the property held.
    pub holds: bool,
    /// What went wrong, if it did not.
    pub violation: Option<String>,
    /// Failure path, when the checker could build one.
    pub counterexample: Option<Counterexample>,
}

impl PropertyResult {
    #[must_use]
    pub fn pass(name: &'static str) -> Self {
        Self {
            name,
            holds: true,
            violation: None,
            counterexample: None,
        }
    }

    #[must_use]
    pub fn fail(
        name: &'static str,
        violation: impl Into<String>,
        counterexample: Option<Counterexample>,
    ) -> Self {
        Self {
            name,
            holds: false,
            violation: Some(violation.into()),
            counterexample,
        }
    }

    /// One-line summary, `[PASS] name` or `[FAIL] name: violation`.
    #[must_use]
    pub fn summary(&self) -> String {
        match &self.violation {
            None => format!("[PASS] {}", self.name),
            Some(v) => format!("[FAIL] {}: {}", self.name, v),
        }
    }
}

/// A set of properties checked together.
pub trait PropertyChecker {
    /// Check every property and return one result per property.
    fn check_all(&self) -> Vec<PropertyResult>;

    /// Whether every property held.
    fn all_hold(&self) -> bool {
        self.check_all().iter().all(|r| r.holds)
    }

    /// Only the failed results.
    fn violations(&self) -> Vec<PropertyResult> {
        self.check_all().into_iter().filter(|r| !r.holds).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<PropertyResult>);

    impl PropertyChecker for Fixed {
        fn check_all(&self) -> Vec<PropertyResult> {
            self.0.clone()
        }
    }

    #[test]
    fn test_all_hold_and_violations() {
        let ok = Fixed(vec![PropertyResult::pass("A"), PropertyResult::pass("B")]);
        assert!(ok.all_hold());
        assert!(ok.violations().is_empty());

        let bad = Fixed(vec![
            PropertyResult::pass("A"),
            PropertyResult::fail("B", "broken", None),
        ]);
        assert!(!bad.all_hold());
        let violations = bad.violations();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].summary(), "[FAIL] B: broken");
    }
}
