//! Accumulates the outcome of best-effort steps.

use serde::{Deserialize, Serialize};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// One attempted step and, if it failed, why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    /// What was attempted, e.g. `chown root:root /home/alice`.
    pub step: String,

    /// The error message if the step failed.
    pub error: Option<String>,
}

/// The record of a best-effort pass.
///
/// Failed steps do not stop the pass. They are logged as they happen and collected here so the
/// caller can surface or assert on partial failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    /// What the pass was run for, usually a username.
    pub subject: String,

    /// Every step in the order it was attempted.
    pub steps: Vec<StepOutcome>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl StepReport {
    /// Creates an empty report for `subject`.
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            steps: Vec::new(),
        }
    }

    /// Records the result of a step, logging failures.
    pub fn record<T, E>(&mut self, step: impl Into<String>, result: Result<T, E>) -> Option<T>
    where
        E: std::fmt::Display,
    {
        let step = step.into();
        match result {
            Ok(value) => {
                tracing::debug!(subject = %self.subject, step = %step, "step succeeded");
                self.steps.push(StepOutcome { step, error: None });
                Some(value)
            }
            Err(e) => {
                let error = e.to_string();
                tracing::warn!(subject = %self.subject, step = %step, "step failed: {error}");
                self.steps.push(StepOutcome {
                    step,
                    error: Some(error),
                });
                None
            }
        }
    }

    /// Appends every step of `other`.
    pub fn merge(&mut self, other: StepReport) {
        self.steps.extend(other.steps);
    }

    /// Returns true if no step failed.
    pub fn is_clean(&self) -> bool {
        self.steps.iter().all(|s| s.error.is_none())
    }

    /// The failed steps.
    pub fn failures(&self) -> impl Iterator<Item = &StepOutcome> {
        self.steps.iter().filter(|s| s.error.is_some())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_keeps_going_after_failure() {
        let mut report = StepReport::new("alice");

        assert_eq!(report.record("first", Ok::<_, String>(1)), Some(1));
        assert_eq!(report.record("second", Err::<(), _>("boom")), None);
        report.record("third", Ok::<_, String>(()));

        assert_eq!(report.steps.len(), 3);
        assert!(!report.is_clean());

        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].step, "second");
        assert_eq!(failures[0].error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_merge() {
        let mut all = StepReport::new("all users");
        let mut alice = StepReport::new("alice");
        alice.record("chown", Ok::<_, String>(()));
        let mut bob = StepReport::new("bob");
        bob.record("chown", Err::<(), _>("no such user"));

        all.merge(alice);
        assert!(all.is_clean());
        all.merge(bob);
        assert!(!all.is_clean());
        assert_eq!(all.steps.len(), 2);
    }
}
