//! Failure tolerance for run execution.

use serde::{Deserialize, Serialize};

/// What the controller does after a node fails permanently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Launch no further nodes once any node has failed (default).
    ///
    /// Attempts already in flight, and their retries, still finish so their
    /// results are recorded.
    #[default]
    FailFast,
    /// Keep launching nodes whose predecessors all succeeded.
    ///
    /// Only descendants of the failed node are skipped.
    ContinueIndependent,
}

impl FailureMode {
    /// Returns true if new nodes may start after a failure has been recorded.
    #[must_use]
    pub fn launches_after_failure(&self) -> bool {
        matches!(self, Self::ContinueIndependent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_fail_fast() {
        assert_eq!(FailureMode::default(), FailureMode::FailFast);
        assert!(!FailureMode::FailFast.launches_after_failure());
        assert!(FailureMode::ContinueIndependent.launches_after_failure());
    }

    #[test]
    fn test_serde_names() {
        let mode: FailureMode = serde_json::from_str(r#""continue_independent""#).unwrap();
        assert_eq!(mode, FailureMode::ContinueIndependent);
    }
}
