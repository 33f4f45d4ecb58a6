//! Completion validator
//!
//! The one invariant that prevents false success: a done claim is honored
//! only when a test-execution action has run during this run AND its current
//! record reports success AND no file edit superseded it. Enforced inside
//! the loop, never left to the engine's self-report.

use crate::types::Run;

/// Verdict on a done claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DoneVerdict {
    /// Terminate the run as succeeded.
    Accepted,
    /// Keep going; the reason is fed back into the next proposal context.
    Rejected {
        /// Explanation injected into the engine's next turn
        reason: String,
    },
}

/// Validate a done claim against the run's test outcome record.
#[must_use]
pub fn validate_done(run: &Run) -> DoneVerdict {
    let Some(outcome) = run.test_outcome() else {
        return DoneVerdict::Rejected {
            reason: "no test run has been recorded for this run; run the test suite before \
                     claiming completion"
                .to_string(),
        };
    };

    if !outcome.passed {
        return DoneVerdict::Rejected {
            reason: format!(
                "most recent test run failed ({}); fix the failures and re-run tests",
                outcome.summary
            ),
        };
    }

    if run.edits_since_test() > 0 {
        return DoneVerdict::Rejected {
            reason: format!(
                "{} file edit(s) were made after the last passing test run; re-run the test \
                 suite to validate them",
                run.edits_since_test()
            ),
        };
    }

    DoneVerdict::Accepted
}
