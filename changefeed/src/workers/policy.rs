use crate::error::{ErrorKind, IndexerError};

/// What the consume-commit loop does after an operation failed.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FailureDirective {
    /// Abandon the current cycle without committing, rewind the broker and keep polling.
    RecoverAtCycleBoundary,
    /// Stop the loop, release both clients and return the error.
    Abort,
}

/// Policy describing how an [`IndexerError`] is handled by the consume-commit loop.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ErrorHandlingPolicy {
    directive: FailureDirective,
    solution: Option<&'static str>,
}

impl ErrorHandlingPolicy {
    const fn new(directive: FailureDirective, solution: Option<&'static str>) -> Self {
        Self {
            directive,
            solution,
        }
    }

    pub fn directive(&self) -> FailureDirective {
        self.directive
    }

    pub fn is_recoverable(&self) -> bool {
        self.directive == FailureDirective::RecoverAtCycleBoundary
    }

    /// Returns an optional operator-facing hint.
    pub fn solution(&self) -> Option<&'static str> {
        self.solution
    }
}

/// Builds an [`ErrorHandlingPolicy`] from an [`IndexerError`].
///
/// Transport failures of the bulk submission and of the offset commit, rejected credentials
/// included, are recovered at the cycle boundary: the batch is redelivered and re-indexed by
/// identifier. Anything else stops the loop. Failures while starting never reach the policy, they
/// always stop the loop.
pub fn build_error_handling_policy(error: &IndexerError) -> ErrorHandlingPolicy {
    match error.kind() {
        ErrorKind::StoreConnectionFailed
        | ErrorKind::StoreRequestFailed
        | ErrorKind::StoreResponseInvalid
        | ErrorKind::BrokerCommitFailed => {
            ErrorHandlingPolicy::new(FailureDirective::RecoverAtCycleBoundary, None)
        }
        ErrorKind::StoreAuthenticationFailed => ErrorHandlingPolicy::new(
            FailureDirective::RecoverAtCycleBoundary,
            Some("Verify the store credentials in `store.username` / `store.password`."),
        ),

        ErrorKind::BrokerConnectionFailed | ErrorKind::BrokerSubscribeFailed => {
            ErrorHandlingPolicy::new(
                FailureDirective::Abort,
                Some("Verify `broker.bootstrap_servers`, the topic and the client properties."),
            )
        }
        ErrorKind::BrokerSeekFailed => ErrorHandlingPolicy::new(
            FailureDirective::Abort,
            Some("Restart the indexer, uncommitted messages are redelivered from the last commit."),
        ),
        ErrorKind::ConfigError => ErrorHandlingPolicy::new(
            FailureDirective::Abort,
            Some("Fix the configuration and restart the indexer."),
        ),

        #[cfg(feature = "failpoints")]
        ErrorKind::WithRecoverable => {
            ErrorHandlingPolicy::new(FailureDirective::RecoverAtCycleBoundary, None)
        }
        #[cfg(feature = "failpoints")]
        ErrorKind::WithFatal => {
            ErrorHandlingPolicy::new(FailureDirective::Abort, Some("Cannot recover this error."))
        }

        _ => ErrorHandlingPolicy::new(FailureDirective::Abort, None),
    }
}
