use fail::fail_point;

use crate::bail;
use crate::error::{ErrorKind, IndexerResult};

/// Evaluated after a bulk submission succeeded and before its offsets are committed.
pub const SUBMIT_BULK__BEFORE_COMMIT: &str = "submit_bulk.before_commit";

/// Evaluated right before the bulk submission.
pub const SUBMIT_BULK__BEFORE_SEND: &str = "submit_bulk.before_send";

/// Evaluates the fail point `name`, returning an error when it is configured to `return`.
///
/// The optional parameter picks the error kind: `recoverable` or `fatal` (the default).
pub fn indexer_fail_point(name: &str) -> IndexerResult<()> {
    fail_point!(name, |parameter| {
        let error_kind = match parameter.as_deref() {
            Some("recoverable") => ErrorKind::WithRecoverable,
            _ => ErrorKind::WithFatal,
        };

        bail!(
            error_kind,
            "An error occurred in a fail point",
            format!("The failpoint '{name}' returned an error")
        );
    });

    Ok(())
}
