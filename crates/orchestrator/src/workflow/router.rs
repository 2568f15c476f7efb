//! Conditional routing: the one predicate the feature-development template
//! needs after `implement` to decide whether `test`/`operate` still run.

use crate::task::{Task, TaskOutcome};

/// `true` when the fan-out after `implement` should be skipped: the task
/// failed outright, or it succeeded but wrote no files to the workspace.
pub fn implement_fan_out_should_skip(implement: &Task) -> bool {
    match &implement.result {
        Some(TaskOutcome::Failure(_)) => true,
        Some(TaskOutcome::Success(success)) => success.files_written.is_empty(),
        None => true,
    }
}
