//! `$$` expansion.

use thiserror::Error;
use tracing::trace;

pub const PLACEHOLDER: &str = "$$";

#[derive(Debug, PartialEq, Error)]
pub enum ExpandError {
    #[error("line too long after expansion ({length} bytes, limit is {limit})")]
    TooLong { length: usize, limit: usize },
}

/// Replaces every `$$` in `line` with `pid`, left to right.
///
/// The replacement is numeric, so a placeholder can never be formed by a
/// substitution and a single pass is enough. A result longer than `limit`
/// bytes is rejected rather than truncated.
pub fn expand_pid(line: &str, pid: u32, limit: usize) -> Result<String, ExpandError> {
    let expanded = if line.contains(PLACEHOLDER) {
        line.replace(PLACEHOLDER, &pid.to_string())
    } else {
        line.to_owned()
    };

    if expanded.len() > limit {
        return Err(ExpandError::TooLong {
            length: expanded.len(),
            limit,
        });
    }

    trace!(%line, %expanded, "expanded line");
    Ok(expanded)
}
