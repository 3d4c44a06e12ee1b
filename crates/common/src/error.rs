//! Error handling helpers.

use anyhow::Error;

/// Flattens an error stack into a single `: `-separated line for logging.
pub fn chain(err: &Error) -> String {
    err.chain()
        .map(|cause| cause.to_string())
        .collect::<Vec<_>>()
        .join(": ")
}
