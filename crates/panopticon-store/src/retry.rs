//! Retry wrapper for operations that can hit a busy database.

use std::time::Duration;

use crate::client::{Result, StoreError};

/// Run `op`, retrying while it fails with a busy/locked SQLite condition.
///
/// The delay doubles after every failed attempt. Any other error is returned
/// immediately; running out of attempts yields
/// [`StoreError::RetriesExhausted`] wrapping the last busy error.
pub fn execute_with_retry<T, F>(max_attempts: u32, initial_delay: Duration, mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let attempts = max_attempts.max(1);
    let mut delay = initial_delay;
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_busy() && attempt < attempts => {
                tracing::warn!(
                    error = %e,
                    attempt,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying database operation"
                );
                std::thread::sleep(delay);
                delay = delay.saturating_mul(2);
            }
            Err(e) if e.is_busy() => {
                return Err(StoreError::RetriesExhausted {
                    attempts,
                    source: Box::new(e),
                });
            }
            Err(e) => return Err(e),
        }
    }
}
