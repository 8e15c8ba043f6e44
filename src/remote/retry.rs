use std::thread;
use std::time::Duration;

use tracing::warn;

use super::RemoteError;

/// Default pause before each retry of a transient failure.
pub(crate) const DEFAULT_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

/// Runs `f`, retrying transient failures once per entry in `delays`.
///
/// Only errors for which [`RemoteError::is_transient`] holds are retried
/// (network failures and HTTP 5xx); everything else is returned at once.
/// After the delays are exhausted the last error is returned.
pub fn retry_with_backoff<F, T>(delays: &[Duration], mut f: F) -> Result<T, RemoteError>
where
    F: FnMut() -> Result<T, RemoteError>,
{
    let mut last_error = match f() {
        Ok(result) => return Ok(result),
        Err(e) if !e.is_transient() => return Err(e),
        Err(e) => e,
    };

    for (attempt, delay) in delays.iter().enumerate() {
        warn!(attempt = attempt + 1, error = %last_error, "retrying remote request");
        thread::sleep(*delay);

        match f() {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => last_error = e,
        }
    }

    Err(last_error)
}
