//! Cancellation of in-flight registry operations.

use std::future::Future;

use hoist_core::error::{PublishError, Result};
use tokio_util::sync::CancellationToken;

/// Run `fut` unless `token` is cancelled first.
///
/// A token that is already cancelled wins without polling `fut`.
pub async fn cancellable<T, F>(token: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(PublishError::Cancelled),
        result = fut => result,
    }
}

/// Fail with `Cancelled` if the token has fired.
pub fn check(token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() {
        Err(PublishError::Cancelled)
    } else {
        Ok(())
    }
}
