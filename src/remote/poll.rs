//! Cancellation-aware primitives shared by the polling clients

use crate::remote::error::{RemoteError, Result};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Sleep for `interval`, returning early with `Cancelled` if `cancel` fires
pub async fn tick(cancel: &CancellationToken, interval: Duration) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(RemoteError::Cancelled),
        _ = tokio::time::sleep(interval) => Ok(()),
    }
}

/// Drive `fut` to completion unless `cancel` fires first
pub async fn until_cancelled<F, T>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(RemoteError::Cancelled);
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(RemoteError::Cancelled),
        result = fut => result,
    }
}
