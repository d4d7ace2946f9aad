//! Driving a single fetch to exactly one outcome.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use bytes::Bytes;
use futures_util::FutureExt;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::errors::{NetworkError, NetworkErrorKind};
use crate::domain::ports::ImageFetcher;

/// Cancel handle for a running fetch.
#[derive(Debug, Clone)]
pub struct FetchHandle {
    token: CancellationToken,
}

impl FetchHandle {
    pub(crate) const fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Signals the fetch to stop. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Terminal result of a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The fetcher produced bytes.
    Completed(Bytes),
    /// The fetcher failed.
    Failed(NetworkError),
    /// The token fired before a result was in hand.
    Cancelled,
}

/// Runs `fetcher` for `url` until it finishes or `token` is cancelled.
///
/// Waiting for a slot in `limiter` is part of the cancellable work. When the
/// token fires the fetch future is dropped, which aborts the transport. A
/// panicking fetcher is reported as an aborted transfer.
pub async fn run_fetch(
    fetcher: &dyn ImageFetcher,
    url: &str,
    token: &CancellationToken,
    limiter: &Semaphore,
) -> FetchOutcome {
    let work = async {
        let Ok(_permit) = limiter.acquire().await else {
            return FetchOutcome::Failed(NetworkError::new(
                NetworkErrorKind::Aborted,
                "fetch limiter closed",
            ));
        };

        debug!(url = %url, "Fetching image");
        match AssertUnwindSafe(fetcher.fetch(url)).catch_unwind().await {
            Ok(Ok(bytes)) => FetchOutcome::Completed(bytes),
            Ok(Err(e)) => FetchOutcome::Failed(e),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!(url = %url, panic = %message, "Image fetcher panicked");
                FetchOutcome::Failed(NetworkError::new(NetworkErrorKind::Aborted, message))
            }
        }
    };

    tokio::select! {
        biased;
        () = token.cancelled() => FetchOutcome::Cancelled,
        outcome = work => outcome,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "fetcher panicked".to_string())
}
