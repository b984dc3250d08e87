//! Protocol timing defaults and an async timeout wrapper.
//!
//! The constants are referenced by the configuration defaults; the values
//! mirror the reference deployment (50 ms sweep/tick granularity, 1 s
//! steady-state idle window, 15 s connect grace, 5 s client failure
//! window).

use std::future::Future;
use std::time::Duration;

use crate::error::{ProtocolError, Result};

/// Interval of the server's peer sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(50);

/// Steady-state idle window after which an updated peer expires. Also the
/// poll delay recommended to connecting clients.
pub const DEFAULT_DISCONNECT_DELAY: Duration = Duration::from_secs(1);

/// Grace window for a peer that has connected but never sent data.
pub const DEFAULT_CONNECT_GRACE: Duration = Duration::from_secs(15);

/// Client-side window of consecutive failures before forcing a disconnect.
pub const DEFAULT_CLIENT_DISCONNECT_DELAY: Duration = Duration::from_secs(5);

/// Per-request timeout on the client's HTTP calls.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Floor for the derived poll interval.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Await a future, failing with [`ProtocolError::Timeout`] if it does not
/// complete within `duration`.
pub async fn with_timeout<F>(duration: Duration, future: F) -> Result<F::Output>
where
    F: Future,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| ProtocolError::Timeout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_within_window() {
        let value = with_timeout(Duration::from_secs(1), async { 7 }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn elapses_into_timeout_error() {
        let result = with_timeout(Duration::from_millis(10), std::future::pending::<()>()).await;
        assert!(matches!(result, Err(ProtocolError::Timeout)));
    }
}
