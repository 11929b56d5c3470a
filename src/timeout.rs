//! Optional deadline helper for waits on the streaming server.
//!
//! Waits that the server must acknowledge (handshake, outbound frames) are
//! bounded by default but can be made unbounded by passing `None`.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// Awaits `future`, giving up after `limit` when one is set.
///
/// On expiry the configured limit is returned as the error so callers can
/// report it.
pub(crate) async fn within<T, Fut>(limit: Option<Duration>, future: Fut) -> Result<T, Duration>
where
    Fut: Future<Output = T>,
{
    let Some(limit) = limit else {
        return Ok(future.await);
    };

    match tokio::time::timeout(limit, future).await {
        Ok(value) => Ok(value),
        Err(_) => {
            debug!(event = "deadline_elapsed", limit_ms = limit.as_millis() as u64);
            Err(limit)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::within;

    #[test]
    fn unbounded_wait_resolves_value() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("runtime");

        runtime.block_on(async {
            let value = within(None, async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                7
            })
            .await;
            assert_eq!(value, Ok(7));
        });
    }

    #[test]
    fn bounded_wait_reports_limit_on_expiry() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("runtime");

        runtime.block_on(async {
            let limit = Duration::from_millis(5);
            let result = within(Some(limit), std::future::pending::<()>()).await;
            assert_eq!(result, Err(limit));
        });
    }
}
