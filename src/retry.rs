//! Shared adapter-retry helper (spec §7): "up to 3 attempts with 50ms
//! linear backoff on generic exceptions," applied at every adapter call
//! site named in §7 (VTXO creation, transaction broadcast/confirm, Lightning
//! invoice create/pay). Modeled on the teacher's `perform_handshake_with_retry`
//! loop (`p2p/connection.rs`): a fixed attempt budget, a sleep before every
//! retry but the first attempt, and the last error propagated once the
//! budget is exhausted.

use std::future::Future;
use std::time::Duration;

use crate::error::GatewayResult;

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_MS: u64 = 50;

/// Runs `f` up to three times, sleeping `50ms * attempt` between failures.
/// `op_name` is only used for the warning log on a retried attempt.
pub async fn with_retry<T, F, Fut>(op_name: &str, mut f: F) -> GatewayResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = GatewayResult<T>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < MAX_ATTEMPTS => {
                tracing::warn!(op = op_name, attempt, error = %e, "adapter call failed, retrying");
                tokio::time::sleep(Duration::from_millis(BACKOFF_MS * attempt as u64)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AdapterError, GatewayError};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry_on_first_try() {
        let calls = AtomicU32::new(0);
        let result = with_retry("op", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, GatewayError>(42)
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_up_to_three_times_then_gives_up() {
        let calls = AtomicU32::new(0);
        let result = with_retry("op", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<u32, _>(GatewayError::Adapter(AdapterError::Unavailable("down".to_string())))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_retry("op", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(GatewayError::Adapter(AdapterError::Timeout("slow".to_string())))
            } else {
                Ok(n)
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
