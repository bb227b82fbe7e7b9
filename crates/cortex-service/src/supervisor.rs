use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Maximum restart attempts before the service gives up.
pub const MAX_RESTARTS: u32 = 5;
/// Base restart delay; the actual delay scales with the attempt count.
pub const BASE_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
#[error("service '{name}' failed permanently after {attempts} restarts: {last_error}")]
pub struct SuperviseError {
    pub name: String,
    pub attempts: u32,
    pub last_error: String,
}

/// Run a service loop, restarting it on failure.
///
/// A clean exit (`Ok`) stops supervision; an error sleeps
/// `base_delay * restart_count` and retries, up to `MAX_RESTARTS` attempts,
/// after which the last error is returned for the caller to report.
/// Cancellation stops the loop at the next restart boundary.
pub async fn supervise<F, Fut>(
    name: &str,
    cancel: CancellationToken,
    mut run: F,
) -> Result<(), SuperviseError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let mut restarts: u32 = 0;

    loop {
        match run().await {
            Ok(()) => {
                info!(service = name, "service stopped cleanly");
                return Ok(());
            }
            Err(e) => {
                restarts += 1;
                error!(
                    service = name,
                    attempt = restarts,
                    max = MAX_RESTARTS,
                    error = %e,
                    "service crashed"
                );

                if restarts >= MAX_RESTARTS {
                    return Err(SuperviseError {
                        name: name.to_string(),
                        attempts: restarts,
                        last_error: e.to_string(),
                    });
                }
                if cancel.is_cancelled() {
                    info!(service = name, "shutdown requested, not restarting");
                    return Ok(());
                }

                let delay = BASE_DELAY * restarts;
                info!(service = name, delay_s = delay.as_secs(), "restarting");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        info!(service = name, "shutdown requested during backoff");
                        return Ok(());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn clean_exit_stops_supervision() {
        let runs = Arc::new(AtomicU32::new(0));
        let runs2 = runs.clone();
        let result = supervise("test", CancellationToken::new(), move || {
            let runs = runs2.clone();
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn crashing_service_exhausts_restarts() {
        let runs = Arc::new(AtomicU32::new(0));
        let runs2 = runs.clone();
        let result = supervise("test", CancellationToken::new(), move || {
            let runs = runs2.clone();
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("boom")
            }
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, MAX_RESTARTS);
        assert_eq!(runs.load(Ordering::SeqCst), MAX_RESTARTS);
        assert!(err.last_error.contains("boom"));
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_after_crashes_ends_cleanly() {
        let runs = Arc::new(AtomicU32::new(0));
        let runs2 = runs.clone();
        let result = supervise("test", CancellationToken::new(), move || {
            let runs = runs2.clone();
            async move {
                // Fail twice, then stop cleanly.
                if runs.fetch_add(1, Ordering::SeqCst) < 2 {
                    anyhow::bail!("transient")
                }
                Ok(())
            }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancellation_stops_restarting() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = supervise("test", cancel, || async { anyhow::bail!("boom") }).await;
        // One attempt, then shutdown wins over restart.
        assert!(result.is_ok());
    }
}
