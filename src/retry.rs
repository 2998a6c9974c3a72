/// Bounded retry for port calls. Each attempt is capped by a timeout so a
/// hung market-data port cannot stall the monitoring loop; a timed-out
/// attempt counts as a failure and is retried like any other.
macro_rules! retry_port_operation {
    ($context:expr, $operation:expr) => {{
        const MAX_ATTEMPTS: u32 = 3;
        const RETRY_DELAY_SECS: u64 = 3;
        const ATTEMPT_TIMEOUT_SECS: u64 = 10;

        let context_value: String = $context.into();
        let mut attempt = 1;

        loop {
            let outcome = match tokio::time::timeout(
                std::time::Duration::from_secs(ATTEMPT_TIMEOUT_SECS),
                $operation,
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err($crate::errors::EngineError::market_data(
                    &context_value,
                    format!("timed out after {}s", ATTEMPT_TIMEOUT_SECS),
                )),
            };
            match outcome {
                Ok(value) => break Ok(value),
                Err(err) if attempt >= MAX_ATTEMPTS => break Err(err),
                Err(err) => {
                    log::warn!(
                        "Attempt {}/{} for {} failed: {}. Retrying in {}s.",
                        attempt,
                        MAX_ATTEMPTS,
                        context_value,
                        err,
                        RETRY_DELAY_SECS
                    );
                    tokio::time::sleep(std::time::Duration::from_secs(RETRY_DELAY_SECS)).await;
                    attempt += 1;
                }
            }
        }
    }};
}

pub(crate) use retry_port_operation;

#[cfg(test)]
mod tests {
    use crate::errors::EngineError;
    use std::sync::atomic::{AtomicU32, Ordering};

    async fn hangs_forever() -> Result<(), EngineError> {
        std::future::pending::<()>().await;
        Ok(())
    }

    async fn flaky(calls: &AtomicU32) -> Result<u32, EngineError> {
        let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call < 3 {
            Err(EngineError::market_data("005930", "transient"))
        } else {
            Ok(call)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hung_port_call_times_out_instead_of_blocking() {
        let result = retry_port_operation!("quote for 005930", hangs_forever());
        assert!(matches!(
            result,
            Err(EngineError::MarketDataUnavailable { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_port_operation!("quote for 005930", flaky(&calls));
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_are_bounded() {
        let calls = AtomicU32::new(0);
        let result: Result<(), EngineError> = retry_port_operation!("universe metrics", {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(EngineError::market_data("universe", "down")) }
        });
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
