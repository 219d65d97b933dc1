macro_rules! retry_oracle_operation {
    ($context:expr, $operation:expr) => {
        retry_oracle_operation!($context, $operation, 3, 2)
    };
    ($context:expr, $operation:expr, $max_attempts:expr, $retry_delay_secs:expr) => {{
        let context_value: String = $context.into();
        let max_attempts: u32 = $max_attempts;
        let retry_delay_secs: u64 = $retry_delay_secs;
        let mut attempt = 1;

        loop {
            match ($operation).await {
                Ok(value) => break Ok(value),
                Err(err) if attempt >= max_attempts => break Err(err),
                Err(err) => {
                    log::warn!(
                        "Attempt {}/{} for {} failed: {}. Retrying in {}s.",
                        attempt,
                        max_attempts,
                        context_value,
                        err,
                        retry_delay_secs
                    );
                    tokio::time::sleep(std::time::Duration::from_secs(retry_delay_secs)).await;
                    attempt += 1;
                }
            }
        }
    }};
}

pub(crate) use retry_oracle_operation;

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let attempts = Cell::new(0u32);
        let result: Result<u32, String> = retry_oracle_operation!(
            "flaky operation",
            async {
                attempts.set(attempts.get() + 1);
                if attempts.get() < 3 {
                    Err("transient".to_string())
                } else {
                    Ok(7)
                }
            },
            3,
            0
        );

        assert_eq!(result, Ok(7));
        assert_eq!(attempts.get(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_the_attempt_budget() {
        let attempts = Cell::new(0u32);
        let result: Result<u32, String> = retry_oracle_operation!(
            "unreachable endpoint",
            async {
                attempts.set(attempts.get() + 1);
                Err("connection refused".to_string())
            },
            2,
            0
        );

        assert_eq!(result, Err("connection refused".to_string()));
        assert_eq!(attempts.get(), 2);
    }
}
