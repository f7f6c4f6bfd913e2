use std::future::Future;
use std::time::Duration;

/// Bounded retry of store calls with a fixed delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retry {
    pub retries: usize,
    pub delay: Duration,
}

impl Retry {
    pub const fn none() -> Self {
        Self {
            retries: 0,
            delay: Duration::ZERO,
        }
    }

    pub async fn run<T, F, Fut>(&self, what: &str, mut f: F) -> Result<T, anyhow::Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, anyhow::Error>>,
    {
        let mut retry_count = 0;
        loop {
            match f().await {
                Ok(v) => return Ok(v),
                Err(err) if retry_count < self.retries => {
                    retry_count += 1;
                    log::warn!(
                        "Unable to {what}: {err}. Retrying ({retry_count}/{})",
                        self.retries
                    );
                    tokio::time::sleep(self.delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for Retry {
    fn default() -> Self {
        Self {
            retries: 3,
            delay: Duration::from_secs(1),
        }
    }
}
