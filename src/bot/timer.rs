use async_trait::async_trait;
use std::time::Duration;

/// Suspension point used for every wait in the bot (poll interval, cooldown,
/// backoff, confirmation polling). Injected so the loop can run without real delays.
#[async_trait]
pub trait Timer: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioTimer;

#[async_trait]
impl Timer for TokioTimer {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
