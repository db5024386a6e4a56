// Idle connection reaper - periodic sweep over the pool

use crate::application::ShutdownToken;
use crate::port::ConnectionReaper;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, warn};

pub struct IdleReaper {
    reaper: Arc<dyn ConnectionReaper>,
    period: Duration,
}

impl IdleReaper {
    pub fn new(reaper: Arc<dyn ConnectionReaper>, period: Duration) -> Self {
        Self { reaper, period }
    }

    /// Sweep every `period` until shutdown
    pub async fn run(self, mut shutdown: ShutdownToken) {
        info!(period_secs = self.period.as_secs(), "Idle reaper started");

        let mut tick = interval_at(Instant::now() + self.period, self.period);

        loop {
            tokio::select! {
                _ = tick.tick() => {}
                _ = shutdown.wait() => break,
            }

            match self.reaper.reap_idle().await {
                Ok(0) => debug!("No idle connections to reap"),
                Ok(closed) => info!(closed = closed, "Reaped idle connections"),
                Err(e) => warn!(error = %e, "Idle reap failed"),
            }
        }

        info!("Idle reaper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::shutdown_channel;
    use crate::error::AppError;
    use crate::port::connection_reaper::MockConnectionReaper;

    #[tokio::test(start_paused = true)]
    async fn test_sweeps_until_shutdown_and_survives_errors() {
        let mut mock = MockConnectionReaper::new();
        let mut calls = 0;
        mock.expect_reap_idle().times(3).returning(move || {
            calls += 1;
            if calls == 2 {
                Err(AppError::PoolUnavailable("draining".into()))
            } else {
                Ok(1)
            }
        });

        let reaper = IdleReaper::new(Arc::new(mock), Duration::from_secs(300));
        let (tx, token) = shutdown_channel();
        let handle = tokio::spawn(reaper.run(token));

        tokio::time::sleep(Duration::from_secs(301 * 3)).await;
        tx.shutdown();
        handle.await.unwrap();
    }
}
