//! Eventual consistency helpers for tests that wait on background work.
//!
//! Finalization and enrichment run in spawned tasks, so their results show
//! up in storage some time after the request that triggered them returns.

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Categories of background work with their maximum wait.
#[derive(Debug, Clone, Copy)]
pub enum ConsistencyCategory {
    /// Terminal transcript pass after end, status change or sweep.
    Finalization,

    /// Incremental enrichment after a segment threshold.
    Enrichment,

    /// Actor spawn or removal in the meeting registry.
    Registry,
}

impl ConsistencyCategory {
    /// Maximum time to wait for this category.
    pub fn timeout(&self) -> Duration {
        match self {
            ConsistencyCategory::Finalization => Duration::from_secs(5),
            ConsistencyCategory::Enrichment => Duration::from_secs(5),
            ConsistencyCategory::Registry => Duration::from_secs(2),
        }
    }

    fn initial_delay(&self) -> Duration {
        Duration::from_millis(10)
    }
}

/// Wait until `condition` holds or the category timeout elapses.
///
/// Backs off exponentially from 10ms, capped at 200ms and at the remaining
/// time.
pub async fn assert_eventually<F, Fut>(
    category: ConsistencyCategory,
    mut condition: F,
) -> Result<(), String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let timeout = category.timeout();
    let mut delay = category.initial_delay();
    let start = Instant::now();

    loop {
        if condition().await {
            return Ok(());
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(format!(
                "Condition not met within {:?} (category: {:?})",
                timeout, category
            ));
        }

        sleep(delay).await;

        delay = (delay * 2).min(Duration::from_millis(200));
        let remaining = timeout.saturating_sub(elapsed);
        if delay > remaining {
            delay = remaining;
        }
    }
}
