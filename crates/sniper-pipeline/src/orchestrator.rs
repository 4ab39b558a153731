//! The cron entry point: one bounded batch run per invocation, sourcing
//! first, then the capped screening slice. Items the cap leaves behind are
//! picked up by the next cycle; nothing is lost, only delayed.

use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::screening::ScreeningStats;
use crate::sourcing::SourcingStats;
use crate::Pipeline;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BatchStats {
    pub clients: usize,
    pub fetched: usize,
    pub matched: usize,
    pub created: usize,
    pub screened: usize,
    pub validated: usize,
    pub auto_rejected: usize,
    pub notifications: usize,
    pub errors: usize,
}

impl BatchStats {
    fn merge(sourcing: SourcingStats, screening: ScreeningStats) -> Self {
        Self {
            clients: sourcing.clients,
            fetched: sourcing.fetched,
            matched: sourcing.matched,
            created: sourcing.created,
            screened: screening.screened,
            validated: screening.validated,
            auto_rejected: screening.auto_rejected,
            notifications: screening.notifications,
            errors: sourcing.errors + screening.errors,
        }
    }
}

impl Pipeline {
    /// One full batch: sourcing then screening. Both phases isolate per-item
    /// failures, so this never returns an error for a bad record.
    pub async fn run_batch_once(&self) -> BatchStats {
        info!("batch run started");
        let sourcing = self.run_sourcing().await;
        let screening = self.run_screening().await;
        let stats = BatchStats::merge(sourcing, screening);
        info!(?stats, "batch run complete");
        stats
    }
}

/// Build the recurring scheduler when enabled; `None` means cron is driven
/// externally (hosted cron hitting the web trigger).
pub async fn build_scheduler(pipeline: Arc<Pipeline>) -> anyhow::Result<Option<JobScheduler>> {
    if !pipeline.config.scheduler_enabled {
        return Ok(None);
    }

    let cron = pipeline.config.batch_cron.clone();
    let scheduler = JobScheduler::new().await.context("creating scheduler")?;
    let job = Job::new_async(cron.as_str(), move |_id, _lock| {
        let pipeline = Arc::clone(&pipeline);
        Box::pin(async move {
            let stats = pipeline.run_batch_once().await;
            if stats.errors > 0 {
                error!(?stats, "scheduled batch finished with errors");
            }
        })
    })
    .with_context(|| format!("creating batch job for cron {cron}"))?;
    scheduler.add(job).await.context("adding batch job")?;
    Ok(Some(scheduler))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merged_stats_sum_errors_across_phases() {
        let sourcing = SourcingStats {
            clients: 2,
            fetched: 40,
            matched: 5,
            created: 3,
            errors: 1,
        };
        let screening = ScreeningStats {
            screened: 3,
            validated: 2,
            auto_rejected: 1,
            notifications: 2,
            errors: 1,
        };
        let stats = BatchStats::merge(sourcing, screening);
        assert_eq!(stats.errors, 2);
        assert_eq!(stats.created, 3);
        assert_eq!(stats.validated, 2);
    }
}
