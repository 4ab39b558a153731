//! Sourcing phase: per-client fetch since watermark, local matching, tender
//! upsert and opportunity creation.
//!
//! Matched tenders are upserted before their opportunity is created (foreign
//! key ordering), and the watermark only advances after the client's whole
//! window was processed; an interrupted batch re-processes the same window
//! safely because every write is idempotent.

use chrono::{Duration, Utc};
use serde::Serialize;
use sniper_adapters::boamp;
use sniper_core::{matcher, Client, RawTender, TargetingProfile};
use tracing::{info, warn};

use crate::Pipeline;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SourcingStats {
    pub clients: usize,
    pub fetched: usize,
    pub matched: usize,
    pub created: usize,
    pub errors: usize,
}

impl Pipeline {
    pub async fn run_sourcing(&self) -> SourcingStats {
        let mut stats = SourcingStats::default();

        let clients = match self.clients.active_clients().await {
            Ok(clients) => clients,
            Err(err) => {
                warn!(error = %err, "loading active clients failed, skipping sourcing phase");
                stats.errors += 1;
                return stats;
            }
        };

        for client in clients {
            stats.clients += 1;
            if let Err(err) = self.source_client(&client, &mut stats).await {
                warn!(client = %client.name, error = %err, "sourcing failed for client");
                stats.errors += 1;
            }
        }

        info!(?stats, "sourcing phase complete");
        stats
    }

    async fn source_client(
        &self,
        client: &Client,
        stats: &mut SourcingStats,
    ) -> anyhow::Result<()> {
        if client.keywords.is_empty() {
            warn!(client = %client.name, "client declares no keywords, skipping");
            return Ok(());
        }

        let batch_start = Utc::now();
        let since = client
            .last_sourced_at
            .unwrap_or(batch_start - Duration::hours(self.config.sourcing_lookback_hours));

        let outcome = self
            .source
            .fetch_since(since, &client.regions, &client.keywords)
            .await;
        if outcome.failed {
            stats.errors += 1;
        }
        if outcome.truncated {
            warn!(client = %client.name, "fetch hit the page cap, remainder deferred to next cycle");
        }
        stats.fetched += outcome.records.len();
        info!(
            client = %client.name,
            records = outcome.records.len(),
            pages = outcome.pages_fetched,
            "fetched sourcing window"
        );

        let profile = TargetingProfile::from(client);
        for record in &outcome.records {
            if !matcher::matches(record, profile) {
                continue;
            }
            stats.matched += 1;
            match self.ingest_match(client, record).await {
                Ok(created) => {
                    if created {
                        stats.created += 1;
                        info!(
                            client = %client.name,
                            tender = %record.external_id,
                            "new opportunity queued for analysis"
                        );
                    }
                }
                Err(err) => {
                    warn!(
                        client = %client.name,
                        tender = %record.external_id,
                        error = %err,
                        "processing matched tender failed"
                    );
                    stats.errors += 1;
                }
            }
        }

        // A failed fetch keeps the old watermark so the missed window is
        // re-fetched next cycle; idempotent writes make the replay safe.
        if !outcome.failed {
            self.clients.set_watermark(client.id, batch_start).await?;
        }
        Ok(())
    }

    /// Upsert the tender, then create the (client, tender) opportunity if it
    /// does not exist yet. Returns whether a new opportunity appeared.
    async fn ingest_match(&self, client: &Client, record: &RawTender) -> anyhow::Result<bool> {
        // Prefer the full notice text for downstream AI analysis; degrade to
        // the structured summary when the HTML dataset has nothing.
        let summary = match self.source.fetch_full_text(&record.external_id).await {
            Some(full_text) => sniper_core::model::cap_summary(&full_text),
            None => boamp::notice_summary(record),
        };

        let tender = self.tenders.upsert(record, &summary).await?;
        let created = self
            .opportunities
            .create_if_absent(client.id, tender.id, 0.0)
            .await?;
        Ok(created)
    }
}
