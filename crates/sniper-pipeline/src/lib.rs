//! Batch orchestration: the sourcing and screening phases driven by cron,
//! the DCE capture pipeline and the client decision flows.

pub mod capture;
pub mod config;
pub mod decision;
pub mod orchestrator;
pub mod screening;
pub mod sourcing;

use std::sync::Arc;

use sniper_adapters::{BoampSource, DceResolver, Notifier, ScreeningClient};
use sniper_storage::{
    ClientStore, DocumentStore, FulfillmentStore, HttpFetcher, OpportunityStore, TenderStore,
};
use sqlx::PgPool;

pub use capture::{CaptureError, CaptureReport};
pub use config::PipelineConfig;
pub use decision::{interpret_reply, DecisionChoice, DecisionOutcome};
pub use orchestrator::BatchStats;

pub const CRATE_NAME: &str = "sniper-pipeline";

/// Everything one batch run touches, wired once at startup and shared by the
/// scheduler, the web surface and the CLI.
pub struct Pipeline {
    pub clients: ClientStore,
    pub tenders: TenderStore,
    pub opportunities: OpportunityStore,
    pub fulfillments: FulfillmentStore,
    pub source: BoampSource,
    pub screening: ScreeningClient,
    pub resolver: DceResolver,
    pub fetcher: HttpFetcher,
    pub documents: Arc<dyn DocumentStore>,
    pub notifier: Notifier,
    pub config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        pool: PgPool,
        config: PipelineConfig,
        documents: Arc<dyn DocumentStore>,
    ) -> anyhow::Result<Self> {
        let fetcher = HttpFetcher::new(config.http.clone())?;
        let mut source = BoampSource::new(fetcher.clone(), config.boamp.clone());
        if let Some(token_config) = config.gateway_auth.clone() {
            source = source.with_token_cache(sniper_adapters::TokenCache::new(token_config)?);
        }
        Ok(Self {
            clients: ClientStore::new(pool.clone()),
            tenders: TenderStore::new(pool.clone()),
            opportunities: OpportunityStore::new(pool.clone()),
            fulfillments: FulfillmentStore::new(pool),
            source,
            screening: ScreeningClient::new(config.screening.clone()),
            resolver: DceResolver::new(fetcher.clone()),
            fetcher,
            documents,
            notifier: Notifier::new(config.notify.clone()),
            config,
        })
    }

    /// Wire the pipeline from environment variables, with the local document
    /// store backend.
    pub fn from_env(pool: PgPool) -> anyhow::Result<Self> {
        let config = PipelineConfig::from_env();
        let documents = Arc::new(sniper_storage::LocalDocumentStore::new(
            config.dce_dir.clone(),
            config.dce_public_base.clone(),
        ));
        Self::new(pool, config, documents)
    }
}
