//! Persistence and I/O utilities: Postgres stores, public document storage
//! and a retrying HTTP fetcher shared by the adapters.

pub mod db;
pub mod documents;
pub mod http;

pub use db::{ClientStore, FulfillmentStore, OpportunityStore, StoreError, TenderStore};
pub use documents::{DocumentStore, LocalDocumentStore};
pub use http::{BackoffPolicy, FetchError, FetchedResponse, HttpClientConfig, HttpFetcher};

pub const CRATE_NAME: &str = "sniper-storage";

/// Embedded migrations; `sniper-cli migrate` applies them.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
