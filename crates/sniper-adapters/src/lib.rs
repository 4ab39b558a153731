//! External collaborators: the BOAMP tender source, the upstream OAuth token
//! cache, the AI screening adapter, the DCE page scraper, archive unpacking
//! and the notification senders.

pub mod archive;
pub mod auth;
pub mod boamp;
pub mod notify;
pub mod scrape;
pub mod screening;

pub use archive::{unpack, ArchiveEntry, ArchiveError};
pub use auth::{TokenCache, TokenCacheConfig};
pub use boamp::{BoampConfig, BoampSource, FetchOutcome};
pub use notify::{Notifier, NotifyConfig, NotifyError};
pub use scrape::{DceLink, DceResolver, ScrapeError};
pub use screening::{ClassifiedFile, ScreeningClient, ScreeningConfig, ScreeningError};

pub const CRATE_NAME: &str = "sniper-adapters";
