//! Core domain model for Tender Sniper: clients, tenders, opportunities,
//! the opportunity lifecycle and the pure matching predicate.

pub mod matcher;
pub mod model;
pub mod status;

pub use matcher::{matches, TargetingProfile};
pub use model::{
    Client, ClientSummary, DceFile, FileCategory, FulfillmentRequest, FulfillmentStatus,
    Opportunity, RawTender, ScreeningDecision, ScreeningOutcome, SniperRules, Tender,
};
pub use status::{OpportunityStatus, TransitionError};

pub const CRATE_NAME: &str = "sniper-core";
