//! Persisted entities and adapter-facing records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::status::OpportunityStatus;

/// Summaries longer than this are truncated before persistence.
pub const SUMMARY_MAX_CHARS: usize = 1000;

/// Accept/reject heuristics fed to AI screening alongside the notice text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SniperRules {
    pub min_profitability: f64,
    pub forbidden_keywords: Vec<String>,
    pub required_certifications: Vec<String>,
}

/// A client and its targeting profile. The core never mutates clients;
/// profile edits happen elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub active: bool,
    pub keywords: Vec<String>,
    pub regions: Vec<String>,
    pub rules: SniperRules,
    /// Generalised fast-track rule: an accepted opportunity skips the
    /// admin fulfillment loop and lands directly in `DceReady`.
    pub auto_fulfill_on_accept: bool,
    pub last_sourced_at: Option<DateTime<Utc>>,
}

/// One raw record as returned by the tender source, before upsert.
///
/// `department_codes` comes back from the upstream API as either a scalar
/// or an array depending on the notice; adapters normalise both forms here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTender {
    pub external_id: String,
    pub title: String,
    pub body: String,
    pub department_codes: Vec<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
    pub notice_url: Option<String>,
    pub raw: JsonValue,
}

impl RawTender {
    /// Concatenated text the matcher and AI screening run against.
    pub fn searchable_text(&self) -> String {
        format!("{} {}", self.title, self.body)
    }
}

/// Catalog entry keyed by the immutable external id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tender {
    pub id: Uuid,
    pub external_id: String,
    pub title: String,
    pub summary: String,
    pub deadline: Option<DateTime<Utc>>,
    pub source_url: Option<String>,
    pub raw: JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The tracked pairing of one client's interest in one tender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: Uuid,
    pub client_id: Uuid,
    pub tender_id: Uuid,
    pub status: OpportunityStatus,
    pub match_score: f64,
    pub analysis: Option<JsonValue>,
    pub decision_token: Option<Uuid>,
    pub dce_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Closed vocabulary for consultation-package files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileCategory {
    Administrative,
    Technical,
    Financial,
    Other,
}

impl FileCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            FileCategory::Administrative => "ADMINISTRATIVE",
            FileCategory::Technical => "TECHNICAL",
            FileCategory::Financial => "FINANCIAL",
            FileCategory::Other => "OTHER",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ADMINISTRATIVE" => Some(FileCategory::Administrative),
            "TECHNICAL" => Some(FileCategory::Technical),
            "FINANCIAL" => Some(FileCategory::Financial),
            "OTHER" => Some(FileCategory::Other),
            _ => None,
        }
    }
}

/// One extracted consultation document, owned by its opportunity. The whole
/// set is replaced on each capture run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DceFile {
    pub filename: String,
    pub url: String,
    pub category: FileCategory,
    pub is_priority: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FulfillmentStatus {
    Pending,
    Ready,
}

impl FulfillmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FulfillmentStatus::Pending => "PENDING",
            FulfillmentStatus::Ready => "READY",
        }
    }
}

/// Ticket tracking delivery of a document package to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FulfillmentRequest {
    pub id: Uuid,
    pub opportunity_id: Uuid,
    pub status: FulfillmentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScreeningDecision {
    Validated,
    Rejected,
}

/// Structured summary the screening adapter produces for validated tenders.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientSummary {
    pub title: String,
    pub summary: String,
    #[serde(default)]
    pub budget: Option<String>,
    #[serde(default)]
    pub deadline: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub urgency: Option<String>,
}

/// Outcome of tender-mode AI screening.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreeningOutcome {
    pub decision: ScreeningDecision,
    pub reasoning: String,
    pub score: f64,
    pub client_summary: Option<ClientSummary>,
}

/// Truncate a summary to the persistence cap without splitting a char.
pub fn cap_summary(text: &str) -> String {
    if text.chars().count() <= SUMMARY_MAX_CHARS {
        return text.to_string();
    }
    text.chars().take(SUMMARY_MAX_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_category_round_trips_closed_vocabulary() {
        for cat in [
            FileCategory::Administrative,
            FileCategory::Technical,
            FileCategory::Financial,
            FileCategory::Other,
        ] {
            assert_eq!(FileCategory::parse(cat.as_str()), Some(cat));
        }
        assert_eq!(FileCategory::parse("ADMINISTRATIF"), None);
    }

    #[test]
    fn summary_cap_preserves_short_text() {
        assert_eq!(cap_summary("court"), "court");
        let long = "x".repeat(SUMMARY_MAX_CHARS + 50);
        assert_eq!(cap_summary(&long).chars().count(), SUMMARY_MAX_CHARS);
    }

    #[test]
    fn searchable_text_joins_title_and_body() {
        let tender = RawTender {
            external_id: "24-100200".into(),
            title: "Prestations de nettoyage".into(),
            body: "des bureaux".into(),
            department_codes: vec!["75".into()],
            published_at: None,
            deadline: None,
            notice_url: None,
            raw: serde_json::json!({}),
        };
        assert_eq!(tender.searchable_text(), "Prestations de nettoyage des bureaux");
    }
}
