//! BOAMP tender source: paged Opendatasoft queries since a watermark date,
//! plus the companion HTML dataset for full notice text.
//!
//! Upstream filtering (region/keyword hints) is best effort only; every
//! returned record is re-validated locally by the matcher.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value as JsonValue;
use sniper_core::RawTender;
use sniper_storage::HttpFetcher;
use tracing::{debug, warn};

use crate::auth::TokenCache;

const DEFAULT_SEARCH_URL: &str =
    "https://boamp-datadila.opendatasoft.com/api/explore/v2.1/catalog/datasets/boamp/records";
const DEFAULT_HTML_URL: &str =
    "https://boamp-datadila.opendatasoft.com/api/explore/v2.1/catalog/datasets/boamp-html/records";

#[derive(Debug, Clone)]
pub struct BoampConfig {
    pub search_url: String,
    pub html_url: String,
    pub page_size: usize,
    /// Hard cap on pages per fetch; bounds batch execution time.
    pub max_pages: usize,
    /// Fetch lower bound backs off this much to compensate upstream
    /// indexation lag.
    pub safety_buffer: Duration,
}

impl Default for BoampConfig {
    fn default() -> Self {
        Self {
            search_url: DEFAULT_SEARCH_URL.to_string(),
            html_url: DEFAULT_HTML_URL.to_string(),
            page_size: 100,
            max_pages: 10,
            safety_buffer: Duration::minutes(2),
        }
    }
}

/// Result of one fetch window. `failed` marks an upstream error that stopped
/// paging early; `truncated` marks the page cap. Either way the accumulated
/// records are still processed.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub records: Vec<RawTender>,
    pub pages_fetched: usize,
    pub truncated: bool,
    pub failed: bool,
}

pub struct BoampSource {
    fetcher: HttpFetcher,
    config: BoampConfig,
    token_cache: Option<TokenCache>,
}

impl BoampSource {
    pub fn new(fetcher: HttpFetcher, config: BoampConfig) -> Self {
        Self {
            fetcher,
            config,
            token_cache: None,
        }
    }

    /// Attach an OAuth token cache for deployments going through the
    /// authenticated PISTE gateway; the public dataset needs none.
    pub fn with_token_cache(mut self, cache: TokenCache) -> Self {
        self.token_cache = Some(cache);
        self
    }

    /// Fetch records published since `watermark`, oldest first, paging until
    /// an empty page or the page cap. A page failure stops the fetch and
    /// returns what was accumulated so far.
    pub async fn fetch_since(
        &self,
        watermark: DateTime<Utc>,
        regions: &[String],
        keywords: &[String],
    ) -> FetchOutcome {
        let since = watermark - self.config.safety_buffer;
        let where_clause = build_where_clause(since, regions, keywords);
        debug!(%where_clause, "boamp fetch window");

        let mut records = Vec::new();
        let mut pages_fetched = 0usize;
        let mut truncated = false;
        let mut failed = false;

        for page in 0..self.config.max_pages {
            let offset = page * self.config.page_size;
            let url = format!(
                "{}?where={}&order_by={}&limit={}&offset={}",
                self.config.search_url,
                urlencode(&where_clause),
                urlencode("dateparution asc"),
                self.config.page_size,
                offset,
            );

            let bearer = match self.bearer().await {
                Ok(token) => token,
                Err(err) => {
                    warn!(error = %err, "tender source auth failed, aborting fetch");
                    failed = true;
                    break;
                }
            };

            let response = match self
                .fetcher
                .get_bytes_authorized(&url, bearer.as_deref())
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    warn!(error = %err, page, "tender source page failed, keeping partial batch");
                    failed = true;
                    break;
                }
            };

            let page_records = match serde_json::from_slice::<JsonValue>(&response.body) {
                Ok(body) => parse_results(&body),
                Err(err) => {
                    warn!(error = %err, page, "tender source returned malformed JSON");
                    failed = true;
                    break;
                }
            };

            pages_fetched += 1;
            if page_records.is_empty() {
                break;
            }
            let full_page = page_records.len() >= self.config.page_size;
            records.extend(page_records);
            if !full_page {
                break;
            }
            if page + 1 == self.config.max_pages {
                truncated = true;
            }
        }

        FetchOutcome {
            records,
            pages_fetched,
            truncated,
            failed,
        }
    }

    /// Full notice text from the HTML dataset, tags stripped. Degrades to
    /// `None` on any failure; callers fall back to the record summary.
    pub async fn fetch_full_text(&self, external_id: &str) -> Option<String> {
        let url = format!(
            "{}?where={}&limit=1",
            self.config.html_url,
            urlencode(&format!("idweb:\"{external_id}\"")),
        );
        let bearer = self.bearer().await.ok()?;
        let response = match self.fetcher.get_bytes_authorized(&url, bearer.as_deref()).await {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, external_id, "full text fetch failed");
                return None;
            }
        };
        let body: JsonValue = serde_json::from_slice(&response.body).ok()?;
        let html = body
            .get("results")?
            .as_array()?
            .first()?
            .get("avis_html")?
            .as_str()?;
        let text = strip_html(html);
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    async fn bearer(&self) -> anyhow::Result<Option<String>> {
        match &self.token_cache {
            Some(cache) => Ok(Some(cache.token().await?)),
            None => Ok(None),
        }
    }
}

/// ODSQL where clause: the date bound is the contract; region and keyword
/// hints just trim upstream traffic.
fn build_where_clause(since: DateTime<Utc>, regions: &[String], keywords: &[String]) -> String {
    let mut clause = format!("dateparution >= \"{}\"", since.format("%Y-%m-%d"));
    if !regions.is_empty() {
        let list = regions
            .iter()
            .map(|r| format!("\"{r}\""))
            .collect::<Vec<_>>()
            .join(", ");
        clause.push_str(&format!(" AND code_departement IN ({list})"));
    }
    if !keywords.is_empty() {
        let search = keywords
            .iter()
            .map(|k| format!("search(donnees, \"{}\")", k.replace('"', "")))
            .collect::<Vec<_>>()
            .join(" OR ");
        clause.push_str(&format!(" AND ({search})"));
    }
    clause
}

fn parse_results(body: &JsonValue) -> Vec<RawTender> {
    body.get("results")
        .and_then(|r| r.as_array())
        .map(|records| records.iter().filter_map(parse_record).collect())
        .unwrap_or_default()
}

/// One upstream record to a `RawTender`. Records without an external id are
/// dropped; everything else degrades field by field.
pub fn parse_record(value: &JsonValue) -> Option<RawTender> {
    let external_id = value
        .get("idweb")
        .or_else(|| value.get("id"))
        .and_then(|v| v.as_str())?
        .to_string();
    let title = value
        .get("objet")
        .and_then(|v| v.as_str())
        .unwrap_or("Marché Public")
        .to_string();
    let body = value
        .get("donnees")
        .map(json_as_text)
        .unwrap_or_default();
    let department_codes = department_codes(value.get("code_departement"));
    let published_at = value
        .get("dateparution")
        .and_then(|v| v.as_str())
        .and_then(parse_upstream_date);
    let deadline = value
        .get("datelimitereception")
        .and_then(|v| v.as_str())
        .and_then(parse_upstream_date);
    let notice_url = value
        .get("url_avis")
        .and_then(|v| v.as_str())
        .map(ToString::to_string)
        .or_else(|| {
            Some(format!(
                "https://www.boamp.fr/pages/avis/?q=idweb:{external_id}"
            ))
        });
    Some(RawTender {
        external_id,
        title,
        body,
        department_codes,
        published_at,
        deadline,
        notice_url,
        raw: value.clone(),
    })
}

/// The upstream department field is a scalar on single-lot notices and an
/// array on multi-lot ones.
fn department_codes(value: Option<&JsonValue>) -> Vec<String> {
    match value {
        Some(JsonValue::Array(items)) => items.iter().map(json_as_text).collect(),
        Some(JsonValue::Null) | None => Vec::new(),
        Some(other) => vec![json_as_text(other)],
    }
}

fn json_as_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_upstream_date(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// The structured payload often carries the complete subject under
/// `OBJET.OBJET_COMPLET`; prefer it over the raw blob for summaries.
pub fn notice_summary(record: &RawTender) -> String {
    let from_payload = record
        .raw
        .get("donnees")
        .and_then(|v| v.as_str())
        .and_then(|text| serde_json::from_str::<JsonValue>(text).ok())
        .and_then(|parsed| {
            parsed
                .get("OBJET")
                .and_then(|o| o.get("OBJET_COMPLET"))
                .and_then(|v| v.as_str())
                .map(ToString::to_string)
        });
    let summary = from_payload.unwrap_or_else(|| record.body.clone());
    if summary.trim().is_empty() {
        "Voir détail".to_string()
    } else {
        sniper_core::model::cap_summary(summary.trim())
    }
}

fn strip_html(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                out.push(' ');
            }
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn where_clause_carries_date_bound_and_hints() {
        let since = Utc.with_ymd_and_hms(2026, 8, 1, 10, 0, 0).single().unwrap();
        let regions = vec!["75".to_string(), "92".to_string()];
        let keywords = vec!["nettoyage".to_string()];
        let clause = build_where_clause(since, &regions, &keywords);
        assert!(clause.starts_with("dateparution >= \"2026-08-01\""));
        assert!(clause.contains("code_departement IN (\"75\", \"92\")"));
        assert!(clause.contains("search(donnees, \"nettoyage\")"));
    }

    #[test]
    fn where_clause_without_hints_is_date_only() {
        let since = Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).single().unwrap();
        assert_eq!(
            build_where_clause(since, &[], &[]),
            "dateparution >= \"2026-08-01\""
        );
    }

    #[test]
    fn record_parsing_handles_scalar_and_array_departments() {
        let scalar = parse_record(&json!({
            "idweb": "24-100200",
            "objet": "Nettoyage de locaux",
            "code_departement": "75",
            "dateparution": "2026-08-01",
        }))
        .unwrap();
        assert_eq!(scalar.department_codes, vec!["75"]);

        let array = parse_record(&json!({
            "idweb": "24-100201",
            "objet": "Travaux de voirie",
            "code_departement": ["33", "47"],
        }))
        .unwrap();
        assert_eq!(array.department_codes, vec!["33", "47"]);
    }

    #[test]
    fn records_without_external_id_are_dropped() {
        assert!(parse_record(&json!({ "objet": "Sans identifiant" })).is_none());
    }

    #[test]
    fn missing_notice_url_falls_back_to_public_page() {
        let record = parse_record(&json!({ "idweb": "24-100202", "objet": "x" })).unwrap();
        assert_eq!(
            record.notice_url.as_deref(),
            Some("https://www.boamp.fr/pages/avis/?q=idweb:24-100202")
        );
    }

    #[test]
    fn summary_prefers_structured_complete_subject() {
        let donnees = json!({ "OBJET": { "OBJET_COMPLET": "Entretien complet des espaces verts" } });
        let record = parse_record(&json!({
            "idweb": "24-100203",
            "objet": "Espaces verts",
            "donnees": donnees.to_string(),
        }))
        .unwrap();
        assert_eq!(notice_summary(&record), "Entretien complet des espaces verts");
    }

    #[test]
    fn summary_falls_back_to_placeholder_when_empty() {
        let record = parse_record(&json!({ "idweb": "24-100204", "objet": "x" })).unwrap();
        assert_eq!(notice_summary(&record), "Voir détail");
    }

    #[test]
    fn html_stripping_normalises_whitespace() {
        let text = strip_html("<div><p>Marché  de\nnettoyage</p><br>des locaux</div>");
        assert_eq!(text, "Marché de nettoyage des locaux");
    }

    #[test]
    fn upstream_dates_accept_plain_and_rfc3339_forms() {
        assert!(parse_upstream_date("2026-08-01").is_some());
        assert!(parse_upstream_date("2026-08-01T08:30:00+02:00").is_some());
        assert!(parse_upstream_date("aujourd'hui").is_none());
    }
}
