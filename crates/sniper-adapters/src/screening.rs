//! AI screening adapter: tender go/no-go analysis and DCE filename
//! classification over an OpenAI-compatible chat-completions endpoint.
//!
//! The adapter is treated as untrusted: every call is bounded by a timeout
//! and every response goes through a validated parse. On any failure the
//! caller gets an error; the adapter never fabricates a validated outcome
//! for an unscreened record.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sniper_core::{ClientSummary, FileCategory, ScreeningDecision, ScreeningOutcome, SniperRules};
use thiserror::Error;
use tracing::debug;

/// Notice text beyond this is truncated before prompting.
const NOTICE_TEXT_LIMIT: usize = 15_000;

#[derive(Debug, Clone)]
pub struct ScreeningConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub tender_model: String,
    pub file_model: String,
    pub timeout: Duration,
    /// Offline demo fallback: a canned validated outcome instead of a live
    /// call. Explicitly opt-in.
    pub demo_mode: bool,
}

impl Default for ScreeningConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            tender_model: "gpt-4o".to_string(),
            file_model: "gpt-4o-mini".to_string(),
            timeout: Duration::from_secs(45),
            demo_mode: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ScreeningError {
    #[error("screening api key missing")]
    MissingApiKey,
    #[error("screening call timed out after {0:?}")]
    Timeout(Duration),
    #[error("screening request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("screening endpoint returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("screening response is empty")]
    EmptyResponse,
    #[error("screening response failed schema validation: {0}")]
    Schema(String),
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// Strict wire shape of a tender verdict. An unknown decision string or a
/// missing required field fails the parse and degrades to the safe path.
#[derive(Debug, Deserialize)]
struct TenderVerdict {
    decision: ScreeningDecision,
    reasoning: String,
    score: f64,
    #[serde(default)]
    client_summary: Option<ClientSummary>,
}

#[derive(Debug, Deserialize)]
struct FileVerdict {
    files: Vec<ClassifiedFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClassifiedFile {
    pub name: String,
    pub category: FileCategory,
    pub is_priority: bool,
}

pub struct ScreeningClient {
    http: reqwest::Client,
    config: ScreeningConfig,
}

impl ScreeningClient {
    pub fn new(config: ScreeningConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    /// Tender mode: score the notice against the client's sniper rules.
    pub async fn analyze_tender(
        &self,
        notice_text: &str,
        rules: &SniperRules,
    ) -> Result<ScreeningOutcome, ScreeningError> {
        if self.config.demo_mode {
            return Ok(demo_outcome());
        }
        let prompt = tender_prompt(notice_text, rules);
        let content = self.chat(&self.config.tender_model, prompt).await?;
        parse_tender_verdict(&content)
    }

    /// File mode: classify DCE filenames over the closed category set.
    pub async fn classify_files(
        &self,
        filenames: &[String],
    ) -> Result<Vec<ClassifiedFile>, ScreeningError> {
        if self.config.demo_mode {
            return Ok(demo_classification(filenames));
        }
        let prompt = file_prompt(filenames);
        let content = self.chat(&self.config.file_model, prompt).await?;
        parse_file_verdict(&content)
    }

    async fn chat(&self, model: &str, prompt: String) -> Result<String, ScreeningError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(ScreeningError::MissingApiKey)?;
        let request = ChatRequest {
            model,
            messages: vec![ChatMessage {
                role: "system",
                content: prompt,
            }],
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };
        let url = format!("{}/chat/completions", self.config.base_url);
        debug!(model, "screening chat request");

        let send = async {
            let response = self
                .http
                .post(&url)
                .bearer_auth(api_key)
                .json(&request)
                .send()
                .await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ScreeningError::Api {
                    status: status.as_u16(),
                    body,
                });
            }
            let parsed: ChatResponse = response.json().await?;
            parsed
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .ok_or(ScreeningError::EmptyResponse)
        };

        tokio::time::timeout(self.config.timeout, send)
            .await
            .map_err(|_| ScreeningError::Timeout(self.config.timeout))?
    }
}

fn tender_prompt(notice_text: &str, rules: &SniperRules) -> String {
    let truncated: String = notice_text.chars().take(NOTICE_TEXT_LIMIT).collect();
    let rules_json = serde_json::to_string_pretty(rules).unwrap_or_default();
    format!(
        r#"Analyste expert en marchés publics.
Analyse le marché fourni ci-dessous en fonction des critères du client.

CRITÈRES CLIENT:
{rules_json}

MARCHÉ COMPLET:
{truncated}

INSTRUCTIONS:
Retourne UNIQUEMENT un objet JSON avec cette structure:
{{
  "decision": "VALIDATED" ou "REJECTED",
  "reasoning": "Résumé stratégique (points forts, points d'attention, angle d'attaque)",
  "score": 0-100,
  "client_summary": {{
    "title": "...",
    "summary": "...",
    "budget": "...",
    "deadline": "...",
    "location": "...",
    "duration": "...",
    "key_points": ["..."],
    "urgency": "..."
  }}
}}
Le champ client_summary n'est attendu que si decision vaut VALIDATED."#
    )
}

fn file_prompt(filenames: &[String]) -> String {
    let list = filenames.join("\n");
    format!(
        r#"Expert en marchés publics. Analyse cette liste de fichiers provenant d'un DCE.
Catégorise chaque fichier: ADMINISTRATIVE, TECHNICAL, FINANCIAL ou OTHER.

RÈGLES:
- RC (Règlement de Consultation), CCAP -> ADMINISTRATIVE
- CCTP, plans, définition technique -> TECHNICAL
- DPGF, BPU, devis estimatif -> FINANCIAL
- Les fichiers prioritaires sont le RC et le CCTP.

LISTE DES FICHIERS:
{list}

FORMAT JSON STRICT:
{{
  "files": [
    {{ "name": "nom_du_fichier", "category": "CATEGORIE", "is_priority": true/false }}
  ]
}}"#
    )
}

fn parse_tender_verdict(content: &str) -> Result<ScreeningOutcome, ScreeningError> {
    let verdict: TenderVerdict =
        serde_json::from_str(content).map_err(|err| ScreeningError::Schema(err.to_string()))?;
    if !(0.0..=100.0).contains(&verdict.score) {
        return Err(ScreeningError::Schema(format!(
            "score {} outside 0..=100",
            verdict.score
        )));
    }
    Ok(ScreeningOutcome {
        decision: verdict.decision,
        reasoning: verdict.reasoning,
        score: verdict.score,
        client_summary: verdict.client_summary,
    })
}

fn parse_file_verdict(content: &str) -> Result<Vec<ClassifiedFile>, ScreeningError> {
    let verdict: FileVerdict =
        serde_json::from_str(content).map_err(|err| ScreeningError::Schema(err.to_string()))?;
    Ok(verdict.files)
}

fn demo_outcome() -> ScreeningOutcome {
    ScreeningOutcome {
        decision: ScreeningDecision::Validated,
        reasoning: "Mode démonstration: marché retenu sans appel au modèle.".to_string(),
        score: 85.0,
        client_summary: Some(ClientSummary {
            title: "Marché de démonstration".to_string(),
            summary: "Analyse simulée pour la démonstration hors ligne.".to_string(),
            ..ClientSummary::default()
        }),
    }
}

fn demo_classification(filenames: &[String]) -> Vec<ClassifiedFile> {
    filenames
        .iter()
        .map(|name| {
            let upper = name.to_uppercase();
            let (category, is_priority) = if upper.contains("RC") || upper.contains("CCAP") {
                (FileCategory::Administrative, upper.contains("RC"))
            } else if upper.contains("CCTP") || upper.contains("PLAN") {
                (FileCategory::Technical, upper.contains("CCTP"))
            } else if upper.contains("DPGF") || upper.contains("BPU") {
                (FileCategory::Financial, false)
            } else {
                (FileCategory::Other, false)
            };
            ClassifiedFile {
                name: name.clone(),
                category,
                is_priority,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tender_verdict_parses_validated_with_summary() {
        let content = r#"{
            "decision": "VALIDATED",
            "reasoning": "Bon alignement métier, budget dans la cible.",
            "score": 82,
            "client_summary": {
                "title": "Nettoyage de bureaux",
                "summary": "Prestation récurrente sur 3 ans.",
                "budget": "120 000 EUR/an",
                "deadline": "2026-09-15",
                "location": "Paris (75)",
                "duration": "36 mois",
                "key_points": ["certification Qualipropre exigée"],
                "urgency": "HIGH"
            }
        }"#;
        let outcome = parse_tender_verdict(content).expect("valid verdict");
        assert_eq!(outcome.decision, ScreeningDecision::Validated);
        assert_eq!(outcome.score, 82.0);
        let summary = outcome.client_summary.expect("summary");
        assert_eq!(summary.location.as_deref(), Some("Paris (75)"));
        assert_eq!(summary.key_points.len(), 1);
    }

    #[test]
    fn tender_verdict_rejects_unknown_decision() {
        let content = r#"{"decision": "MAYBE", "reasoning": "?", "score": 50}"#;
        assert!(matches!(
            parse_tender_verdict(content),
            Err(ScreeningError::Schema(_))
        ));
    }

    #[test]
    fn tender_verdict_rejects_missing_fields_and_bad_scores() {
        assert!(matches!(
            parse_tender_verdict(r#"{"decision": "VALIDATED"}"#),
            Err(ScreeningError::Schema(_))
        ));
        assert!(matches!(
            parse_tender_verdict(r#"{"decision": "VALIDATED", "reasoning": "x", "score": 180}"#),
            Err(ScreeningError::Schema(_))
        ));
    }

    #[test]
    fn file_verdict_maps_priority_consultation_documents() {
        let content = r#"{
            "files": [
                { "name": "RC.pdf", "category": "ADMINISTRATIVE", "is_priority": true },
                { "name": "CCTP.pdf", "category": "TECHNICAL", "is_priority": true }
            ]
        }"#;
        let files = parse_file_verdict(content).expect("valid classification");
        assert_eq!(files[0].name, "RC.pdf");
        assert_eq!(files[0].category, FileCategory::Administrative);
        assert!(files[0].is_priority);
        assert_eq!(files[1].name, "CCTP.pdf");
        assert_eq!(files[1].category, FileCategory::Technical);
        assert!(files[1].is_priority);
    }

    #[test]
    fn file_verdict_rejects_categories_outside_the_vocabulary() {
        let content = r#"{"files": [{"name": "RC.pdf", "category": "ADMINISTRATIF", "is_priority": true}]}"#;
        assert!(matches!(
            parse_file_verdict(content),
            Err(ScreeningError::Schema(_))
        ));
    }

    #[test]
    fn tender_prompt_carries_rules_and_truncates_notice() {
        let rules = SniperRules {
            min_profitability: 12.0,
            forbidden_keywords: vec!["désamiantage".to_string()],
            required_certifications: vec!["Qualibat".to_string()],
        };
        let long_notice = "x".repeat(NOTICE_TEXT_LIMIT + 500);
        let prompt = tender_prompt(&long_notice, &rules);
        assert!(prompt.contains("désamiantage"));
        assert!(prompt.contains("Qualibat"));
        assert!(prompt.chars().count() < NOTICE_TEXT_LIMIT + 2000);
    }

    #[tokio::test]
    async fn missing_api_key_is_a_distinct_error() {
        let client = ScreeningClient::new(ScreeningConfig::default());
        let result = client.analyze_tender("texte", &SniperRules::default()).await;
        assert!(matches!(result, Err(ScreeningError::MissingApiKey)));
    }

    #[tokio::test]
    async fn demo_mode_returns_validated_without_network() {
        let client = ScreeningClient::new(ScreeningConfig {
            demo_mode: true,
            ..ScreeningConfig::default()
        });
        let outcome = client
            .analyze_tender("texte", &SniperRules::default())
            .await
            .expect("demo outcome");
        assert_eq!(outcome.decision, ScreeningDecision::Validated);
    }

    #[test]
    fn demo_classification_follows_the_naming_rules() {
        let files = demo_classification(&[
            "RC.pdf".to_string(),
            "CCTP.pdf".to_string(),
            "DPGF.xlsx".to_string(),
            "note.txt".to_string(),
        ]);
        assert_eq!(files[0].category, FileCategory::Administrative);
        assert!(files[0].is_priority);
        assert_eq!(files[1].category, FileCategory::Technical);
        assert_eq!(files[2].category, FileCategory::Financial);
        assert_eq!(files[3].category, FileCategory::Other);
    }
}
