//! Outbound notifications: admin alerts over the Telegram bot API and client
//! alerts over an HTTP mail API.
//!
//! Every sender returns a `Result` and never retries; call sites decide to
//! log-and-drop (fire-and-forget) or propagate. Unconfigured channels log the
//! payload and succeed, which keeps demo environments alive.

use serde_json::json;
use sniper_core::{Opportunity, ScreeningOutcome};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct NotifyConfig {
    /// Public base URL decision links are built against.
    pub base_url: String,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub mail_api_url: Option<String>,
    pub mail_api_key: Option<String>,
    pub mail_from: String,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("notification endpoint returned {status}: {body}")]
    Api { status: u16, body: String },
}

pub struct Notifier {
    http: reqwest::Client,
    config: NotifyConfig,
}

impl Notifier {
    pub fn new(config: NotifyConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    pub fn decision_links(&self, token: Uuid) -> (String, String) {
        let base = self.config.base_url.trim_end_matches('/');
        (
            format!("{base}/decision/{token}/accept"),
            format!("{base}/decision/{token}/reject"),
        )
    }

    /// Client alert for a freshly validated opportunity, with the one-time
    /// accept/reject links.
    pub async fn send_client_alert(
        &self,
        client_email: &str,
        tender_title: &str,
        outcome: &ScreeningOutcome,
        token: Uuid,
    ) -> Result<(), NotifyError> {
        let (accept, reject) = self.decision_links(token);
        let subject = format!("📢 Opportunité : {tender_title}");
        let html = client_alert_html(tender_title, outcome, &accept, &reject);
        self.send_mail(client_email, &subject, &html).await
    }

    /// "Your consultation package is ready" alert once capture completed.
    pub async fn send_dce_ready(
        &self,
        client_email: &str,
        tender_title: &str,
        file_count: usize,
    ) -> Result<(), NotifyError> {
        let subject = format!("📁 DCE disponible : {tender_title}");
        let html = format!(
            "<p>Le dossier de consultation « {tender_title} » est prêt : \
             {file_count} fichier(s) classés et disponibles dans votre espace.</p>"
        );
        self.send_mail(client_email, &subject, &html).await
    }

    /// Admin alert over Telegram. Callers treat this as fire-and-forget.
    pub async fn send_admin_alert(&self, text: &str) -> Result<(), NotifyError> {
        let (Some(bot_token), Some(chat_id)) = (
            self.config.telegram_bot_token.as_deref(),
            self.config.telegram_chat_id.as_deref(),
        ) else {
            warn!("telegram not configured, dropping admin alert");
            return Ok(());
        };

        let url = format!("https://api.telegram.org/bot{bot_token}/sendMessage");
        let response = self
            .http
            .post(&url)
            .json(&json!({
                "chat_id": chat_id,
                "text": text,
                "parse_mode": "Markdown",
            }))
            .send()
            .await?;
        check_status(response).await
    }

    async fn send_mail(&self, to: &str, subject: &str, html: &str) -> Result<(), NotifyError> {
        let (Some(api_url), Some(api_key)) = (
            self.config.mail_api_url.as_deref(),
            self.config.mail_api_key.as_deref(),
        ) else {
            info!(to, subject, "mail not configured, logging alert instead");
            return Ok(());
        };

        let response = self
            .http
            .post(api_url)
            .bearer_auth(api_key)
            .json(&json!({
                "from": self.config.mail_from,
                "to": [to],
                "subject": subject,
                "html": html,
            }))
            .send()
            .await?;
        check_status(response).await
    }
}

async fn check_status(response: reqwest::Response) -> Result<(), NotifyError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(NotifyError::Api {
        status: status.as_u16(),
        body,
    })
}

pub fn admin_validation_alert(client_name: &str, tender_title: &str, score: f64) -> String {
    format!(
        "🔔 **NOUVELLE OPPORTUNITÉ VALIDÉE**\n\nClient : {client_name}\nMarché : {tender_title}\nScore IA : {score:.0}%\n\nEn attente de la décision client."
    )
}

pub fn admin_dce_request_alert(client_name: &str, opportunity: &Opportunity) -> String {
    format!(
        "📦 **ACTION REQUISE : DCE DEMANDÉ**\n\nClient : {client_name}\nOpportunité : {}\nLe dossier de consultation doit être récupéré.",
        opportunity.id
    )
}

fn client_alert_html(
    tender_title: &str,
    outcome: &ScreeningOutcome,
    accept_link: &str,
    reject_link: &str,
) -> String {
    let analysis = outcome.reasoning.replace('\n', "<br>");
    format!(
        r#"<div style="font-family: Arial, sans-serif; max-width: 600px;">
  <h2>🎯 Nouvelle opportunité détectée</h2>
  <p><strong>Marché :</strong> {tender_title}</p>
  <p><strong>Score :</strong> {score:.0}%</p>
  <div style="background:#f0f9ff;padding:12px;border-radius:6px;">
    <h3>🧠 Analyse</h3>
    <p>{analysis}</p>
  </div>
  <p style="text-align:center;">
    <a href="{accept_link}">✅ VALIDER L'OFFRE</a>
    &nbsp;
    <a href="{reject_link}">❌ REJETER</a>
  </p>
</div>"#,
        score = outcome.score,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use sniper_core::ScreeningDecision;

    fn notifier(base: &str) -> Notifier {
        Notifier::new(NotifyConfig {
            base_url: base.to_string(),
            ..NotifyConfig::default()
        })
    }

    #[test]
    fn decision_links_embed_the_token_once() {
        let token = Uuid::new_v4();
        let (accept, reject) = notifier("https://sniper.example.fr/").decision_links(token);
        assert_eq!(
            accept,
            format!("https://sniper.example.fr/decision/{token}/accept")
        );
        assert_eq!(
            reject,
            format!("https://sniper.example.fr/decision/{token}/reject")
        );
    }

    #[test]
    fn client_alert_html_carries_analysis_and_links() {
        let outcome = ScreeningOutcome {
            decision: ScreeningDecision::Validated,
            reasoning: "Bon alignement.\nBudget dans la cible.".to_string(),
            score: 82.0,
            client_summary: None,
        };
        let html = client_alert_html("Nettoyage de bureaux", &outcome, "https://a", "https://r");
        assert!(html.contains("Nettoyage de bureaux"));
        assert!(html.contains("Bon alignement.<br>Budget dans la cible."));
        assert!(html.contains("https://a"));
        assert!(html.contains("https://r"));
    }

    #[test]
    fn admin_alert_bodies_name_the_client() {
        let text = admin_validation_alert("Apoem Nettoyage", "Nettoyage de bureaux", 82.0);
        assert!(text.contains("Apoem Nettoyage"));
        assert!(text.contains("82%"));
    }

    #[tokio::test]
    async fn unconfigured_channels_succeed_without_network() {
        let n = notifier("https://sniper.example.fr");
        n.send_admin_alert("test").await.expect("telegram skip");
        let outcome = ScreeningOutcome {
            decision: ScreeningDecision::Validated,
            reasoning: "ok".to_string(),
            score: 50.0,
            client_summary: None,
        };
        n.send_client_alert("client@example.fr", "Marché", &outcome, Uuid::new_v4())
            .await
            .expect("mail skip");
    }
}
