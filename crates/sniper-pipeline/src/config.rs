//! Environment-driven configuration for the batch pipeline.

use std::path::PathBuf;
use std::time::Duration;

use sniper_adapters::{BoampConfig, NotifyConfig, ScreeningConfig, TokenCacheConfig};
use sniper_storage::{BackoffPolicy, HttpClientConfig};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub base_url: String,
    pub cron_secret: Option<String>,
    /// 6-field cron expression for the recurring batch.
    pub batch_cron: String,
    pub scheduler_enabled: bool,
    /// Screening batch cap; bounds execution time under hosting limits.
    pub screening_batch_size: i64,
    /// First-run sourcing lookback when a client has no watermark yet.
    pub sourcing_lookback_hours: i64,
    pub upload_concurrency: usize,
    pub dce_dir: PathBuf,
    pub dce_public_base: String,
    pub http: HttpClientConfig,
    pub boamp: BoampConfig,
    pub screening: ScreeningConfig,
    pub notify: NotifyConfig,
    /// Present only for deployments behind the authenticated PISTE gateway.
    pub gateway_auth: Option<TokenCacheConfig>,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env_var(name).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_flag(name: &str) -> bool {
    env_var(name)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(false)
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let base_url =
            env_var("SNIPER_BASE_URL").unwrap_or_else(|| "http://localhost:3000".to_string());

        let mut boamp = BoampConfig::default();
        if let Some(url) = env_var("BOAMP_SEARCH_URL") {
            boamp.search_url = url;
        }
        if let Some(url) = env_var("BOAMP_HTML_URL") {
            boamp.html_url = url;
        }
        boamp.page_size = env_parse("BOAMP_PAGE_SIZE", boamp.page_size);
        boamp.max_pages = env_parse("BOAMP_MAX_PAGES", boamp.max_pages);

        let screening = ScreeningConfig {
            base_url: env_var("OPENAI_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            api_key: env_var("OPENAI_API_KEY"),
            tender_model: env_var("SNIPER_TENDER_MODEL").unwrap_or_else(|| "gpt-4o".to_string()),
            file_model: env_var("SNIPER_FILE_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            timeout: Duration::from_secs(env_parse("SNIPER_AI_TIMEOUT_SECS", 45)),
            demo_mode: env_flag("SNIPER_DEMO_MODE"),
        };

        let notify = NotifyConfig {
            base_url: base_url.clone(),
            telegram_bot_token: env_var("TELEGRAM_BOT_TOKEN"),
            telegram_chat_id: env_var("TELEGRAM_ADMIN_CHAT_ID"),
            mail_api_url: env_var("MAIL_API_URL"),
            mail_api_key: env_var("MAIL_API_KEY"),
            mail_from: env_var("MAIL_FROM")
                .unwrap_or_else(|| "Tender Sniper <alerts@localhost>".to_string()),
        };

        // Gateway credentials are optional; the public dataset needs none.
        let gateway_auth = match (env_var("PISTE_CLIENT_ID"), env_var("PISTE_CLIENT_SECRET")) {
            (Some(client_id), Some(client_secret)) => Some(TokenCacheConfig {
                token_url: env_var("PISTE_TOKEN_URL").unwrap_or_else(|| {
                    "https://oauth.piste.gouv.fr/api/oauth/token".to_string()
                }),
                client_id,
                client_secret,
                scope: env_var("PISTE_SCOPE").unwrap_or_else(|| "tncp.apidecp".to_string()),
                backoff: BackoffPolicy::default(),
            }),
            _ => None,
        };

        Self {
            base_url,
            cron_secret: env_var("CRON_SECRET"),
            batch_cron: env_var("SNIPER_CRON").unwrap_or_else(|| "0 0 6 * * *".to_string()),
            scheduler_enabled: env_flag("SNIPER_SCHEDULER_ENABLED"),
            screening_batch_size: env_parse("SNIPER_SCREENING_BATCH", 10),
            sourcing_lookback_hours: env_parse("SNIPER_LOOKBACK_HOURS", 48),
            upload_concurrency: env_parse("SNIPER_UPLOAD_CONCURRENCY", 4),
            dce_dir: env_var("SNIPER_DCE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./public/dce")),
            dce_public_base: env_var("SNIPER_DCE_PUBLIC_BASE").unwrap_or_else(|| "/dce".to_string()),
            http: HttpClientConfig {
                timeout: Duration::from_secs(env_parse("SNIPER_HTTP_TIMEOUT_SECS", 30)),
                user_agent: Some(
                    env_var("SNIPER_USER_AGENT").unwrap_or_else(|| "tender-sniper/0.1".to_string()),
                ),
                backoff: BackoffPolicy::default(),
            },
            boamp,
            screening,
            notify,
            gateway_auth,
        }
    }
}
