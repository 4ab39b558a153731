//! Buyer-profile page resolution: find the DCE archive link behind a notice.
//!
//! The resolver explicitly distinguishes "direct downloadable archive" from
//! "landing page only"; the capture pipeline aborts on the latter instead of
//! trying to unpack an HTML response.

use scraper::{Html, Selector};
use sniper_storage::{FetchError, HttpFetcher};
use thiserror::Error;
use tracing::debug;

/// Anchor text hints used by French buyer-profile platforms.
const LINK_KEYWORDS: [&str; 5] = ["télécharger", "dce", "dossier", "download", "pièces"];
const STRONG_PHRASES: [&str; 2] = ["télécharger le dossier", "télécharger le dce"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DceLink {
    pub url: String,
    /// True when `url` points at the archive itself; false when it is only
    /// the page we landed on.
    pub direct: bool,
}

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("fetching buyer profile page failed: {0}")]
    Fetch(#[from] FetchError),
}

pub struct DceResolver {
    fetcher: HttpFetcher,
}

impl DceResolver {
    pub fn new(fetcher: HttpFetcher) -> Self {
        Self { fetcher }
    }

    pub async fn resolve(&self, page_url: &str) -> Result<DceLink, ScrapeError> {
        let response = self.fetcher.get_bytes(page_url).await?;

        // The notice URL sometimes already is the archive.
        let content_type = response.content_type.as_deref().unwrap_or("");
        if is_archive_url(&response.final_url) || content_type.contains("application/zip") {
            debug!(url = %response.final_url, "notice url is a direct archive");
            return Ok(DceLink {
                url: response.final_url,
                direct: true,
            });
        }

        if let Some(href) = find_download_href(&response.text(), &response.final_url) {
            debug!(url = %href, "found archive link on buyer profile page");
            return Ok(DceLink {
                url: href,
                direct: true,
            });
        }

        Ok(DceLink {
            url: response.final_url,
            direct: false,
        })
    }
}

fn is_archive_url(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.to_lowercase().ends_with(".zip")
}

/// Anchor heuristics in priority order: keyword-labelled archive links, the
/// strong "télécharger le dossier/DCE" phrases, then any archive link.
pub fn find_download_href(html: &str, base_url: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href]").expect("static selector");

    let mut anchors = Vec::new();
    for node in document.select(&selector) {
        let Some(href) = node.value().attr("href") else {
            continue;
        };
        let Some(absolute) = absolutize(base_url, href) else {
            continue;
        };
        let text = node.text().collect::<String>().to_lowercase();
        anchors.push((absolute, text));
    }

    anchors
        .iter()
        .find(|(href, text)| {
            is_archive_url(href) && LINK_KEYWORDS.iter().any(|kw| text.contains(kw))
        })
        .or_else(|| {
            anchors
                .iter()
                .find(|(_, text)| STRONG_PHRASES.iter().any(|p| text.contains(p)))
        })
        .or_else(|| anchors.iter().find(|(href, _)| is_archive_url(href)))
        .map(|(href, _)| href.clone())
}

fn absolutize(base_url: &str, href: &str) -> Option<String> {
    let base = reqwest::Url::parse(base_url).ok()?;
    base.join(href).ok().map(|u| u.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://marches.example.fr/consultation/42";

    #[test]
    fn prefers_keyword_labelled_archive_links() {
        let html = r#"
            <a href="/aide.zip">Aide en ligne</a>
            <a href="/consultation/42/dce.zip">Télécharger le DCE complet</a>
        "#;
        assert_eq!(
            find_download_href(html, BASE).as_deref(),
            Some("https://marches.example.fr/consultation/42/dce.zip")
        );
    }

    #[test]
    fn strong_phrase_wins_over_generic_archive_link() {
        let html = r#"
            <a href="/autre.zip">Archives des marchés passés</a>
            <a href="/consultation/42/pieces">Télécharger le dossier de consultation</a>
        "#;
        assert_eq!(
            find_download_href(html, BASE).as_deref(),
            Some("https://marches.example.fr/consultation/42/pieces")
        );
    }

    #[test]
    fn falls_back_to_any_archive_link() {
        let html = r#"<a href="https://cdn.example.fr/export.zip">export</a>"#;
        assert_eq!(
            find_download_href(html, BASE).as_deref(),
            Some("https://cdn.example.fr/export.zip")
        );
    }

    #[test]
    fn landing_page_without_links_yields_none() {
        let html = "<p>Authentifiez-vous pour accéder aux pièces.</p>";
        assert_eq!(find_download_href(html, BASE), None);
    }

    #[test]
    fn archive_url_detection_ignores_query_strings() {
        assert!(is_archive_url("https://x.fr/dce.zip?token=abc"));
        assert!(is_archive_url("https://x.fr/DCE.ZIP"));
        assert!(!is_archive_url("https://x.fr/consultation"));
    }

    #[test]
    fn relative_links_are_resolved_against_the_page() {
        let html = r#"<a href="dce.zip">télécharger</a>"#;
        assert_eq!(
            find_download_href(html, "https://marches.example.fr/c/42/").as_deref(),
            Some("https://marches.example.fr/c/42/dce.zip")
        );
    }
}
