//! Pure matching predicate: does a raw record satisfy a client's keyword +
//! region targeting profile.
//!
//! The keyword fallback (every word of the keyword longer than two
//! characters found somewhere in the text, in any order) is deliberately
//! permissive: the product favours a false positive the AI screening will
//! reject over a missed tender.

use crate::model::{Client, RawTender};

/// The slice of a client profile the matcher reads. Borrowed so the
/// predicate stays allocation-light when scanning a large fetch batch.
#[derive(Debug, Clone, Copy)]
pub struct TargetingProfile<'a> {
    pub keywords: &'a [String],
    pub regions: &'a [String],
}

impl<'a> From<&'a Client> for TargetingProfile<'a> {
    fn from(client: &'a Client) -> Self {
        Self {
            keywords: &client.keywords,
            regions: &client.regions,
        }
    }
}

pub fn matches(tender: &RawTender, profile: TargetingProfile<'_>) -> bool {
    region_matches(&tender.department_codes, profile.regions)
        && keyword_matches(&tender.searchable_text(), profile.keywords)
}

/// Empty client region set means nationwide: every tender passes. Otherwise
/// at least one declared department code must overlap.
fn region_matches(tender_codes: &[String], client_regions: &[String]) -> bool {
    if client_regions.is_empty() {
        return true;
    }
    tender_codes
        .iter()
        .any(|code| client_regions.iter().any(|r| r == code))
}

/// A client must declare at least one keyword; an empty set never matches.
fn keyword_matches(searchable_text: &str, keywords: &[String]) -> bool {
    if keywords.is_empty() {
        return false;
    }
    let haystack = searchable_text.to_lowercase();
    keywords.iter().any(|kw| keyword_hit(&haystack, kw))
}

fn keyword_hit(haystack: &str, keyword: &str) -> bool {
    let needle = keyword.trim().to_lowercase();
    if needle.is_empty() {
        return false;
    }
    if haystack.contains(&needle) {
        return true;
    }
    // Out-of-order partial match over the keyword's significant words.
    let significant: Vec<&str> = needle
        .split_whitespace()
        .filter(|w| w.chars().count() > 2)
        .collect();
    !significant.is_empty() && significant.iter().all(|w| haystack.contains(w))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tender(title: &str, body: &str, depts: &[&str]) -> RawTender {
        RawTender {
            external_id: "24-000001".into(),
            title: title.into(),
            body: body.into(),
            department_codes: depts.iter().map(|d| d.to_string()).collect(),
            published_at: None,
            deadline: None,
            notice_url: None,
            raw: json!({}),
        }
    }

    fn profile<'a>(keywords: &'a [String], regions: &'a [String]) -> TargetingProfile<'a> {
        TargetingProfile { keywords, regions }
    }

    #[test]
    fn nationwide_client_matches_any_department() {
        let keywords = vec!["nettoyage".to_string()];
        let regions: Vec<String> = vec![];
        let t = tender("Prestations de nettoyage des bureaux", "", &["75"]);
        assert!(matches(&t, profile(&keywords, &regions)));
    }

    #[test]
    fn region_mismatch_rejects_regardless_of_keywords() {
        let keywords = vec!["nettoyage".to_string()];
        let regions = vec!["75".to_string(), "92".to_string()];
        let t = tender("Nettoyage de locaux", "nettoyage", &["33"]);
        assert!(!matches(&t, profile(&keywords, &regions)));
    }

    #[test]
    fn empty_keyword_set_never_matches() {
        let keywords: Vec<String> = vec![];
        let regions: Vec<String> = vec![];
        let t = tender("Nettoyage de locaux", "", &["75"]);
        assert!(!matches(&t, profile(&keywords, &regions)));
    }

    #[test]
    fn exact_keyword_is_case_and_whitespace_insensitive() {
        let keywords = vec!["  NETTOYAGE ".to_string()];
        let regions: Vec<String> = vec![];
        let t = tender("Prestations de nettoyage", "", &["13"]);
        assert!(matches(&t, profile(&keywords, &regions)));
    }

    #[test]
    fn fallback_matches_keyword_words_out_of_order() {
        let keywords = vec!["entretien espaces verts".to_string()];
        let regions: Vec<String> = vec![];
        let t = tender(
            "Marché d'espaces naturels",
            "entretien courant des espaces verts communaux",
            &["44"],
        );
        assert!(matches(&t, profile(&keywords, &regions)));
    }

    #[test]
    fn fallback_ignores_short_stopwords_but_requires_the_rest() {
        // "de" is too short to count; "collecte" and "déchets" must both hit.
        let keywords = vec!["collecte de déchets".to_string()];
        let regions: Vec<String> = vec![];
        let hit = tender("Traitement des déchets", "collecte en porte à porte", &["69"]);
        let miss = tender("Traitement des déchets", "aucun ramassage prévu", &["69"]);
        assert!(matches(&hit, profile(&keywords, &regions)));
        assert!(!matches(&miss, profile(&keywords, &regions)));
    }

    #[test]
    fn region_overlap_on_any_declared_code() {
        let keywords = vec!["peinture".to_string()];
        let regions = vec!["33".to_string()];
        let t = tender("Travaux de peinture", "", &["24", "33", "47"]);
        assert!(matches(&t, profile(&keywords, &regions)));
    }

    #[test]
    fn predicate_is_deterministic() {
        let keywords = vec!["gardiennage".to_string()];
        let regions = vec!["75".to_string()];
        let t = tender("Gardiennage de site", "surveillance", &["75"]);
        let p = profile(&keywords, &regions);
        assert_eq!(matches(&t, p), matches(&t, p));
    }
}
