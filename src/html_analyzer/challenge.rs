//! `detectChallengeMarkers` and `inspectChallengeUrl`.

use crate::types::ChallengeUrlInspection;
use regex::RegexBuilder;
use scraper::{Html, Selector};
use std::sync::OnceLock;
use url::Url;

/// Case-insensitive phrasings that show up on CAPTCHA / anti-bot interstitials.
const TEXT_MARKERS: &[&str] = &[
    "captcha",
    "verify you are human",
    "recaptcha",
    "hcaptcha",
    "turnstile",
    "cloudflare",
    "datadome",
    "checking your browser",
    "access denied",
];

/// DOM selectors matching known challenge iframes/containers.
const SELECTOR_MARKERS: &[&str] = &[
    r#"iframe[src*="captcha-delivery.com"]"#,
    ".g-recaptcha",
    ".cf-turnstile",
    r#"[id*="captcha"]"#,
    r#"iframe[src*="recaptcha"]"#,
    r#"iframe[src*="hcaptcha.com"]"#,
];

fn text_pattern() -> &'static regex::Regex {
    static PATTERN: OnceLock<regex::Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let alternation = TEXT_MARKERS.join("|");
        RegexBuilder::new(&alternation)
            .case_insensitive(true)
            .build()
            .expect("challenge marker pattern is a fixed, valid alternation")
    })
}

/// OR of a text-phrase match and a DOM-selector match against known
/// challenge markers.
pub fn detect_challenge_markers(html: &str) -> bool {
    if text_pattern().is_match(html) {
        return true;
    }

    let document = Html::parse_document(html);
    SELECTOR_MARKERS.iter().any(|sel| {
        Selector::parse(sel)
            .map(|selector| document.select(&selector).next().is_some())
            .unwrap_or(false)
    })
}

/// Classify a challenge URL: a `t=bv` query parameter indicates a banned
/// source IP; a `cid` containing `block` is also treated as banned. Missing
/// parameters are inconclusive (not banned).
pub fn inspect_challenge_url(challenge_url: &str) -> ChallengeUrlInspection {
    let Ok(parsed) = Url::parse(challenge_url) else {
        return ChallengeUrlInspection { banned: false };
    };

    let mut banned = false;
    for (key, value) in parsed.query_pairs() {
        if key == "t" && value == "bv" {
            banned = true;
        }
        if key == "cid" && value.to_ascii_lowercase().contains("block") {
            banned = true;
        }
    }

    ChallengeUrlInspection { banned }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_text_marker_case_insensitively() {
        assert!(detect_challenge_markers("<p>Please Verify You Are Human</p>"));
    }

    #[test]
    fn detects_selector_marker() {
        assert!(detect_challenge_markers(
            r#"<div class="g-recaptcha" data-sitekey="x"></div>"#
        ));
    }

    #[test]
    fn clean_page_is_not_a_challenge() {
        assert!(!detect_challenge_markers("<article><p>Just an article.</p></article>"));
    }

    #[test]
    fn t_bv_is_banned() {
        let insp = inspect_challenge_url("https://geo.captcha-delivery.com/captcha/?t=bv&cid=abc");
        assert!(insp.banned);
    }

    #[test]
    fn t_fe_is_not_banned() {
        let insp = inspect_challenge_url("https://geo.captcha-delivery.com/captcha/?t=fe&cid=abc");
        assert!(!insp.banned);
    }

    #[test]
    fn missing_params_are_inconclusive() {
        let insp = inspect_challenge_url("https://example.com/challenge");
        assert!(!insp.banned);
    }

    #[test]
    fn cid_containing_block_is_banned() {
        let insp = inspect_challenge_url("https://geo.captcha-delivery.com/?cid=region-block-1");
        assert!(insp.banned);
    }
}
