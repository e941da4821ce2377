//! The data model shared by every component: [`SiteConfig`], [`ScrapeContext`],
//! [`ElementDetails`], [`LlmXPathSuggestion`], and [`ScrapeResult`].

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// SiteConfig
// ─────────────────────────────────────────────────────────────────────────────

/// Durable per-domain record. One exists iff at least one scrape has been
/// attempted for its domain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SiteConfig {
    pub domain_pattern: String,
    #[serde(default)]
    pub xpath_main_content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_successful_scrape_timestamp: Option<String>,
    #[serde(default)]
    pub failure_count_since_last_success: u32,
    #[serde(default)]
    pub discovered_by_llm: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_specific_headers: Option<std::collections::HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub needs_proxy: bool,
    #[serde(default)]
    pub needs_flaresolverr: bool,
}

impl SiteConfig {
    pub fn new(domain_pattern: impl Into<String>) -> Self {
        Self {
            domain_pattern: domain_pattern.into(),
            xpath_main_content: String::new(),
            last_successful_scrape_timestamp: None,
            failure_count_since_last_success: 0,
            discovered_by_llm: false,
            site_specific_headers: None,
            user_agent: None,
            needs_proxy: false,
            needs_flaresolverr: false,
        }
    }

    pub fn has_known_locator(&self) -> bool {
        !self.xpath_main_content.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ScrapeContext
// ─────────────────────────────────────────────────────────────────────────────

/// Method the engine selected (or escalated to) for this request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchMethod {
    Fetcher,
    Browser,
}

/// Per-request, ephemeral. Never persisted.
#[derive(Debug, Clone)]
pub struct ScrapeContext {
    pub target_url: String,
    pub domain: String,
    pub site_config: Option<SiteConfig>,
    pub method: FetchMethod,
    pub proxy_server: Option<String>,
    pub user_agent: Option<String>,
    pub debug_id: String,
}

impl ScrapeContext {
    pub fn new(target_url: impl Into<String>, domain: impl Into<String>, debug_id: impl Into<String>) -> Self {
        Self {
            target_url: target_url.into(),
            domain: domain.into(),
            site_config: None,
            method: FetchMethod::Fetcher,
            proxy_server: None,
            user_agent: None,
            debug_id: debug_id.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ElementDetails
// ─────────────────────────────────────────────────────────────────────────────

/// Accounting produced by evaluating one XPath against one concrete DOM.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ElementDetails {
    pub xpath: String,
    pub element_found_count: usize,
    pub tag_name: String,
    pub id: String,
    pub class_name: String,
    pub text_content_length: usize,
    pub paragraph_count: usize,
    pub link_count: usize,
    pub image_count: usize,
    pub video_count: usize,
    pub audio_count: usize,
    pub picture_count: usize,
    pub unwanted_tag_count: usize,
    pub descendant_count: usize,
    pub inner_html_sample: String,
}

impl ElementDetails {
    /// A zeroed record for a locator that matched nothing — not an error.
    pub fn zero(xpath: impl Into<String>) -> Self {
        Self {
            xpath: xpath.into(),
            ..Default::default()
        }
    }
}

/// Tag names that count toward [`ElementDetails::unwanted_tag_count`] and are
/// stripped during DOM simplification.
pub const UNWANTED_TAGS: &[&str] = &[
    "nav", "footer", "aside", "header", "form", "script", "style", "figcaption", "figure",
    "details", "summary", "menu", "dialog",
];

// ─────────────────────────────────────────────────────────────────────────────
// LlmXPathSuggestion
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmXPathSuggestion {
    pub xpath: String,
    pub explanation: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// ScrapeResult
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputType {
    ContentOnly,
    Markdown,
    CleanedHtml,
    FullHtml,
    MetadataOnly,
}

impl Default for OutputType {
    fn default() -> Self {
        OutputType::ContentOnly
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScrapePayload {
    Text(String),
    Metadata(serde_json::Value),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method_used: Option<FetchMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xpath_used: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<ScrapePayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_snapshot_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<crate::error::ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ScrapeResult {
    pub fn ok(method: FetchMethod, xpath: impl Into<String>, payload: ScrapePayload) -> Self {
        Self {
            success: true,
            method_used: Some(method),
            xpath_used: Some(xpath.into()),
            payload: Some(payload),
            raw_snapshot_path: None,
            error_kind: None,
            error_message: None,
        }
    }

    pub fn err(error: &crate::error::EngineError) -> Self {
        Self {
            success: false,
            method_used: None,
            xpath_used: None,
            payload: None,
            raw_snapshot_path: None,
            error_kind: Some(error.kind),
            error_message: Some(error.sanitized_message()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Challenge types (shared between HTML Analyzer and Browser Driver)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeType {
    None,
    Datadome,
    Recaptcha,
    Hcaptcha,
    Turnstile,
    Generic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeDetection {
    pub challenge_type: ChallengeType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge_url: Option<String>,
}

impl ChallengeDetection {
    pub fn none() -> Self {
        Self {
            challenge_type: ChallengeType::None,
            challenge_url: None,
        }
    }

    pub fn is_present(&self) -> bool {
        self.challenge_type != ChallengeType::None
    }
}

/// Result of `inspectChallengeUrl`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChallengeUrlInspection {
    pub banned: bool,
}
