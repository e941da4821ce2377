//! Extraction Engine — the orchestrator. Composes the Site Config Store,
//! Fetcher, Browser Driver, Challenge Solver Client, LLM Suggester, HTML
//! Analyzer, and Scoring Engine into the scrape state machine from §4.9:
//!
//! `Start -> Validate -> LookupConfig -> Fetch -> DetectChallenge -> [Solve]
//! -> Extract -> Score -> Persist -> Done | Fail`

use crate::browser::{BrowserDriver, LoadPageOptions, SessionId, WaitUntil};
use crate::config::EngineConfig;
use crate::config_store::SiteConfigStore;
use crate::error::EngineError;
use crate::fetcher::{FetchRequest, Fetcher};
use crate::html_analyzer;
use crate::llm_suggester::LlmSuggester;
use crate::output::shape_output;
use crate::scoring::{score, ScoringWeights};
use crate::solver::{ChallengeSolverClient, ChallengeTask};
use crate::types::{
    ChallengeType, ElementDetails, FetchMethod, OutputType, ScrapeResult, SiteConfig,
};
use crate::normalize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Inbound request, mirrored from `POST /scrape`'s JSON body.
#[derive(Debug, Clone)]
pub struct ScrapeRequest {
    pub url: String,
    pub output_type: OutputType,
    pub proxy_server: Option<String>,
    pub user_agent: Option<String>,
    pub timeout_ms: Option<u64>,
    pub xpath_override: Option<String>,
    pub debug: bool,
}

impl ScrapeRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            output_type: OutputType::ContentOnly,
            proxy_server: None,
            user_agent: None,
            timeout_ms: None,
            xpath_override: None,
            debug: false,
        }
    }
}

const DEFAULT_DEADLINE: Duration = Duration::from_secs(90);
const MIN_CONTENT_LENGTH_FLOOR: usize = 50;

pub struct ExtractionEngine {
    config: EngineConfig,
    store: Arc<dyn SiteConfigStore>,
    fetcher: Arc<dyn Fetcher>,
    browser: Arc<dyn BrowserDriver>,
    solver: Arc<dyn ChallengeSolverClient>,
    llm: Arc<dyn LlmSuggester>,
}

impl ExtractionEngine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn SiteConfigStore>,
        fetcher: Arc<dyn Fetcher>,
        browser: Arc<dyn BrowserDriver>,
        solver: Arc<dyn ChallengeSolverClient>,
        llm: Arc<dyn LlmSuggester>,
    ) -> Self {
        Self { config, store, fetcher, browser, solver, llm }
    }

    /// Entry point. Never panics: every error path is mapped to a
    /// `ScrapeResult { success: false, .. }`.
    pub async fn scrape(&self, request: ScrapeRequest, debug_id: impl Into<String>) -> ScrapeResult {
        let deadline = request
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_DEADLINE);
        let debug_id = debug_id.into();

        let open_session: Arc<Mutex<Option<SessionId>>> = Arc::new(Mutex::new(None));
        let work = self.scrape_within_deadline(request, debug_id.clone(), Arc::clone(&open_session));

        match tokio::time::timeout(deadline, work).await {
            Ok(result) => result.unwrap_or_else(|e| ScrapeResult::err(&e)),
            Err(_) => {
                warn!(debug_id, "scrape deadline of {:?} exceeded, unwinding", deadline);
                if let Some(session) = open_session.lock().await.take() {
                    let browser = Arc::clone(&self.browser);
                    tokio::spawn(async move {
                        if let Err(e) = browser.close(&session).await {
                            warn!("best-effort session close after timeout failed: {e}");
                        }
                    });
                }
                ScrapeResult::err(&EngineError::timeout(format!("request exceeded {deadline:?} deadline")))
            }
        }
    }

    async fn scrape_within_deadline(
        &self,
        request: ScrapeRequest,
        debug_id: String,
        open_session: Arc<Mutex<Option<SessionId>>>,
    ) -> Result<ScrapeResult, EngineError> {
        // Validate
        let domain = normalize::normalize_domain(&request.url);
        if domain == "invalid" {
            return Err(EngineError::configuration(format!("not a valid absolute http(s) url: {}", request.url)));
        }
        info!(debug_id, domain, "validated request");

        // LookupConfig
        let existing = self.store.get(&domain).await;

        if let Some(xpath) = &request.xpath_override {
            info!(debug_id, domain, "explicit xpath override short-circuits to known path");
            return self
                .known_path(&request, &domain, xpath.clone(), existing, &debug_id, &open_session)
                .await;
        }

        let use_known = existing
            .as_ref()
            .map(|c| c.has_known_locator() && c.failure_count_since_last_success < self.config.rediscovery_threshold)
            .unwrap_or(false);

        if use_known {
            let xpath = existing.as_ref().unwrap().xpath_main_content.clone();
            info!(debug_id, domain, xpath, "known-path fast path");
            self.known_path(&request, &domain, xpath, existing, &debug_id, &open_session).await
        } else {
            info!(debug_id, domain, "entering discovery path");
            self.discovery_path(&request, &domain, &debug_id, &open_session).await
        }
    }

    /// Reuses a previously stored (or overridden) locator.
    async fn known_path(
        &self,
        request: &ScrapeRequest,
        domain: &str,
        xpath: String,
        site_config: Option<SiteConfig>,
        debug_id: &str,
        open_session: &Arc<Mutex<Option<SessionId>>>,
    ) -> Result<ScrapeResult, EngineError> {
        let user_agent = request
            .user_agent
            .clone()
            .or_else(|| site_config.as_ref().and_then(|c| c.user_agent.clone()))
            .unwrap_or_else(|| self.config.default_user_agent.clone());

        let needs_browser = site_config.as_ref().map(|c| c.needs_flaresolverr).unwrap_or(false);
        let proxy = request
            .proxy_server
            .clone()
            .or_else(|| site_config.as_ref().filter(|c| c.needs_proxy).and(self.config.http_proxy.clone()));

        if !needs_browser {
            let mut fetch_req = FetchRequest::new(&request.url, &user_agent);
            fetch_req.timeout = self.config.curl_timeout;
            fetch_req.proxy_url = proxy.clone();
            if let Some(cfg) = &site_config {
                if let Some(headers) = &cfg.site_specific_headers {
                    fetch_req.extra_headers = headers.clone();
                }
            }

            match self.fetcher.fetch(&fetch_req).await {
                Ok(response) if !html_analyzer::detect_challenge_markers(&response.body) && !is_blocked_status(response.status) => {
                    let details = html_analyzer::evaluate_xpath(&response.body, &xpath)
                        .map_err(EngineError::from)?;
                    if details.element_found_count > 0 && details.text_content_length >= MIN_CONTENT_LENGTH_FLOOR {
                        let outer = extract_outer_html(&response.body, &xpath);
                        self.store.mark_success(domain, &xpath, false).await.map_err(EngineError::from)?;
                        let payload = shape_output(&outer, request.output_type, &details, 0);
                        return Ok(ScrapeResult::ok(FetchMethod::Fetcher, xpath, payload));
                    }
                    debug!(debug_id, domain, "fetcher-only extraction empty, escalating to browser");
                }
                Ok(_) => debug!(debug_id, domain, "fetch response blocked or challenged, escalating to browser"),
                Err(e) => debug!(debug_id, domain, error = %e, "fetch failed, escalating to browser"),
            }
        }

        self.known_path_via_browser(request, domain, xpath, site_config, &user_agent, proxy, debug_id, open_session)
            .await
    }

    async fn known_path_via_browser(
        &self,
        request: &ScrapeRequest,
        domain: &str,
        xpath: String,
        _site_config: Option<SiteConfig>,
        user_agent: &str,
        proxy: Option<String>,
        debug_id: &str,
        open_session: &Arc<Mutex<Option<SessionId>>>,
    ) -> Result<ScrapeResult, EngineError> {
        let session = self.browser.open(proxy.as_deref()).await.map_err(EngineError::from)?;
        *open_session.lock().await = Some(session.clone());
        let cleanup = SessionCleanup { browser: Arc::clone(&self.browser), session: session.clone(), armed: true };

        let opts = LoadPageOptions {
            wait_until: WaitUntil::NetworkIdle2,
            timeout: self.config.browser.navigation_timeout,
            user_agent: Some(user_agent.to_string()),
            ..Default::default()
        };
        let page = self.browser.load_page(&session, &request.url, &opts).await.map_err(EngineError::from)?;
        tokio::time::sleep(self.config.browser.settle_delay).await;

        let details = self
            .browser
            .get_element_details(&session, &page, &xpath)
            .await
            .map_err(EngineError::from)?;

        let result = match details {
            Some(d) if d.element_found_count > 0 && d.text_content_length >= MIN_CONTENT_LENGTH_FLOOR => {
                let matches = self.browser.evaluate_xpath(&session, &page, &xpath).await.map_err(EngineError::from)?;
                let outer = matches.and_then(|m| m.into_iter().next()).unwrap_or_default();
                self.store.mark_success(domain, &xpath, false).await.map_err(EngineError::from)?;
                let payload = shape_output(&outer, request.output_type, &d, 0);
                Ok(ScrapeResult::ok(FetchMethod::Browser, xpath, payload))
            }
            _ => {
                let updated = self.store.increment_failure(domain).await.map_err(EngineError::from)?;
                if updated.failure_count_since_last_success >= self.config.rediscovery_threshold {
                    info!(debug_id, domain, "rediscovery threshold reached, falling into discovery");
                    drop(cleanup);
                    *open_session.lock().await = None;
                    return self.discovery_path(request, domain, debug_id, open_session).await;
                }
                Err(EngineError::extraction("known locator matched no usable content"))
            }
        };

        drop(cleanup);
        *open_session.lock().await = None;
        result
    }

    /// Discovers a new locator via the browser, LLM suggestion, and scoring.
    async fn discovery_path(
        &self,
        request: &ScrapeRequest,
        domain: &str,
        debug_id: &str,
        open_session: &Arc<Mutex<Option<SessionId>>>,
    ) -> Result<ScrapeResult, EngineError> {
        let user_agent = request.user_agent.clone().unwrap_or_else(|| self.config.default_user_agent.clone());
        let proxy = request.proxy_server.clone().or_else(|| self.config.http_proxy.clone());

        let session = self.browser.open(proxy.as_deref()).await.map_err(EngineError::from)?;
        *open_session.lock().await = Some(session.clone());
        let cleanup = SessionCleanup { browser: Arc::clone(&self.browser), session: session.clone(), armed: true };

        let result = self.discovery_path_inner(request, domain, &session, &user_agent, debug_id).await;

        drop(cleanup);
        *open_session.lock().await = None;
        result
    }

    async fn discovery_path_inner(
        &self,
        request: &ScrapeRequest,
        domain: &str,
        session: &SessionId,
        user_agent: &str,
        debug_id: &str,
    ) -> Result<ScrapeResult, EngineError> {
        let opts = LoadPageOptions {
            wait_until: WaitUntil::NetworkIdle2,
            timeout: self.config.browser.navigation_timeout,
            user_agent: Some(user_agent.to_string()),
            ..Default::default()
        };
        let page = self.browser.load_page(session, &request.url, &opts).await.map_err(EngineError::from)?;
        tokio::time::sleep(self.config.browser.settle_delay).await;

        let detection = self.browser.detect_challenge(session, &page).await.map_err(EngineError::from)?;
        if detection.is_present() {
            self.resolve_challenge(session, &page, &request.url, &detection, user_agent, debug_id).await?;
        }

        let html = self.browser.get_page_html(session, &page).await.map_err(EngineError::from)?;
        let simplified = html_analyzer::simplify_dom(
            &html,
            self.config.llm.simplify_max_text_len,
            self.config.llm.simplify_min_annotate_size,
        );
        let snippets = html_analyzer::extract_snippets(&html, self.config.llm.max_snippets, self.config.llm.snippet_max_len);

        let suggestions = self.llm.suggest(&simplified, &snippets).await.map_err(EngineError::from)?;
        if suggestions.is_empty() {
            self.store.increment_failure(domain).await.map_err(EngineError::from)?;
            return Err(EngineError::extraction("llm suggester returned no candidates"));
        }

        let mut scored: Vec<(usize, f64, ElementDetails)> = Vec::new();
        for (idx, suggestion) in suggestions.iter().enumerate() {
            let details = self.browser.get_element_details(session, &page, &suggestion.xpath).await.map_err(EngineError::from)?;
            let Some(details) = details else { continue };
            let candidate_score = score(&details, &self.config.scoring_weights);
            if candidate_score.is_finite() {
                scored.push((idx, candidate_score, details));
            }
        }

        let best = pick_best(scored, &self.config.min_xpath_score_threshold);
        let Some((idx, best_score, details)) = best else {
            self.store.increment_failure(domain).await.map_err(EngineError::from)?;
            return Err(EngineError::extraction("no candidate locator met the score threshold"));
        };
        let xpath = suggestions[idx].xpath.clone();
        debug!(debug_id, domain, xpath, best_score, "selected discovery candidate");

        let matches = self.browser.evaluate_xpath(session, &page, &xpath).await.map_err(EngineError::from)?;
        let outer = matches.and_then(|m| m.into_iter().next());

        match outer {
            Some(outer) if !outer.is_empty() => {
                self.store.mark_success(domain, &xpath, true).await.map_err(EngineError::from)?;
                let payload = shape_output(&outer, request.output_type, &details, 0);
                Ok(ScrapeResult::ok(FetchMethod::Browser, xpath, payload))
            }
            _ => {
                self.store.increment_failure(domain).await.map_err(EngineError::from)?;
                Err(EngineError::extraction("best-scoring candidate failed to extract content"))
            }
        }
    }

    async fn resolve_challenge(
        &self,
        session: &SessionId,
        page: &crate::browser::PageId,
        website_url: &str,
        detection: &crate::types::ChallengeDetection,
        user_agent: &str,
        debug_id: &str,
    ) -> Result<(), EngineError> {
        let challenge_url = detection.challenge_url.clone().unwrap_or_else(|| website_url.to_string());
        let kind = match detection.challenge_type {
            ChallengeType::Datadome => crate::solver::ChallengeKind::Datadome,
            ChallengeType::Recaptcha => crate::solver::ChallengeKind::Recaptcha,
            ChallengeType::Hcaptcha => crate::solver::ChallengeKind::Hcaptcha,
            ChallengeType::Turnstile => crate::solver::ChallengeKind::Turnstile,
            _ => crate::solver::ChallengeKind::Generic,
        };

        let task = ChallengeTask {
            kind,
            website_url: website_url.to_string(),
            challenge_url,
            user_agent: user_agent.to_string(),
            proxy_url: self.config.http_proxy.clone(),
        };

        let solved = self.solver.solve(&task).await.map_err(EngineError::from)?;
        let serialized = format!(
            "{}={}; Path={}; {}{}{}{}",
            solved.name,
            solved.value,
            solved.path,
            solved.domain.as_deref().map(|d| format!("Domain={d}; ")).unwrap_or_default(),
            solved.max_age.map(|m| format!("Max-Age={m}; ")).unwrap_or_default(),
            solved.same_site.as_deref().map(|s| format!("SameSite={s}; ")).unwrap_or_default(),
            if solved.secure { "Secure" } else { "" },
        );
        self.browser.set_cookies(session, page, &serialized).await.map_err(EngineError::from)?;
        self.browser.reload(session, page).await.map_err(EngineError::from)?;
        tokio::time::sleep(self.config.browser.settle_delay).await;

        let recheck = self.browser.detect_challenge(session, page).await.map_err(EngineError::from)?;
        if recheck.is_present() {
            warn!(debug_id, "challenge still present after solver + reload");
            return Err(EngineError::captcha("challenge persisted after solver-provided cookie"));
        }
        Ok(())
    }
}

/// Tie-break among finite-scored candidates: highest score; ties broken by
/// greater text length, then shallower xpath depth, then first in LLM order.
fn pick_best(
    mut scored: Vec<(usize, f64, ElementDetails)>,
    min_threshold: &f64,
) -> Option<(usize, f64, ElementDetails)> {
    scored.retain(|(_, s, _)| *s >= *min_threshold);
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap()
            .then_with(|| b.2.text_content_length.cmp(&a.2.text_content_length))
            .then_with(|| xpath_depth(&a.2.xpath).cmp(&xpath_depth(&b.2.xpath)))
            .then_with(|| a.0.cmp(&b.0))
    });
    scored.into_iter().next()
}

fn xpath_depth(xpath: &str) -> usize {
    xpath.matches('/').count()
}

fn is_blocked_status(status: u16) -> bool {
    matches!(status, 403 | 429 | 503)
}

fn extract_outer_html(html: &str, xpath: &str) -> String {
    html_analyzer::evaluate_xpath_full(html, xpath)
        .unwrap_or_default()
        .unwrap_or_default()
}

/// Guarantees the browser session is closed on every exit path, including an
/// early `?` return, by running in `Drop` rather than relying on every
/// caller to remember cleanup.
struct SessionCleanup {
    browser: Arc<dyn BrowserDriver>,
    session: SessionId,
    armed: bool,
}

impl Drop for SessionCleanup {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let browser = Arc::clone(&self.browser);
        let session = self.session.clone();
        tokio::spawn(async move {
            if let Err(e) = browser.close(&session).await {
                warn!("session close during cleanup failed: {e}");
            }
        });
    }
}
