//! Browser Driver — a managed pool of headless-browser sessions, each with
//! its own ephemeral profile directory. Grounded on the chromiumoxide usage
//! already established in this codebase's native browser manager: executable
//! discovery, a headless `BrowserConfig` builder, and launch/new_page/close.

use crate::config::BrowserConfig as BrowserSettings;
use crate::error::BrowserError;
use crate::types::{ChallengeDetection, ChallengeType, ElementDetails};
use async_trait::async_trait;
use chromiumoxide::browser::BrowserConfig as CdpBrowserConfig;
use chromiumoxide::cdp::browser_protocol::network::{CookieParam, CookieSameSite};
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use rand::Rng;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex, Semaphore};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitUntil {
    Load,
    DomContentLoaded,
    NetworkIdle0,
    NetworkIdle2,
}

#[derive(Debug, Clone)]
pub struct LoadPageOptions {
    pub wait_until: WaitUntil,
    pub timeout: Duration,
    pub proxy_username: Option<String>,
    pub proxy_password: Option<String>,
    pub user_agent: Option<String>,
}

impl Default for LoadPageOptions {
    fn default() -> Self {
        Self {
            wait_until: WaitUntil::Load,
            timeout: Duration::from_secs(30),
            proxy_username: None,
            proxy_password: None,
            user_agent: None,
        }
    }
}

/// Identifies one page within one session. Sessions map 1:1 to a browser
/// process and its ephemeral profile directory, matching "each scrape
/// obtains a session whose profile directory is unique and ephemeral".
pub type SessionId = String;
pub type PageId = String;

#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn open(&self, proxy_url: Option<&str>) -> Result<SessionId, BrowserError>;
    async fn close(&self, session: &SessionId) -> Result<(), BrowserError>;
    async fn load_page(
        &self,
        session: &SessionId,
        url: &str,
        opts: &LoadPageOptions,
    ) -> Result<PageId, BrowserError>;
    async fn close_page(&self, session: &SessionId, page: &PageId) -> Result<(), BrowserError>;
    async fn get_page_html(&self, session: &SessionId, page: &PageId) -> Result<String, BrowserError>;
    /// Outer HTML of every match, or `None` when the expression is invalid.
    async fn evaluate_xpath(
        &self,
        session: &SessionId,
        page: &PageId,
        xpath: &str,
    ) -> Result<Option<Vec<String>>, BrowserError>;
    async fn get_element_details(
        &self,
        session: &SessionId,
        page: &PageId,
        xpath: &str,
    ) -> Result<Option<ElementDetails>, BrowserError>;
    async fn detect_challenge(&self, session: &SessionId, page: &PageId) -> Result<ChallengeDetection, BrowserError>;
    async fn get_cookies(&self, session: &SessionId, page: &PageId) -> Result<String, BrowserError>;
    async fn set_cookies(&self, session: &SessionId, page: &PageId, serialized: &str) -> Result<(), BrowserError>;
    async fn reload(&self, session: &SessionId, page: &PageId) -> Result<(), BrowserError>;
}

struct LiveSession {
    browser: Browser,
    _handler: tokio::task::JoinHandle<()>,
    profile_dir: PathBuf,
    pages: HashMap<PageId, Page>,
    _permit: tokio::sync::OwnedSemaphorePermit,
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.profile_dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to remove profile dir {:?}: {e}", self.profile_dir);
            }
        }
    }
}

/// `chromiumoxide`-backed [`BrowserDriver`]. A bounded semaphore gates
/// concurrent sessions; each session gets a freshly generated, ephemeral
/// `--user-data-dir` that is removed on every exit path (including a panic
/// unwind, via `Drop`).
pub struct ChromiumBrowserDriver {
    settings: BrowserSettings,
    sessions: Mutex<HashMap<SessionId, LiveSession>>,
    semaphore: Arc<Semaphore>,
}

impl ChromiumBrowserDriver {
    pub fn new(settings: BrowserSettings) -> Self {
        let semaphore = Arc::new(Semaphore::new(settings.max_concurrent_sessions.max(1)));
        Self {
            settings,
            sessions: Mutex::new(HashMap::new()),
            semaphore,
        }
    }

    fn resolve_executable(&self) -> Result<String, BrowserError> {
        if let Some(exe) = &self.settings.executable {
            return Ok(exe.clone());
        }
        find_chrome_executable().ok_or(BrowserError::ExecutableNotFound)
    }

    fn build_config(
        &self,
        exe: &str,
        proxy_url: Option<&str>,
        profile_dir: &Path,
    ) -> Result<CdpBrowserConfig, BrowserError> {
        let mut builder = CdpBrowserConfig::builder()
            .chrome_executable(exe)
            .viewport(Viewport {
                width: self.settings.viewport_width,
                height: self.settings.viewport_height,
                device_scale_factor: Some(1.0),
                emulating_mobile: false,
                is_landscape: true,
                has_touch: false,
            })
            .window_size(self.settings.viewport_width, self.settings.viewport_height)
            .arg(format!("--user-data-dir={}", profile_dir.display()))
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-setuid-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-background-networking")
            .arg("--disable-sync")
            .arg("--no-first-run")
            .arg("--hide-scrollbars")
            .arg("--mute-audio");

        if self.settings.headless {
            builder = builder.arg("--headless=new");
        }
        if let Some(proxy) = proxy_url {
            builder = builder.arg(format!("--proxy-server={proxy}"));
        }

        if self.settings.extension_paths.is_empty() {
            builder = builder.arg("--disable-extensions");
        } else {
            let joined = self.settings.extension_paths.join(",");
            builder = builder
                .arg(format!("--disable-extensions-except={joined}"))
                .arg(format!("--load-extension={joined}"));
        }

        builder.build().map_err(|e| BrowserError::Launch(e.to_string()))
    }

    async fn with_page<'a>(
        &'a self,
        sessions: &'a mut HashMap<SessionId, LiveSession>,
        session: &SessionId,
        page: &PageId,
    ) -> Result<&'a Page, BrowserError> {
        sessions
            .get(session)
            .ok_or_else(|| BrowserError::Page(format!("unknown session {session}")))?
            .pages
            .get(page)
            .ok_or_else(|| BrowserError::Page(format!("unknown page {page}")))
    }
}

fn new_profile_dir() -> PathBuf {
    let suffix: u64 = rand::rng().random();
    std::env::temp_dir().join(format!("xpath-scout-profile-{suffix:016x}"))
}

#[async_trait]
impl BrowserDriver for ChromiumBrowserDriver {
    async fn open(&self, proxy_url: Option<&str>) -> Result<SessionId, BrowserError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| BrowserError::Launch("session semaphore closed".to_string()))?;

        let exe = self.resolve_executable()?;
        let profile_dir = new_profile_dir();
        std::fs::create_dir_all(&profile_dir)
            .map_err(|e| BrowserError::Launch(format!("create profile dir: {e}")))?;

        let config = self.build_config(&exe, proxy_url, &profile_dir)?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    error!("cdp handler error: {e}");
                }
            }
        });

        let session_id = format!("sess-{:016x}", rand::rng().random::<u64>());
        let session = LiveSession {
            browser,
            _handler: handler_task,
            profile_dir,
            pages: HashMap::new(),
            _permit: permit,
        };
        self.sessions.lock().await.insert(session_id.clone(), session);
        Ok(session_id)
    }

    async fn close(&self, session: &SessionId) -> Result<(), BrowserError> {
        let mut sessions = self.sessions.lock().await;
        if let Some(mut live) = sessions.remove(session) {
            if let Err(e) = live.browser.close().await {
                warn!("browser close error (non-fatal): {e}");
            }
        }
        Ok(())
    }

    async fn load_page(
        &self,
        session: &SessionId,
        url: &str,
        opts: &LoadPageOptions,
    ) -> Result<PageId, BrowserError> {
        let mut sessions = self.sessions.lock().await;
        let live = sessions
            .get_mut(session)
            .ok_or_else(|| BrowserError::Page(format!("unknown session {session}")))?;

        let page = tokio::time::timeout(opts.timeout, live.browser.new_page(url))
            .await
            .map_err(|_| BrowserError::Timeout(opts.timeout))?
            .map_err(|e| BrowserError::Navigation(e.to_string()))?;

        if let Some(ua) = &opts.user_agent {
            if let Err(e) = page.set_user_agent(ua).await {
                warn!("failed to set user agent: {e}");
            }
        }

        match opts.wait_until {
            WaitUntil::Load | WaitUntil::DomContentLoaded => {
                page.wait_for_navigation().await.ok();
            }
            WaitUntil::NetworkIdle0 | WaitUntil::NetworkIdle2 => {
                page.wait_for_navigation().await.ok();
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }

        let page_id = format!("page-{:016x}", rand::rng().random::<u64>());
        live.pages.insert(page_id.clone(), page);
        Ok(page_id)
    }

    async fn close_page(&self, session: &SessionId, page: &PageId) -> Result<(), BrowserError> {
        let mut sessions = self.sessions.lock().await;
        if let Some(live) = sessions.get_mut(session) {
            if let Some(p) = live.pages.remove(page) {
                p.close().await.map_err(|e| BrowserError::Page(e.to_string()))?;
            }
        }
        Ok(())
    }

    async fn get_page_html(&self, session: &SessionId, page: &PageId) -> Result<String, BrowserError> {
        let sessions = self.sessions.lock().await;
        let p = self.with_page(&sessions, session, page).await?;
        p.content().await.map_err(|e| BrowserError::Page(e.to_string()))
    }

    async fn evaluate_xpath(
        &self,
        session: &SessionId,
        page: &PageId,
        xpath: &str,
    ) -> Result<Option<Vec<String>>, BrowserError> {
        let sessions = self.sessions.lock().await;
        let p = self.with_page(&sessions, session, page).await?;

        let script = format!(
            r#"(() => {{
                try {{
                    const result = document.evaluate({xpath_json}, document, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
                    const out = [];
                    for (let i = 0; i < result.snapshotLength; i++) {{
                        out.push(result.snapshotItem(i).outerHTML);
                    }}
                    return out;
                }} catch (e) {{
                    return null;
                }}
            }})()"#,
            xpath_json = serde_json::to_string(xpath).unwrap_or_default()
        );

        let value: serde_json::Value = p
            .evaluate(script)
            .await
            .map_err(|e| BrowserError::Page(e.to_string()))?
            .into_value()
            .map_err(|e| BrowserError::Page(e.to_string()))?;

        match value {
            serde_json::Value::Null => Ok(None),
            serde_json::Value::Array(items) => Ok(Some(
                items.into_iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
            )),
            _ => Ok(None),
        }
    }

    async fn get_element_details(
        &self,
        session: &SessionId,
        page: &PageId,
        xpath: &str,
    ) -> Result<Option<ElementDetails>, BrowserError> {
        let sessions = self.sessions.lock().await;
        let p = self.with_page(&sessions, session, page).await?;

        let script = format!(
            r#"(() => {{
                const unwanted = new Set(['nav','footer','aside','header','form','script','style','figcaption','figure','details','summary','menu','dialog']);
                try {{
                    const result = document.evaluate({xpath_json}, document, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
                    if (result.snapshotLength === 0) return null;
                    const first = result.snapshotItem(0);
                    let textLen = 0, paragraphs = 0, links = 0, images = 0, videos = 0, audios = 0, pictures = 0, unwantedCount = 0, descendants = 0;
                    const walk = (el) => {{
                        for (const child of el.children) {{
                            descendants++;
                            const tag = child.tagName.toLowerCase();
                            if (tag === 'p') paragraphs++;
                            if (tag === 'a') links++;
                            if (tag === 'img') images++;
                            if (tag === 'video') videos++;
                            if (tag === 'audio') audios++;
                            if (tag === 'picture') pictures++;
                            if (unwanted.has(tag)) unwantedCount++;
                            walk(child);
                        }}
                        for (const node of el.childNodes) {{
                            if (node.nodeType === Node.TEXT_NODE) textLen += node.textContent.trim().length;
                        }}
                    }};
                    walk(first);
                    return {{
                        element_found_count: result.snapshotLength,
                        tag_name: first.tagName.toLowerCase(),
                        id: first.id || '',
                        class_name: first.className || '',
                        text_content_length: textLen,
                        paragraph_count: paragraphs,
                        link_count: links,
                        image_count: images,
                        video_count: videos,
                        audio_count: audios,
                        picture_count: pictures,
                        unwanted_tag_count: unwantedCount,
                        descendant_count: descendants,
                        inner_html_sample: first.innerHTML.slice(0, 300),
                    }};
                }} catch (e) {{
                    return null;
                }}
            }})()"#,
            xpath_json = serde_json::to_string(xpath).unwrap_or_default()
        );

        let value: serde_json::Value = p
            .evaluate(script)
            .await
            .map_err(|e| BrowserError::Page(e.to_string()))?
            .into_value()
            .map_err(|e| BrowserError::Page(e.to_string()))?;

        if value.is_null() {
            return Ok(None);
        }

        let mut details = ElementDetails::zero(xpath);
        details.element_found_count = value["element_found_count"].as_u64().unwrap_or(0) as usize;
        details.tag_name = value["tag_name"].as_str().unwrap_or_default().to_string();
        details.id = value["id"].as_str().unwrap_or_default().to_string();
        details.class_name = value["class_name"].as_str().unwrap_or_default().to_string();
        details.text_content_length = value["text_content_length"].as_u64().unwrap_or(0) as usize;
        details.paragraph_count = value["paragraph_count"].as_u64().unwrap_or(0) as usize;
        details.link_count = value["link_count"].as_u64().unwrap_or(0) as usize;
        details.image_count = value["image_count"].as_u64().unwrap_or(0) as usize;
        details.video_count = value["video_count"].as_u64().unwrap_or(0) as usize;
        details.audio_count = value["audio_count"].as_u64().unwrap_or(0) as usize;
        details.picture_count = value["picture_count"].as_u64().unwrap_or(0) as usize;
        details.unwanted_tag_count = value["unwanted_tag_count"].as_u64().unwrap_or(0) as usize;
        details.descendant_count = value["descendant_count"].as_u64().unwrap_or(0) as usize;
        details.inner_html_sample = value["inner_html_sample"].as_str().unwrap_or_default().to_string();

        Ok(Some(details))
    }

    async fn detect_challenge(&self, session: &SessionId, page: &PageId) -> Result<ChallengeDetection, BrowserError> {
        let sessions = self.sessions.lock().await;
        let p = self.with_page(&sessions, session, page).await?;

        let script = r#"(() => {
            const has = (sel) => !!document.querySelector(sel);
            if (has('iframe[src*="captcha-delivery.com"]')) {
                const src = document.querySelector('iframe[src*="captcha-delivery.com"]').src;
                return { challenge_type: 'datadome', challenge_url: src };
            }
            if (has('.g-recaptcha') || has('iframe[src*="recaptcha"]')) return { challenge_type: 'recaptcha', challenge_url: null };
            if (has('iframe[src*="hcaptcha.com"]')) return { challenge_type: 'hcaptcha', challenge_url: null };
            if (has('.cf-turnstile')) return { challenge_type: 'turnstile', challenge_url: null };
            if (has('[id*="captcha"]')) return { challenge_type: 'generic', challenge_url: null };
            return { challenge_type: 'none', challenge_url: null };
        })()"#;

        let value: serde_json::Value = p
            .evaluate(script)
            .await
            .map_err(|e| BrowserError::Page(e.to_string()))?
            .into_value()
            .map_err(|e| BrowserError::Page(e.to_string()))?;

        let challenge_type = match value["challenge_type"].as_str().unwrap_or("none") {
            "datadome" => ChallengeType::Datadome,
            "recaptcha" => ChallengeType::Recaptcha,
            "hcaptcha" => ChallengeType::Hcaptcha,
            "turnstile" => ChallengeType::Turnstile,
            "generic" => ChallengeType::Generic,
            _ => ChallengeType::None,
        };
        let challenge_url = value["challenge_url"].as_str().map(str::to_string);

        Ok(ChallengeDetection { challenge_type, challenge_url })
    }

    async fn get_cookies(&self, session: &SessionId, page: &PageId) -> Result<String, BrowserError> {
        let sessions = self.sessions.lock().await;
        let p = self.with_page(&sessions, session, page).await?;
        let cookies = p.get_cookies().await.map_err(|e| BrowserError::Page(e.to_string()))?;
        let serialized = cookies
            .into_iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ");
        Ok(serialized)
    }

    async fn set_cookies(&self, session: &SessionId, page: &PageId, serialized: &str) -> Result<(), BrowserError> {
        let sessions = self.sessions.lock().await;
        let p = self.with_page(&sessions, session, page).await?;

        let Some(parsed) = crate::solver::parse_cookie(serialized) else {
            return Err(BrowserError::Page(format!("unparseable cookie string: {serialized}")));
        };

        let mut param = CookieParam::builder()
            .name(parsed.name)
            .value(parsed.value)
            .path(parsed.path)
            .secure(parsed.secure)
            .http_only(parsed.http_only);
        if let Some(domain) = parsed.domain {
            param = param.domain(domain);
        }
        if let Some(max_age) = parsed.max_age {
            let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64();
            param = param.expires(now + max_age as f64);
        }
        if let Some(same_site) = parsed.same_site {
            let mapped = match same_site.to_ascii_lowercase().as_str() {
                "strict" => Some(CookieSameSite::Strict),
                "lax" => Some(CookieSameSite::Lax),
                "none" => Some(CookieSameSite::None),
                _ => None,
            };
            if let Some(mapped) = mapped {
                param = param.same_site(mapped);
            }
        }
        let param = param.build().map_err(|e| BrowserError::Page(e.to_string()))?;

        p.set_cookie(param).await.map_err(|e| BrowserError::Page(e.to_string()))?;
        Ok(())
    }

    async fn reload(&self, session: &SessionId, page: &PageId) -> Result<(), BrowserError> {
        let sessions = self.sessions.lock().await;
        let p = self.with_page(&sessions, session, page).await?;
        p.reload().await.map_err(|e| BrowserError::Page(e.to_string()))?;
        Ok(())
    }
}

/// Find a usable Chromium-family browser executable: explicit env override,
/// then a PATH scan, then OS-specific well-known install paths.
pub fn find_chrome_executable() -> Option<String> {
    if let Ok(p) = std::env::var("CHROME_EXECUTABLE") {
        if Path::new(&p).exists() {
            return Some(p);
        }
    }

    if let Ok(path_var) = std::env::var("PATH") {
        let candidates = ["google-chrome", "chromium", "chromium-browser", "chrome", "brave-browser"];
        for dir in std::env::split_paths(&path_var) {
            for exe in candidates {
                let full = dir.join(exe);
                if full.exists() {
                    return Some(full.to_string_lossy().to_string());
                }
            }
        }
    }

    #[cfg(target_os = "linux")]
    {
        let candidates = [
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/usr/local/bin/chromium",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "macos")]
    {
        let candidates = [
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_dirs_are_unique() {
        let a = new_profile_dir();
        let b = new_profile_dir();
        assert_ne!(a, b);
    }

    #[test]
    fn default_load_page_options_use_load_wait() {
        let opts = LoadPageOptions::default();
        assert_eq!(opts.wait_until, WaitUntil::Load);
    }
}
