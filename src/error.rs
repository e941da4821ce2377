//! Structured error taxonomy shared by every layer of the engine.
//!
//! Low-level components return their own `thiserror` enums; the engine maps
//! those into [`EngineError`] at each boundary so callers always see one of
//! the seven closed kinds, never a string to pattern-match against.

use thiserror::Error;

/// The closed set of error kinds the engine and its API surface can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Configuration,
    Network,
    Extraction,
    Captcha,
    Llm,
    Timeout,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Configuration => "CONFIGURATION",
            ErrorKind::Network => "NETWORK",
            ErrorKind::Extraction => "EXTRACTION",
            ErrorKind::Captcha => "CAPTCHA",
            ErrorKind::Llm => "LLM",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Internal => "INTERNAL",
        };
        f.write_str(s)
    }
}

/// Top-level engine error. Every fallible engine operation returns this.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct EngineError {
    pub kind: ErrorKind,
    pub message: String,
    #[source]
    pub source: Option<anyhow::Error>,
}

impl EngineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(kind: ErrorKind, message: impl Into<String>, source: anyhow::Error) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn extraction(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Extraction, message)
    }

    pub fn captcha(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Captcha, message)
    }

    pub fn llm(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Llm, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Message safe to return across the API boundary: no source chain, no
    /// paths, no secrets — just the kind-appropriate summary.
    pub fn sanitized_message(&self) -> String {
        sanitize(&self.message)
    }
}

/// Strip anything that looks like a filesystem path, bearer token, or API key
/// from a message before it leaves the process.
fn sanitize(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    for word in message.split_whitespace() {
        let looks_like_path = word.starts_with('/') || word.starts_with("C:\\");
        let looks_like_secret = word.len() > 20
            && (word.starts_with("sk-")
                || word.to_ascii_lowercase().starts_with("bearer")
                || word.chars().all(|c| c.is_ascii_alphanumeric()));
        if looks_like_path || looks_like_secret {
            out.push_str("[redacted]");
        } else {
            out.push_str(word);
        }
        out.push(' ');
    }
    out.trim_end().to_string()
}

/// Errors surfaced by the [`crate::fetcher::Fetcher`] trait.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("dns/connect failed: {0}")]
    Connect(String),
    #[error("tls handshake failed: {0}")]
    Tls(String),
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("malformed proxy url: {0}")]
    MalformedProxy(String),
    #[error("transport error: {0}")]
    Other(String),
}

impl From<FetchError> for EngineError {
    fn from(e: FetchError) -> Self {
        EngineError::with_source(ErrorKind::Network, e.to_string(), anyhow::anyhow!(e))
    }
}

/// Errors surfaced by the [`crate::browser::BrowserDriver`] trait.
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("no chromium-family executable found")]
    ExecutableNotFound,
    #[error("failed to launch browser: {0}")]
    Launch(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("page operation failed: {0}")]
    Page(String),
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl From<BrowserError> for EngineError {
    fn from(e: BrowserError) -> Self {
        match &e {
            BrowserError::Timeout(d) => EngineError::timeout(format!("browser timeout: {d:?}")),
            _ => EngineError::with_source(ErrorKind::Network, e.to_string(), anyhow::anyhow!(e)),
        }
    }
}

/// Errors surfaced by the [`crate::html_analyzer`] module.
#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("malformed xpath expression: {0}")]
    MalformedXPath(String),
}

impl From<AnalyzerError> for EngineError {
    fn from(e: AnalyzerError) -> Self {
        EngineError::with_source(ErrorKind::Extraction, e.to_string(), anyhow::anyhow!(e))
    }
}

/// Errors surfaced by the [`crate::solver::ChallengeSolverClient`] trait.
#[derive(Debug, Error, Clone)]
pub enum SolverError {
    #[error("solver reports challenge unsolvable")]
    Unsolvable,
    #[error("source IP is banned by the challenge provider")]
    BannedIp,
    #[error("proxy error: {0}")]
    ProxyError(String),
    #[error("solver api error: {0}")]
    ApiError(String),
    #[error("solver polling timed out")]
    Timeout,
    #[error("solver misconfigured: {0}")]
    ConfigError(String),
}

impl From<SolverError> for EngineError {
    fn from(e: SolverError) -> Self {
        match e {
            SolverError::Timeout => EngineError::timeout("challenge solver polling timed out"),
            SolverError::ConfigError(m) => EngineError::configuration(m),
            _ => EngineError::captcha(e.to_string()),
        }
    }
}

/// Errors surfaced by the [`crate::llm_suggester::LlmSuggester`] trait.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm transport error: {0}")]
    Transport(String),
    #[error("llm response was not parseable JSON: {0}")]
    Parse(String),
    #[error("llm policy error: {0}")]
    Policy(String),
}

impl From<LlmError> for EngineError {
    fn from(e: LlmError) -> Self {
        EngineError::with_source(ErrorKind::Llm, e.to_string(), anyhow::anyhow!(e))
    }
}

/// Errors surfaced by the [`crate::config_store::SiteConfigStore`] trait.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read site config store: {0}")]
    Read(String),
    #[error("failed to persist site config store: {0}")]
    Write(String),
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::with_source(ErrorKind::Internal, e.to_string(), anyhow::anyhow!(e))
    }
}
