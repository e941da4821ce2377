//! Challenge Solver Client — submits an anti-bot challenge to a remote
//! solver, polls for a cookie/token, and parses the result.

use crate::config::SolverConfig;
use crate::error::SolverError;
use crate::html_analyzer::inspect_challenge_url;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeKind {
    Datadome,
    Recaptcha,
    Hcaptcha,
    Turnstile,
    Generic,
}

#[derive(Debug, Clone)]
pub struct ChallengeTask {
    pub kind: ChallengeKind,
    pub website_url: String,
    pub challenge_url: String,
    pub user_agent: String,
    pub proxy_url: Option<String>,
}

/// The solved clearance cookie, already parsed into its constituent
/// attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct SolvedCookie {
    pub name: String,
    pub value: String,
    pub domain: Option<String>,
    pub path: String,
    pub max_age: Option<i64>,
    pub same_site: Option<String>,
    pub secure: bool,
    pub http_only: bool,
}

#[async_trait]
pub trait ChallengeSolverClient: Send + Sync {
    async fn solve(&self, task: &ChallengeTask) -> Result<SolvedCookie, SolverError>;
}

#[derive(Debug, Serialize)]
struct CreateTaskRequest<'a> {
    #[serde(rename = "type")]
    challenge_type: &'a str,
    website_url: &'a str,
    challenge_url: &'a str,
    user_agent: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    proxy: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct CreateTaskResponse {
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct TaskResultResponse {
    status: String,
    #[serde(default)]
    cookie: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
}

/// HTTP-backed solver client (CapSolver/2captcha-shaped protocol: create a
/// task, poll for a result). The exact remote vendor is a deployment detail
/// behind `endpoint`.
pub struct HttpChallengeSolverClient {
    client: reqwest::Client,
    endpoint: String,
    config: SolverConfig,
}

impl HttpChallengeSolverClient {
    pub fn new(endpoint: impl Into<String>, config: SolverConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            config,
        }
    }

    fn kind_str(kind: ChallengeKind) -> &'static str {
        match kind {
            ChallengeKind::Datadome => "datadome",
            ChallengeKind::Recaptcha => "recaptcha",
            ChallengeKind::Hcaptcha => "hcaptcha",
            ChallengeKind::Turnstile => "turnstile",
            ChallengeKind::Generic => "generic",
        }
    }

    async fn create_task(&self, task: &ChallengeTask) -> Result<String, SolverError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| SolverError::ConfigError("solver api key not configured".to_string()))?;

        let body = CreateTaskRequest {
            challenge_type: Self::kind_str(task.kind),
            website_url: &task.website_url,
            challenge_url: &task.challenge_url,
            user_agent: &task.user_agent,
            proxy: task.proxy_url.as_deref(),
        };

        let response = self
            .client
            .post(format!("{}/createTask", self.endpoint))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SolverError::ApiError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SolverError::ApiError(format!("createTask returned {}", response.status())));
        }

        let parsed: CreateTaskResponse = response
            .json()
            .await
            .map_err(|e| SolverError::ApiError(format!("malformed createTask response: {e}")))?;
        Ok(parsed.task_id)
    }

    async fn poll_once(&self, task_id: &str) -> Result<TaskResultResponse, SolverError> {
        let api_key = self.config.api_key.as_deref().unwrap_or_default();
        let response = self
            .client
            .get(format!("{}/getTaskResult", self.endpoint))
            .bearer_auth(api_key)
            .query(&[("task_id", task_id)])
            .send()
            .await
            .map_err(|e| SolverError::ApiError(e.to_string()))?;

        response
            .json()
            .await
            .map_err(|e| SolverError::ApiError(format!("malformed getTaskResult response: {e}")))
    }
}

#[async_trait]
impl ChallengeSolverClient for HttpChallengeSolverClient {
    async fn solve(&self, task: &ChallengeTask) -> Result<SolvedCookie, SolverError> {
        if self.config.api_key.is_none() {
            return Err(SolverError::ConfigError("solver api key not configured".to_string()));
        }
        if task.proxy_url.is_none() {
            warn!("solving {:?} challenge with no proxy configured; IP-bound challenges will likely fail", task.kind);
        }

        let inspection = inspect_challenge_url(&task.challenge_url);
        if inspection.banned {
            info!("challenge url {} pre-checked as banned, skipping remote solver", task.challenge_url);
            return Err(SolverError::BannedIp);
        }

        let task_id = self.create_task(task).await?;

        let deadline = Instant::now() + self.config.total_timeout;
        loop {
            if Instant::now() >= deadline {
                return Err(SolverError::Timeout);
            }

            let result = self.poll_once(&task_id).await?;
            match result.status.as_str() {
                "ready" => {
                    let cookie_str = result
                        .cookie
                        .ok_or_else(|| SolverError::ApiError("ready task carried no cookie".to_string()))?;
                    return parse_cookie(&cookie_str).ok_or_else(|| {
                        SolverError::ApiError(format!("unparseable cookie: {cookie_str}"))
                    });
                }
                "error" => {
                    return Err(map_remote_error_code(result.error_code.as_deref()));
                }
                _ => {
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }
    }
}

fn map_remote_error_code(code: Option<&str>) -> SolverError {
    match code.unwrap_or("") {
        "UNSOLVABLE" => SolverError::Unsolvable,
        "PROXY_ERROR" => SolverError::ProxyError("remote proxy error".to_string()),
        "CONFIG_ERROR" => SolverError::ConfigError("remote reports misconfiguration".to_string()),
        other => SolverError::ApiError(format!("unrecognized remote error code: {other}")),
    }
}

/// Parse a `Set-Cookie`-shaped string into name/value plus standard
/// attributes. Missing path defaults to `/`; `SameSite=None` forces
/// `secure=true`.
pub fn parse_cookie(raw: &str) -> Option<SolvedCookie> {
    let mut parts = raw.split(';').map(str::trim);
    let (name, value) = parts.next()?.split_once('=')?;

    let mut cookie = SolvedCookie {
        name: name.trim().to_string(),
        value: value.trim().to_string(),
        domain: None,
        path: "/".to_string(),
        max_age: None,
        same_site: None,
        secure: false,
        http_only: false,
    };

    for part in parts {
        if part.is_empty() {
            continue;
        }
        if let Some((attr, attr_value)) = part.split_once('=') {
            match attr.trim().to_ascii_lowercase().as_str() {
                "domain" => cookie.domain = Some(attr_value.trim().to_string()),
                "path" => cookie.path = attr_value.trim().to_string(),
                "max-age" => cookie.max_age = attr_value.trim().parse().ok(),
                "samesite" => cookie.same_site = Some(attr_value.trim().to_string()),
                _ => {}
            }
        } else {
            match part.to_ascii_lowercase().as_str() {
                "secure" => cookie.secure = true,
                "httponly" => cookie.http_only = true,
                _ => {}
            }
        }
    }

    if cookie
        .same_site
        .as_deref()
        .map(|s| s.eq_ignore_ascii_case("none"))
        .unwrap_or(false)
    {
        cookie.secure = true;
    }

    Some(cookie)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_cookie_attribute_set() {
        let cookie =
            parse_cookie("datadome=XYZ; Domain=.example.com; Path=/; Max-Age=3600; Secure; SameSite=Lax").unwrap();
        assert_eq!(cookie.name, "datadome");
        assert_eq!(cookie.value, "XYZ");
        assert_eq!(cookie.domain.as_deref(), Some(".example.com"));
        assert_eq!(cookie.path, "/");
        assert_eq!(cookie.max_age, Some(3600));
        assert!(cookie.secure);
        assert_eq!(cookie.same_site.as_deref(), Some("Lax"));
    }

    #[test]
    fn missing_path_defaults_to_root() {
        let cookie = parse_cookie("session=abc").unwrap();
        assert_eq!(cookie.path, "/");
    }

    #[test]
    fn samesite_none_forces_secure() {
        let cookie = parse_cookie("token=1; SameSite=None").unwrap();
        assert!(cookie.secure);
    }

    #[test]
    fn malformed_cookie_yields_none() {
        assert!(parse_cookie("not-a-cookie-at-all").is_none());
    }

    #[test]
    fn remote_error_codes_map_to_documented_kinds() {
        assert!(matches!(map_remote_error_code(Some("UNSOLVABLE")), SolverError::Unsolvable));
        assert!(matches!(map_remote_error_code(Some("PROXY_ERROR")), SolverError::ProxyError(_)));
        assert!(matches!(map_remote_error_code(Some("weird")), SolverError::ApiError(_)));
    }

    #[tokio::test]
    async fn banned_ip_short_circuits_without_calling_remote() {
        let client = HttpChallengeSolverClient::new(
            "http://127.0.0.1:0",
            SolverConfig {
                service_name: Some("test".to_string()),
                api_key: Some("key".to_string()),
                poll_interval: Duration::from_millis(1),
                total_timeout: Duration::from_millis(50),
            },
        );
        let task = ChallengeTask {
            kind: ChallengeKind::Datadome,
            website_url: "https://example.com".to_string(),
            challenge_url: "https://geo.captcha-delivery.com/captcha/?t=bv".to_string(),
            user_agent: "ua".to_string(),
            proxy_url: None,
        };
        let result = client.solve(&task).await;
        assert!(matches!(result, Err(SolverError::BannedIp)));
    }

    #[tokio::test]
    async fn missing_api_key_is_config_error() {
        let client = HttpChallengeSolverClient::new(
            "http://127.0.0.1:0",
            SolverConfig {
                service_name: None,
                api_key: None,
                poll_interval: Duration::from_millis(1),
                total_timeout: Duration::from_millis(50),
            },
        );
        let task = ChallengeTask {
            kind: ChallengeKind::Recaptcha,
            website_url: "https://example.com".to_string(),
            challenge_url: "https://example.com/challenge".to_string(),
            user_agent: "ua".to_string(),
            proxy_url: None,
        };
        let result = client.solve(&task).await;
        assert!(matches!(result, Err(SolverError::ConfigError(_))));
    }
}
