use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use xpath_scout::browser::ChromiumBrowserDriver;
use xpath_scout::config_store::JsonFileSiteConfigStore;
use xpath_scout::engine::{ExtractionEngine, ScrapeRequest};
use xpath_scout::error::ErrorKind;
use xpath_scout::fetcher::HttpFetcher;
use xpath_scout::llm_suggester::HttpLlmSuggester;
use xpath_scout::solver::HttpChallengeSolverClient;
use xpath_scout::types::OutputType;
use xpath_scout::EngineConfig;

#[derive(Clone)]
struct AppState {
    engine: Arc<ExtractionEngine>,
}

fn parse_port_from_args() -> Option<u16> {
    let mut args = std::env::args().peekable();
    while let Some(a) = args.next() {
        if a == "--port" {
            if let Some(v) = args.next() {
                if let Ok(p) = v.parse::<u16>() {
                    return Some(p);
                }
            }
        } else if let Some(rest) = a.strip_prefix("--port=") {
            if let Ok(p) = rest.parse::<u16>() {
                return Some(p);
            }
        }
    }
    None
}

fn port_from_env() -> Option<u16> {
    for k in ["XPATH_SCOUT_PORT", "PORT"] {
        if let Ok(v) = std::env::var(k) {
            if let Ok(p) = v.trim().parse::<u16>() {
                return Some(p);
            }
        }
    }
    None
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var("ENGINE_CONFIG_PATH").ok().map(PathBuf::from)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=warn"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let config = EngineConfig::load(config_path_from_env().as_deref());

    let store = Arc::new(JsonFileSiteConfigStore::open(config.known_sites_storage_path.clone()));
    let fetcher = Arc::new(HttpFetcher::new());
    let browser = Arc::new(ChromiumBrowserDriver::new(config.browser.clone()));
    let solver = Arc::new(HttpChallengeSolverClient::new(
        config
            .solver
            .service_name
            .clone()
            .unwrap_or_else(|| "https://api.capsolver.com".to_string()),
        config.solver.clone(),
    ));
    let llm = Arc::new(HttpLlmSuggester::new(config.llm.clone()));

    let engine = Arc::new(ExtractionEngine::new(config, store, fetcher, browser, solver, llm));
    let state = AppState { engine };

    let app = Router::new()
        .route("/scrape", post(scrape_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let port = parse_port_from_args().or_else(port_from_env).unwrap_or(8080);
    let addr = format!("0.0.0.0:{port}");
    info!("listening on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health_handler() -> impl IntoResponse {
    StatusCode::OK
}

#[derive(Debug, serde::Deserialize)]
struct ScrapeRequestBody {
    url: String,
    #[serde(default)]
    output_type: Option<OutputType>,
    #[serde(default)]
    proxy_server: Option<String>,
    #[serde(default)]
    user_agent: Option<String>,
    #[serde(default)]
    timeout_ms: Option<u64>,
    #[serde(default)]
    xpath: Option<String>,
    #[serde(default)]
    debug: bool,
}

/// Checks only that a bearer header is present and well-formed — actual
/// token verification and rate-limiting are collaborator-owned (§1's
/// Non-goals); this surface is a thin adapter, not the auth boundary.
fn has_well_formed_bearer(headers: &HeaderMap) -> bool {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("Bearer ") && v.len() > "Bearer ".len())
        .unwrap_or(false)
}

async fn scrape_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ScrapeRequestBody>,
) -> impl IntoResponse {
    if !has_well_formed_bearer(&headers) {
        warn!("rejected /scrape request missing a well-formed bearer token");
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "success": false,
                "error_kind": "CONFIGURATION",
                "error_message": "missing or malformed Authorization: Bearer header",
            })),
        )
            .into_response();
    }

    let debug_id = format!("req-{:016x}", rand::rng().random::<u64>());
    let mut request = ScrapeRequest::new(body.url);
    request.output_type = body.output_type.unwrap_or_default();
    request.proxy_server = body.proxy_server;
    request.user_agent = body.user_agent;
    request.timeout_ms = body.timeout_ms;
    request.xpath_override = body.xpath;
    request.debug = body.debug;

    let result = state.engine.scrape(request, debug_id).await;
    let status = status_for(result.error_kind);
    (status, Json(result)).into_response()
}

fn status_for(kind: Option<ErrorKind>) -> StatusCode {
    match kind {
        None => StatusCode::OK,
        Some(ErrorKind::Configuration) => StatusCode::BAD_REQUEST,
        Some(ErrorKind::Network) => StatusCode::BAD_GATEWAY,
        Some(ErrorKind::Extraction) => StatusCode::UNPROCESSABLE_ENTITY,
        Some(ErrorKind::Captcha) => StatusCode::FORBIDDEN,
        Some(ErrorKind::Llm) => StatusCode::BAD_GATEWAY,
        Some(ErrorKind::Timeout) => StatusCode::GATEWAY_TIMEOUT,
        Some(ErrorKind::Internal) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
