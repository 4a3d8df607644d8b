use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, get_service, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::services::ServeDir;
use tracing::{debug, info, warn};

use crate::config::ServerSettings;
use crate::db;
use crate::dispatcher::{Dispatcher, ProviderRegistry};
use crate::error::GenerateError;
use crate::models::{ChartSpec, DynamicData, ProviderConfig};
use crate::telemetry;

/**
 * \brief Shared, read-only state handed to every handler.
 */
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    /** \brief Chart system-prompt template loaded at startup */
    pub template: Arc<String>,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher, template: impl Into<String>) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
            template: Arc::new(template.into()),
        }
    }
}

/**
 * \brief API routes without the static fallback.
 */
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/generate", post(generate))
        .route("/api/actions/generate", post(generate_action))
        .route("/api/providers", get(list_providers))
        .route("/api/health", get(health_check))
        .with_state(state)
}

/**
 * \brief Starts the HTTP server: API routes plus the static UI directory.
 */
pub async fn run(settings: &ServerSettings) -> Result<()> {
    let conn = db::open_db(&settings.db_path).context("open database failed")?;
    db::migrate(&conn).context("apply migrations failed")?;
    telemetry::set_enabled(db::get_telemetry_enabled(&conn).unwrap_or(false));
    drop(conn);

    let template = settings.load_prompt_template()?;
    let registry = ProviderRegistry::with_defaults()?;
    let state = AppState::new(Dispatcher::new(registry), template);

    if !settings.ui_dir.exists() {
        warn!("UI directory {} not found; only /api routes will respond", settings.ui_dir.display());
    }
    let static_service =
        get_service(ServeDir::new(&settings.ui_dir).append_index_html_on_directories(true));
    let app = router(state).fallback_service(static_service);

    let listener = tokio::net::TcpListener::bind(&settings.addr).await?;
    info!("Server listening on http://{}", settings.addr);
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum GenerateMode {
    #[default]
    Chart,
    Suggestions,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    config: Option<ProviderConfig>,
    #[serde(default)]
    dynamic_data: Option<DynamicData>,
    #[serde(default)]
    mode: GenerateMode,
}

/**
 * \brief Maps a `GenerateError` onto `{error, kind}` with the matching status.
 */
struct ApiError(GenerateError);

impl From<GenerateError> for ApiError {
    fn from(e: GenerateError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            warn!(kind = self.0.kind(), "generation failed: {}", self.0);
            if let Some(body) = self.0.upstream_body() {
                debug!("upstream body: {}", body);
            }
        }
        (
            status,
            Json(json!({"error": self.0.to_string(), "kind": self.0.kind()})),
        )
            .into_response()
    }
}

fn bad_request(message: impl Into<String>) -> ApiError {
    ApiError(GenerateError::Input(message.into()))
}

async fn generate(
    State(state): State<AppState>,
    body: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = body.map_err(|rejection| bad_request(rejection.body_text()))?;

    if req.mode == GenerateMode::Suggestions {
        let suggestions = match (&req.config, &req.dynamic_data) {
            (Some(config), Some(data)) => {
                state
                    .dispatcher
                    .generate_suggestions(config, &state.template, data)
                    .await
            }
            _ => Vec::new(),
        };
        return Ok(Json(json!({ "suggestions": suggestions })).into_response());
    }

    let (Some(prompt), Some(config)) = (req.prompt.as_deref(), req.config.as_ref()) else {
        return Err(bad_request("Missing prompt or config"));
    };
    if prompt.is_empty() {
        return Err(bad_request("Missing prompt or config"));
    }

    let chart = state
        .dispatcher
        .generate_chart(prompt, config, &state.template, req.dynamic_data.as_ref())
        .await?;
    Ok(Json(chart).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActionForm {
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    config: Option<String>,
    #[serde(default)]
    dynamic_data: Option<String>,
}

/**
 * \brief Result shape for form submissions; always returned with 200.
 */
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ActionState {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart: Option<ChartSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionState {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            chart: None,
            error: Some(message.into()),
        }
    }
}

async fn generate_action(
    State(state): State<AppState>,
    Form(form): Form<ActionForm>,
) -> Json<ActionState> {
    let prompt = form.prompt.as_deref().unwrap_or_default();
    let config_json = form.config.as_deref().unwrap_or_default();
    if prompt.is_empty() || config_json.is_empty() {
        return Json(ActionState::failed("Missing required data"));
    }

    let config: ProviderConfig = match serde_json::from_str(config_json) {
        Ok(c) => c,
        Err(e) => return Json(ActionState::failed(format!("Invalid provider configuration: {}", e))),
    };
    let data: Option<DynamicData> = match form.dynamic_data.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => match serde_json::from_str(raw) {
            Ok(d) => Some(d),
            Err(e) => return Json(ActionState::failed(format!("Invalid dataset payload: {}", e))),
        },
        None => None,
    };

    match state
        .dispatcher
        .generate_chart(prompt, &config, &state.template, data.as_ref())
        .await
    {
        Ok(chart) => Json(ActionState {
            success: true,
            chart: Some(chart),
            error: None,
        }),
        Err(e) => {
            warn!(kind = e.kind(), "action failed: {}", e);
            let message = match &e {
                GenerateError::Auth { .. } => "Invalid API credentials.".to_string(),
                GenerateError::RateLimit { .. } => "Rate limit exceeded.".to_string(),
                other => other.to_string(),
            };
            Json(ActionState::failed(message))
        }
    }
}

#[derive(Debug, Serialize)]
struct ProviderItem {
    id: &'static str,
    label: &'static str,
}

async fn list_providers(State(state): State<AppState>) -> Json<Vec<ProviderItem>> {
    let items = state
        .dispatcher
        .registry()
        .kinds()
        .into_iter()
        .map(|k| ProviderItem {
            id: k.as_str(),
            label: k.label(),
        })
        .collect();
    Json(items)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({"ok": true}))
}
