//! HTTP serving surface: the retrieval RPC and the health endpoint.
//!
//! `POST /retrieve` returns 200 for every non-exceptional outcome (empty
//! results included), 400 on a malformed body, and 503 when storage is
//! unavailable.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use utoipa::{OpenApi, ToSchema};

use crate::commands::{Command, CommandHandler};
use crate::error::NewswireError;
use crate::retrieve::{
    window_label, HybridRetriever, RetrievalCache, RetrievalFlags, RetrievalRequest,
};
use crate::storage::Storage;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub storage: Storage,
    pub retriever: Arc<HybridRetriever>,
    /// RPC-path cache (analytic surface); TTL from the ranking config
    pub cache: Arc<RetrievalCache>,
    /// Present in bot mode; the chat adapter posts structured commands here
    pub commands: Option<Arc<CommandHandler>>,
    pub default_window_hours: i64,
    pub default_k: usize,
}

/// Retrieval RPC request body
#[derive(Debug, Deserialize, ToSchema)]
pub struct RetrieveBody {
    pub query: String,
    #[serde(default)]
    pub hours: Option<i64>,
    #[serde(default)]
    pub k: Option<usize>,
    #[serde(default)]
    pub filters: Option<RetrieveFilters>,
    /// Opaque pagination cursor from a previous response
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct RetrieveFilters {
    #[serde(default)]
    pub sources: Option<Vec<String>>,
    #[serde(default)]
    pub lang: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RetrieveItem {
    pub title: String,
    pub url: String,
    pub source_domain: String,
    pub published_at: Option<String>,
    pub snippet: Option<String>,
    pub relevance_score: f64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FreshnessStats {
    pub median_age_seconds: f64,
    pub window_hours: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RetrieveDiagnostics {
    pub total_results: i64,
    pub offset: usize,
    pub returned: usize,
    pub has_more: bool,
    pub window: String,
    pub correlation_id: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RetrieveResponse {
    pub items: Vec<RetrieveItem>,
    pub next_cursor: Option<String>,
    pub total_available: i64,
    /// items returned / k requested
    pub coverage: f64,
    pub freshness_stats: FreshnessStats,
    pub diagnostics: RetrieveDiagnostics,
}

/// Health check response
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub service: String,
    pub checks: HealthChecks,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthChecks {
    pub database: String,
}

#[derive(OpenApi)]
#[openapi(
    paths(retrieve_handler, health_handler),
    components(schemas(
        RetrieveBody,
        RetrieveFilters,
        RetrieveItem,
        RetrieveResponse,
        RetrieveDiagnostics,
        FreshnessStats,
        HealthResponse,
        HealthChecks,
    ))
)]
pub struct ApiDoc;

/// Build the router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/retrieve", post(retrieve_handler))
        .route("/command", post(command_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until shutdown
pub async fn serve(state: AppState, host: &str, port: u16) -> crate::error::Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr, "api server listening");
    axum::serve(listener, router(state))
        .await
        .map_err(|e| NewswireError::Config(format!("server error: {e}")))
}

#[utoipa::path(
    post,
    path = "/retrieve",
    request_body = RetrieveBody,
    responses(
        (status = 200, description = "Ranked retrieval results", body = RetrieveResponse),
        (status = 400, description = "Malformed request"),
        (status = 503, description = "Storage unavailable"),
    )
)]
async fn retrieve_handler(
    State(state): State<AppState>,
    Json(body): Json<RetrieveBody>,
) -> Response {
    let k = body.k.unwrap_or(state.default_k);
    let offset: usize = body
        .cursor
        .as_deref()
        .and_then(|c| c.parse().ok())
        .unwrap_or(0);
    let window_hours = body.hours.unwrap_or(state.default_window_hours);
    let filters = body.filters.unwrap_or_default();

    let request = RetrievalRequest {
        query: body.query,
        window_hours,
        // Fetch through the end of the requested page.
        k: offset + k,
        lang: filters.lang,
        sources: filters.sources.unwrap_or_default(),
        after: None,
        before: None,
        news_intent: false,
    };
    let flags = RetrievalFlags {
        use_cache: true,
        ..RetrievalFlags::default()
    };

    let (ranked, diagnostics) = match state
        .retriever
        .retrieve(&request, flags, Some(&state.cache))
        .await
    {
        Ok(result) => result,
        Err(NewswireError::Database(e)) => {
            error!(error = %e, "retrieval storage failure");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({"error": "storage unavailable"})),
            )
                .into_response();
        }
        Err(e) => {
            error!(error = %e, "retrieval failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": e.category()})),
            )
                .into_response();
        }
    };

    let total_results = ranked.len() as i64;
    let page: Vec<_> = ranked.into_iter().skip(offset).take(k).collect();
    let returned = page.len();
    let has_more = offset + returned < total_results as usize;

    let now = Utc::now();
    let mut ages: Vec<f64> = page
        .iter()
        .filter_map(|c| c.chunk.published_at)
        .map(|p| (now - p).num_seconds() as f64)
        .collect();
    ages.sort_by(f64::total_cmp);
    let median_age_seconds = if ages.is_empty() {
        0.0
    } else {
        ages[ages.len() / 2]
    };

    let items = page
        .iter()
        .map(|scored| RetrieveItem {
            title: scored.chunk.title.clone(),
            url: scored.chunk.url.clone(),
            source_domain: scored.chunk.source_domain.clone(),
            published_at: scored.chunk.published_at.map(|p| p.to_rfc3339()),
            snippet: {
                let mut snippet = String::new();
                for c in scored.chunk.text.chars() {
                    if snippet.len() + c.len_utf8() > 240 {
                        break;
                    }
                    snippet.push(c);
                }
                (!snippet.is_empty()).then_some(snippet)
            },
            relevance_score: scored.score,
        })
        .collect();

    let response = RetrieveResponse {
        items,
        next_cursor: has_more.then(|| (offset + returned).to_string()),
        total_available: diagnostics.total_available,
        coverage: if k == 0 { 0.0 } else { returned as f64 / k as f64 },
        freshness_stats: FreshnessStats {
            median_age_seconds,
            window_hours: diagnostics.window_used_hours.max(window_hours),
        },
        diagnostics: RetrieveDiagnostics {
            total_results,
            offset,
            returned,
            has_more,
            window: window_label(diagnostics.window_used_hours.max(window_hours)),
            correlation_id: body.correlation_id,
        },
    };

    (StatusCode::OK, Json(response)).into_response()
}

/// Structured command entry point for the chat adapter. 404s in modes
/// that do not host the conversational surface.
async fn command_handler(State(state): State<AppState>, Json(command): Json<Command>) -> Response {
    let Some(commands) = &state.commands else {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "command surface not enabled in this mode"})),
        )
            .into_response();
    };

    match commands.handle(command).await {
        Ok(reply) => (StatusCode::OK, Json(reply)).into_response(),
        Err(NewswireError::Validation(message)) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": message})),
        )
            .into_response(),
        Err(NewswireError::Database(e)) => {
            error!(error = %e, "command storage failure");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({"error": "storage unavailable"})),
            )
                .into_response()
        }
        Err(e) => {
            error!(error = %e, "command failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": e.category()})),
            )
                .into_response()
        }
    }
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service health", body = HealthResponse))
)]
async fn health_handler(State(state): State<AppState>) -> Response {
    let started = std::time::Instant::now();
    let database_ok = state.storage.ping().await.is_ok();
    let slow = started.elapsed() > std::time::Duration::from_secs(1);

    let status = if !database_ok {
        "unhealthy"
    } else if slow {
        "degraded"
    } else {
        "healthy"
    };
    let response = HealthResponse {
        status: status.to_string(),
        timestamp: Utc::now().to_rfc3339(),
        service: "newswire".to_string(),
        checks: HealthChecks {
            database: if database_ok {
                if slow { "slow" } else { "ok" }
            } else {
                "failing"
            }
            .to_string(),
        },
    };
    let code = if database_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(response)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retrieve_body_accepts_minimal_json() {
        let body: RetrieveBody = serde_json::from_str(r#"{"query": "ai"}"#).unwrap();
        assert_eq!(body.query, "ai");
        assert!(body.hours.is_none());
        assert!(body.cursor.is_none());
    }

    #[test]
    fn test_retrieve_body_rejects_missing_query() {
        assert!(serde_json::from_str::<RetrieveBody>(r#"{"hours": 24}"#).is_err());
    }
}
