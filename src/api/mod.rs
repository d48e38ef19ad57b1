// REST API for the agent backend

pub mod admin;
pub mod auth;
pub mod company;
pub mod extract;
pub mod machine;
pub mod response;

#[cfg(test)]
mod integration_tests;

use axum::{
    Router,
    extract::{Request, State},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::AppState;
use crate::auth::{require_agent, require_superadmin, require_tenant_member, require_user};
use crate::db::schema::{DEFAULT_MODEL, SUPPORTED_MODELS, Status};
use crate::db::PageRequest;
use crate::error::{ApiError, FieldError, InternalDetail, is_unique_violation};
use crate::types::TenantId;

use response::Envelope;

pub type ApiResult<T> = Result<Envelope<T>, ApiError>;

/// Build the full application router.
///
/// Public routes sit beside four guarded groups: session routes (any
/// authenticated user), `/api/company` (tenant roles), `/api/admin`
/// (superadmin) and `/api/v1` (agent API keys).
pub fn create_router(state: AppState) -> Router {
    let session = Router::new()
        .route("/me", get(auth::me))
        .route("/logout", post(auth::logout))
        .route("/change-secret", post(auth::change_secret))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_user));

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/refresh-token", post(auth::refresh_token))
        .merge(session);

    let company = company::router()
        .route_layer(middleware::from_fn(require_tenant_member))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_user));

    let admin = admin::router()
        .route_layer(middleware::from_fn(require_superadmin))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_user));

    let machine = machine::router()
        .route_layer(middleware::from_fn_with_state(state.clone(), require_agent));

    Router::new()
        .route("/health", get(health_check))
        .route("/api/models", get(list_models))
        .nest("/api/auth", auth_routes)
        .nest("/api/company", company)
        .nest("/api/admin", admin)
        .nest("/api/v1", machine)
        .fallback(route_not_found)
        .layer(middleware::from_fn_with_state(state.clone(), expose_internal_detail))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn health_check() -> Envelope<serde_json::Value> {
    Envelope::ok(
        "healthy",
        serde_json::json!({
            "status": "healthy",
            "timestamp": chrono::Utc::now().to_rfc3339()
        }),
    )
}

async fn route_not_found() -> ApiError {
    ApiError::NotFound("route")
}

#[derive(Debug, Serialize)]
struct ModelCatalogue {
    models: &'static [&'static str],
    default: &'static str,
}

async fn list_models() -> Envelope<ModelCatalogue> {
    Envelope::ok(
        "supported models",
        ModelCatalogue {
            models: SUPPORTED_MODELS,
            default: DEFAULT_MODEL,
        },
    )
}

/// In development posture, replace the generic 500 message with the
/// underlying error chain.
async fn expose_internal_detail(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let response = next.run(req).await;
    if !state.config().posture.is_development() {
        return response;
    }
    match response.extensions().get::<InternalDetail>() {
        Some(detail) => Envelope::failure(response.status(), detail.0.clone(), None).into_response(),
        None => response,
    }
}

/// Query string accepted by list endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub search: Option<String>,
    pub active: Option<bool>,
    pub status: Option<Status>,
    pub tenant_id: Option<TenantId>,
}

impl ListQuery {
    pub fn page(&self) -> PageRequest {
        PageRequest::new(self.page, self.limit)
    }

    /// Trimmed search term; blank means no search.
    pub fn search(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }
}

pub(crate) fn ensure_valid(errors: Vec<FieldError>) -> Result<(), ApiError> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ApiError::Validation(errors))
    }
}

/// Map a store failure, turning unique-index violations into 409.
pub(crate) fn store_error(err: anyhow::Error, conflict: &str) -> ApiError {
    if is_unique_violation(&err) {
        ApiError::Conflict(conflict.to_string())
    } else {
        ApiError::Internal(err)
    }
}
