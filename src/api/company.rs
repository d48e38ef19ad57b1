//! Tenant-facing routes under `/api/company`.
//!
//! Every lookup here runs with the caller's [`TenantScope`], so ids that
//! belong to another tenant come back as 404.

use axum::{
    Router,
    extract::{Path, State},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::AppState;
use crate::api::auth::{check_email, check_name, check_secret};
use crate::api::extract::{Json, Query};
use crate::api::response::{Envelope, Pagination};
use crate::api::{ApiResult, ListQuery, ensure_valid, store_error};
use crate::auth::{AuthContext, AuthError, TenantScope, generate_api_key};
use crate::db::schema::{
    AgentInput, AgentRecord, AgentUpdate, DashboardSummary, Role, Status, TenantRecord,
    TenantUpdate, UserCreate, UserRecord, UserUpdate, check_len, normalize_email,
};
use crate::db::{AgentFilter, QueryBuilder};
use crate::error::{ApiError, FieldError};
use crate::types::{AgentId, ApiKeyPrefix, UserId};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/agents", get(list_agents).post(create_agent))
        .route(
            "/agents/{id}",
            get(get_agent).put(update_agent).delete(delete_agent),
        )
        .route("/agents/{id}/regenerate-key", post(regenerate_key))
        .route("/dashboard", get(dashboard))
        .route("/profile", axum::routing::put(update_profile))
        .route("/config", get(get_config).put(update_config))
        .route("/users", get(list_users).post(create_user))
        .route("/users/{id}", axum::routing::put(update_user).delete(deactivate_user))
}

/// Agent as returned right after creation, with its key shown once.
#[derive(Debug, Serialize)]
pub struct CreatedAgent {
    #[serde(flatten)]
    pub agent: AgentRecord,
    pub api_key: String,
}

#[derive(Debug, Serialize)]
pub struct RegeneratedKey {
    pub api_key: String,
    pub api_key_prefix: ApiKeyPrefix,
}

#[derive(Debug, Deserialize)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Tenant fields a tenant admin may edit; status and quota stay with
/// superadmins.
#[derive(Debug, Deserialize)]
pub struct ConfigUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub email: String,
    pub secret: String,
    pub role: Option<Role>,
}

fn require_admin(ctx: &AuthContext) -> Result<(), ApiError> {
    if ctx.can_access(ctx.tenant_id(), &[Role::TenantAdmin]) {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}

async fn scoped_agent(state: &AppState, ctx: &AuthContext, id: &AgentId) -> Result<AgentRecord, ApiError> {
    QueryBuilder::find_agent(state.db(), &ctx.scope(), id)
        .await?
        .ok_or(ApiError::NotFound("agent"))
}

// ---- agents ---------------------------------------------------------------

async fn list_agents(
    State(state): State<AppState>,
    ctx: AuthContext,
    Query(query): Query<ListQuery>,
) -> ApiResult<Vec<AgentRecord>> {
    let page = query.page();
    let filter = AgentFilter {
        search: query.search(),
        active: query.active,
        tenant: None,
    };

    let (agents, total) = QueryBuilder::list_agents(state.db(), &ctx.scope(), &filter, page).await?;
    Ok(Envelope::paginated("agents", agents, Pagination::new(page, total)))
}

async fn get_agent(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path(id): Path<AgentId>,
) -> ApiResult<AgentRecord> {
    Ok(Envelope::ok("agent", scoped_agent(&state, &ctx, &id).await?))
}

/// Create an agent within the tenant's quota and hand out its key once.
async fn create_agent(
    State(state): State<AppState>,
    ctx: AuthContext,
    Json(input): Json<AgentInput>,
) -> ApiResult<CreatedAgent> {
    ensure_valid(input.validate())?;
    let tenant_id = ctx.require_tenant()?;
    let db = state.db();

    let tenant = QueryBuilder::find_tenant(db, &ctx.scope(), tenant_id)
        .await?
        .ok_or(ApiError::NotFound("company"))?;
    let existing = QueryBuilder::count_agents(db, tenant_id, false).await?;
    if existing >= u64::from(tenant.max_agents) {
        return Err(ApiError::Conflict(format!(
            "agent limit of {} reached",
            tenant.max_agents
        )));
    }

    let (api_key, prefix, hash) = generate_api_key();
    let agent = QueryBuilder::create_agent(db, tenant_id, input, hash, prefix)
        .await
        .map_err(|e| store_error(e, "API key collision, retry"))?;

    info!(agent_id = %agent.id, tenant_id = %tenant_id, "agent created");
    Ok(Envelope::created("agent created", CreatedAgent { agent, api_key }))
}

async fn update_agent(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path(id): Path<AgentId>,
    Json(update): Json<AgentUpdate>,
) -> ApiResult<AgentRecord> {
    let current = scoped_agent(&state, &ctx, &id).await?;
    let input = update.apply(&current);
    ensure_valid(input.validate())?;

    let agent = QueryBuilder::update_agent(state.db(), &ctx.scope(), &id, input)
        .await?
        .ok_or(ApiError::NotFound("agent"))?;
    Ok(Envelope::ok("agent updated", agent))
}

/// Delete an agent unless it still has active conversations.
async fn delete_agent(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path(id): Path<AgentId>,
) -> ApiResult<()> {
    let agent = scoped_agent(&state, &ctx, &id).await?;
    let active = QueryBuilder::count_active_conversations(state.db(), &agent.id).await?;
    if active > 0 {
        return Err(ApiError::Conflict(
            "agent has active conversations".to_string(),
        ));
    }

    QueryBuilder::delete_agent(state.db(), &ctx.scope(), &agent.id).await?;
    info!(agent_id = %agent.id, "agent deleted");
    Ok(Envelope::message("agent deleted"))
}

/// Replace an agent's API key; the previous key stops working at once.
async fn regenerate_key(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path(id): Path<AgentId>,
) -> ApiResult<RegeneratedKey> {
    scoped_agent(&state, &ctx, &id).await?;

    let (api_key, prefix, hash) = generate_api_key();
    let agent = QueryBuilder::set_agent_key(state.db(), &ctx.scope(), &id, hash, prefix)
        .await?
        .ok_or(ApiError::NotFound("agent"))?;

    info!(agent_id = %agent.id, "API key regenerated");
    Ok(Envelope::ok(
        "API key regenerated; it will not be shown again",
        RegeneratedKey {
            api_key,
            api_key_prefix: agent.api_key_prefix,
        },
    ))
}

async fn dashboard(State(state): State<AppState>, ctx: AuthContext) -> ApiResult<DashboardSummary> {
    let tenant_id = ctx.require_tenant()?;
    let summary = QueryBuilder::dashboard_summary(state.db(), tenant_id).await?;
    Ok(Envelope::ok("dashboard", summary))
}

// ---- profile and tenant config -----------------------------------------

async fn update_profile(
    State(state): State<AppState>,
    ctx: AuthContext,
    Json(req): Json<ProfileUpdate>,
) -> ApiResult<UserRecord> {
    let email = req.email.as_deref().map(normalize_email);

    let mut errors = Vec::new();
    if let Some(name) = &req.name {
        check_name(&mut errors, "name", name);
    }
    if let Some(email) = &email {
        check_email(&mut errors, "email", email);
    }
    ensure_valid(errors)?;

    if let Some(email) = &email
        && email != ctx.email()
        && state.users().get_user_by_email(email).await?.is_some()
    {
        return Err(ApiError::Conflict("email already registered".to_string()));
    }

    let update = UserUpdate {
        name: req.name.map(|n| n.trim().to_string()),
        email,
        role: None,
        status: None,
    };
    let user = state
        .users()
        .update_user(&ctx.scope(), ctx.user_id(), update)
        .await
        .map_err(|e| store_error(e, "email already registered"))?
        .ok_or(ApiError::NotFound("user"))?;
    Ok(Envelope::ok("profile updated", user))
}

async fn get_config(State(state): State<AppState>, ctx: AuthContext) -> ApiResult<TenantRecord> {
    let tenant_id = ctx.require_tenant()?;
    let tenant = QueryBuilder::find_tenant(state.db(), &ctx.scope(), tenant_id)
        .await?
        .ok_or(ApiError::NotFound("company"))?;
    Ok(Envelope::ok("company", tenant))
}

async fn update_config(
    State(state): State<AppState>,
    ctx: AuthContext,
    Json(req): Json<ConfigUpdate>,
) -> ApiResult<TenantRecord> {
    require_admin(&ctx)?;
    let tenant_id = ctx.require_tenant()?;
    let email = req.email.as_deref().map(normalize_email);

    let mut errors = Vec::new();
    if let Some(name) = &req.name {
        check_name(&mut errors, "name", name);
    }
    if let Some(email) = &email {
        check_email(&mut errors, "email", email);
    }
    if let Some(notes) = &req.notes {
        check_len(&mut errors, "notes", notes, 500);
    }
    ensure_valid(errors)?;

    if let Some(email) = &email
        && let Some(other) = QueryBuilder::find_tenant_by_email(state.db(), email).await?
        && &other.id != tenant_id
    {
        return Err(ApiError::Conflict("company email already registered".to_string()));
    }

    let update = TenantUpdate {
        name: req.name.map(|n| n.trim().to_string()),
        email,
        phone: req.phone,
        notes: req.notes,
        ..Default::default()
    };
    let tenant = QueryBuilder::update_tenant(state.db(), &ctx.scope(), tenant_id, update)
        .await
        .map_err(|e| store_error(e, "company email already registered"))?
        .ok_or(ApiError::NotFound("company"))?;
    Ok(Envelope::ok("company updated", tenant))
}

// ---- tenant users (tenant admin only) -----------------------------------

async fn list_users(
    State(state): State<AppState>,
    ctx: AuthContext,
    Query(query): Query<ListQuery>,
) -> ApiResult<Vec<UserRecord>> {
    require_admin(&ctx)?;
    let page = query.page();
    let (users, total) = state
        .users()
        .list_users(&ctx.scope(), None, false, page)
        .await?;
    Ok(Envelope::paginated("users", users, Pagination::new(page, total)))
}

async fn create_user(
    State(state): State<AppState>,
    ctx: AuthContext,
    Json(req): Json<CreateUserRequest>,
) -> ApiResult<UserRecord> {
    require_admin(&ctx)?;
    let tenant_id = ctx.require_tenant()?.clone();
    let email = normalize_email(&req.email);
    let role = req.role.unwrap_or(Role::TenantUser);

    let mut errors = Vec::new();
    check_name(&mut errors, "name", &req.name);
    check_email(&mut errors, "email", &email);
    check_secret(&mut errors, "secret", &req.secret);
    if role.is_superadmin() {
        errors.push(FieldError::new("role", "cannot be granted by a company"));
    }
    ensure_valid(errors)?;

    if state.users().get_user_by_email(&email).await?.is_some() {
        return Err(ApiError::Conflict("email already registered".to_string()));
    }

    let user = state
        .verifier()
        .enroll(
            state.users(),
            UserCreate {
                tenant_id: Some(tenant_id),
                name: req.name,
                email,
                secret: req.secret,
                role,
            },
        )
        .await
        .map_err(|e| match e {
            AuthError::Store(e) => store_error(e, "email already registered"),
            other => other.into(),
        })?;

    info!(user_id = %user.id, created_by = %ctx.user_id(), "company user created");
    Ok(Envelope::created("user created", user))
}

async fn update_user(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path(id): Path<UserId>,
    Json(mut update): Json<UserUpdate>,
) -> ApiResult<UserRecord> {
    require_admin(&ctx)?;
    update.email = update.email.as_deref().map(normalize_email);

    let mut errors = Vec::new();
    if let Some(name) = &update.name {
        check_name(&mut errors, "name", name);
    }
    if let Some(email) = &update.email {
        check_email(&mut errors, "email", email);
    }
    if update.role.is_some_and(Role::is_superadmin) {
        errors.push(FieldError::new("role", "cannot be granted by a company"));
    }
    ensure_valid(errors)?;

    if &id == ctx.user_id() && update.status == Some(Status::Inactive) {
        return Err(ApiError::BadRequest(
            "cannot deactivate your own account".to_string(),
        ));
    }

    let current = state
        .users()
        .get_user_scoped(&ctx.scope(), &id)
        .await?
        .ok_or(ApiError::NotFound("user"))?;

    if let Some(email) = &update.email
        && email != &current.email
        && state.users().get_user_by_email(email).await?.is_some()
    {
        return Err(ApiError::Conflict("email already registered".to_string()));
    }

    let user = state
        .users()
        .update_user(&ctx.scope(), &id, update)
        .await
        .map_err(|e| store_error(e, "email already registered"))?
        .ok_or(ApiError::NotFound("user"))?;
    Ok(Envelope::ok("user updated", user))
}

/// Deactivate a user of the caller's tenant. Accounts are never
/// hard-deleted from the company side.
async fn deactivate_user(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path(id): Path<UserId>,
) -> ApiResult<()> {
    require_admin(&ctx)?;
    if &id == ctx.user_id() {
        return Err(ApiError::BadRequest(
            "cannot deactivate your own account".to_string(),
        ));
    }

    let scope: TenantScope = ctx.scope();
    let user = state
        .users()
        .get_user_scoped(&scope, &id)
        .await?
        .ok_or(ApiError::NotFound("user"))?;

    state.users().deactivate_user(&user.id).await?;
    info!(user_id = %user.id, by = %ctx.user_id(), "company user deactivated");
    Ok(Envelope::message("user deactivated"))
}
