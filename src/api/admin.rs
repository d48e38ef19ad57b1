//! Superadmin routes under `/api/admin`.

use axum::{
    Router,
    extract::{Path, State},
    routing::get,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::AppState;
use crate::api::auth::{check_email, check_name, check_secret};
use crate::api::extract::{Json, Query};
use crate::api::response::{Envelope, Pagination};
use crate::api::{ApiResult, ListQuery, ensure_valid, store_error};
use crate::auth::{AuthContext, AuthError, TenantScope};
use crate::db::schema::{
    AgentRecord, DEFAULT_MAX_AGENTS, Role, TenantCreate, TenantRecord, TenantStats, TenantUpdate,
    UserCreate, UserRecord, UserUpdate, check_len, normalize_email,
};
use crate::db::{AgentFilter, QueryBuilder};
use crate::error::{ApiError, FieldError};
use crate::types::{AgentId, TenantId, UserId};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/tenants", get(list_tenants).post(create_tenant))
        .route(
            "/tenants/{id}",
            get(get_tenant).put(update_tenant).delete(delete_tenant),
        )
        .route("/users", get(list_users).post(create_user))
        .route("/users/{id}", axum::routing::put(update_user).delete(delete_user))
        .route("/agents", get(list_agents))
        .route("/agents/{id}", get(get_agent).delete(delete_agent))
}

/// Tenant with its usage counters.
#[derive(Debug, Serialize)]
pub struct TenantOverview {
    #[serde(flatten)]
    pub tenant: TenantRecord,
    pub stats: TenantStats,
    pub agents_remaining: i64,
}

#[derive(Debug, Deserialize)]
pub struct TenantCreateRequest {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub registry_number: Option<String>,
    pub max_agents: Option<u32>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AdminUserCreate {
    pub tenant_id: Option<TenantId>,
    pub name: String,
    pub email: String,
    pub secret: String,
    pub role: Role,
}

/// Admin edit of a user; `secret` resets the credential without the old one.
#[derive(Debug, Deserialize)]
pub struct AdminUserUpdate {
    #[serde(flatten)]
    pub fields: UserUpdate,
    pub secret: Option<String>,
}

fn check_max_agents(errors: &mut Vec<FieldError>, max_agents: u32) {
    if !(1..=1000).contains(&max_agents) {
        errors.push(FieldError::new("max_agents", "must be between 1 and 1000"));
    }
}

async fn overview(state: &AppState, tenant: TenantRecord) -> Result<TenantOverview, ApiError> {
    let stats = QueryBuilder::tenant_stats(state.db(), &tenant.id).await?;
    let agents_remaining = i64::from(tenant.max_agents) - stats.agents as i64;
    Ok(TenantOverview {
        tenant,
        stats,
        agents_remaining,
    })
}

/// Reject an email or registry number already held by another tenant.
async fn ensure_tenant_unique(
    state: &AppState,
    current: Option<&TenantId>,
    email: Option<&str>,
    registry_number: Option<&str>,
) -> Result<(), ApiError> {
    let db = state.db();
    if let Some(email) = email
        && let Some(other) = QueryBuilder::find_tenant_by_email(db, email).await?
        && Some(&other.id) != current
    {
        return Err(ApiError::Conflict("company email already registered".to_string()));
    }
    if let Some(number) = registry_number
        && let Some(other) = QueryBuilder::find_tenant_by_registry_number(db, number).await?
        && Some(&other.id) != current
    {
        return Err(ApiError::Conflict("registry number already registered".to_string()));
    }
    Ok(())
}

// ---- tenants ----------------------------------------------------------------

async fn list_tenants(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Vec<TenantOverview>> {
    let page = query.page();
    let search = query.search();
    let (tenants, total) =
        QueryBuilder::list_tenants(state.db(), search.as_deref(), query.status, page).await?;

    let mut items = Vec::with_capacity(tenants.len());
    for tenant in tenants {
        items.push(overview(&state, tenant).await?);
    }
    Ok(Envelope::paginated("companies", items, Pagination::new(page, total)))
}

async fn get_tenant(
    State(state): State<AppState>,
    Path(id): Path<TenantId>,
) -> ApiResult<TenantOverview> {
    let tenant = QueryBuilder::find_tenant(state.db(), &TenantScope::All, &id)
        .await?
        .ok_or(ApiError::NotFound("company"))?;
    Ok(Envelope::ok("company", overview(&state, tenant).await?))
}

async fn create_tenant(
    State(state): State<AppState>,
    ctx: AuthContext,
    Json(req): Json<TenantCreateRequest>,
) -> ApiResult<TenantRecord> {
    let email = normalize_email(&req.email);
    let registry_number = req
        .registry_number
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());
    let max_agents = req.max_agents.unwrap_or(DEFAULT_MAX_AGENTS);

    let mut errors = Vec::new();
    check_name(&mut errors, "name", &req.name);
    check_email(&mut errors, "email", &email);
    check_max_agents(&mut errors, max_agents);
    if let Some(notes) = &req.notes {
        check_len(&mut errors, "notes", notes, 500);
    }
    ensure_valid(errors)?;

    ensure_tenant_unique(&state, None, Some(&email), registry_number.as_deref()).await?;

    let tenant = QueryBuilder::create_tenant(
        state.db(),
        &TenantCreate {
            name: req.name.trim().to_string(),
            email,
            phone: req.phone,
            registry_number,
            max_agents,
            notes: req.notes,
        },
    )
    .await
    .map_err(|e| store_error(e, "company email already registered"))?;

    info!(tenant_id = %tenant.id, by = %ctx.user_id(), "company created");
    Ok(Envelope::created("company created", tenant))
}

async fn update_tenant(
    State(state): State<AppState>,
    Path(id): Path<TenantId>,
    Json(mut update): Json<TenantUpdate>,
) -> ApiResult<TenantRecord> {
    update.email = update.email.as_deref().map(normalize_email);

    let mut errors = Vec::new();
    if let Some(name) = &update.name {
        check_name(&mut errors, "name", name);
    }
    if let Some(email) = &update.email {
        check_email(&mut errors, "email", email);
    }
    if let Some(max_agents) = update.max_agents {
        check_max_agents(&mut errors, max_agents);
    }
    if let Some(notes) = &update.notes {
        check_len(&mut errors, "notes", notes, 500);
    }
    ensure_valid(errors)?;

    let db = state.db();
    let current = QueryBuilder::find_tenant(db, &TenantScope::All, &id)
        .await?
        .ok_or(ApiError::NotFound("company"))?;

    ensure_tenant_unique(
        &state,
        Some(&current.id),
        update.email.as_deref(),
        update.registry_number.as_deref(),
    )
    .await?;

    if let Some(max_agents) = update.max_agents
        && max_agents < current.max_agents
    {
        let active = QueryBuilder::count_agents(db, &id, true).await?;
        if u64::from(max_agents) < active {
            return Err(ApiError::BadRequest(format!(
                "cannot reduce the limit to {max_agents}: the company has {active} active agents"
            )));
        }
    }

    let tenant = QueryBuilder::update_tenant(db, &TenantScope::All, &id, update)
        .await
        .map_err(|e| store_error(e, "company email already registered"))?
        .ok_or(ApiError::NotFound("company"))?;
    Ok(Envelope::ok("company updated", tenant))
}

/// Delete a tenant that owns no users and no agents.
async fn delete_tenant(State(state): State<AppState>, Path(id): Path<TenantId>) -> ApiResult<()> {
    let db = state.db();
    QueryBuilder::find_tenant(db, &TenantScope::All, &id)
        .await?
        .ok_or(ApiError::NotFound("company"))?;

    let stats = QueryBuilder::tenant_stats(db, &id).await?;
    let users = state.users().count_users(&id).await?;
    if users > 0 {
        return Err(ApiError::Conflict("company still has users".to_string()));
    }
    if stats.agents > 0 {
        return Err(ApiError::Conflict("company still has agents".to_string()));
    }

    QueryBuilder::delete_tenant(db, &id).await?;
    info!(tenant_id = %id, "company deleted");
    Ok(Envelope::message("company deleted"))
}

// ---- users ------------------------------------------------------------------

async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Vec<UserRecord>> {
    let page = query.page();
    let (users, total) = state
        .users()
        .list_users(&TenantScope::All, query.tenant_id.as_ref(), false, page)
        .await?;
    Ok(Envelope::paginated("users", users, Pagination::new(page, total)))
}

/// Create a user of any role. Superadmins carry no tenant; every other
/// role must name an existing one.
async fn create_user(
    State(state): State<AppState>,
    ctx: AuthContext,
    Json(req): Json<AdminUserCreate>,
) -> ApiResult<UserRecord> {
    let email = normalize_email(&req.email);

    let mut errors = Vec::new();
    check_name(&mut errors, "name", &req.name);
    check_email(&mut errors, "email", &email);
    check_secret(&mut errors, "secret", &req.secret);
    match (req.role.is_superadmin(), &req.tenant_id) {
        (true, Some(_)) => errors.push(FieldError::new(
            "tenant_id",
            "must be empty for a superadmin",
        )),
        (false, None) => errors.push(FieldError::new("tenant_id", "is required for this role")),
        _ => {}
    }
    ensure_valid(errors)?;

    if let Some(tenant_id) = &req.tenant_id
        && QueryBuilder::find_tenant(state.db(), &TenantScope::All, tenant_id)
            .await?
            .is_none()
    {
        return Err(ApiError::invalid("tenant_id", "company does not exist"));
    }
    if state.users().get_user_by_email(&email).await?.is_some() {
        return Err(ApiError::Conflict("email already registered".to_string()));
    }

    let user = state
        .verifier()
        .enroll(
            state.users(),
            UserCreate {
                tenant_id: req.tenant_id,
                name: req.name,
                email,
                secret: req.secret,
                role: req.role,
            },
        )
        .await
        .map_err(|e| match e {
            AuthError::Store(e) => store_error(e, "email already registered"),
            other => other.into(),
        })?;

    info!(user_id = %user.id, role = %user.role, by = %ctx.user_id(), "user created");
    Ok(Envelope::created("user created", user))
}

async fn update_user(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path(id): Path<UserId>,
    Json(req): Json<AdminUserUpdate>,
) -> ApiResult<UserRecord> {
    let AdminUserUpdate {
        fields: mut update,
        secret,
    } = req;
    update.email = update.email.as_deref().map(normalize_email);

    let mut errors = Vec::new();
    if let Some(name) = &update.name {
        check_name(&mut errors, "name", name);
    }
    if let Some(email) = &update.email {
        check_email(&mut errors, "email", email);
    }
    if let Some(secret) = &secret {
        check_secret(&mut errors, "secret", secret);
    }
    ensure_valid(errors)?;

    let current = state
        .users()
        .get_user_by_id(&id)
        .await?
        .ok_or(ApiError::NotFound("user"))?;

    // The role may not break the superadmin-has-no-tenant invariant
    if let Some(role) = update.role
        && role.is_superadmin() != current.tenant_id.is_none()
    {
        return Err(ApiError::invalid(
            "role",
            "superadmin role and company membership are exclusive",
        ));
    }

    if let Some(email) = &update.email
        && email != &current.email
        && state.users().get_user_by_email(email).await?.is_some()
    {
        return Err(ApiError::Conflict("email already registered".to_string()));
    }

    let mut user = state
        .users()
        .update_user(&TenantScope::All, &id, update)
        .await
        .map_err(|e| store_error(e, "email already registered"))?
        .ok_or(ApiError::NotFound("user"))?;

    if let Some(secret) = secret {
        state.verifier().reset_secret(state.users(), &user, &secret).await?;
        user = state
            .users()
            .get_user_by_id(&id)
            .await?
            .ok_or(ApiError::NotFound("user"))?;
        info!(user_id = %id, by = %ctx.user_id(), "secret reset");
    }

    Ok(Envelope::ok("user updated", user))
}

async fn delete_user(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path(id): Path<UserId>,
) -> ApiResult<()> {
    if &id == ctx.user_id() {
        return Err(ApiError::BadRequest(
            "cannot delete your own account".to_string(),
        ));
    }
    state
        .users()
        .get_user_by_id(&id)
        .await?
        .ok_or(ApiError::NotFound("user"))?;

    state.users().delete_user(&id).await?;
    info!(user_id = %id, by = %ctx.user_id(), "user deleted");
    Ok(Envelope::message("user deleted"))
}

// ---- agents -----------------------------------------------------------------

async fn list_agents(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Vec<AgentRecord>> {
    let page = query.page();
    let filter = AgentFilter {
        search: query.search(),
        active: query.active,
        tenant: query.tenant_id.clone(),
    };
    let (agents, total) =
        QueryBuilder::list_agents(state.db(), &TenantScope::All, &filter, page).await?;
    Ok(Envelope::paginated("agents", agents, Pagination::new(page, total)))
}

async fn get_agent(State(state): State<AppState>, Path(id): Path<AgentId>) -> ApiResult<AgentRecord> {
    let agent = QueryBuilder::find_agent(state.db(), &TenantScope::All, &id)
        .await?
        .ok_or(ApiError::NotFound("agent"))?;
    Ok(Envelope::ok("agent", agent))
}

async fn delete_agent(State(state): State<AppState>, Path(id): Path<AgentId>) -> ApiResult<()> {
    let db = state.db();
    QueryBuilder::find_agent(db, &TenantScope::All, &id)
        .await?
        .ok_or(ApiError::NotFound("agent"))?;

    if QueryBuilder::count_active_conversations(db, &id).await? > 0 {
        return Err(ApiError::Conflict(
            "agent has active conversations".to_string(),
        ));
    }

    QueryBuilder::delete_agent(db, &TenantScope::All, &id).await?;
    info!(agent_id = %id, "agent deleted by superadmin");
    Ok(Envelope::message("agent deleted"))
}
