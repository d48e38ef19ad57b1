//! Session endpoints: register, login, refresh, me, logout, change-secret.

use axum::extract::State;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::AppState;
use crate::api::extract::Json;
use crate::api::response::Envelope;
use crate::api::{ApiResult, ensure_valid, store_error};
use crate::auth::{AuthContext, AuthError, TenantScope, TokenPair};
use crate::db::QueryBuilder;
use crate::db::schema::{
    DEFAULT_MAX_AGENTS, Role, TenantCreate, TenantRecord, UserCreate, UserRecord, check_len,
    is_valid_email, normalize_email,
};
use crate::error::{ApiError, FieldError};
use crate::types::{TenantId, UserId};

pub const MIN_SECRET_LEN: usize = 6;

/// Public view of a user returned alongside tokens.
#[derive(Debug, Clone, Serialize)]
pub struct UserSummary {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub tenant_id: Option<TenantId>,
}

impl From<&UserRecord> for UserSummary {
    fn from(user: &UserRecord) -> Self {
        Self {
            id: user.id.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role,
            tenant_id: user.tenant_id.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Session {
    #[serde(flatten)]
    pub tokens: TokenPair,
    pub user: UserSummary,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub tenant_name: String,
    pub tenant_email: String,
    pub tenant_phone: Option<String>,
    pub admin_name: String,
    pub admin_email: String,
    pub secret: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub secret: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangeSecretRequest {
    pub current_secret: String,
    pub new_secret: String,
}

#[derive(Debug, Serialize)]
pub struct Me {
    pub user: UserRecord,
    pub tenant: Option<TenantRecord>,
}

pub(crate) fn check_secret(errors: &mut Vec<FieldError>, field: &str, secret: &str) {
    if secret.chars().count() < MIN_SECRET_LEN {
        errors.push(FieldError::new(
            field,
            format!("must be at least {MIN_SECRET_LEN} characters"),
        ));
    }
}

pub(crate) fn check_email(errors: &mut Vec<FieldError>, field: &str, email: &str) {
    if !is_valid_email(email) {
        errors.push(FieldError::new(field, "must be a valid email address"));
    }
}

pub(crate) fn check_name(errors: &mut Vec<FieldError>, field: &str, name: &str) {
    if name.trim().is_empty() {
        errors.push(FieldError::new(field, "is required"));
    }
    check_len(errors, field, name, 100);
}

fn session(state: &AppState, user: &UserRecord) -> Result<Session, ApiError> {
    let tokens = state.authenticator().tokens().issue(user)?;
    Ok(Session {
        tokens,
        user: UserSummary::from(user),
    })
}

/// Create a tenant and its first tenant admin, then sign the admin in.
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<Session> {
    let tenant_email = normalize_email(&req.tenant_email);
    let admin_email = normalize_email(&req.admin_email);

    let mut errors = Vec::new();
    check_name(&mut errors, "tenant_name", &req.tenant_name);
    check_email(&mut errors, "tenant_email", &tenant_email);
    check_name(&mut errors, "admin_name", &req.admin_name);
    check_email(&mut errors, "admin_email", &admin_email);
    check_secret(&mut errors, "secret", &req.secret);
    ensure_valid(errors)?;

    let db = state.db();
    if QueryBuilder::find_tenant_by_email(db, &tenant_email).await?.is_some() {
        return Err(ApiError::Conflict("company email already registered".to_string()));
    }
    if state.users().get_user_by_email(&admin_email).await?.is_some() {
        return Err(ApiError::Conflict("email already registered".to_string()));
    }

    let tenant = QueryBuilder::create_tenant(
        db,
        &TenantCreate {
            name: req.tenant_name.trim().to_string(),
            email: tenant_email,
            phone: req.tenant_phone,
            registry_number: None,
            max_agents: DEFAULT_MAX_AGENTS,
            notes: None,
        },
    )
    .await
    .map_err(|e| store_error(e, "company email already registered"))?;

    let enrolled = state
        .verifier()
        .enroll(
            state.users(),
            UserCreate {
                tenant_id: Some(tenant.id.clone()),
                name: req.admin_name,
                email: admin_email,
                secret: req.secret,
                role: Role::TenantAdmin,
            },
        )
        .await;

    let admin = match enrolled {
        Ok(admin) => admin,
        Err(err) => {
            // Leave no tenant without an admin behind
            if let Err(e) = QueryBuilder::delete_tenant(db, &tenant.id).await {
                warn!(tenant_id = %tenant.id, error = %e, "failed to roll back tenant");
            }
            return Err(match err {
                AuthError::Store(e) => store_error(e, "email already registered"),
                other => other.into(),
            });
        }
    };

    info!(tenant_id = %tenant.id, user_id = %admin.id, "tenant registered");
    Ok(Envelope::created(
        "company and user registered",
        session(&state, &admin)?,
    ))
}

pub async fn login(State(state): State<AppState>, Json(req): Json<LoginRequest>) -> ApiResult<Session> {
    let email = normalize_email(&req.email);
    if email.is_empty() || req.secret.is_empty() {
        return Err(ApiError::InvalidCredentials);
    }

    let user = state
        .verifier()
        .verify(state.users(), &email, &req.secret)
        .await?;

    if let Some(tenant_id) = &user.tenant_id {
        let tenant = QueryBuilder::find_tenant(state.db(), &TenantScope::All, tenant_id).await?;
        if !tenant.is_some_and(|t| t.status.is_active()) {
            return Err(ApiError::InactiveTenant);
        }
    }

    if let Err(e) = state.users().touch_last_access(&user.id).await {
        warn!(user_id = %user.id, error = %e, "failed to stamp last access");
    }

    info!(user_id = %user.id, role = %user.role, "login succeeded");
    Ok(Envelope::ok("login successful", session(&state, &user)?))
}

/// Exchange a refresh token for a brand-new pair.
///
/// The user is re-read so role changes, deactivation and revocation all
/// take effect here too.
pub async fn refresh_token(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> ApiResult<Session> {
    let authenticator = state.authenticator();
    let claims = authenticator.tokens().verify_refresh(&req.refresh_token)?;
    let user = authenticator.resolve_live_user(&claims).await?;

    Ok(Envelope::ok("token refreshed", session(&state, &user)?))
}

pub async fn me(State(state): State<AppState>, ctx: AuthContext) -> ApiResult<Me> {
    let user = state
        .users()
        .get_user_by_id(ctx.user_id())
        .await?
        .ok_or(ApiError::NotFound("user"))?;

    let tenant = match &user.tenant_id {
        Some(id) => QueryBuilder::find_tenant(state.db(), &ctx.scope(), id).await?,
        None => None,
    };

    Ok(Envelope::ok("current user", Me { user, tenant }))
}

/// Revoke every token issued to the caller so far, refresh tokens included.
pub async fn logout(State(state): State<AppState>, ctx: AuthContext) -> ApiResult<()> {
    let epoch = state.users().revoke_sessions(ctx.user_id()).await?;

    info!(user_id = %ctx.user_id(), epoch, "logged out");
    Ok(Envelope::message("logged out"))
}

pub async fn change_secret(
    State(state): State<AppState>,
    ctx: AuthContext,
    Json(req): Json<ChangeSecretRequest>,
) -> ApiResult<Session> {
    let mut errors = Vec::new();
    check_secret(&mut errors, "new_secret", &req.new_secret);
    if req.new_secret == req.current_secret {
        errors.push(FieldError::new(
            "new_secret",
            "must differ from the current secret",
        ));
    }
    ensure_valid(errors)?;

    let user = state
        .users()
        .get_user_by_id(ctx.user_id())
        .await?
        .ok_or(ApiError::NotFound("user"))?;

    state
        .verifier()
        .change_secret(state.users(), &user, &req.current_secret, &req.new_secret)
        .await
        .map_err(|e| match e {
            AuthError::InvalidCredentials => {
                ApiError::BadRequest("current secret is incorrect".to_string())
            }
            other => other.into(),
        })?;

    // Reload so the new pair carries the bumped session epoch
    let user = state
        .users()
        .get_user_by_id(&user.id)
        .await?
        .ok_or(ApiError::NotFound("user"))?;

    info!(user_id = %user.id, "secret changed");
    Ok(Envelope::ok("secret changed", session(&state, &user)?))
}
