//! Authentication for HTTP requests.
//!
//! Two paths exist: bearer access tokens resolve to a live user and tenant,
//! and `x-api-key` headers resolve to an active agent. Both run as axum
//! middleware and leave an immutable context in the request extensions.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

use crate::AppState;
use crate::auth::access::{TenantScope, can_access};
use crate::auth::context::{AgentContext, AuthContext};
use crate::auth::token::{Claims, TokenService};
use crate::auth::user_store::UserStore;
use crate::config::{API_KEY_HEADER, AuthConfig};
use crate::db::schema::{Role, UserRecord};
use crate::db::{Db, QueryBuilder};
use crate::error::ApiError;
use crate::types::{ApiKeyHash, ApiKeyPrefix};

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("account is inactive")]
    InactiveAccount,
    #[error("company is inactive")]
    InactiveTenant,
    #[error("authentication required")]
    Unauthenticated,
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("token expired")]
    ExpiredToken,
    #[error("insufficient permissions")]
    Forbidden,
    #[error("invalid API key")]
    InvalidApiKey,
    #[error("token signing failed: {0}")]
    Signing(String),
    #[error("identity provider error: {0}")]
    Provider(String),
    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

/// Resolves credentials presented on a request into an identity.
pub struct Authenticator {
    tokens: TokenService,
    users: UserStore,
    db: Db,
    stale_session_check: bool,
}

impl Authenticator {
    pub fn new(config: &AuthConfig, db: Db) -> Self {
        Self {
            tokens: TokenService::new(config),
            users: UserStore::new(db.clone()),
            db,
            stale_session_check: config.stale_session_check,
        }
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub fn users(&self) -> &UserStore {
        &self.users
    }

    /// Authenticate an `Authorization` header value.
    ///
    /// Steps, in order: bearer extraction, access-token verification, live
    /// user lookup, tenant status (non-superadmins), session epoch,
    /// best-effort last-access stamp.
    pub async fn authenticate(&self, authorization: Option<&str>) -> Result<AuthContext, AuthError> {
        let token = authorization
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::Unauthenticated)?;

        let claims = self.tokens.verify_access(token)?;
        let user = self.resolve_live_user(&claims).await?;

        if let Err(e) = self.users.touch_last_access(&user.id).await {
            warn!(user_id = %user.id, error = %e, "failed to stamp last access");
        }

        debug!(user_id = %user.id, role = %user.role, "request authenticated");
        Ok(AuthContext::new(&user))
    }

    /// Load the user named by `claims` and check it may still act.
    ///
    /// Shared by request authentication and the refresh flow, so a refresh
    /// token cannot outlive a deactivation or a revocation either.
    pub async fn resolve_live_user(&self, claims: &Claims) -> Result<UserRecord, AuthError> {
        let user = self
            .users
            .get_user_by_id(&claims.sub)
            .await?
            .ok_or(AuthError::InactiveAccount)?;

        if !user.status.is_active() {
            return Err(AuthError::InactiveAccount);
        }

        if !user.role.is_superadmin() {
            let tenant_id = user.tenant_id.as_ref().ok_or(AuthError::InactiveTenant)?;
            let tenant = QueryBuilder::find_tenant(&self.db, &TenantScope::All, tenant_id).await?;
            match tenant {
                Some(t) if t.status.is_active() => {}
                _ => return Err(AuthError::InactiveTenant),
            }
        }

        if self.stale_session_check && claims.epoch < user.session_epoch {
            debug!(user_id = %user.id, epoch = claims.epoch, "token from a revoked session");
            return Err(AuthError::InvalidToken("session revoked".to_string()));
        }

        Ok(user)
    }

    /// Authenticate a raw agent API key.
    pub async fn authenticate_api_key(&self, key: Option<&str>) -> Result<AgentContext, AuthError> {
        let key = key
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(AuthError::InvalidApiKey)?;

        let agent = QueryBuilder::find_agent_by_key_hash(&self.db, &hash_api_key(key))
            .await?
            .ok_or(AuthError::InvalidApiKey)?;

        if !agent.active {
            return Err(AuthError::InvalidApiKey);
        }

        Ok(AgentContext::new(&agent))
    }
}

/// Middleware: require a valid bearer access token.
pub async fn require_user(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let authorization = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let ctx = state
        .authenticator()
        .authenticate(authorization)
        .await
        .inspect_err(|e| debug!(error = %e, "bearer authentication rejected"))?;

    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}

/// Middleware: require a valid `x-api-key` for an active agent.
pub async fn require_agent(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let key = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    let ctx = state
        .authenticator()
        .authenticate_api_key(key)
        .await
        .inspect_err(|e| debug!(error = %e, "API key authentication rejected"))?;

    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}

/// Deny with 403 unless the authenticated role is in `allowed`.
///
/// Runs after [`require_user`]; tenant roles must also carry a tenant.
pub async fn authorize(allowed: &[Role], req: Request, next: Next) -> Result<Response, ApiError> {
    let ctx = req
        .extensions()
        .get::<AuthContext>()
        .ok_or(ApiError::Unauthenticated)?;

    if !can_access(ctx.role(), ctx.tenant_id(), ctx.tenant_id(), allowed) {
        debug!(user_id = %ctx.user_id(), role = %ctx.role(), "role not permitted");
        return Err(ApiError::Forbidden);
    }
    Ok(next.run(req).await)
}

pub async fn require_superadmin(req: Request, next: Next) -> Result<Response, ApiError> {
    authorize(&[Role::Superadmin], req, next).await
}

pub async fn require_tenant_member(req: Request, next: Next) -> Result<Response, ApiError> {
    authorize(&[Role::TenantAdmin, Role::TenantUser], req, next).await
}

pub async fn require_tenant_admin(req: Request, next: Next) -> Result<Response, ApiError> {
    authorize(&[Role::TenantAdmin], req, next).await
}

/// Hash an API key for storage and lookup (don't store raw keys).
pub fn hash_api_key(key: &str) -> ApiKeyHash {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let result = hasher.finalize();
    ApiKeyHash::new(format!("{:x}", result))
}

/// Generate a new agent API key: `ak_` followed by 32 random bytes.
/// Returns (full_key, prefix, hash)
pub fn generate_api_key() -> (String, ApiKeyPrefix, ApiKeyHash) {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rand::Rng::random(&mut rng);
    let full_key = format!("ak_{}", URL_SAFE_NO_PAD.encode(bytes));
    let prefix = ApiKeyPrefix::new(full_key.chars().take(11).collect::<String>());
    let key_hash = hash_api_key(&full_key);

    (full_key, prefix, key_hash)
}
