//! Request-scoped identities.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use serde::{Deserialize, Serialize};

use crate::auth::access::{TenantScope, can_access};
use crate::db::schema::{AgentRecord, AgentSettings, Role, UserRecord};
use crate::error::ApiError;
use crate::types::{AgentId, TenantId, UserId};

/// Authenticated user, resolved by the authentication middleware.
///
/// This struct is placed in the request extensions once and handed to
/// handlers by extraction. It is immutable once created and never holds
/// the secret hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthContext {
    user_id: UserId,
    role: Role,
    tenant_id: Option<TenantId>,
    email: String,
}

impl AuthContext {
    pub fn new(user: &UserRecord) -> Self {
        Self {
            user_id: user.id.clone(),
            role: user.role,
            tenant_id: user.tenant_id.clone(),
            email: user.email.clone(),
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn tenant_id(&self) -> Option<&TenantId> {
        self.tenant_id.as_ref()
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    /// Tenant filter for store lookups made on behalf of this user.
    pub fn scope(&self) -> TenantScope {
        TenantScope::for_actor(self.role, self.tenant_id.as_ref())
    }

    /// Tenant id a tenant-scoped handler operates on.
    pub fn require_tenant(&self) -> Result<&TenantId, ApiError> {
        self.tenant_id.as_ref().ok_or(ApiError::Forbidden)
    }

    pub fn can_access(&self, resource_tenant: Option<&TenantId>, required: &[Role]) -> bool {
        can_access(self.role, self.tenant_id.as_ref(), resource_tenant, required)
    }
}

impl<S: Send + Sync> FromRequestParts<S> for AuthContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or(ApiError::Unauthenticated)
    }
}

/// Agent identity resolved from an `x-api-key` header.
///
/// Carries no role; it only opens the machine routes of its own agent.
#[derive(Debug, Clone)]
pub struct AgentContext {
    agent_id: AgentId,
    tenant_id: TenantId,
    base_prompt: String,
    instructions: Option<String>,
    settings: AgentSettings,
}

impl AgentContext {
    pub fn new(agent: &AgentRecord) -> Self {
        Self {
            agent_id: agent.id.clone(),
            tenant_id: agent.tenant_id.clone(),
            base_prompt: agent.base_prompt.clone(),
            instructions: agent.instructions.clone(),
            settings: agent.settings.clone(),
        }
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn base_prompt(&self) -> &str {
        &self.base_prompt
    }

    pub fn instructions(&self) -> Option<&str> {
        self.instructions.as_deref()
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }
}

impl<S: Send + Sync> FromRequestParts<S> for AgentContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AgentContext>()
            .cloned()
            .ok_or(ApiError::Unauthenticated)
    }
}
