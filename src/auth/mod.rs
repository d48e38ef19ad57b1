//! Authentication and authorization.
//!
//! - **Tokens**: HS256 access/refresh pairs signed with separate secrets
//! - **Secrets**: Argon2id hashes, or a GoTrue-compatible provider
//! - **API keys**: sha256 digests of `x-api-key` values, one per agent
//! - **Access**: a single role/tenant predicate backs every guard
//!
//! Identity is resolved by middleware before any handler runs; handlers
//! receive an [`AuthContext`] or [`AgentContext`] through extraction.

pub mod access;
mod context;
mod extractor;
pub mod password;
pub mod token;
mod user_store;
pub mod verifier;

pub use access::{TenantScope, can_access};
pub use context::{AgentContext, AuthContext};
pub use extractor::{
    AuthError, Authenticator, authorize, generate_api_key, hash_api_key, require_agent,
    require_superadmin, require_tenant_admin, require_tenant_member, require_user,
};
pub use token::{Claims, TokenKind, TokenPair, TokenService};
pub use user_store::UserStore;
pub use verifier::CredentialVerifier;
