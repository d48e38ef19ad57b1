//! Multi-tenant agent configuration backend.
//!
//! Tenants own users and agents; users authenticate with JWT pairs and
//! agents with per-agent API keys. See [`api::create_router`] for the
//! HTTP surface.

pub mod api;
pub mod auth;
pub mod chat;
pub mod config;
pub mod db;
pub mod error;
pub mod types;

pub use auth::{AgentContext, AuthContext, AuthError, Authenticator, CredentialVerifier, UserStore};
pub use config::{AppConfig, AuthConfig, Posture, VerifierConfig};
pub use db::{DatabaseConfig, Db, create_connection, ensure_schema};
pub use error::ApiError;

use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use tracing::info;

use chat::StubCompletion;

/// Shared state handed to every handler.
pub type AppState = Arc<Backend>;

/// Everything a request needs, built once at startup and never mutated.
pub struct Backend {
    config: AppConfig,
    db: Db,
    authenticator: Authenticator,
    verifier: CredentialVerifier,
    completion: StubCompletion,
}

impl Backend {
    pub fn new(config: AppConfig, db: Db) -> Result<Self> {
        config.validate()?;
        let verifier = CredentialVerifier::from_config(&config.auth.verifier)?;
        let authenticator = Authenticator::new(&config.auth, db.clone());

        info!(
            verifier = verifier.name(),
            posture = ?config.posture,
            stale_session_check = config.auth.stale_session_check,
            "backend configured"
        );

        Ok(Self {
            config,
            db,
            authenticator,
            verifier,
            completion: StubCompletion,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn authenticator(&self) -> &Authenticator {
        &self.authenticator
    }

    pub fn users(&self) -> &UserStore {
        self.authenticator.users()
    }

    pub fn verifier(&self) -> &CredentialVerifier {
        &self.verifier
    }

    pub fn completion(&self) -> &StubCompletion {
        &self.completion
    }
}

/// Convenience function to connect, bootstrap the schema and build the
/// full HTTP application.
pub async fn create_app(config: AppConfig, db_config: DatabaseConfig) -> Result<Router> {
    let db = create_connection(db_config).await?;
    ensure_schema(&db).await?;
    let backend = Backend::new(config, db)?;
    Ok(api::create_router(Arc::new(backend)))
}
