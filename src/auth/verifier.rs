//! Credential verification strategies.
//!
//! Login, enrolment and secret changes go through [`CredentialVerifier`],
//! which either checks Argon2id hashes stored on the user record or
//! delegates to a GoTrue-compatible identity provider. The strategy is
//! chosen once at startup.

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::auth::AuthError;
use crate::auth::password::{hash_secret_blocking, verify_secret_blocking};
use crate::auth::user_store::UserStore;
use crate::config::VerifierConfig;
use crate::db::schema::{UserCreate, UserRecord};
use crate::types::{ExternalSubject, UserId};

pub enum CredentialVerifier {
    Local(LocalHashVerifier),
    External(ExternalProviderVerifier),
}

impl CredentialVerifier {
    pub fn from_config(config: &VerifierConfig) -> Result<Self, AuthError> {
        match config {
            VerifierConfig::Local => Ok(Self::Local(LocalHashVerifier)),
            VerifierConfig::External {
                base_url,
                service_key,
            } => Ok(Self::External(ExternalProviderVerifier::new(
                base_url,
                service_key.clone(),
            )?)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Local(_) => "local",
            Self::External(_) => "external",
        }
    }

    /// Check an email/secret pair and return the matching active user.
    ///
    /// Every failure is [`AuthError::InvalidCredentials`] so callers cannot
    /// tell an unknown email from a wrong secret or a disabled account.
    pub async fn verify(
        &self,
        users: &UserStore,
        email: &str,
        secret: &str,
    ) -> Result<UserRecord, AuthError> {
        match self {
            Self::Local(v) => v.verify(users, email, secret).await,
            Self::External(v) => v.verify(users, email, secret).await,
        }
    }

    /// Create a user together with its credential.
    pub async fn enroll(
        &self,
        users: &UserStore,
        create: UserCreate,
    ) -> Result<UserRecord, AuthError> {
        match self {
            Self::Local(v) => v.enroll(users, create).await,
            Self::External(v) => v.enroll(users, create).await,
        }
    }

    /// Replace a user's secret after checking the current one.
    pub async fn change_secret(
        &self,
        users: &UserStore,
        user: &UserRecord,
        current: &str,
        new: &str,
    ) -> Result<(), AuthError> {
        match self {
            Self::Local(v) => v.change_secret(users, &user.id, current, new).await,
            Self::External(v) => v.change_secret(users, user, current, new).await,
        }
    }

    /// Set a secret without knowing the old one (administrative reset).
    pub async fn reset_secret(
        &self,
        users: &UserStore,
        user: &UserRecord,
        new: &str,
    ) -> Result<(), AuthError> {
        match self {
            Self::Local(_) => Ok(users.set_secret(&user.id, new).await?),
            Self::External(v) => v.reset_secret(users, user, new).await,
        }
    }
}

/// Hash of a random secret, checked when no local hash exists so that an
/// unknown email costs the same Argon2 work as a wrong secret.
static DECOY_HASH: OnceCell<String> = OnceCell::const_new();

async fn decoy_hash() -> Result<&'static str, AuthError> {
    let hash = DECOY_HASH
        .get_or_try_init(|| hash_secret_blocking(Uuid::new_v4().to_string()))
        .await?;
    Ok(hash.as_str())
}

/// Argon2id hashes stored on the user record.
pub struct LocalHashVerifier;

impl LocalHashVerifier {
    async fn verify(
        &self,
        users: &UserStore,
        email: &str,
        secret: &str,
    ) -> Result<UserRecord, AuthError> {
        let creds = users.get_credentials_by_email(email).await?;

        let Some((creds, hash)) =
            creds.and_then(|c| c.secret_hash.clone().map(|hash| (c, hash)))
        else {
            verify_secret_blocking(secret.to_string(), decoy_hash().await?.to_string()).await;
            return Err(AuthError::InvalidCredentials);
        };
        if !verify_secret_blocking(secret.to_string(), hash).await {
            return Err(AuthError::InvalidCredentials);
        }
        if !creds.status.is_active() {
            return Err(AuthError::InvalidCredentials);
        }

        users
            .get_user_by_id(&creds.id)
            .await?
            .ok_or(AuthError::InvalidCredentials)
    }

    async fn enroll(&self, users: &UserStore, create: UserCreate) -> Result<UserRecord, AuthError> {
        Ok(users.create_user(create).await?)
    }

    async fn change_secret(
        &self,
        users: &UserStore,
        user_id: &UserId,
        current: &str,
        new: &str,
    ) -> Result<(), AuthError> {
        let hash = users
            .get_credentials_by_id(user_id)
            .await?
            .and_then(|c| c.secret_hash)
            .ok_or(AuthError::InvalidCredentials)?;

        if !verify_secret_blocking(current.to_string(), hash).await {
            return Err(AuthError::InvalidCredentials);
        }
        users.set_secret(user_id, new).await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ProviderUser {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PasswordGrant {
    user: ProviderUser,
}

/// GoTrue-compatible identity provider reached over HTTP.
///
/// Secrets never touch the local database; users are linked to the
/// provider by `external_subject`.
pub struct ExternalProviderVerifier {
    client: reqwest::Client,
    base_url: Url,
    service_key: String,
}

impl ExternalProviderVerifier {
    pub fn new(base_url: &str, service_key: String) -> Result<Self, AuthError> {
        let mut normalized = base_url.to_string();
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        let base_url = Url::parse(&normalized)
            .map_err(|e| AuthError::Provider(format!("invalid provider url: {e}")))?;

        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
            service_key,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, AuthError> {
        self.base_url
            .join(path)
            .map_err(|e| AuthError::Provider(format!("invalid provider path {path}: {e}")))
    }

    /// Password grant against the provider; returns the provider subject.
    async fn password_grant(&self, email: &str, secret: &str) -> Result<ExternalSubject, AuthError> {
        let mut url = self.endpoint("auth/v1/token")?;
        url.set_query(Some("grant_type=password"));

        let response = self
            .client
            .post(url)
            .header("apikey", &self.service_key)
            .json(&json!({ "email": email, "password": secret }))
            .send()
            .await
            .map_err(|e| AuthError::Provider(format!("provider unreachable: {e}")))?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            debug!(%status, "provider rejected password grant");
            return Err(AuthError::InvalidCredentials);
        }
        if !status.is_success() {
            return Err(AuthError::Provider(format!(
                "password grant failed with status {status}"
            )));
        }

        let grant: PasswordGrant = response
            .json()
            .await
            .map_err(|e| AuthError::Provider(format!("malformed grant response: {e}")))?;
        Ok(ExternalSubject::new(grant.user.id))
    }

    async fn verify(
        &self,
        users: &UserStore,
        email: &str,
        secret: &str,
    ) -> Result<UserRecord, AuthError> {
        if email.is_empty() || secret.is_empty() {
            return Err(AuthError::InvalidCredentials);
        }
        let subject = self.password_grant(email, secret).await?;

        let creds = users
            .get_credentials_by_email(email)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;
        if creds.external_subject.as_ref() != Some(&subject) {
            warn!(user_id = %creds.id, "provider subject does not match linked user");
            return Err(AuthError::InvalidCredentials);
        }
        if !creds.status.is_active() {
            return Err(AuthError::InvalidCredentials);
        }

        users
            .get_user_by_id(&creds.id)
            .await?
            .ok_or(AuthError::InvalidCredentials)
    }

    async fn enroll(&self, users: &UserStore, create: UserCreate) -> Result<UserRecord, AuthError> {
        let url = self.endpoint("auth/v1/admin/users")?;
        let response = self
            .client
            .post(url)
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .json(&json!({
                "email": create.email,
                "password": create.secret,
                "email_confirm": true,
            }))
            .send()
            .await
            .map_err(|e| AuthError::Provider(format!("provider unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Provider(format!(
                "user creation failed with status {status}"
            )));
        }
        let created: ProviderUser = response
            .json()
            .await
            .map_err(|e| AuthError::Provider(format!("malformed user response: {e}")))?;

        Ok(users
            .create_linked_user(create, ExternalSubject::new(created.id))
            .await?)
    }

    async fn change_secret(
        &self,
        users: &UserStore,
        user: &UserRecord,
        current: &str,
        new: &str,
    ) -> Result<(), AuthError> {
        let subject = self.password_grant(&user.email, current).await?;
        if user.external_subject.as_ref() != Some(&subject) {
            return Err(AuthError::InvalidCredentials);
        }
        self.reset_secret(users, user, new).await
    }

    async fn reset_secret(
        &self,
        users: &UserStore,
        user: &UserRecord,
        new: &str,
    ) -> Result<(), AuthError> {
        let subject = user
            .external_subject
            .as_ref()
            .ok_or_else(|| AuthError::Provider("user is not linked to the provider".into()))?;
        let url = self.endpoint(&format!("auth/v1/admin/users/{subject}"))?;

        let response = self
            .client
            .put(url)
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .json(&json!({ "password": new }))
            .send()
            .await
            .map_err(|e| AuthError::Provider(format!("provider unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(AuthError::Provider(format!(
                "secret update failed with status {}",
                response.status()
            )));
        }

        users.mark_credentials_changed(&user.id, None).await?;
        Ok(())
    }
}
