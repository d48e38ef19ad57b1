//! HS256 access and refresh token issuance/verification.

use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthError;
use crate::config::AuthConfig;
use crate::db::schema::{Role, UserRecord};
use crate::types::{TenantId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Claims carried by both token kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user id.
    pub sub: UserId,
    pub role: Role,
    /// Absent only for superadmins.
    pub tenant_id: Option<TenantId>,
    /// Issued-at (Unix seconds).
    pub iat: i64,
    /// Expiration (Unix seconds).
    pub exp: i64,
    pub typ: TokenKind,
    /// The user's session epoch at issue time. Revocation bumps the
    /// stored epoch, so every token carrying an older one stops verifying.
    #[serde(default)]
    pub epoch: u64,
    /// Unique token id, so two tokens minted in the same second differ.
    pub jti: String,
}

/// A freshly minted access/refresh pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: u64,
}

struct KeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_seconds: u64,
}

impl KeyPair {
    fn new(secret: &str, ttl_seconds: u64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl_seconds,
        }
    }
}

/// Stateless signer/verifier for both token kinds.
///
/// Each kind has its own secret, so a token of one kind never verifies
/// as the other.
pub struct TokenService {
    access: KeyPair,
    refresh: KeyPair,
    validation: Validation,
}

impl TokenService {
    pub fn new(config: &AuthConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["sub", "exp", "iat"]);

        Self {
            access: KeyPair::new(&config.access_secret, config.access_ttl_seconds),
            refresh: KeyPair::new(&config.refresh_secret, config.refresh_ttl_seconds),
            validation,
        }
    }

    /// Issue a new access/refresh pair for `user`, stamped with the current
    /// time and the user's current session epoch.
    pub fn issue(&self, user: &UserRecord) -> Result<TokenPair, AuthError> {
        self.issue_at(user, Utc::now().timestamp())
    }

    /// Issue a pair as if minted at `issued_at` (Unix seconds).
    pub fn issue_at(&self, user: &UserRecord, issued_at: i64) -> Result<TokenPair, AuthError> {
        let access_token = self.sign(TokenKind::Access, user, issued_at)?;
        let refresh_token = self.sign(TokenKind::Refresh, user, issued_at)?;
        Ok(TokenPair {
            access_token,
            refresh_token,
            expires_in: self.access.ttl_seconds,
        })
    }

    pub fn verify_access(&self, token: &str) -> Result<Claims, AuthError> {
        self.verify(TokenKind::Access, token)
    }

    /// Verify a refresh token. Only the refresh flow calls this.
    pub fn verify_refresh(&self, token: &str) -> Result<Claims, AuthError> {
        self.verify(TokenKind::Refresh, token)
    }

    fn keys(&self, kind: TokenKind) -> &KeyPair {
        match kind {
            TokenKind::Access => &self.access,
            TokenKind::Refresh => &self.refresh,
        }
    }

    fn sign(&self, kind: TokenKind, user: &UserRecord, issued_at: i64) -> Result<String, AuthError> {
        let keys = self.keys(kind);
        let claims = Claims {
            sub: user.id.clone(),
            role: user.role,
            tenant_id: user.tenant_id.clone(),
            iat: issued_at,
            exp: issued_at + keys.ttl_seconds as i64,
            typ: kind,
            epoch: user.session_epoch,
            jti: Uuid::new_v4().to_string(),
        };

        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &keys.encoding)
            .map_err(|e| AuthError::Signing(format!("JWT encode: {e}")))
    }

    fn verify(&self, kind: TokenKind, token: &str) -> Result<Claims, AuthError> {
        let claims = jsonwebtoken::decode::<Claims>(token, &self.keys(kind).decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
                _ => AuthError::InvalidToken(e.to_string()),
            })?;

        if claims.typ != kind {
            return Err(AuthError::InvalidToken("wrong token kind".to_string()));
        }
        Ok(claims)
    }
}
