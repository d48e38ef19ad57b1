//! Runtime configuration, loaded once at startup and shared immutably.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default access token lifetime: 15 minutes.
pub const DEFAULT_ACCESS_TTL_SECONDS: u64 = 15 * 60;

/// Default refresh token lifetime: 7 days.
pub const DEFAULT_REFRESH_TTL_SECONDS: u64 = 7 * 24 * 60 * 60;

/// Header carrying the raw agent API key on machine routes.
pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("access token secret must not be empty")]
    EmptyAccessSecret,
    #[error("refresh token secret must not be empty")]
    EmptyRefreshSecret,
    #[error("access and refresh token secrets must differ")]
    SharedSecret,
    #[error("token lifetimes must be positive")]
    ZeroLifetime,
    #[error("external identity provider requires a base url: {0}")]
    InvalidProviderUrl(String),
}

/// How much internal detail error responses carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Posture {
    Development,
    #[default]
    Production,
}

impl Posture {
    pub fn is_development(self) -> bool {
        matches!(self, Posture::Development)
    }
}

impl std::str::FromStr for Posture {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Posture::Development),
            "production" | "prod" => Ok(Posture::Production),
            other => Err(format!("unknown posture `{other}`")),
        }
    }
}

/// Which credential verifier backs login and secret changes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VerifierConfig {
    /// Argon2id hashes kept on the user record.
    #[default]
    Local,
    /// A GoTrue-compatible identity provider holds the credentials.
    External {
        base_url: String,
        service_key: String,
    },
}

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret for access tokens
    pub access_secret: String,
    /// HMAC secret for refresh tokens; must differ from `access_secret`
    pub refresh_secret: String,
    /// Access token lifetime in seconds (default: 900)
    #[serde(default = "default_access_ttl")]
    pub access_ttl_seconds: u64,
    /// Refresh token lifetime in seconds (default: 604800)
    #[serde(default = "default_refresh_ttl")]
    pub refresh_ttl_seconds: u64,
    /// Reject tokens minted under an older session epoch than the user's
    #[serde(default = "default_stale_session_check")]
    pub stale_session_check: bool,
    #[serde(default)]
    pub verifier: VerifierConfig,
}

fn default_access_ttl() -> u64 {
    DEFAULT_ACCESS_TTL_SECONDS
}

fn default_refresh_ttl() -> u64 {
    DEFAULT_REFRESH_TTL_SECONDS
}

fn default_stale_session_check() -> bool {
    true
}

impl AuthConfig {
    /// Create a config with local hashing and default lifetimes.
    pub fn new(access_secret: impl Into<String>, refresh_secret: impl Into<String>) -> Self {
        Self {
            access_secret: access_secret.into(),
            refresh_secret: refresh_secret.into(),
            access_ttl_seconds: DEFAULT_ACCESS_TTL_SECONDS,
            refresh_ttl_seconds: DEFAULT_REFRESH_TTL_SECONDS,
            stale_session_check: true,
            verifier: VerifierConfig::Local,
        }
    }

    pub fn with_verifier(mut self, verifier: VerifierConfig) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_stale_session_check(mut self, enabled: bool) -> Self {
        self.stale_session_check = enabled;
        self
    }

    /// Reject configurations that would make tokens forgeable or unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.access_secret.is_empty() {
            return Err(ConfigError::EmptyAccessSecret);
        }
        if self.refresh_secret.is_empty() {
            return Err(ConfigError::EmptyRefreshSecret);
        }
        if self.access_secret == self.refresh_secret {
            return Err(ConfigError::SharedSecret);
        }
        if self.access_ttl_seconds == 0 || self.refresh_ttl_seconds == 0 {
            return Err(ConfigError::ZeroLifetime);
        }
        if let VerifierConfig::External { base_url, .. } = &self.verifier {
            url::Url::parse(base_url)
                .map_err(|e| ConfigError::InvalidProviderUrl(format!("{base_url}: {e}")))?;
        }
        Ok(())
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub auth: AuthConfig,
    #[serde(default)]
    pub posture: Posture,
}

impl AppConfig {
    pub fn new(auth: AuthConfig) -> Self {
        Self {
            auth,
            posture: Posture::default(),
        }
    }

    pub fn with_posture(mut self, posture: Posture) -> Self {
        self.posture = posture;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.auth.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_config_defaults() {
        let config = AuthConfig::new("a", "b");
        assert_eq!(config.access_ttl_seconds, 900);
        assert_eq!(config.refresh_ttl_seconds, 604_800);
        assert!(config.stale_session_check);
        assert_eq!(config.verifier, VerifierConfig::Local);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_shared_secret() {
        let config = AuthConfig::new("same", "same");
        assert_eq!(config.validate(), Err(ConfigError::SharedSecret));
    }

    #[test]
    fn test_validate_rejects_empty_secrets() {
        assert_eq!(
            AuthConfig::new("", "b").validate(),
            Err(ConfigError::EmptyAccessSecret)
        );
        assert_eq!(
            AuthConfig::new("a", "").validate(),
            Err(ConfigError::EmptyRefreshSecret)
        );
    }

    #[test]
    fn test_validate_rejects_bad_provider_url() {
        let config = AuthConfig::new("a", "b").with_verifier(VerifierConfig::External {
            base_url: "not a url".to_string(),
            service_key: "k".to_string(),
        });
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidProviderUrl(_))
        ));
    }

    #[test]
    fn test_auth_config_deserialization_fills_defaults() {
        let json = r#"{ "access_secret": "a", "refresh_secret": "b" }"#;
        let config: AuthConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.access_ttl_seconds, DEFAULT_ACCESS_TTL_SECONDS);
        assert!(config.stale_session_check);
        assert_eq!(config.verifier, VerifierConfig::Local);
    }

    #[test]
    fn test_posture_parsing() {
        assert_eq!("dev".parse::<Posture>(), Ok(Posture::Development));
        assert_eq!("Production".parse::<Posture>(), Ok(Posture::Production));
        assert!("staging".parse::<Posture>().is_err());
        assert_eq!(Posture::default(), Posture::Production);
    }
}
