use std::sync::Arc;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use tenant_agents::auth::UserStore;
use tenant_agents::db::schema::{Role, UserCreate, is_valid_email};
use tenant_agents::{
    AppConfig, AuthConfig, Backend, CredentialVerifier, DatabaseConfig, Posture, VerifierConfig,
    create_connection, ensure_schema,
};
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tenant-agents")]
#[command(about = "Multi-tenant AI agent configuration backend")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API
    Serve {
        /// Bind address, e.g. 0.0.0.0:3000
        #[arg(long, env = "BIND_ADDRESS", default_value = "0.0.0.0:3000")]
        bind: String,
        #[arg(long, env = "SURREALDB_URL", default_value = "memory")]
        db_url: String,
        /// HS256 secret for access tokens
        #[arg(long, env = "ACCESS_TOKEN_SECRET", hide_env_values = true)]
        access_secret: String,
        /// HS256 secret for refresh tokens; must differ from the access secret
        #[arg(long, env = "REFRESH_TOKEN_SECRET", hide_env_values = true)]
        refresh_secret: String,
        #[arg(long, env = "ACCESS_TOKEN_TTL", default_value_t = tenant_agents::config::DEFAULT_ACCESS_TTL_SECONDS)]
        access_ttl: u64,
        #[arg(long, env = "REFRESH_TOKEN_TTL", default_value_t = tenant_agents::config::DEFAULT_REFRESH_TTL_SECONDS)]
        refresh_ttl: u64,
        /// development exposes internal error detail in responses
        #[arg(long, env = "APP_POSTURE", default_value = "production")]
        posture: Posture,
        /// Base URL of a GoTrue-compatible identity provider; enables
        /// external credential verification
        #[arg(long, env = "AUTH_PROVIDER_URL")]
        provider_url: Option<String>,
        #[arg(long, env = "AUTH_PROVIDER_SERVICE_KEY", hide_env_values = true)]
        provider_key: Option<String>,
        /// Accept tokens issued before the user's last secret change or logout
        #[arg(long, default_value_t = false)]
        no_stale_session_check: bool,
    },
    /// Initialize the database
    Init {
        #[arg(long, env = "SURREALDB_URL", default_value = "memory")]
        db_url: String,
    },
    /// Create the first superadmin account
    CreateSuperadmin {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long, env = "SUPERADMIN_SECRET", hide_env_values = true)]
        secret: String,
        #[arg(long, env = "SURREALDB_URL", default_value = "memory")]
        db_url: String,
        /// Enrol with this identity provider instead of a local hash; must
        /// match what `serve` runs with
        #[arg(long, env = "AUTH_PROVIDER_URL")]
        provider_url: Option<String>,
        #[arg(long, env = "AUTH_PROVIDER_SERVICE_KEY", hide_env_values = true)]
        provider_key: Option<String>,
    },
}

fn verifier_config(url: Option<String>, key: Option<String>) -> Result<VerifierConfig> {
    match (url, key) {
        (None, _) => Ok(VerifierConfig::Local),
        (Some(base_url), Some(service_key)) => Ok(VerifierConfig::External {
            base_url,
            service_key,
        }),
        (Some(_), None) => bail!("--provider-key is required with --provider-url"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("tenant_agents=info".parse()?)
                .add_directive("tower_http=info".parse()?),
        )
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            bind,
            db_url,
            access_secret,
            refresh_secret,
            access_ttl,
            refresh_ttl,
            posture,
            provider_url,
            provider_key,
            no_stale_session_check,
        } => {
            let mut auth = AuthConfig::new(access_secret, refresh_secret)
                .with_stale_session_check(!no_stale_session_check)
                .with_verifier(verifier_config(provider_url, provider_key)?);
            auth.access_ttl_seconds = access_ttl;
            auth.refresh_ttl_seconds = refresh_ttl;
            let config = AppConfig::new(auth).with_posture(posture);

            let db_config = DatabaseConfig {
                url: db_url,
                ..Default::default()
            };
            info!("Using database url: {}", db_config.url);

            let db = create_connection(db_config).await?;
            ensure_schema(&db).await?;
            let backend = Arc::new(Backend::new(config, db)?);
            let app = tenant_agents::api::create_router(backend);

            let listener = tokio::net::TcpListener::bind(&bind).await?;
            info!("Server listening on http://{}", bind);
            axum::serve(listener, app).await?;
        }
        Commands::Init { db_url } => {
            let db_config = DatabaseConfig {
                url: db_url,
                ..Default::default()
            };
            info!("Using database url for initialization: {}", db_config.url);

            info!("Initializing database...");
            let db = create_connection(db_config).await?;
            ensure_schema(&db).await?;
            info!("Database initialized successfully");
        }
        Commands::CreateSuperadmin {
            name,
            email,
            secret,
            db_url,
            provider_url,
            provider_key,
        } => {
            let email = email.trim().to_lowercase();
            if !is_valid_email(&email) {
                bail!("invalid email address: {email}");
            }

            let db_config = DatabaseConfig {
                url: db_url,
                ..Default::default()
            };
            let db = create_connection(db_config).await?;
            ensure_schema(&db).await?;

            let users = UserStore::new(db);
            if users.get_user_by_email(&email).await?.is_some() {
                bail!("a user with email {email} already exists");
            }
            if users.any_superadmin().await? {
                info!("A superadmin already exists; creating an additional one");
            }

            let verifier = CredentialVerifier::from_config(&verifier_config(provider_url, provider_key)?)?;
            info!("Enrolling with the {} verifier", verifier.name());
            let user = verifier
                .enroll(
                    &users,
                    UserCreate {
                        tenant_id: None,
                        name,
                        email,
                        secret,
                        role: Role::Superadmin,
                    },
                )
                .await?;

            println!("\nSuperadmin created:");
            println!("  ID:    {}", user.id);
            println!("  Email: {}", user.email);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verifier_config_from_flags() {
        assert_eq!(verifier_config(None, None).unwrap(), VerifierConfig::Local);
        assert_eq!(
            verifier_config(Some("https://id.example".into()), Some("svc".into())).unwrap(),
            VerifierConfig::External {
                base_url: "https://id.example".to_string(),
                service_key: "svc".to_string(),
            }
        );
        assert!(verifier_config(Some("https://id.example".into()), None).is_err());
    }

    #[test]
    fn test_create_superadmin_accepts_provider_flags() {
        let cli = Cli::try_parse_from([
            "tenant-agents",
            "create-superadmin",
            "--name",
            "Root",
            "--email",
            "root@platform.test",
            "--secret",
            "rootsecret",
            "--provider-url",
            "https://id.example",
            "--provider-key",
            "svc",
        ])
        .unwrap();
        let Commands::CreateSuperadmin {
            provider_url,
            provider_key,
            ..
        } = cli.command
        else {
            panic!("expected create-superadmin");
        };
        let config = verifier_config(provider_url, provider_key).unwrap();
        assert!(matches!(config, VerifierConfig::External { .. }));
    }
}
