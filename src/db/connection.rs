use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::Root;
use surrealdb::Surreal;

pub type Db = Surreal<Any>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub namespace: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: env::var("SURREALDB_URL")
                .unwrap_or_else(|_| "memory".to_string()),
            namespace: env::var("SURREALDB_NAMESPACE")
                .unwrap_or_else(|_| "tenant_agents".to_string()),
            database: env::var("SURREALDB_DATABASE")
                .unwrap_or_else(|_| "backend".to_string()),
            username: env::var("SURREALDB_USERNAME").ok(),
            password: env::var("SURREALDB_PASSWORD").ok(),
        }
    }
}

pub async fn create_connection(config: DatabaseConfig) -> Result<Db> {
    let db = surrealdb::engine::any::connect(config.url).await?;

    // Sign in if credentials are provided
    if let (Some(username), Some(password)) = (config.username, config.password) {
        db.signin(Root {
            username: &username,
            password: &password,
        })
        .await?;
    }

    db.use_ns(config.namespace).use_db(config.database).await?;

    Ok(db)
}

pub async fn ensure_schema(db: &Db) -> Result<()> {
    let schema_queries = [
        // Tenants
        "DEFINE TABLE IF NOT EXISTS tenant SCHEMALESS;
         DEFINE INDEX IF NOT EXISTS tenant_email ON TABLE tenant COLUMNS email UNIQUE;
         DEFINE INDEX IF NOT EXISTS tenant_status ON TABLE tenant COLUMNS status;",

        // Users; secret_hash is only read by the credential projection
        "DEFINE TABLE IF NOT EXISTS user SCHEMALESS;
         DEFINE INDEX IF NOT EXISTS user_email ON TABLE user COLUMNS email UNIQUE;
         DEFINE INDEX IF NOT EXISTS user_tenant ON TABLE user COLUMNS tenant_id;",

        // Agents
        "DEFINE TABLE IF NOT EXISTS agent SCHEMALESS;
         DEFINE INDEX IF NOT EXISTS agent_key_hash ON TABLE agent COLUMNS api_key_hash UNIQUE;
         DEFINE INDEX IF NOT EXISTS agent_tenant ON TABLE agent COLUMNS tenant_id;",

        // Conversations
        "DEFINE TABLE IF NOT EXISTS conversation SCHEMALESS;
         DEFINE INDEX IF NOT EXISTS conversation_agent ON TABLE conversation COLUMNS agent_id;
         DEFINE INDEX IF NOT EXISTS conversation_tenant ON TABLE conversation COLUMNS tenant_id;",
    ];

    for query in schema_queries {
        db.query(query).await?.check()?;
    }

    Ok(())
}
