//! User storage and credential lifecycle.

use anyhow::{Result, anyhow};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use surrealdb::sql::Datetime;

use crate::auth::access::TenantScope;
use crate::auth::password::hash_secret_blocking;
use crate::db::Db;
use crate::db::queries::PageRequest;
use crate::db::schema::{
    Role, Status, UserCreate, UserCredentials, UserRecord, UserUpdate, normalize_email,
};
use crate::types::{ExternalSubject, TenantId, UserId};

/// Default projection: everything except the secret hash.
const USER: &str = "*, record::id(id) AS id OMIT secret_hash";

#[derive(Debug, Deserialize)]
struct CountRow {
    total: u64,
}

#[derive(Debug, Deserialize)]
struct EpochRow {
    session_epoch: u64,
}

#[derive(Debug, Serialize)]
struct UserContent {
    tenant_id: Option<TenantId>,
    name: String,
    email: String,
    secret_hash: Option<String>,
    role: Role,
    status: Status,
    external_subject: Option<ExternalSubject>,
    last_access_at: Option<Datetime>,
    credentials_changed_at: Datetime,
    session_epoch: u64,
    created_at: Datetime,
    updated_at: Datetime,
}

/// User store for database operations.
#[derive(Clone)]
pub struct UserStore {
    db: Db,
}

impl UserStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Create a user whose secret is verified locally.
    ///
    /// The plaintext is hashed on the blocking pool before anything is
    /// written; a hashing failure aborts the insert.
    pub async fn create_user(&self, create: UserCreate) -> Result<UserRecord> {
        let secret_hash = hash_secret_blocking(create.secret.clone()).await?;
        self.insert(create, Some(secret_hash), None).await
    }

    /// Create a user whose secret lives with an external identity provider.
    pub async fn create_linked_user(
        &self,
        create: UserCreate,
        subject: ExternalSubject,
    ) -> Result<UserRecord> {
        self.insert(create, None, Some(subject)).await
    }

    async fn insert(
        &self,
        create: UserCreate,
        secret_hash: Option<String>,
        external_subject: Option<ExternalSubject>,
    ) -> Result<UserRecord> {
        let id = UserId::generate();
        let now = Datetime::from(Utc::now());
        let content = UserContent {
            tenant_id: create.tenant_id,
            name: create.name.trim().to_string(),
            email: normalize_email(&create.email),
            secret_hash,
            role: create.role,
            status: Status::Active,
            external_subject,
            last_access_at: None,
            credentials_changed_at: now.clone(),
            session_epoch: 0,
            created_at: now.clone(),
            updated_at: now,
        };

        self.db
            .query("CREATE type::thing('user', $id) CONTENT $content RETURN NONE")
            .bind(("id", id.as_str().to_string()))
            .bind(("content", content))
            .await?
            .check()?;

        self.get_user_by_id(&id)
            .await?
            .ok_or_else(|| anyhow!("Failed to create user"))
    }

    /// Get a user by database ID.
    pub async fn get_user_by_id(&self, user_id: &UserId) -> Result<Option<UserRecord>> {
        let query = format!("SELECT {USER} FROM type::thing('user', $id)");

        let mut res = self
            .db
            .query(query)
            .bind(("id", user_id.as_str().to_string()))
            .await?;

        let users: Vec<UserRecord> = res.take(0)?;
        Ok(users.into_iter().next())
    }

    /// Get a user by ID, restricted to `scope`.
    pub async fn get_user_scoped(
        &self,
        scope: &TenantScope,
        user_id: &UserId,
    ) -> Result<Option<UserRecord>> {
        let query = match scope.condition("tenant_id") {
            Some(cond) => format!("SELECT {USER} FROM type::thing('user', $id) WHERE {cond}"),
            None => format!("SELECT {USER} FROM type::thing('user', $id)"),
        };

        let mut res = self
            .db
            .query(query)
            .bind(("id", user_id.as_str().to_string()))
            .bind(("scope_tenant", scope.bind_value()))
            .await?;

        let users: Vec<UserRecord> = res.take(0)?;
        Ok(users.into_iter().next())
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let query = format!("SELECT {USER} FROM user WHERE email = $email LIMIT 1");

        let mut res = self
            .db
            .query(query)
            .bind(("email", normalize_email(email)))
            .await?;

        let users: Vec<UserRecord> = res.take(0)?;
        Ok(users.into_iter().next())
    }

    /// Load the secret hash for the login comparison step.
    ///
    /// This is the only read that includes `secret_hash`.
    pub async fn get_credentials_by_email(&self, email: &str) -> Result<Option<UserCredentials>> {
        let query = r#"
            SELECT record::id(id) AS id, status, secret_hash, external_subject
            FROM user
            WHERE email = $email
            LIMIT 1
        "#;

        let mut res = self
            .db
            .query(query)
            .bind(("email", normalize_email(email)))
            .await?;

        let creds: Vec<UserCredentials> = res.take(0)?;
        Ok(creds.into_iter().next())
    }

    pub async fn get_credentials_by_id(&self, user_id: &UserId) -> Result<Option<UserCredentials>> {
        let query = r#"
            SELECT record::id(id) AS id, status, secret_hash, external_subject
            FROM type::thing('user', $id)
        "#;

        let mut res = self
            .db
            .query(query)
            .bind(("id", user_id.as_str().to_string()))
            .await?;

        let creds: Vec<UserCredentials> = res.take(0)?;
        Ok(creds.into_iter().next())
    }

    /// Replace a user's secret.
    ///
    /// Re-hashes, stamps `credentials_changed_at` and bumps the session
    /// epoch so every token issued so far stops working.
    pub async fn set_secret(&self, user_id: &UserId, plaintext: &str) -> Result<()> {
        let secret_hash = hash_secret_blocking(plaintext.to_string()).await?;
        self.mark_credentials_changed(user_id, Some(secret_hash)).await
    }

    /// Record a credential change held by an external provider.
    pub async fn mark_credentials_changed(
        &self,
        user_id: &UserId,
        secret_hash: Option<String>,
    ) -> Result<()> {
        let query = match secret_hash {
            Some(_) => {
                r#"
                UPDATE type::thing('user', $id) SET
                    secret_hash = $hash,
                    credentials_changed_at = time::now(),
                    session_epoch = (session_epoch ?? 0) + 1,
                    updated_at = time::now()
                RETURN NONE
            "#
            }
            None => {
                r#"
                UPDATE type::thing('user', $id) SET
                    credentials_changed_at = time::now(),
                    session_epoch = (session_epoch ?? 0) + 1,
                    updated_at = time::now()
                RETURN NONE
            "#
            }
        };

        self.db
            .query(query)
            .bind(("id", user_id.as_str().to_string()))
            .bind(("hash", secret_hash))
            .await?
            .check()?;

        Ok(())
    }

    /// Revoke every token issued to the user so far.
    ///
    /// Returns the new session epoch; tokens minted from now on carry it.
    pub async fn revoke_sessions(&self, user_id: &UserId) -> Result<u64> {
        let query = r#"
            UPDATE type::thing('user', $id) SET
                session_epoch = (session_epoch ?? 0) + 1,
                updated_at = time::now()
            RETURN session_epoch
        "#;

        let mut res = self
            .db
            .query(query)
            .bind(("id", user_id.as_str().to_string()))
            .await?;

        let rows: Vec<EpochRow> = res.take(0)?;
        rows.into_iter()
            .next()
            .map(|row| row.session_epoch)
            .ok_or_else(|| anyhow!("user {user_id} not found"))
    }

    /// Update user's last_access_at timestamp.
    pub async fn touch_last_access(&self, user_id: &UserId) -> Result<()> {
        self.db
            .query("UPDATE type::thing('user', $id) SET last_access_at = time::now() RETURN NONE")
            .bind(("id", user_id.as_str().to_string()))
            .await?
            .check()?;

        Ok(())
    }

    /// List users within `scope`, optionally narrowed to one tenant.
    pub async fn list_users(
        &self,
        scope: &TenantScope,
        tenant: Option<&TenantId>,
        active_only: bool,
        page: PageRequest,
    ) -> Result<(Vec<UserRecord>, u64)> {
        let mut conditions: Vec<String> = scope.condition("tenant_id").into_iter().collect();
        if tenant.is_some() {
            conditions.push("tenant_id = $filter_tenant".to_string());
        }
        if active_only {
            conditions.push("status = 'active'".to_string());
        }
        let clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };

        let query = format!(
            "SELECT {USER} FROM user{clause} ORDER BY created_at DESC LIMIT $limit START $start;
             SELECT count() AS total FROM user{clause} GROUP ALL;"
        );

        let mut res = self
            .db
            .query(query)
            .bind(("scope_tenant", scope.bind_value()))
            .bind(("filter_tenant", tenant.map(|t| t.as_str().to_string())))
            .bind(("limit", page.limit))
            .bind(("start", page.start()))
            .await?;

        let users: Vec<UserRecord> = res.take(0)?;
        let total: Vec<CountRow> = res.take(1)?;
        Ok((users, total.first().map(|r| r.total).unwrap_or(0)))
    }

    /// Apply a partial update within `scope`.
    pub async fn update_user(
        &self,
        scope: &TenantScope,
        user_id: &UserId,
        mut update: UserUpdate,
    ) -> Result<Option<UserRecord>> {
        if let Some(email) = update.email.take() {
            update.email = Some(normalize_email(&email));
        }
        let filter = scope
            .condition("tenant_id")
            .map(|c| format!(" WHERE {c}"))
            .unwrap_or_default();
        let query = format!(
            "UPDATE type::thing('user', $id) MERGE $patch{filter} RETURN NONE;
             UPDATE type::thing('user', $id) SET updated_at = time::now(){filter} RETURN NONE;"
        );

        self.db
            .query(query)
            .bind(("id", user_id.as_str().to_string()))
            .bind(("patch", update))
            .bind(("scope_tenant", scope.bind_value()))
            .await?
            .check()?;

        self.get_user_scoped(scope, user_id).await
    }

    /// Deactivate a user account.
    pub async fn deactivate_user(&self, user_id: &UserId) -> Result<()> {
        let query = r#"
            UPDATE type::thing('user', $id) SET
                status = 'inactive',
                updated_at = time::now()
            RETURN NONE
        "#;

        self.db
            .query(query)
            .bind(("id", user_id.as_str().to_string()))
            .await?
            .check()?;

        Ok(())
    }

    pub async fn delete_user(&self, user_id: &UserId) -> Result<()> {
        self.db
            .query("DELETE type::thing('user', $id)")
            .bind(("id", user_id.as_str().to_string()))
            .await?
            .check()?;

        Ok(())
    }

    /// Count users (any status) belonging to a tenant.
    pub async fn count_users(&self, tenant: &TenantId) -> Result<u64> {
        let mut res = self
            .db
            .query("SELECT count() AS total FROM user WHERE tenant_id = $tenant GROUP ALL")
            .bind(("tenant", tenant.as_str().to_string()))
            .await?;

        let rows: Vec<CountRow> = res.take(0)?;
        Ok(rows.first().map(|r| r.total).unwrap_or(0))
    }

    pub async fn any_superadmin(&self) -> Result<bool> {
        let mut res = self
            .db
            .query("SELECT count() AS total FROM user WHERE role = 'superadmin' GROUP ALL")
            .await?;

        let rows: Vec<CountRow> = res.take(0)?;
        Ok(rows.first().map(|r| r.total).unwrap_or(0) > 0)
    }
}
