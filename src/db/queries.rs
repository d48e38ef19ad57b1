// Database query helpers for SurrealDB.
//
// Every lookup of a tenant-owned record takes a `TenantScope` and folds it
// into the WHERE clause, so records outside the caller's tenant never come
// back from the database at all.

use crate::auth::access::TenantScope;
use crate::db::schema::*;
use crate::types::{AgentId, ApiKeyHash, ApiKeyPrefix, ConversationId, TenantId};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use surrealdb::sql::Datetime;
use surrealdb::{engine::any::Any, Surreal};

/// Projection used for every record read: the table key as a plain string id.
const RECORD: &str = "*, record::id(id) AS id";

#[derive(Debug, Deserialize)]
struct CountRow {
    total: u64,
}

/// Page of results requested by a list endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// 1-based page number.
    pub page: u32,
    pub limit: u32,
}

impl PageRequest {
    pub const MAX_LIMIT: u32 = 100;

    pub fn new(page: Option<u32>, limit: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(10).clamp(1, Self::MAX_LIMIT),
        }
    }

    pub fn start(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// Filters for agent listings.
#[derive(Debug, Clone, Default)]
pub struct AgentFilter {
    /// Case-insensitive substring of the agent name.
    pub search: Option<String>,
    pub active: Option<bool>,
    /// Restrict a superadmin listing to one tenant.
    pub tenant: Option<TenantId>,
}

#[derive(Debug, Serialize)]
struct TenantContent {
    name: String,
    email: String,
    phone: Option<String>,
    registry_number: Option<String>,
    status: Status,
    max_agents: u32,
    notes: Option<String>,
    created_at: Datetime,
    updated_at: Datetime,
}

#[derive(Debug, Serialize)]
struct AgentContent {
    tenant_id: TenantId,
    name: String,
    description: Option<String>,
    base_prompt: String,
    instructions: Option<String>,
    settings: AgentSettings,
    active: bool,
    whatsapp_number: Option<String>,
    api_key_hash: ApiKeyHash,
    api_key_prefix: ApiKeyPrefix,
    stats: AgentStats,
    created_at: Datetime,
    updated_at: Datetime,
}

/// Fields written when a conversation is opened.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationCreate {
    pub agent_id: AgentId,
    pub tenant_id: TenantId,
    pub customer_id: String,
    pub customer_name: Option<String>,
    pub channel: Channel,
}

#[derive(Debug, Serialize)]
struct ConversationContent {
    agent_id: AgentId,
    tenant_id: TenantId,
    customer_id: String,
    customer_name: Option<String>,
    channel: Channel,
    status: ConversationStatus,
    messages: Vec<Message>,
    total_messages: u64,
    total_tokens: u64,
    created_at: Datetime,
    updated_at: Datetime,
}

fn where_clause(conditions: &[String]) -> String {
    if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    }
}

fn now() -> Datetime {
    Datetime::from(chrono::Utc::now())
}

fn first_count(rows: Vec<CountRow>) -> u64 {
    rows.first().map(|r| r.total).unwrap_or(0)
}

pub struct QueryBuilder;

impl QueryBuilder {
    // ---- tenants ----------------------------------------------------------

    /// Insert a new tenant. The email is expected to be normalised already.
    pub async fn create_tenant(db: &Surreal<Any>, data: &TenantCreate) -> Result<TenantRecord> {
        let id = TenantId::generate();
        let content = TenantContent {
            name: data.name.clone(),
            email: data.email.clone(),
            phone: data.phone.clone(),
            registry_number: data.registry_number.clone(),
            status: Status::Active,
            max_agents: data.max_agents,
            notes: data.notes.clone(),
            created_at: now(),
            updated_at: now(),
        };

        db.query("CREATE type::thing('tenant', $id) CONTENT $content RETURN NONE")
            .bind(("id", id.as_str().to_string()))
            .bind(("content", content))
            .await?
            .check()?;

        Self::find_tenant(db, &TenantScope::All, &id)
            .await?
            .ok_or_else(|| anyhow!("failed to create tenant record"))
    }

    /// Fetch a tenant by id, restricted to `scope`.
    pub async fn find_tenant(
        db: &Surreal<Any>,
        scope: &TenantScope,
        id: &TenantId,
    ) -> Result<Option<TenantRecord>> {
        let conditions: Vec<String> = scope.condition("record::id(id)").into_iter().collect();
        let query = format!(
            "SELECT {RECORD} FROM type::thing('tenant', $id){}",
            where_clause(&conditions)
        );

        let mut res = db
            .query(query)
            .bind(("id", id.as_str().to_string()))
            .bind(("scope_tenant", scope.bind_value()))
            .await?;

        let tenants: Vec<TenantRecord> = res.take(0)?;
        Ok(tenants.into_iter().next())
    }

    pub async fn find_tenant_by_email(
        db: &Surreal<Any>,
        email: &str,
    ) -> Result<Option<TenantRecord>> {
        let mut res = db
            .query(format!("SELECT {RECORD} FROM tenant WHERE email = $email LIMIT 1"))
            .bind(("email", email.to_string()))
            .await?;

        let tenants: Vec<TenantRecord> = res.take(0)?;
        Ok(tenants.into_iter().next())
    }

    pub async fn find_tenant_by_registry_number(
        db: &Surreal<Any>,
        number: &str,
    ) -> Result<Option<TenantRecord>> {
        let mut res = db
            .query(format!(
                "SELECT {RECORD} FROM tenant WHERE registry_number = $number LIMIT 1"
            ))
            .bind(("number", number.to_string()))
            .await?;

        let tenants: Vec<TenantRecord> = res.take(0)?;
        Ok(tenants.into_iter().next())
    }

    /// List tenants, newest first, with an optional name search.
    pub async fn list_tenants(
        db: &Surreal<Any>,
        search: Option<&str>,
        status: Option<Status>,
        page: PageRequest,
    ) -> Result<(Vec<TenantRecord>, u64)> {
        let mut conditions = Vec::new();
        if search.is_some() {
            conditions.push(
                "string::contains(string::lowercase(name), $search)".to_string(),
            );
        }
        if status.is_some() {
            conditions.push("status = $status".to_string());
        }
        let filter = where_clause(&conditions);

        let query = format!(
            "SELECT {RECORD} FROM tenant{filter} ORDER BY created_at DESC LIMIT $limit START $start;
             SELECT count() AS total FROM tenant{filter} GROUP ALL;"
        );

        let mut res = db
            .query(query)
            .bind(("search", search.map(|s| s.to_lowercase())))
            .bind(("status", status))
            .bind(("limit", page.limit))
            .bind(("start", page.start()))
            .await?;

        let tenants: Vec<TenantRecord> = res.take(0)?;
        let total: Vec<CountRow> = res.take(1)?;
        Ok((tenants, first_count(total)))
    }

    /// Apply a partial update to a tenant within `scope`.
    pub async fn update_tenant(
        db: &Surreal<Any>,
        scope: &TenantScope,
        id: &TenantId,
        update: TenantUpdate,
    ) -> Result<Option<TenantRecord>> {
        let conditions: Vec<String> = scope.condition("record::id(id)").into_iter().collect();
        let filter = where_clause(&conditions);
        let query = format!(
            "UPDATE type::thing('tenant', $id) MERGE $patch{filter} RETURN NONE;
             UPDATE type::thing('tenant', $id) SET updated_at = time::now(){filter} RETURN NONE;"
        );

        db.query(query)
            .bind(("id", id.as_str().to_string()))
            .bind(("patch", update))
            .bind(("scope_tenant", scope.bind_value()))
            .await?
            .check()?;

        Self::find_tenant(db, scope, id).await
    }

    pub async fn delete_tenant(db: &Surreal<Any>, id: &TenantId) -> Result<()> {
        db.query("DELETE type::thing('tenant', $id)")
            .bind(("id", id.as_str().to_string()))
            .await?
            .check()?;
        Ok(())
    }

    /// User and agent counters for one tenant.
    pub async fn tenant_stats(db: &Surreal<Any>, id: &TenantId) -> Result<TenantStats> {
        let query = r#"
            SELECT count() AS total FROM user WHERE tenant_id = $tenant AND status = 'active' GROUP ALL;
            SELECT count() AS total FROM agent WHERE tenant_id = $tenant GROUP ALL;
            SELECT count() AS total FROM agent WHERE tenant_id = $tenant AND active = true GROUP ALL;
        "#;

        let mut res = db
            .query(query)
            .bind(("tenant", id.as_str().to_string()))
            .await?;

        let users: Vec<CountRow> = res.take(0)?;
        let agents: Vec<CountRow> = res.take(1)?;
        let active: Vec<CountRow> = res.take(2)?;
        Ok(TenantStats {
            users: first_count(users),
            agents: first_count(agents),
            active_agents: first_count(active),
        })
    }

    // ---- agents -----------------------------------------------------------

    /// Insert a new agent owned by `tenant` with the given key digest.
    pub async fn create_agent(
        db: &Surreal<Any>,
        tenant: &TenantId,
        input: AgentInput,
        key_hash: ApiKeyHash,
        key_prefix: ApiKeyPrefix,
    ) -> Result<AgentRecord> {
        let id = AgentId::generate();
        let content = AgentContent {
            tenant_id: tenant.clone(),
            name: input.name,
            description: input.description,
            base_prompt: input.base_prompt,
            instructions: input.instructions,
            settings: input.settings,
            active: input.active,
            whatsapp_number: input.whatsapp_number,
            api_key_hash: key_hash,
            api_key_prefix: key_prefix,
            stats: AgentStats::default(),
            created_at: now(),
            updated_at: now(),
        };

        db.query("CREATE type::thing('agent', $id) CONTENT $content RETURN NONE")
            .bind(("id", id.as_str().to_string()))
            .bind(("content", content))
            .await?
            .check()?;

        Self::find_agent(db, &TenantScope::All, &id)
            .await?
            .ok_or_else(|| anyhow!("failed to create agent record"))
    }

    /// Fetch an agent by id, restricted to `scope`.
    pub async fn find_agent(
        db: &Surreal<Any>,
        scope: &TenantScope,
        id: &AgentId,
    ) -> Result<Option<AgentRecord>> {
        let conditions: Vec<String> = scope.condition("tenant_id").into_iter().collect();
        let query = format!(
            "SELECT {RECORD} FROM type::thing('agent', $id){}",
            where_clause(&conditions)
        );

        let mut res = db
            .query(query)
            .bind(("id", id.as_str().to_string()))
            .bind(("scope_tenant", scope.bind_value()))
            .await?;

        let agents: Vec<AgentRecord> = res.take(0)?;
        Ok(agents.into_iter().next())
    }

    /// Look up the agent holding the key with this digest.
    pub async fn find_agent_by_key_hash(
        db: &Surreal<Any>,
        key_hash: &ApiKeyHash,
    ) -> Result<Option<AgentRecord>> {
        let mut res = db
            .query(format!(
                "SELECT {RECORD} FROM agent WHERE api_key_hash = $hash LIMIT 1"
            ))
            .bind(("hash", key_hash.as_str().to_string()))
            .await?;

        let agents: Vec<AgentRecord> = res.take(0)?;
        Ok(agents.into_iter().next())
    }

    pub async fn list_agents(
        db: &Surreal<Any>,
        scope: &TenantScope,
        filter: &AgentFilter,
        page: PageRequest,
    ) -> Result<(Vec<AgentRecord>, u64)> {
        let mut conditions: Vec<String> = scope.condition("tenant_id").into_iter().collect();
        if filter.tenant.is_some() {
            conditions.push("tenant_id = $filter_tenant".to_string());
        }
        if filter.search.is_some() {
            conditions.push(
                "string::contains(string::lowercase(name), $search)".to_string(),
            );
        }
        if filter.active.is_some() {
            conditions.push("active = $active".to_string());
        }
        let clause = where_clause(&conditions);

        let query = format!(
            "SELECT {RECORD} FROM agent{clause} ORDER BY created_at DESC LIMIT $limit START $start;
             SELECT count() AS total FROM agent{clause} GROUP ALL;"
        );

        let mut res = db
            .query(query)
            .bind(("scope_tenant", scope.bind_value()))
            .bind((
                "filter_tenant",
                filter.tenant.as_ref().map(|t| t.as_str().to_string()),
            ))
            .bind(("search", filter.search.as_ref().map(|s| s.to_lowercase())))
            .bind(("active", filter.active))
            .bind(("limit", page.limit))
            .bind(("start", page.start()))
            .await?;

        let agents: Vec<AgentRecord> = res.take(0)?;
        let total: Vec<CountRow> = res.take(1)?;
        Ok((agents, first_count(total)))
    }

    /// Replace the operator-editable fields of an agent within `scope`.
    pub async fn update_agent(
        db: &Surreal<Any>,
        scope: &TenantScope,
        id: &AgentId,
        input: AgentInput,
    ) -> Result<Option<AgentRecord>> {
        let conditions: Vec<String> = scope.condition("tenant_id").into_iter().collect();
        let filter = where_clause(&conditions);
        let query = format!(
            "UPDATE type::thing('agent', $id) MERGE $patch{filter} RETURN NONE;
             UPDATE type::thing('agent', $id) SET updated_at = time::now(){filter} RETURN NONE;"
        );

        db.query(query)
            .bind(("id", id.as_str().to_string()))
            .bind(("patch", input))
            .bind(("scope_tenant", scope.bind_value()))
            .await?
            .check()?;

        Self::find_agent(db, scope, id).await
    }

    /// Store a new key digest; the previous key stops matching immediately.
    pub async fn set_agent_key(
        db: &Surreal<Any>,
        scope: &TenantScope,
        id: &AgentId,
        key_hash: ApiKeyHash,
        key_prefix: ApiKeyPrefix,
    ) -> Result<Option<AgentRecord>> {
        let conditions: Vec<String> = scope.condition("tenant_id").into_iter().collect();
        let query = format!(
            "UPDATE type::thing('agent', $id) SET
                api_key_hash = $hash,
                api_key_prefix = $prefix,
                updated_at = time::now(){} RETURN NONE",
            where_clause(&conditions)
        );

        db.query(query)
            .bind(("id", id.as_str().to_string()))
            .bind(("hash", key_hash.into_inner()))
            .bind(("prefix", key_prefix.into_inner()))
            .bind(("scope_tenant", scope.bind_value()))
            .await?
            .check()?;

        Self::find_agent(db, scope, id).await
    }

    pub async fn delete_agent(db: &Surreal<Any>, scope: &TenantScope, id: &AgentId) -> Result<()> {
        let conditions: Vec<String> = scope.condition("tenant_id").into_iter().collect();
        let query = format!(
            "DELETE type::thing('agent', $id){}",
            where_clause(&conditions)
        );

        db.query(query)
            .bind(("id", id.as_str().to_string()))
            .bind(("scope_tenant", scope.bind_value()))
            .await?
            .check()?;
        Ok(())
    }

    pub async fn count_agents(db: &Surreal<Any>, tenant: &TenantId, active_only: bool) -> Result<u64> {
        let query = if active_only {
            "SELECT count() AS total FROM agent WHERE tenant_id = $tenant AND active = true GROUP ALL"
        } else {
            "SELECT count() AS total FROM agent WHERE tenant_id = $tenant GROUP ALL"
        };

        let mut res = db
            .query(query)
            .bind(("tenant", tenant.as_str().to_string()))
            .await?;

        let rows: Vec<CountRow> = res.take(0)?;
        Ok(first_count(rows))
    }

    /// Bump agent counters after a machine exchange.
    pub async fn record_agent_activity(
        db: &Surreal<Any>,
        id: &AgentId,
        new_conversation: bool,
        messages: u64,
    ) -> Result<()> {
        let query = r#"
            UPDATE type::thing('agent', $id) SET
                stats.conversations += $conversations,
                stats.messages += $messages,
                stats.last_activity = time::now()
            RETURN NONE
        "#;

        db.query(query)
            .bind(("id", id.as_str().to_string()))
            .bind(("conversations", u64::from(new_conversation)))
            .bind(("messages", messages))
            .await?
            .check()?;
        Ok(())
    }

    // ---- conversations ----------------------------------------------------

    pub async fn create_conversation(
        db: &Surreal<Any>,
        data: ConversationCreate,
    ) -> Result<ConversationRecord> {
        let id = ConversationId::generate();
        let agent_id = data.agent_id.clone();
        let content = ConversationContent {
            agent_id: data.agent_id,
            tenant_id: data.tenant_id,
            customer_id: data.customer_id,
            customer_name: data.customer_name,
            channel: data.channel,
            status: ConversationStatus::Active,
            messages: Vec::new(),
            total_messages: 0,
            total_tokens: 0,
            created_at: now(),
            updated_at: now(),
        };

        db.query("CREATE type::thing('conversation', $id) CONTENT $content RETURN NONE")
            .bind(("id", id.as_str().to_string()))
            .bind(("content", content))
            .await?
            .check()?;

        Self::find_conversation_for_agent(db, &agent_id, &id)
            .await?
            .ok_or_else(|| anyhow!("failed to create conversation record"))
    }

    /// Fetch a conversation only if it belongs to `agent`.
    pub async fn find_conversation_for_agent(
        db: &Surreal<Any>,
        agent: &AgentId,
        id: &ConversationId,
    ) -> Result<Option<ConversationRecord>> {
        let mut res = db
            .query(format!(
                "SELECT {RECORD} FROM type::thing('conversation', $id) WHERE agent_id = $agent"
            ))
            .bind(("id", id.as_str().to_string()))
            .bind(("agent", agent.as_str().to_string()))
            .await?;

        let conversations: Vec<ConversationRecord> = res.take(0)?;
        Ok(conversations.into_iter().next())
    }

    /// Append messages to a conversation owned by `agent`.
    pub async fn append_messages(
        db: &Surreal<Any>,
        agent: &AgentId,
        id: &ConversationId,
        messages: Vec<Message>,
        tokens: u64,
    ) -> Result<Option<ConversationRecord>> {
        let count = messages.len() as u64;
        let query = r#"
            UPDATE type::thing('conversation', $id) SET
                messages = array::concat(messages, $messages),
                total_messages += $count,
                total_tokens += $tokens,
                updated_at = time::now()
            WHERE agent_id = $agent
            RETURN NONE
        "#;

        db.query(query)
            .bind(("id", id.as_str().to_string()))
            .bind(("agent", agent.as_str().to_string()))
            .bind(("messages", messages))
            .bind(("count", count))
            .bind(("tokens", tokens))
            .await?
            .check()?;

        Self::find_conversation_for_agent(db, agent, id).await
    }

    pub async fn count_active_conversations(db: &Surreal<Any>, agent: &AgentId) -> Result<u64> {
        let mut res = db
            .query(
                "SELECT count() AS total FROM conversation WHERE agent_id = $agent AND status = 'active' GROUP ALL",
            )
            .bind(("agent", agent.as_str().to_string()))
            .await?;

        let rows: Vec<CountRow> = res.take(0)?;
        Ok(first_count(rows))
    }

    /// Counters shown on the tenant dashboard.
    pub async fn dashboard_summary(db: &Surreal<Any>, tenant: &TenantId) -> Result<DashboardSummary> {
        let query = r#"
            SELECT count() AS total FROM agent WHERE tenant_id = $tenant GROUP ALL;
            SELECT count() AS total FROM agent WHERE tenant_id = $tenant AND active = true GROUP ALL;
            SELECT count() AS total FROM conversation WHERE tenant_id = $tenant GROUP ALL;
            SELECT count() AS total FROM conversation
                WHERE tenant_id = $tenant AND created_at >= time::floor(time::now(), 1d)
                GROUP ALL;
        "#;

        let mut res = db
            .query(query)
            .bind(("tenant", tenant.as_str().to_string()))
            .await?;

        let agents: Vec<CountRow> = res.take(0)?;
        let active: Vec<CountRow> = res.take(1)?;
        let conversations: Vec<CountRow> = res.take(2)?;
        let today: Vec<CountRow> = res.take(3)?;
        Ok(DashboardSummary {
            total_agents: first_count(agents),
            active_agents: first_count(active),
            total_conversations: first_count(conversations),
            conversations_today: first_count(today),
        })
    }
}
