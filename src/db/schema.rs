use serde::{Deserialize, Serialize};
use surrealdb::sql::Datetime;

use crate::error::FieldError;
use crate::types::{
    AgentId, ApiKeyHash, ApiKeyPrefix, ConversationId, ExternalSubject, TenantId, UserId,
};

/// Models an agent may be configured with.
pub const SUPPORTED_MODELS: &[&str] = &[
    "gpt-4",
    "gpt-4-turbo",
    "gpt-4o",
    "gpt-4o-mini",
    "gpt-3.5-turbo",
    "gpt-3.5-turbo-16k",
    "gpt-3.5-turbo-instruct",
    "claude-3-sonnet",
    "claude-3-haiku",
    "claude-3-opus",
    "gemini-pro",
    "gemini-pro-vision",
];

pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_MAX_AGENTS: u32 = 10;
pub const MAX_MESSAGE_LEN: usize = 4000;

/// Access role of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Cross-tenant operator; never bound to a tenant.
    Superadmin,
    TenantAdmin,
    TenantUser,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Superadmin => "superadmin",
            Role::TenantAdmin => "tenant_admin",
            Role::TenantUser => "tenant_user",
        }
    }

    pub fn is_superadmin(self) -> bool {
        matches!(self, Role::Superadmin)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status shared by tenants and users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Active,
    Inactive,
}

impl Status {
    pub fn is_active(self) -> bool {
        matches!(self, Status::Active)
    }
}

/// Persisted tenant (company).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantRecord {
    pub id: TenantId,
    pub name: String,
    /// Contact email, stored lower-cased.
    pub email: String,
    pub phone: Option<String>,
    /// Company registry number; unique when present.
    pub registry_number: Option<String>,
    pub status: Status,
    pub max_agents: u32,
    pub notes: Option<String>,
    pub created_at: Option<Datetime>,
    pub updated_at: Option<Datetime>,
}

/// Payload used when inserting a new tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantCreate {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub registry_number: Option<String>,
    pub max_agents: u32,
    pub notes: Option<String>,
}

/// Partial tenant update; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_agents: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Persisted user, as returned by every default read.
///
/// The secret hash is never part of this projection; see
/// [`UserCredentials`] for the login comparison step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub tenant_id: Option<TenantId>,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub status: Status,
    pub external_subject: Option<ExternalSubject>,
    pub last_access_at: Option<Datetime>,
    pub credentials_changed_at: Option<Datetime>,
    /// Bumped on logout and credential change; tokens minted under an
    /// older epoch are revoked.
    #[serde(default, skip_serializing)]
    pub session_epoch: u64,
    pub created_at: Option<Datetime>,
    pub updated_at: Option<Datetime>,
}

/// Minimal projection loaded only for credential comparison.
#[derive(Debug, Clone, Deserialize)]
pub struct UserCredentials {
    pub id: UserId,
    pub status: Status,
    pub secret_hash: Option<String>,
    pub external_subject: Option<ExternalSubject>,
}

/// Payload used when inserting a new user. The caller supplies the
/// plaintext secret; the store hashes it before persisting.
#[derive(Debug, Clone)]
pub struct UserCreate {
    pub tenant_id: Option<TenantId>,
    pub name: String,
    pub email: String,
    pub secret: String,
    pub role: Role,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
}

/// Model parameters of an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub model: String,
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
    pub frequency_penalty: f64,
    pub presence_penalty: f64,
    pub stop_sequences: Vec<String>,
    /// Reply used when the completion provider fails.
    pub fallback_reply: Option<String>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: 1000,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            stop_sequences: Vec::new(),
            fallback_reply: None,
        }
    }
}

impl AgentSettings {
    pub fn validate(&self, errors: &mut Vec<FieldError>) {
        if !SUPPORTED_MODELS.contains(&self.model.as_str()) {
            errors.push(FieldError::new("settings.model", "unsupported model"));
        }
        check_range(errors, "settings.temperature", self.temperature, 0.0, 2.0);
        check_range(errors, "settings.top_p", self.top_p, 0.0, 1.0);
        if !(1..=4000).contains(&self.max_tokens) {
            errors.push(FieldError::new(
                "settings.max_tokens",
                "must be between 1 and 4000",
            ));
        }
        check_range(errors, "settings.frequency_penalty", self.frequency_penalty, 0.0, 2.0);
        check_range(errors, "settings.presence_penalty", self.presence_penalty, 0.0, 2.0);
        if let Some(reply) = &self.fallback_reply {
            check_len(errors, "settings.fallback_reply", reply, 500);
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentStats {
    pub conversations: u64,
    pub messages: u64,
    pub last_activity: Option<Datetime>,
}

/// Persisted agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: AgentId,
    pub tenant_id: TenantId,
    pub name: String,
    pub description: Option<String>,
    pub base_prompt: String,
    pub instructions: Option<String>,
    #[serde(default)]
    pub settings: AgentSettings,
    pub active: bool,
    pub whatsapp_number: Option<String>,
    /// Digest of the current API key; never leaves the server.
    #[serde(skip_serializing)]
    pub api_key_hash: ApiKeyHash,
    pub api_key_prefix: ApiKeyPrefix,
    #[serde(default)]
    pub stats: AgentStats,
    pub created_at: Option<Datetime>,
    pub updated_at: Option<Datetime>,
}

/// Fields an operator may set on an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInput {
    pub name: String,
    pub description: Option<String>,
    pub base_prompt: String,
    pub instructions: Option<String>,
    #[serde(default)]
    pub settings: AgentSettings,
    #[serde(default = "default_true")]
    pub active: bool,
    pub whatsapp_number: Option<String>,
}

fn default_true() -> bool {
    true
}

impl AgentInput {
    pub fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        if self.name.trim().is_empty() {
            errors.push(FieldError::new("name", "is required"));
        }
        check_len(&mut errors, "name", &self.name, 100);
        if let Some(description) = &self.description {
            check_len(&mut errors, "description", description, 500);
        }
        if self.base_prompt.trim().is_empty() {
            errors.push(FieldError::new("base_prompt", "is required"));
        }
        check_len(&mut errors, "base_prompt", &self.base_prompt, 5000);
        if let Some(instructions) = &self.instructions {
            check_len(&mut errors, "instructions", instructions, 2000);
        }
        if let Some(number) = &self.whatsapp_number
            && !is_valid_whatsapp_number(number)
        {
            errors.push(FieldError::new(
                "whatsapp_number",
                "must be + followed by 10 to 15 digits",
            ));
        }
        self.settings.validate(&mut errors);
        errors
    }
}

/// Partial agent update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub base_prompt: Option<String>,
    pub instructions: Option<String>,
    pub settings: Option<AgentSettings>,
    pub active: Option<bool>,
    pub whatsapp_number: Option<String>,
}

impl AgentUpdate {
    /// Merge onto the stored agent and validate the result as a whole.
    pub fn apply(self, current: &AgentRecord) -> AgentInput {
        AgentInput {
            name: self.name.unwrap_or_else(|| current.name.clone()),
            description: self.description.or_else(|| current.description.clone()),
            base_prompt: self.base_prompt.unwrap_or_else(|| current.base_prompt.clone()),
            instructions: self.instructions.or_else(|| current.instructions.clone()),
            settings: self.settings.unwrap_or_else(|| current.settings.clone()),
            active: self.active.unwrap_or(current.active),
            whatsapp_number: self
                .whatsapp_number
                .or_else(|| current.whatsapp_number.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Whatsapp,
    Web,
    #[default]
    Api,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    #[default]
    Active,
    Closed,
    Archived,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Customer,
    Agent,
    System,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageMetadata {
    pub tokens_used: Option<u32>,
    pub response_ms: Option<u64>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub kind: MessageKind,
    pub text: String,
    pub timestamp: Datetime,
    #[serde(default)]
    pub metadata: MessageMetadata,
}

impl Message {
    pub fn now(kind: MessageKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            timestamp: Datetime::from(chrono::Utc::now()),
            metadata: MessageMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: MessageMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Persisted conversation between a customer and an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: ConversationId,
    pub agent_id: AgentId,
    pub tenant_id: TenantId,
    pub customer_id: String,
    pub customer_name: Option<String>,
    pub channel: Channel,
    pub status: ConversationStatus,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub total_messages: u64,
    #[serde(default)]
    pub total_tokens: u64,
    pub created_at: Option<Datetime>,
    pub updated_at: Option<Datetime>,
}

/// Aggregate counts shown on the tenant dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardSummary {
    pub total_agents: u64,
    pub active_agents: u64,
    pub total_conversations: u64,
    pub conversations_today: u64,
}

/// Per-tenant counters shown to superadmins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantStats {
    pub users: u64,
    pub agents: u64,
    pub active_agents: u64,
}

pub fn check_len(errors: &mut Vec<FieldError>, field: &str, value: &str, max: usize) {
    if value.chars().count() > max {
        errors.push(FieldError::new(
            field,
            format!("must be at most {max} characters"),
        ));
    }
}

fn check_range(errors: &mut Vec<FieldError>, field: &str, value: f64, min: f64, max: f64) {
    if !(min..=max).contains(&value) {
        errors.push(FieldError::new(
            field,
            format!("must be between {min} and {max}"),
        ));
    }
}

fn is_valid_whatsapp_number(number: &str) -> bool {
    match number.strip_prefix('+') {
        Some(digits) => {
            (10..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

/// Loose structural email check: one `@`, non-empty local part, dotted domain.
pub fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace)
}

/// Canonical form used for storage and lookup.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
