//! Machine-to-machine routes under `/api/v1`, authenticated by agent API key.

use axum::{
    Router,
    extract::{Path, State},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::AppState;
use crate::api::extract::Json;
use crate::api::response::Envelope;
use crate::api::{ApiResult, ensure_valid};
use crate::auth::AgentContext;
use crate::chat::build_prompt;
use crate::db::schema::{
    Channel, ConversationRecord, MAX_MESSAGE_LEN, Message, MessageKind, MessageMetadata, check_len,
};
use crate::db::{ConversationCreate, QueryBuilder};
use crate::error::{ApiError, FieldError};
use crate::types::ConversationId;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/conversations", post(post_message))
        .route("/conversations/{id}", get(get_conversation))
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    /// Continue this conversation; omit to start a new one.
    pub conversation_id: Option<ConversationId>,
    pub message: String,
    pub customer_id: Option<String>,
    pub customer_name: Option<String>,
    pub channel: Option<Channel>,
}

#[derive(Debug, Serialize)]
pub struct MessageReply {
    pub reply: String,
    pub conversation_id: ConversationId,
}

/// Record a customer message, ask the completion provider for a reply and
/// store both.
async fn post_message(
    State(state): State<AppState>,
    agent: AgentContext,
    Json(req): Json<MessageRequest>,
) -> ApiResult<MessageReply> {
    let mut errors = Vec::new();
    if req.message.trim().is_empty() {
        errors.push(FieldError::new("message", "is required"));
    }
    check_len(&mut errors, "message", &req.message, MAX_MESSAGE_LEN);
    let customer_id = req
        .customer_id
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string);
    if req.conversation_id.is_none() && customer_id.is_none() {
        errors.push(FieldError::new(
            "customer_id",
            "is required to start a conversation",
        ));
    }
    ensure_valid(errors)?;

    let db = state.db();
    let (conversation, is_new) = match req.conversation_id {
        Some(id) => {
            let conversation = QueryBuilder::find_conversation_for_agent(db, agent.agent_id(), &id)
                .await?
                .ok_or(ApiError::NotFound("conversation"))?;
            (conversation, false)
        }
        None => {
            let conversation = QueryBuilder::create_conversation(
                db,
                ConversationCreate {
                    agent_id: agent.agent_id().clone(),
                    tenant_id: agent.tenant_id().clone(),
                    customer_id: customer_id.unwrap_or_default(),
                    customer_name: req.customer_name,
                    channel: req.channel.unwrap_or_default(),
                },
            )
            .await?;
            (conversation, true)
        }
    };

    let customer_message = Message::now(MessageKind::Customer, req.message);
    let mut history = conversation.messages;
    history.push(customer_message.clone());

    let prompt = build_prompt(agent.base_prompt(), agent.instructions(), &history);
    let completion = state.completion().complete(&prompt, agent.settings()).await;
    let agent_message = Message::now(MessageKind::Agent, completion.reply.clone()).with_metadata(
        MessageMetadata {
            tokens_used: Some(completion.tokens_used),
            response_ms: Some(completion.response_ms),
            model: Some(completion.model.clone()),
        },
    );

    QueryBuilder::append_messages(
        db,
        agent.agent_id(),
        &conversation.id,
        vec![customer_message, agent_message],
        u64::from(completion.tokens_used),
    )
    .await?
    .ok_or(ApiError::NotFound("conversation"))?;

    if let Err(e) = QueryBuilder::record_agent_activity(db, agent.agent_id(), is_new, 2).await {
        warn!(agent_id = %agent.agent_id(), error = %e, "failed to update agent stats");
    }

    debug!(
        agent_id = %agent.agent_id(),
        conversation_id = %conversation.id,
        tokens = completion.tokens_used,
        "message handled"
    );
    Ok(Envelope::ok(
        "message processed",
        MessageReply {
            reply: completion.reply,
            conversation_id: conversation.id,
        },
    ))
}

async fn get_conversation(
    State(state): State<AppState>,
    agent: AgentContext,
    Path(id): Path<ConversationId>,
) -> ApiResult<ConversationRecord> {
    let conversation = QueryBuilder::find_conversation_for_agent(state.db(), agent.agent_id(), &id)
        .await?
        .ok_or(ApiError::NotFound("conversation"))?;
    Ok(Envelope::ok("conversation", conversation))
}
