//! Wire protocol for collaborative editing sessions.
//!
//! Frames are JSON text records discriminated by a `type` field. Inbound
//! messages all name the document they target; outbound messages are scoped
//! by the session's subscription.

use crate::document::{CursorState, DocumentMetadata, Presence, UserInfo};
use crate::ot::Op;
use serde::{Deserialize, Serialize};

/// Client → server messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    JoinDocument {
        document_id: String,
        /// Optional caller-supplied identity; absent pieces are generated.
        #[serde(default)]
        user: Option<UserInfo>,
    },
    #[serde(rename_all = "camelCase")]
    Operation { document_id: String, operation: Op },
    #[serde(rename_all = "camelCase")]
    CursorUpdate {
        document_id: String,
        cursor: CursorState,
    },
}

/// Server → client messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Initial snapshot, sent to the joining session only.
    #[serde(rename_all = "camelCase")]
    DocumentState {
        id: String,
        title: String,
        content: String,
        version: u64,
        metadata: DocumentMetadata,
        active_users: Vec<Presence>,
    },
    /// Optimistic echo of a peer's op, ahead of the canonical sync.
    #[serde(rename_all = "camelCase")]
    OperationImmediate {
        operation: Op,
        temp_content: String,
        user: Presence,
    },
    /// Authoritative post-flush state, sent to every session including the
    /// originators.
    #[serde(rename_all = "camelCase")]
    DocumentSync {
        content: String,
        version: u64,
        operations: Vec<Op>,
        metadata: DocumentMetadata,
    },
    #[serde(rename_all = "camelCase")]
    UserJoined { user: Presence, socket_id: String },
    #[serde(rename_all = "camelCase")]
    UserLeft { user: Presence, socket_id: String },
    #[serde(rename_all = "camelCase")]
    UsersUpdated { active_users: Vec<Presence> },
    #[serde(rename_all = "camelCase")]
    CursorUpdate {
        user: Presence,
        cursor: CursorState,
        timestamp: u64,
    },
    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}
