//! Document, metadata, and presence data model.

use crate::ot::Op;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Publication status of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    #[default]
    Draft,
    Published,
    Archived,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Draft => "draft",
            DocumentStatus::Published => "published",
            DocumentStatus::Archived => "archived",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    pub created_by: String,
    pub last_modified_by: String,
    pub word_count: usize,
    pub character_count: usize,
    pub status: DocumentStatus,
    pub created_at: u64,
    pub updated_at: u64,
    #[serde(default)]
    pub last_accessed_at: u64,
    #[serde(default)]
    pub last_accessed_by: String,
}

impl DocumentMetadata {
    pub fn new(created_by: &str, now: u64) -> Self {
        Self {
            created_by: created_by.to_string(),
            last_modified_by: created_by.to_string(),
            word_count: 0,
            character_count: 0,
            status: DocumentStatus::Draft,
            created_at: now,
            updated_at: now,
            last_accessed_at: now,
            last_accessed_by: created_by.to_string(),
        }
    }

    /// Recompute the derived counters from the canonical content.
    pub fn refresh_counts(&mut self, content: &str) {
        self.word_count = content.split_whitespace().count();
        self.character_count = content.chars().count();
    }
}

/// Caller-supplied identity for a joining session. Missing pieces are
/// generated server-side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

/// Cursor state as reported by a client; opaque to the engine beyond
/// broadcasting it to peers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorState {
    pub position: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection_end: Option<usize>,
}

/// Per-session display record visible to peers of the same document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    pub user_id: String,
    pub display_name: String,
    pub color: String,
    #[serde(default)]
    pub avatar: Option<String>,
    pub joined_at: u64,
    pub cursor: CursorState,
    pub last_cursor_update: u64,
}

const PRESENCE_COLORS: &[&str] = &[
    "#e6194b", "#3cb44b", "#4363d8", "#f58231", "#911eb4", "#46f0f0", "#f032e6", "#9a6324",
    "#008080", "#800000",
];

/// Pick a stable color for a user from the fixed palette.
pub fn presence_color(user_id: &str) -> String {
    let mut hasher = DefaultHasher::new();
    user_id.hash(&mut hasher);
    PRESENCE_COLORS[(hasher.finish() as usize) % PRESENCE_COLORS.len()].to_string()
}

impl Presence {
    pub fn new(user: &UserInfo, now: u64) -> Self {
        let user_id = user
            .user_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let display_name = user
            .display_name
            .clone()
            .unwrap_or_else(|| "Anonymous".to_string());
        Self {
            color: presence_color(&user_id),
            user_id,
            display_name,
            avatar: user.avatar.clone(),
            joined_at: now,
            cursor: CursorState::default(),
            last_cursor_update: now,
        }
    }
}

/// The canonical, versioned text record shared by participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub title: String,
    pub content: String,
    pub version: u64,
    /// Bounded tail of the most recently applied ops, kept for rebasing
    /// optimistic echoes.
    #[serde(default)]
    pub operations: Vec<Op>,
    pub metadata: DocumentMetadata,
}

impl Document {
    pub fn new(id: &str, title: &str, created_by: &str) -> Self {
        let now = now_ms();
        Self {
            id: id.to_string(),
            title: title.to_string(),
            content: String::new(),
            version: 1,
            operations: Vec::new(),
            metadata: DocumentMetadata::new(created_by, now),
        }
    }

    pub fn content_len(&self) -> usize {
        self.content.chars().count()
    }
}

/// On-disk snapshot form of a document. `active_users` is written for
/// observability only; presence is transient and cleared on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedDocument {
    pub id: String,
    pub title: String,
    pub content: String,
    pub version: u64,
    #[serde(default)]
    pub operations: Vec<Op>,
    pub created_at: u64,
    pub updated_at: u64,
    pub created_by: String,
    pub metadata: DocumentMetadata,
    #[serde(default)]
    pub active_users: HashMap<String, Presence>,
    pub last_saved: u64,
}

impl PersistedDocument {
    pub fn from_document(doc: &Document, active_users: HashMap<String, Presence>) -> Self {
        Self {
            id: doc.id.clone(),
            title: doc.title.clone(),
            content: doc.content.clone(),
            version: doc.version,
            operations: doc.operations.clone(),
            created_at: doc.metadata.created_at,
            updated_at: doc.metadata.updated_at,
            created_by: doc.metadata.created_by.clone(),
            metadata: doc.metadata.clone(),
            active_users,
            last_saved: now_ms(),
        }
    }

    pub fn into_document(self) -> Document {
        Document {
            id: self.id,
            title: self.title,
            content: self.content,
            version: self.version,
            operations: self.operations,
            metadata: self.metadata,
        }
    }
}

/// Read-only view of a document handed to joining sessions and the HTTP
/// surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSnapshot {
    pub id: String,
    pub title: String,
    pub content: String,
    pub version: u64,
    pub metadata: DocumentMetadata,
    pub active_users: Vec<Presence>,
}

/// Live counters for one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentStats {
    pub version: u64,
    pub active_user_count: usize,
    pub tail_length: usize,
    pub queued_count: usize,
    pub metadata: DocumentMetadata,
    pub updated_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_counts_words_and_chars() {
        let mut meta = DocumentMetadata::new("u1", 0);
        meta.refresh_counts("héllo  wörld\nthird");
        assert_eq!(meta.word_count, 3);
        assert_eq!(meta.character_count, 18);
    }

    #[test]
    fn presence_color_is_stable() {
        assert_eq!(presence_color("alice"), presence_color("alice"));
        assert!(presence_color("alice").starts_with('#'));
    }

    #[test]
    fn presence_fills_anonymous_defaults() {
        let p = Presence::new(&UserInfo::default(), 5);
        assert!(!p.user_id.is_empty());
        assert_eq!(p.display_name, "Anonymous");
        assert_eq!(p.joined_at, 5);
    }

    #[test]
    fn persisted_roundtrip_drops_presence() {
        let doc = Document::new("d1", "Notes", "u1");
        let mut users = HashMap::new();
        users.insert(
            "s1".to_string(),
            Presence::new(
                &UserInfo {
                    user_id: Some("u1".into()),
                    display_name: Some("Ada".into()),
                    avatar: None,
                },
                1,
            ),
        );
        let persisted = PersistedDocument::from_document(&doc, users);
        let json = serde_json::to_string(&persisted).unwrap();
        let back: PersistedDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(back.active_users.len(), 1);
        let restored = back.into_document();
        assert_eq!(restored, doc);
    }
}
