//! Session entry data model and line-level serialization.
//!
//! A session log is newline-delimited JSON: line 1 is the [`SessionHeader`],
//! every later line is one [`SessionEntry`]. Decoding is driven by the
//! `type` discriminator; unknown fields are ignored for forward
//! compatibility, and a line with an unknown discriminator fails decode so
//! the store can skip it instead of aborting the whole load.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// Current session file format version.
pub const SESSION_FORMAT_VERSION: u8 = 1;

fn default_version() -> u8 {
    SESSION_FORMAT_VERSION
}

// ============================================================================
// Header
// ============================================================================

/// Session file header. Occupies exactly line 1 of a log file and is
/// written once, at session creation or fork.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHeader {
    /// Always `"session"`; distinguishes header lines from entry lines.
    pub r#type: String,
    #[serde(default = "default_version")]
    pub version: u8,
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// Originating working-context string (usually an absolute directory).
    pub cwd: String,
    /// Set when this log was forked from another session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_session: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl SessionHeader {
    pub fn new(id: String, timestamp: DateTime<Utc>, cwd: String) -> Self {
        Self {
            r#type: "session".to_string(),
            version: SESSION_FORMAT_VERSION,
            id,
            timestamp,
            cwd,
            parent_session: None,
            name: None,
        }
    }

    /// Serialize to a single JSONL line (no trailing newline).
    pub fn to_line(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ============================================================================
// Entries
// ============================================================================

/// Common fields shared by every entry variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryBase {
    /// Unique within the log file.
    pub id: String,
    /// `None` marks a root entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl EntryBase {
    pub fn new(id: String, parent_id: Option<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id,
            parent_id,
            timestamp,
        }
    }
}

/// One durable record in a session log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEntry {
    Message(MessageEntry),
    ModelChange(ModelChangeEntry),
    ThinkingLevelChange(ThinkingLevelChangeEntry),
    Compaction(CompactionEntry),
    BranchSummary(BranchSummaryEntry),
    Label(LabelEntry),
    SessionInfo(SessionInfoEntry),
    Custom(CustomEntry),
}

impl SessionEntry {
    pub fn base(&self) -> &EntryBase {
        match self {
            Self::Message(e) => &e.base,
            Self::ModelChange(e) => &e.base,
            Self::ThinkingLevelChange(e) => &e.base,
            Self::Compaction(e) => &e.base,
            Self::BranchSummary(e) => &e.base,
            Self::Label(e) => &e.base,
            Self::SessionInfo(e) => &e.base,
            Self::Custom(e) => &e.base,
        }
    }

    pub fn base_mut(&mut self) -> &mut EntryBase {
        match self {
            Self::Message(e) => &mut e.base,
            Self::ModelChange(e) => &mut e.base,
            Self::ThinkingLevelChange(e) => &mut e.base,
            Self::Compaction(e) => &mut e.base,
            Self::BranchSummary(e) => &mut e.base,
            Self::Label(e) => &mut e.base,
            Self::SessionInfo(e) => &mut e.base,
            Self::Custom(e) => &mut e.base,
        }
    }

    pub fn id(&self) -> &str {
        &self.base().id
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.base().parent_id.as_deref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.base().timestamp
    }

    /// The wire discriminator for this variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::ModelChange(_) => "model_change",
            Self::ThinkingLevelChange(_) => "thinking_level_change",
            Self::Compaction(_) => "compaction",
            Self::BranchSummary(_) => "branch_summary",
            Self::Label(_) => "label",
            Self::SessionInfo(_) => "session_info",
            Self::Custom(_) => "custom",
        }
    }

    /// Serialize to a single JSONL line (no trailing newline).
    pub fn to_line(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Role of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
}

/// A tool invocation requested by an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// A turn in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEntry {
    #[serde(flatten)]
    pub base: EntryBase,
    pub role: MessageRole,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Set on tool-role messages answering a specific call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Model switched mid-session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelChangeEntry {
    #[serde(flatten)]
    pub base: EntryBase,
    pub prev_model: String,
    pub new_model: String,
    pub prev_provider: String,
    pub new_provider: String,
}

/// Reasoning-effort setting changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThinkingLevelChangeEntry {
    #[serde(flatten)]
    pub base: EntryBase,
    pub prev_level: String,
    pub new_level: String,
}

/// A compaction pass ran. Prior entries stay in the log; this records the
/// summary and where retained context begins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactionEntry {
    #[serde(flatten)]
    pub base: EntryBase,
    pub summary: String,
    pub first_kept_entry_id: String,
    #[serde(default)]
    pub tokens_before: u64,
    #[serde(default)]
    pub tokens_after: u64,
}

/// Records why/where a branch was taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchSummaryEntry {
    #[serde(flatten)]
    pub base: EntryBase,
    pub from_id: String,
    pub summary: String,
}

/// User bookmark on an earlier entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelEntry {
    #[serde(flatten)]
    pub base: EntryBase,
    pub target_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Session metadata (display name).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfoEntry {
    #[serde(flatten)]
    pub base: EntryBase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Extension-owned data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomEntry {
    #[serde(flatten)]
    pub base: EntryBase,
    pub custom_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// ============================================================================
// Drafts
// ============================================================================

/// Entry payload without the common base fields. The session manager fills
/// in the id, parent link, and timestamp when appending.
#[derive(Debug, Clone)]
pub enum EntryDraft {
    Message {
        role: MessageRole,
        content: String,
        tool_calls: Vec<ToolCall>,
        tool_call_id: Option<String>,
        name: Option<String>,
    },
    ModelChange {
        prev_model: String,
        new_model: String,
        prev_provider: String,
        new_provider: String,
    },
    ThinkingLevelChange {
        prev_level: String,
        new_level: String,
    },
    Compaction {
        summary: String,
        first_kept_entry_id: String,
        tokens_before: u64,
        tokens_after: u64,
    },
    BranchSummary {
        from_id: String,
        summary: String,
    },
    Label {
        target_id: String,
        label: Option<String>,
    },
    SessionInfo {
        name: Option<String>,
    },
    Custom {
        custom_type: String,
        data: Option<Value>,
    },
}

impl EntryDraft {
    /// Attach base fields, producing the persistable entry.
    pub fn into_entry(self, base: EntryBase) -> SessionEntry {
        match self {
            Self::Message {
                role,
                content,
                tool_calls,
                tool_call_id,
                name,
            } => SessionEntry::Message(MessageEntry {
                base,
                role,
                content,
                tool_calls,
                tool_call_id,
                name,
            }),
            Self::ModelChange {
                prev_model,
                new_model,
                prev_provider,
                new_provider,
            } => SessionEntry::ModelChange(ModelChangeEntry {
                base,
                prev_model,
                new_model,
                prev_provider,
                new_provider,
            }),
            Self::ThinkingLevelChange {
                prev_level,
                new_level,
            } => SessionEntry::ThinkingLevelChange(ThinkingLevelChangeEntry {
                base,
                prev_level,
                new_level,
            }),
            Self::Compaction {
                summary,
                first_kept_entry_id,
                tokens_before,
                tokens_after,
            } => SessionEntry::Compaction(CompactionEntry {
                base,
                summary,
                first_kept_entry_id,
                tokens_before,
                tokens_after,
            }),
            Self::BranchSummary { from_id, summary } => {
                SessionEntry::BranchSummary(BranchSummaryEntry {
                    base,
                    from_id,
                    summary,
                })
            }
            Self::Label { target_id, label } => SessionEntry::Label(LabelEntry {
                base,
                target_id,
                label,
            }),
            Self::SessionInfo { name } => SessionEntry::SessionInfo(SessionInfoEntry { base, name }),
            Self::Custom { custom_type, data } => SessionEntry::Custom(CustomEntry {
                base,
                custom_type,
                data,
            }),
        }
    }
}

// ============================================================================
// Line decoding
// ============================================================================

/// One decoded JSONL line.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    Header(SessionHeader),
    Entry(SessionEntry),
}

/// Decode a single log line, reading the `type` discriminator first.
///
/// Malformed JSON and unrecognized discriminators both surface as
/// `serde_json::Error`; the store treats either as a skippable line.
pub fn decode_line(line: &str) -> serde_json::Result<ParsedLine> {
    let value: Value = serde_json::from_str(line)?;
    let is_header = value
        .get("type")
        .and_then(Value::as_str)
        .is_some_and(|t| t == "session");

    if is_header {
        Ok(ParsedLine::Header(serde_json::from_value(value)?))
    } else {
        Ok(ParsedLine::Entry(serde_json::from_value(value)?))
    }
}

// ============================================================================
// Injected collaborators
// ============================================================================

/// Time source injected into the session manager so tests can supply
/// deterministic timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Id source injected into the session manager.
pub trait IdSource: Send + Sync {
    /// A fresh session id.
    fn session_id(&self) -> String;

    /// A fresh entry id, unique against `existing` ids in the same log.
    fn entry_id(&self, existing: &HashSet<String>) -> String;
}

/// UUID-backed ids: full v4 UUIDs for sessions, 8-hex-char truncated UUIDs
/// for entries (collision-checked, falling back to a full UUID).
pub struct UuidIds;

impl IdSource for UuidIds {
    fn session_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }

    fn entry_id(&self, existing: &HashSet<String>) -> String {
        for _ in 0..100 {
            let id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
            if !existing.contains(&id) {
                return id;
            }
        }
        uuid::Uuid::new_v4().to_string()
    }
}

/// Collect the set of ids already used in a list of entries.
pub fn entry_id_set(entries: &[SessionEntry]) -> HashSet<String> {
    entries.iter().map(|e| e.id().to_string()).collect()
}
