//! Session module for Grove
//!
//! Provides the entry data model, the on-disk JSONL store, tree
//! reconstruction over parent-linked entries, and the session manager
//! that orchestrates create/append/fork/resume.

pub mod entry;
pub mod manager;
pub mod store;
pub mod tree;

pub use entry::{
    Clock, EntryBase, EntryDraft, IdSource, MessageRole, ParsedLine, SessionEntry, SessionHeader,
    SystemClock, ToolCall, UuidIds, SESSION_FORMAT_VERSION,
};
pub use manager::{SessionHandle, SessionManager};
pub use store::{LoadedSession, SessionStore};
pub use tree::{branches, build_tree, find_entry, walk_to_root, SessionTree, TreeNode};
