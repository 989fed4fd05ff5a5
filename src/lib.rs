//! Grove - durable, branch-capable conversation log
//!
//! Persists an agent's interaction history as an append-only JSONL log
//! (one file per session) and reconstructs, on demand, the tree of
//! divergent conversation paths that forking and resuming produce:
//! - Closed set of typed entries linked by parent references
//! - Crash-tolerant per-line appends; corrupt lines are skipped, not fatal
//! - Parent-pointer tree reconstruction and root-to-leaf branch extraction
//! - Fork-without-copy via cross-file parent-session links

pub mod session;

pub use session::entry::{EntryBase, EntryDraft, SessionEntry, SessionHeader};
pub use session::manager::{SessionHandle, SessionManager};
pub use session::store::{LoadedSession, SessionStore};
pub use session::tree::{branches, build_tree, find_entry, walk_to_root, SessionTree};

/// Result type for Grove operations
pub type Result<T> = std::result::Result<T, GroveError>;

/// Errors that can occur in Grove
///
/// Missing files are not errors: loads and resumes of absent sessions
/// yield empty, usable results instead.
#[derive(Debug, thiserror::Error)]
pub enum GroveError {
    #[error("Entry not found in session: {id}")]
    EntryNotFound { id: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
