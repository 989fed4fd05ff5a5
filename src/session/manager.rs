//! Stateful session orchestration.
//!
//! The [`SessionManager`] owns the store plus the injected clock and id
//! source, and hands out [`SessionHandle`]s. A handle starts UNBOUND
//! (freshly created, no entries); the first append or an explicit resume
//! binds its current pointer, and every later append chains onto it,
//! implicitly continuing the active branch.
//!
//! Store calls go through `tokio::fs`, so the short blocking file writes
//! run off the cooperative scheduler and never stall unrelated work.

use crate::session::entry::{
    entry_id_set, Clock, EntryBase, EntryDraft, IdSource, MessageRole, SessionEntry, SessionHeader,
    SystemClock, UuidIds,
};
use crate::session::store::SessionStore;
use crate::session::tree;
use crate::{GroveError, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// A live pointer into one session log.
///
/// Holds the assembled entry set (including entries inherited across
/// `parentSession` links) and the current position that new appends chain
/// onto. Discarding a handle has no persisted side effect.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    header: SessionHeader,
    path: PathBuf,
    entries: Vec<SessionEntry>,
    current_id: Option<String>,
    skipped_lines: usize,
    /// False only when the handle was resumed from a missing file; the
    /// header is then written lazily by the first append.
    header_persisted: bool,
}

impl SessionHandle {
    pub fn header(&self) -> &SessionHeader {
        &self.header
    }

    pub fn session_id(&self) -> &str {
        &self.header.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Assembled entries, ancestor sessions first, in file order.
    pub fn entries(&self) -> &[SessionEntry] {
        &self.entries
    }

    /// Id of the entry the next append will chain onto.
    pub fn current_id(&self) -> Option<&str> {
        self.current_id.as_deref()
    }

    /// False until the first append or an explicit resume sets a position.
    pub fn is_bound(&self) -> bool {
        self.current_id.is_some()
    }

    /// Corrupt lines dropped while this handle's logs were loaded.
    pub fn skipped_lines(&self) -> usize {
        self.skipped_lines
    }

    /// Effective display name: the latest `session_info` entry wins,
    /// falling back to the header.
    pub fn name(&self) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find_map(|e| match e {
                SessionEntry::SessionInfo(info) => info.name.as_deref(),
                _ => None,
            })
            .or(self.header.name.as_deref())
    }
}

/// Creates, appends to, forks, and resumes session logs.
pub struct SessionManager {
    store: SessionStore,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdSource>,
}

impl SessionManager {
    /// Manager with wall-clock time and UUID-backed ids.
    pub fn new(store: SessionStore) -> Self {
        Self::with_collaborators(store, Arc::new(SystemClock), Arc::new(UuidIds))
    }

    /// Manager with explicit clock and id collaborators, for tests that
    /// need deterministic timestamps and ids.
    pub fn with_collaborators(
        store: SessionStore,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdSource>,
    ) -> Self {
        Self { store, clock, ids }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Start a new session for a working context. Writes the header line;
    /// the handle starts unbound.
    pub async fn create(&self, working_context: &str) -> Result<SessionHandle> {
        let dir = self.store.resolve_directory(working_context).await?;
        let session_id = self.ids.session_id();
        let header = SessionHeader::new(
            session_id.clone(),
            self.clock.now(),
            working_context.to_string(),
        );
        let path = self.store.session_path(&dir, &session_id);
        self.store.save_header(&path, &header).await?;
        info!("Created session {} at {}", session_id, path.display());

        Ok(SessionHandle {
            header,
            path,
            entries: Vec::new(),
            current_id: None,
            skipped_lines: 0,
            header_persisted: true,
        })
    }

    /// Append an entry chained to the handle's current position, persist
    /// it, and advance the current pointer.
    pub async fn append(
        &self,
        handle: &mut SessionHandle,
        draft: EntryDraft,
    ) -> Result<SessionEntry> {
        if !handle.header_persisted {
            self.store.save_header(&handle.path, &handle.header).await?;
            handle.header_persisted = true;
        }

        let existing = entry_id_set(&handle.entries);
        let id = self.ids.entry_id(&existing);
        let base = EntryBase::new(id.clone(), handle.current_id.clone(), self.clock.now());
        let entry = draft.into_entry(base);

        self.store.append_entry(&handle.path, &entry).await?;
        handle.entries.push(entry.clone());
        handle.current_id = Some(id);
        Ok(entry)
    }

    /// Append a conversation message.
    pub async fn append_message(
        &self,
        handle: &mut SessionHandle,
        role: MessageRole,
        content: impl Into<String>,
    ) -> Result<SessionEntry> {
        self.append(
            handle,
            EntryDraft::Message {
                role,
                content: content.into(),
                tool_calls: Vec::new(),
                tool_call_id: None,
                name: None,
            },
        )
        .await
    }

    /// Record a mid-session model switch.
    pub async fn append_model_change(
        &self,
        handle: &mut SessionHandle,
        prev_model: impl Into<String>,
        new_model: impl Into<String>,
        prev_provider: impl Into<String>,
        new_provider: impl Into<String>,
    ) -> Result<SessionEntry> {
        self.append(
            handle,
            EntryDraft::ModelChange {
                prev_model: prev_model.into(),
                new_model: new_model.into(),
                prev_provider: prev_provider.into(),
                new_provider: new_provider.into(),
            },
        )
        .await
    }

    /// Record a reasoning-effort change.
    pub async fn append_thinking_level_change(
        &self,
        handle: &mut SessionHandle,
        prev_level: impl Into<String>,
        new_level: impl Into<String>,
    ) -> Result<SessionEntry> {
        self.append(
            handle,
            EntryDraft::ThinkingLevelChange {
                prev_level: prev_level.into(),
                new_level: new_level.into(),
            },
        )
        .await
    }

    /// Record or update the session display name.
    pub async fn append_session_info(
        &self,
        handle: &mut SessionHandle,
        name: Option<String>,
    ) -> Result<SessionEntry> {
        self.append(handle, EntryDraft::SessionInfo { name }).await
    }

    /// Fork a new session from an ancestor entry.
    ///
    /// Creates a new log whose header carries `parentSession`; no prior
    /// entries are copied into the new file. The returned handle keeps the
    /// source's assembled entries readable and points at the fork entry,
    /// so the next append branches from there.
    pub async fn fork(
        &self,
        handle: &SessionHandle,
        from_entry_id: &str,
    ) -> Result<SessionHandle> {
        if tree::find_entry(&handle.entries, from_entry_id).is_none() {
            return Err(GroveError::EntryNotFound {
                id: from_entry_id.to_string(),
            });
        }

        let session_id = self.ids.session_id();
        let mut header = SessionHeader::new(
            session_id.clone(),
            self.clock.now(),
            handle.header.cwd.clone(),
        );
        header.parent_session = Some(handle.header.id.clone());

        let dir = handle
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.store.root().to_path_buf());
        let path = self.store.session_path(&dir, &session_id);
        self.store.save_header(&path, &header).await?;
        info!(
            "Forked session {} from {} at entry {}",
            session_id, handle.header.id, from_entry_id
        );

        Ok(SessionHandle {
            header,
            path,
            entries: handle.entries.clone(),
            current_id: Some(from_entry_id.to_string()),
            skipped_lines: handle.skipped_lines,
            header_persisted: true,
        })
    }

    /// Resume a session from its log file.
    ///
    /// Follows `parentSession` links transitively to assemble the full
    /// entry set, then binds the current pointer to `at_entry_id` or to
    /// the most recent entry by timestamp. A missing or fully corrupt
    /// file yields an empty, usable session rather than an error.
    pub async fn resume(
        &self,
        path: &Path,
        at_entry_id: Option<&str>,
    ) -> Result<SessionHandle> {
        let loaded = self.store.load_session(path).await?;
        let file_missing =
            loaded.header.is_none() && loaded.entries.is_empty() && loaded.skipped_lines == 0;

        let mut entries = loaded.entries;
        let mut skipped_lines = loaded.skipped_lines;

        // Walk the parent-session chain, prepending ancestor entries so
        // the assembled list stays in root-first order.
        let dir = path.parent().map(Path::to_path_buf);
        let mut visited: HashSet<String> = HashSet::new();
        if let Some(header) = &loaded.header {
            visited.insert(header.id.clone());
        }
        let mut parent_ref = loaded
            .header
            .as_ref()
            .and_then(|h| h.parent_session.clone());
        while let Some(parent_id) = parent_ref {
            if !visited.insert(parent_id.clone()) {
                warn!("Parent-session chain loops at {}, stopping", parent_id);
                break;
            }
            let Some(dir) = dir.as_deref() else { break };
            let Some(parent_path) = self.store.find_session_file(dir, &parent_id).await else {
                warn!("Parent session {} not found, ancestry truncated", parent_id);
                break;
            };
            let parent = self.store.load_session(&parent_path).await?;
            let mut assembled = parent.entries;
            assembled.extend(entries);
            entries = assembled;
            skipped_lines += parent.skipped_lines;
            parent_ref = parent.header.and_then(|h| h.parent_session);
        }

        let header = match loaded.header {
            Some(header) => header,
            None => SessionHeader::new(self.ids.session_id(), self.clock.now(), String::new()),
        };

        let current_id = match at_entry_id {
            Some(id) => {
                if tree::find_entry(&entries, id).is_none() {
                    return Err(GroveError::EntryNotFound { id: id.to_string() });
                }
                Some(id.to_string())
            }
            None => entries
                .iter()
                .enumerate()
                .max_by_key(|(i, e)| (e.timestamp(), *i))
                .map(|(_, e)| e.id().to_string()),
        };

        Ok(SessionHandle {
            header,
            path: path.to_path_buf(),
            entries,
            current_id,
            skipped_lines,
            header_persisted: !file_missing,
        })
    }

    /// Resume the most recently created session for a working context, or
    /// start a fresh one if none exist.
    pub async fn resume_latest(&self, working_context: &str) -> Result<SessionHandle> {
        let dir = self.store.resolve_directory(working_context).await?;
        let sessions = self.store.list_sessions(&dir).await?;
        match sessions.first() {
            Some(header) => {
                let path = self.store.session_path(&dir, &header.id);
                self.resume(&path, None).await
            }
            None => self.create(working_context).await,
        }
    }

    /// List sessions recorded for a working context, most recent first.
    pub async fn list(&self, working_context: &str) -> Result<Vec<SessionHeader>> {
        let dir = self.store.resolve_directory(working_context).await?;
        self.store.list_sessions(&dir).await
    }

    /// The ordered root-to-current context for the active branch. This is
    /// what external context builders consume.
    pub fn current_path(&self, handle: &SessionHandle) -> Vec<SessionEntry> {
        let Some(current) = handle.current_id() else {
            return Vec::new();
        };
        let mut path = tree::walk_to_root(&handle.entries, current);
        path.reverse();
        path
    }
}
