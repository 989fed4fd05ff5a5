//! On-disk JSONL session store.
//!
//! One file per session: line 1 is the header, every later line is one
//! entry. Appends are independent open/write/close cycles so a crash
//! between appends loses at most the in-flight entry. Loading favors
//! availability over strictness: lines that fail to decode are skipped
//! and counted, never fatal.

use crate::session::entry::{self, ParsedLine, SessionEntry, SessionHeader};
use crate::Result;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

/// Length of the truncated working-context hash used as a directory name.
const CONTEXT_HASH_LEN: usize = 16;

/// Session log file extension.
pub const SESSION_FILE_EXT: &str = "jsonl";

/// Result of loading a session log.
#[derive(Debug, Default)]
pub struct LoadedSession {
    /// `None` when the file is missing or its first line is not a header.
    pub header: Option<SessionHeader>,
    /// Decoded entries in file order, duplicate ids resolved first-wins.
    pub entries: Vec<SessionEntry>,
    /// Lines dropped during load (malformed, unknown type, duplicate id,
    /// or extra header lines).
    pub skipped_lines: usize,
}

/// Durable, crash-tolerant I/O over session logs.
///
/// The storage root is threaded in explicitly so tests can run against
/// isolated temp directories.
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Default storage root under the user's profile: `~/.grove/sessions`.
    pub fn default_root() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".grove")
            .join("sessions")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a working-context string to its storage subdirectory, creating
    /// it if absent.
    ///
    /// The directory name is a truncated SHA-256 of the context string:
    /// deterministic, collision-resistant across distinct contexts, and
    /// independent of how long or strange the raw path is.
    pub async fn resolve_directory(&self, working_context: &str) -> Result<PathBuf> {
        let dir = self.root.join(hash_context(working_context));
        fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Path of the log file for a session id within a context directory.
    pub fn session_path(&self, dir: &Path, session_id: &str) -> PathBuf {
        dir.join(format!("{session_id}.{SESSION_FILE_EXT}"))
    }

    /// Create (or truncate) the log file with exactly the header line.
    /// Called only at session creation or fork, never again for that file.
    pub async fn save_header(&self, path: &Path, header: &SessionHeader) -> Result<()> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .await?;
        file.write_all(header.to_line()?.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        debug!("Wrote session header to {}", path.display());
        Ok(())
    }

    /// Append one entry line. Each call is an independent
    /// open/write/flush/close cycle; no long-lived file handle.
    pub async fn append_entry(&self, path: &Path, entry: &SessionEntry) -> Result<()> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(entry.to_line()?.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }

    /// Load a session log, skipping (and counting) undecodable lines.
    ///
    /// A missing file yields an empty result, not an error. Only the first
    /// non-empty line is considered as a header; a header-shaped line later
    /// in the file is ignored (first header wins). Duplicate entry ids are
    /// resolved first-wins.
    pub async fn load_session(&self, path: &Path) -> Result<LoadedSession> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(LoadedSession::default()),
            Err(e) => return Err(e.into()),
        };

        let mut loaded = LoadedSession::default();
        let mut seen_ids: HashSet<String> = HashSet::new();
        let mut header_tried = false;

        for (index, raw) in bytes.split(|&b| b == b'\n').enumerate() {
            // A crash or concurrent append can truncate the tail mid-line,
            // possibly inside a multibyte character. Decode each line
            // lossily so the damaged line fails JSON parsing and is
            // skipped instead of making the whole file unreadable.
            let decoded = String::from_utf8_lossy(raw);
            let line = decoded.trim();
            if line.is_empty() {
                continue;
            }

            if !header_tried {
                header_tried = true;
                match entry::decode_line(line) {
                    Ok(ParsedLine::Header(header)) => loaded.header = Some(header),
                    _ => {
                        debug!("First line of {} is not a valid header", path.display());
                        loaded.skipped_lines += 1;
                    }
                }
                continue;
            }

            match entry::decode_line(line) {
                Ok(ParsedLine::Entry(entry)) => {
                    if seen_ids.insert(entry.id().to_string()) {
                        loaded.entries.push(entry);
                    } else {
                        debug!("Duplicate entry id {} at line {}", entry.id(), index + 1);
                        loaded.skipped_lines += 1;
                    }
                }
                Ok(ParsedLine::Header(_)) => {
                    debug!("Extra header at line {} ignored", index + 1);
                    loaded.skipped_lines += 1;
                }
                Err(e) => {
                    debug!("Undecodable line {} in {}: {}", index + 1, path.display(), e);
                    loaded.skipped_lines += 1;
                }
            }
        }

        if loaded.skipped_lines > 0 {
            warn!(
                "Skipped {} corrupt line(s) while loading {}",
                loaded.skipped_lines,
                path.display()
            );
        }

        Ok(loaded)
    }

    /// List sessions under a context directory by reading only the first
    /// line of each log file. Sorted by creation timestamp, most recent
    /// first.
    pub async fn list_sessions(&self, dir: &Path) -> Result<Vec<SessionHeader>> {
        let mut read_dir = match fs::read_dir(dir).await {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut headers = Vec::new();
        while let Some(dirent) = read_dir.next_entry().await? {
            let path = dirent.path();
            if path.extension().map_or(true, |ext| ext != SESSION_FILE_EXT) {
                continue;
            }
            if let Some(header) = read_header_line(&path).await {
                headers.push(header);
            }
        }

        headers.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(headers)
    }

    /// Locate the log file for a session id within a context directory.
    /// Used to follow `parentSession` links across files.
    pub async fn find_session_file(&self, dir: &Path, session_id: &str) -> Option<PathBuf> {
        let path = self.session_path(dir, session_id);
        match fs::try_exists(&path).await {
            Ok(true) => Some(path),
            _ => None,
        }
    }
}

/// Truncated SHA-256 of a working-context string, used as the storage
/// subdirectory name.
pub fn hash_context(working_context: &str) -> String {
    let digest = Sha256::digest(working_context.as_bytes());
    hex::encode(digest)[..CONTEXT_HASH_LEN].to_string()
}

/// Read and parse only the first line of a log file.
async fn read_header_line(path: &Path) -> Option<SessionHeader> {
    let file = fs::File::open(path).await.ok()?;
    let mut lines = BufReader::new(file).lines();
    let line = lines.next_line().await.ok()??;
    match entry::decode_line(&line) {
        Ok(ParsedLine::Header(header)) => Some(header),
        _ => {
            debug!("{} has no parsable header, skipping", path.display());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::entry::{EntryBase, SessionInfoEntry, SESSION_FORMAT_VERSION};
    use chrono::{DateTime, TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn ts(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, minute, 0).unwrap()
    }

    fn header(id: &str, minute: u32) -> SessionHeader {
        SessionHeader::new(id.to_string(), ts(minute), "/work/project".to_string())
    }

    fn info_entry(id: &str, parent: Option<&str>, minute: u32) -> SessionEntry {
        SessionEntry::SessionInfo(SessionInfoEntry {
            base: EntryBase::new(id.to_string(), parent.map(String::from), ts(minute)),
            name: Some(format!("entry-{id}")),
        })
    }

    async fn append_raw(path: &Path, line: &str) {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .unwrap();
        file.write_all(line.as_bytes()).await.unwrap();
        file.write_all(b"\n").await.unwrap();
    }

    #[test]
    fn test_hash_context_deterministic_and_distinct() {
        assert_eq!(hash_context("/a/b"), hash_context("/a/b"));
        assert_ne!(hash_context("/a/b"), hash_context("/a/c"));
        assert_eq!(hash_context("/a/b").len(), CONTEXT_HASH_LEN);
    }

    #[tokio::test]
    async fn test_resolve_directory_is_deterministic() {
        let tmp = TempDir::new().unwrap();
        let store = SessionStore::new(tmp.path().to_path_buf());

        let first = store.resolve_directory("/work/project").await.unwrap();
        let second = store.resolve_directory("/work/project").await.unwrap();
        let other = store.resolve_directory("/work/other").await.unwrap();

        assert_eq!(first, second);
        assert_ne!(first, other);
        assert!(first.exists());
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let tmp = TempDir::new().unwrap();
        let store = SessionStore::new(tmp.path().to_path_buf());
        let path = tmp.path().join("s1.jsonl");

        store.save_header(&path, &header("s1", 0)).await.unwrap();
        store
            .append_entry(&path, &info_entry("e1", None, 1))
            .await
            .unwrap();
        store
            .append_entry(&path, &info_entry("e2", Some("e1"), 2))
            .await
            .unwrap();

        let loaded = store.load_session(&path).await.unwrap();
        let loaded_header = loaded.header.unwrap();
        assert_eq!(loaded_header.id, "s1");
        assert_eq!(loaded_header.version, SESSION_FORMAT_VERSION);
        assert_eq!(loaded.entries.len(), 2);
        assert_eq!(loaded.entries[0].id(), "e1");
        assert_eq!(loaded.entries[1].parent_id(), Some("e1"));
        assert_eq!(loaded.skipped_lines, 0);
    }

    #[tokio::test]
    async fn test_first_header_wins() {
        let tmp = TempDir::new().unwrap();
        let store = SessionStore::new(tmp.path().to_path_buf());
        let path = tmp.path().join("s1.jsonl");

        store.save_header(&path, &header("first", 0)).await.unwrap();
        append_raw(&path, &header("second", 1).to_line().unwrap()).await;

        let loaded = store.load_session(&path).await.unwrap();
        assert_eq!(loaded.header.unwrap().id, "first");
        assert!(loaded.entries.is_empty());
        assert_eq!(loaded.skipped_lines, 1);
    }

    #[tokio::test]
    async fn test_corrupt_lines_are_skipped_and_counted() {
        let tmp = TempDir::new().unwrap();
        let store = SessionStore::new(tmp.path().to_path_buf());
        let path = tmp.path().join("s1.jsonl");

        store.save_header(&path, &header("s1", 0)).await.unwrap();
        let mut parent: Option<String> = None;
        for i in 0..9 {
            let id = format!("e{i}");
            store
                .append_entry(&path, &info_entry(&id, parent.as_deref(), i + 1))
                .await
                .unwrap();
            parent = Some(id);
        }
        // A truncated write, as left behind by a crash mid-append.
        append_raw(&path, r#"{"type":"message","id":"e9","#).await;

        let loaded = store.load_session(&path).await.unwrap();
        assert!(loaded.header.is_some());
        assert_eq!(loaded.entries.len(), 9);
        assert_eq!(loaded.skipped_lines, 1);
    }

    #[tokio::test]
    async fn test_tail_truncated_inside_multibyte_char_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let store = SessionStore::new(tmp.path().to_path_buf());
        let path = tmp.path().join("s1.jsonl");

        store.save_header(&path, &header("s1", 0)).await.unwrap();
        store
            .append_entry(&path, &info_entry("e1", None, 1))
            .await
            .unwrap();

        // A crash mid-append can cut the trailing line inside a multibyte
        // character, leaving invalid UTF-8 at the end of the file.
        let line = r#"{"type":"session_info","id":"e2","timestamp":"2025-06-01T13:00:00Z","name":"héllo"}"#;
        let cut = line.find('é').unwrap() + 1;
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .unwrap();
        file.write_all(&line.as_bytes()[..cut]).await.unwrap();

        let loaded = store.load_session(&path).await.unwrap();
        assert!(loaded.header.is_some());
        assert_eq!(loaded.entries.len(), 1);
        assert_eq!(loaded.entries[0].id(), "e1");
        assert_eq!(loaded.skipped_lines, 1);
    }

    #[tokio::test]
    async fn test_blank_leading_line_does_not_displace_header() {
        let tmp = TempDir::new().unwrap();
        let store = SessionStore::new(tmp.path().to_path_buf());
        let path = tmp.path().join("s1.jsonl");

        let mut content = String::from("\n");
        content.push_str(&header("s1", 0).to_line().unwrap());
        content.push('\n');
        content.push_str(&info_entry("e1", None, 1).to_line().unwrap());
        content.push('\n');
        fs::write(&path, content).await.unwrap();

        let loaded = store.load_session(&path).await.unwrap();
        assert_eq!(loaded.header.unwrap().id, "s1");
        assert_eq!(loaded.entries.len(), 1);
        assert_eq!(loaded.skipped_lines, 0);
    }

    #[tokio::test]
    async fn test_duplicate_entry_ids_first_wins() {
        let tmp = TempDir::new().unwrap();
        let store = SessionStore::new(tmp.path().to_path_buf());
        let path = tmp.path().join("s1.jsonl");

        store.save_header(&path, &header("s1", 0)).await.unwrap();
        store
            .append_entry(&path, &info_entry("e1", None, 1))
            .await
            .unwrap();
        append_raw(
            &path,
            r#"{"type":"session_info","id":"e1","timestamp":"2025-06-01T13:00:00Z","name":"imposter"}"#,
        )
        .await;

        let loaded = store.load_session(&path).await.unwrap();
        assert_eq!(loaded.entries.len(), 1);
        assert_eq!(loaded.skipped_lines, 1);
        match &loaded.entries[0] {
            SessionEntry::SessionInfo(e) => assert_eq!(e.name.as_deref(), Some("entry-e1")),
            other => panic!("unexpected entry: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let tmp = TempDir::new().unwrap();
        let store = SessionStore::new(tmp.path().to_path_buf());

        let loaded = store
            .load_session(&tmp.path().join("nope.jsonl"))
            .await
            .unwrap();
        assert!(loaded.header.is_none());
        assert!(loaded.entries.is_empty());
        assert_eq!(loaded.skipped_lines, 0);
    }

    #[tokio::test]
    async fn test_unknown_entry_type_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let store = SessionStore::new(tmp.path().to_path_buf());
        let path = tmp.path().join("s1.jsonl");

        store.save_header(&path, &header("s1", 0)).await.unwrap();
        append_raw(
            &path,
            r#"{"type":"from_the_future","id":"e1","timestamp":"2025-06-01T13:00:00Z"}"#,
        )
        .await;
        store
            .append_entry(&path, &info_entry("e2", None, 2))
            .await
            .unwrap();

        let loaded = store.load_session(&path).await.unwrap();
        assert_eq!(loaded.entries.len(), 1);
        assert_eq!(loaded.entries[0].id(), "e2");
        assert_eq!(loaded.skipped_lines, 1);
    }

    #[tokio::test]
    async fn test_list_sessions_most_recent_first() {
        let tmp = TempDir::new().unwrap();
        let store = SessionStore::new(tmp.path().to_path_buf());
        let dir = store.resolve_directory("/work/project").await.unwrap();

        for (id, minute) in [("s1", 1), ("s2", 2), ("s3", 3)] {
            let path = store.session_path(&dir, id);
            store.save_header(&path, &header(id, minute)).await.unwrap();
        }

        let listed = store.list_sessions(&dir).await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["s3", "s2", "s1"]);
        assert!(listed.windows(2).all(|w| w[0].timestamp > w[1].timestamp));
    }

    #[tokio::test]
    async fn test_list_sessions_ignores_non_session_files() {
        let tmp = TempDir::new().unwrap();
        let store = SessionStore::new(tmp.path().to_path_buf());
        let dir = store.resolve_directory("/work/project").await.unwrap();

        let path = store.session_path(&dir, "s1");
        store.save_header(&path, &header("s1", 0)).await.unwrap();
        fs::write(dir.join("notes.txt"), "not a session").await.unwrap();
        fs::write(dir.join("broken.jsonl"), "garbage\n").await.unwrap();

        let listed = store.list_sessions(&dir).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "s1");
    }

    #[tokio::test]
    async fn test_find_session_file() {
        let tmp = TempDir::new().unwrap();
        let store = SessionStore::new(tmp.path().to_path_buf());
        let dir = store.resolve_directory("/work/project").await.unwrap();

        let path = store.session_path(&dir, "s1");
        store.save_header(&path, &header("s1", 0)).await.unwrap();

        assert_eq!(store.find_session_file(&dir, "s1").await, Some(path));
        assert_eq!(store.find_session_file(&dir, "s2").await, None);
    }
}
