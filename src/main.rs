//! Grove CLI
//!
//! Inspection front end over the session log library: list sessions for a
//! working context, print the reconstructed tree or branches of a log, and
//! show the active root-to-leaf path.

use clap::{Parser, Subcommand};
use grove::session::entry::SessionEntry;
use grove::session::tree;
use grove::{SessionManager, SessionStore};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Grove - durable, branch-capable conversation log
#[derive(Parser, Debug)]
#[command(name = "grove")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Storage root (defaults to ~/.grove/sessions)
    #[arg(long)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List sessions recorded for a working context, most recent first
    List {
        /// Working context directory (defaults to the current directory)
        #[arg(short = 'C', long, default_value = ".")]
        context: PathBuf,
    },
    /// Print the reconstructed entry tree of a session log
    Tree {
        /// Path to a session .jsonl file
        file: PathBuf,
    },
    /// Print every root-to-leaf conversation path of a session log
    Branches {
        /// Path to a session .jsonl file
        file: PathBuf,
    },
    /// Print the active path (root to current entry) of a session log
    Path {
        /// Path to a session .jsonl file
        file: PathBuf,

        /// Entry id to treat as the current position
        #[arg(long)]
        at: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let root = cli.root.unwrap_or_else(SessionStore::default_root);
    let manager = SessionManager::new(SessionStore::new(root));

    match cli.command {
        Command::List { context } => {
            let context = std::fs::canonicalize(&context)?;
            let sessions = manager.list(&context.to_string_lossy()).await?;
            if sessions.is_empty() {
                println!("No sessions recorded for {}", context.display());
                return Ok(());
            }
            for header in sessions {
                let name = header.name.as_deref().unwrap_or("-");
                let fork_marker = match &header.parent_session {
                    Some(parent) => format!("  (fork of {parent})"),
                    None => String::new(),
                };
                println!(
                    "{}  {}  {}{}",
                    header.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    header.id,
                    name,
                    fork_marker
                );
            }
        }
        Command::Tree { file } => {
            let handle = manager.resume(&file, None).await?;
            let Some(session_tree) = tree::build_tree(handle.entries()) else {
                println!("(empty session)");
                return Ok(());
            };
            // Depth-first print over the arena, explicit stack.
            let mut stack: Vec<(usize, usize)> = session_tree
                .roots()
                .iter()
                .rev()
                .map(|&i| (i, 0))
                .collect();
            while let Some((index, depth)) = stack.pop() {
                let node = session_tree.node(index);
                println!("{}{}", "  ".repeat(depth), describe(&node.entry));
                for &child in node.children.iter().rev() {
                    stack.push((child, depth + 1));
                }
            }
        }
        Command::Branches { file } => {
            let handle = manager.resume(&file, None).await?;
            let paths = tree::branches(handle.entries());
            if paths.is_empty() {
                println!("(empty session)");
                return Ok(());
            }
            for (i, branch) in paths.iter().enumerate() {
                println!("branch {} ({} entries):", i + 1, branch.len());
                for entry in branch {
                    println!("  {}", describe(entry));
                }
            }
        }
        Command::Path { file, at } => {
            let handle = manager.resume(&file, at.as_deref()).await?;
            if handle.skipped_lines() > 0 {
                eprintln!("warning: skipped {} corrupt line(s)", handle.skipped_lines());
            }
            for entry in manager.current_path(&handle) {
                println!("{}", describe(&entry));
            }
        }
    }

    Ok(())
}

/// One-line human summary of an entry.
fn describe(entry: &SessionEntry) -> String {
    let detail = match entry {
        SessionEntry::Message(e) => {
            let mut text = e.content.replace('\n', " ");
            if text.chars().count() > 60 {
                text = text.chars().take(60).collect();
                text.push('…');
            }
            format!("{:?}: {}", e.role, text)
        }
        SessionEntry::ModelChange(e) => format!(
            "model {}/{} -> {}/{}",
            e.prev_provider, e.prev_model, e.new_provider, e.new_model
        ),
        SessionEntry::ThinkingLevelChange(e) => {
            format!("thinking {} -> {}", e.prev_level, e.new_level)
        }
        SessionEntry::Compaction(e) => format!(
            "compaction ({} -> {} tokens, kept from {})",
            e.tokens_before, e.tokens_after, e.first_kept_entry_id
        ),
        SessionEntry::BranchSummary(e) => format!("branch from {}: {}", e.from_id, e.summary),
        SessionEntry::Label(e) => format!(
            "label {} on {}",
            e.label.as_deref().unwrap_or("-"),
            e.target_id
        ),
        SessionEntry::SessionInfo(e) => {
            format!("session name: {}", e.name.as_deref().unwrap_or("-"))
        }
        SessionEntry::Custom(e) => format!("custom {}", e.custom_type),
    };
    format!("[{}] {}", entry.id(), detail)
}
