//! Tree reconstruction over parent-linked session entries.
//!
//! Entries persist as a flat list; each one names its parent by id. This
//! module rebuilds the branching structure: an arena-backed tree for
//! display, root-to-leaf branches for context assembly, and a cycle-safe
//! upward walk. Everything here is pure and synchronous.
//!
//! The arena representation (indices, not nested boxes) means no step is
//! recursive, so arbitrarily deep or wide trees cannot overflow the call
//! stack during construction, traversal, or drop.

use crate::session::entry::SessionEntry;
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// One node in a reconstructed session tree.
#[derive(Debug, Clone)]
pub struct TreeNode {
    pub entry: SessionEntry,
    /// Arena index of the parent, `None` for roots.
    pub parent: Option<usize>,
    /// Arena indices of children, sorted by timestamp ascending.
    pub children: Vec<usize>,
}

/// Arena-backed session tree.
///
/// Entries with no parent, an unknown parent, or a self-referencing parent
/// all become roots; the first root in file order is *the* tree for
/// display purposes. Callers that need every conversation path should use
/// [`branches`] instead.
#[derive(Debug, Clone)]
pub struct SessionTree {
    nodes: Vec<TreeNode>,
    roots: Vec<usize>,
    index: HashMap<String, usize>,
}

impl SessionTree {
    /// The first root discovered, in file order.
    pub fn root(&self) -> Option<&TreeNode> {
        self.roots.first().map(|&i| &self.nodes[i])
    }

    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> &TreeNode {
        &self.nodes[index]
    }

    /// Look up a node by entry id.
    pub fn get(&self, id: &str) -> Option<&TreeNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Reconstruct the tree from a flat entry list. Returns `None` for an
/// empty list. Duplicate ids keep the first occurrence.
pub fn build_tree(entries: &[SessionEntry]) -> Option<SessionTree> {
    if entries.is_empty() {
        return None;
    }

    let mut nodes: Vec<TreeNode> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for entry in entries {
        if index.contains_key(entry.id()) {
            continue;
        }
        index.insert(entry.id().to_string(), nodes.len());
        nodes.push(TreeNode {
            entry: entry.clone(),
            parent: None,
            children: Vec::new(),
        });
    }

    // Link children under parents; parentless, dangling, and
    // self-referencing entries are all roots.
    let mut roots: Vec<usize> = Vec::new();
    for i in 0..nodes.len() {
        let parent = nodes[i]
            .entry
            .parent_id()
            .and_then(|p| index.get(p).copied())
            .filter(|&p| p != i);
        match parent {
            Some(p) => {
                nodes[i].parent = Some(p);
                nodes[p].children.push(i);
            }
            None => roots.push(i),
        }
    }

    // Order siblings chronologically; file order breaks timestamp ties.
    let stamps: Vec<_> = nodes.iter().map(|n| n.entry.timestamp()).collect();
    for node in &mut nodes {
        node.children.sort_by_key(|&c| (stamps[c], c));
    }

    Some(SessionTree {
        nodes,
        roots,
        index,
    })
}

/// Extract every root-to-leaf conversation path, one per leaf, in leaf
/// file order.
pub fn branches(entries: &[SessionEntry]) -> Vec<Vec<SessionEntry>> {
    let lookup = id_map(entries);

    let mut has_children: HashSet<&str> = HashSet::new();
    for entry in lookup.values() {
        if let Some(parent_id) = entry.parent_id() {
            if parent_id != entry.id() && lookup.contains_key(parent_id) {
                has_children.insert(parent_id);
            }
        }
    }

    let mut seen: HashSet<&str> = HashSet::new();
    let mut result = Vec::new();
    for entry in entries {
        if !seen.insert(entry.id()) {
            continue;
        }
        if has_children.contains(entry.id()) {
            continue;
        }
        let mut branch = walk_to_root(entries, entry.id());
        branch.reverse();
        result.push(branch);
    }
    result
}

/// Follow parent links from `start_id` upward, collecting a leaf-to-root
/// list. Unknown `start_id` yields an empty path. A revisited id aborts
/// traversal immediately so corrupt parent links cannot hang the walk.
pub fn walk_to_root(entries: &[SessionEntry], start_id: &str) -> Vec<SessionEntry> {
    let lookup = id_map(entries);

    let mut path = Vec::new();
    let mut visited: HashSet<&str> = HashSet::new();
    let mut current = match lookup.get(start_id) {
        Some(&entry) => entry,
        None => return path,
    };

    loop {
        if !visited.insert(current.id()) {
            warn!(
                "Cycle detected at entry {} while walking to root, returning partial path",
                current.id()
            );
            break;
        }
        path.push(current.clone());
        match current.parent_id().and_then(|p| lookup.get(p)) {
            Some(&parent) => current = parent,
            None => break,
        }
    }
    path
}

/// Linear lookup by id. Session logs are small; the id map built for tree
/// construction is the only index this module needs.
pub fn find_entry<'a>(entries: &'a [SessionEntry], id: &str) -> Option<&'a SessionEntry> {
    entries.iter().find(|e| e.id() == id)
}

/// First-wins id map over an entry list.
fn id_map(entries: &[SessionEntry]) -> HashMap<&str, &SessionEntry> {
    let mut map: HashMap<&str, &SessionEntry> = HashMap::new();
    for entry in entries {
        map.entry(entry.id()).or_insert(entry);
    }
    map
}
