// Rebuilds the volume directory tree by chasing $FILE_NAME parent
// references across live records. Corrupt images routinely contain
// deleted ancestors and self-referencing parents, so the chain walk
// carries a visited set and an orphan sentinel instead of trusting the
// references.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::errors::MftError;
use crate::record::{FileRecord, MftEntryInfo};

/// Synthetic node collecting leaves whose ancestor chain left the live
/// set (deleted or missing parents).
pub const ORPHAN_KEY: &str = "ORPHAN";
pub const ORPHAN_NAME: &str = "$OrphanFiles";

/// One node of the reconstructed tree. Children are arena indices, keyed
/// by the child's record key, so parent and child never hold pointers to
/// each other.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DirectoryItem {
    pub name: String,
    /// Matches the owning `FileRecord` key.
    pub key: String,
    pub parent: Option<usize>,
    pub children: BTreeMap<String, usize>,
}

/// Arena-backed directory tree. Node 0 is always the volume root.
/// Insert-only: resolution adds nodes, nothing mutates them afterwards.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DirectoryTree {
    nodes: Vec<DirectoryItem>,
    index: HashMap<String, usize>,
}

impl DirectoryTree {
    pub fn new(root_key: &str) -> Self {
        let root = DirectoryItem {
            name: ".".to_string(),
            key: root_key.to_string(),
            parent: None,
            children: BTreeMap::new(),
        };
        let mut index = HashMap::new();
        index.insert(root_key.to_string(), 0);
        DirectoryTree {
            nodes: vec![root],
            index,
        }
    }

    pub fn root(&self) -> &DirectoryItem {
        &self.nodes[0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn node(&self, idx: usize) -> Option<&DirectoryItem> {
        self.nodes.get(idx)
    }

    pub fn by_key(&self, key: &str) -> Option<&DirectoryItem> {
        self.index.get(key).map(|&i| &self.nodes[i])
    }

    /// Fetch the child of `parent_idx` carrying `key`, creating it when
    /// absent. Returns the child's arena index.
    fn child_or_insert(&mut self, parent_idx: usize, key: &str, name: &str) -> usize {
        if let Some(&existing) = self.nodes[parent_idx].children.get(key) {
            return existing;
        }
        let idx = self.nodes.len();
        self.nodes.push(DirectoryItem {
            name: name.to_string(),
            key: key.to_string(),
            parent: Some(parent_idx),
            children: BTreeMap::new(),
        });
        self.nodes[parent_idx]
            .children
            .insert(key.to_string(), idx);
        self.index.entry(key.to_string()).or_insert(idx);
        idx
    }

    /// Walk/create the intermediate nodes along `ancestors` (root
    /// first, keys matching live records) and insert the leaf below the
    /// last one.
    pub fn insert(
        &mut self,
        ancestors: &[(String, String)],
        leaf_key: &str,
        leaf_name: &str,
    ) -> usize {
        let mut cursor = 0usize;
        for (key, name) in ancestors {
            if *key == self.nodes[0].key {
                cursor = 0;
                continue;
            }
            cursor = self.child_or_insert(cursor, key, name);
        }
        self.child_or_insert(cursor, leaf_key, leaf_name)
    }

    /// Full path of the node holding `key`, relative to the root,
    /// segments joined with '/'.
    pub fn path_of(&self, key: &str) -> Option<String> {
        let mut idx = *self.index.get(key)?;
        let mut segments = Vec::new();
        while let Some(node) = self.nodes.get(idx) {
            match node.parent {
                Some(parent) => {
                    segments.push(node.name.clone());
                    idx = parent;
                }
                None => break,
            }
        }
        segments.reverse();
        Some(segments.join("/"))
    }

    /// Resolve a '/'-separated path (relative to the root) to a node.
    pub fn lookup(&self, path: &str) -> Option<&DirectoryItem> {
        let mut idx = 0usize;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let node = &self.nodes[idx];
            idx = *node
                .children
                .values()
                .find(|&&child| self.nodes[child].name == segment)?;
        }
        self.nodes.get(idx)
    }
}

/// Look a reference up in the live table. A zero sequence number is
/// unconstrained and matches any live generation of that entry.
fn lookup_live<'a>(
    live: &'a HashMap<String, FileRecord>,
    reference: &MftEntryInfo,
) -> Option<&'a FileRecord> {
    if reference.sequence_number != 0 {
        return live.get(&reference.key());
    }
    live.values()
        .find(|r| r.entry_number == reference.entry_number)
}

/// Compute the ancestor chain for one parent reference, root first.
///
/// Walks `parent` upward through the live table until the root key,
/// collecting `(key, name)` pairs. A reference that leaves the live set
/// fails with `OrphanedParent`; a reference that revisits a key already
/// walked fails with `CycleDetected` instead of looping forever.
pub fn parent_chain(
    live: &HashMap<String, FileRecord>,
    parent: &MftEntryInfo,
    root_key: &str,
) -> Result<Vec<(String, String)>, MftError> {
    let mut stack: Vec<(String, String)> = Vec::new();
    let mut visited = HashSet::new();
    let mut current = *parent;

    loop {
        let record = lookup_live(live, &current).ok_or_else(|| MftError::OrphanedParent {
            key: current.key(),
        })?;
        let key = record.key();
        if key == root_key {
            break;
        }
        if !visited.insert(key.clone()) {
            return Err(MftError::CycleDetected { key });
        }
        let name = record.primary_name().ok_or_else(|| MftError::OrphanedParent {
            key: key.clone(),
        })?;
        let next = record
            .file_names()
            .first()
            .map(|f| f.parent_mft_record)
            .ok_or_else(|| MftError::OrphanedParent { key: key.clone() })?;
        stack.push((key, name));
        current = next;
    }
    stack.push((root_key.to_string(), String::new()));

    // Popped from the top the stack reads root -> immediate parent.
    stack.reverse();
    Ok(stack)
}

/// Build the directory tree over the completed live table.
///
/// Extension records are owned by their base record and skipped; every
/// $FILE_NAME of the remaining records (hard links, DOS doubles)
/// produces an independent insertion. Orphaned chains attach under a
/// synthetic root child, cyclic chains are dropped with a warning.
pub fn resolve_directory_tree(
    live: &HashMap<String, FileRecord>,
    root_key: &str,
) -> DirectoryTree {
    let mut tree = DirectoryTree::new(root_key);
    let mut orphans = 0usize;
    let mut cycles = 0usize;

    for record in live.values() {
        let key = record.key();
        if key == root_key || record.is_extension_record() {
            continue;
        }
        for file_name in record.file_names() {
            match parent_chain(live, &file_name.parent_mft_record, root_key) {
                Ok(ancestors) => {
                    tree.insert(&ancestors, &key, &file_name.name);
                }
                Err(MftError::OrphanedParent { key: missing }) => {
                    orphans += 1;
                    warn!(
                        "entry {}: ancestor {} left the live set, filing under {}",
                        record.entry_number, missing, ORPHAN_NAME
                    );
                    let orphan_root = vec![
                        (root_key.to_string(), String::new()),
                        (ORPHAN_KEY.to_string(), ORPHAN_NAME.to_string()),
                    ];
                    tree.insert(&orphan_root, &key, &file_name.name);
                }
                Err(MftError::CycleDetected { key: at }) => {
                    cycles += 1;
                    warn!(
                        "entry {}: parent chain cycles at {}, dropping this name",
                        record.entry_number, at
                    );
                }
                Err(e) => {
                    warn!("entry {}: unresolvable parent chain: {}", record.entry_number, e);
                }
            }
        }
    }

    info!(
        "directory tree resolved: {} nodes, {} orphaned chains, {} cyclic chains",
        tree.len(),
        orphans,
        cycles
    );
    tree
}
