use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use parking_lot::RwLock;

use super::{FileDelegate, NodeAttributes, NodeKind};
use crate::acl::{AclViews, RawAce};
use crate::error::PermissionReadError;

struct Node {
    kind: NodeKind,
    content: Vec<u8>,
    acl: Vec<RawAce>,
    modified: SystemTime,
}

#[derive(Default)]
struct Tree {
    nodes: BTreeMap<PathBuf, Node>,
    share_acl: Vec<RawAce>,
    failing: HashSet<PathBuf>,
    acl_reads: HashMap<PathBuf, usize>,
}

/// In-memory share used for tests and embedding.
#[derive(Default)]
pub struct InMemoryDelegate {
    tree: RwLock<Tree>,
}

impl InMemoryDelegate {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, path: impl Into<PathBuf>, kind: NodeKind, content: Vec<u8>, acl: Vec<RawAce>) {
        self.tree.write().nodes.insert(
            path.into(),
            Node {
                kind,
                content,
                acl,
                modified: SystemTime::now(),
            },
        );
    }

    pub fn add_folder(&self, path: impl Into<PathBuf>, acl: Vec<RawAce>) {
        self.insert(path, NodeKind::Folder, Vec::new(), acl);
    }

    pub fn add_file(
        &self,
        path: impl Into<PathBuf>,
        content: impl Into<Vec<u8>>,
        acl: Vec<RawAce>,
    ) {
        self.insert(path, NodeKind::File, content.into(), acl);
    }

    pub fn set_acl(&self, path: &Path, acl: Vec<RawAce>) {
        if let Some(node) = self.tree.write().nodes.get_mut(path) {
            node.acl = acl;
        }
    }

    pub fn set_share_acl(&self, acl: Vec<RawAce>) {
        self.tree.write().share_acl = acl;
    }

    /// Make every permission read of `path` fail with access denied.
    pub fn fail_acl_reads(&self, path: impl Into<PathBuf>) {
        self.tree.write().failing.insert(path.into());
    }

    /// Remove `path` and everything beneath it.
    pub fn remove(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        self.tree
            .write()
            .nodes
            .retain(|candidate, _| !candidate.starts_with(path));
    }

    pub fn acl_reads(&self, path: &Path) -> usize {
        self.tree.read().acl_reads.get(path).copied().unwrap_or(0)
    }

    pub fn total_acl_reads(&self) -> usize {
        self.tree.read().acl_reads.values().sum()
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("{} not found", path.display()))
}

impl FileDelegate for InMemoryDelegate {
    fn acl_views(&self, path: &Path) -> Result<AclViews, PermissionReadError> {
        let mut tree = self.tree.write();
        *tree.acl_reads.entry(path.to_path_buf()).or_default() += 1;
        if tree.failing.contains(path) {
            return Err(PermissionReadError::Denied {
                path: path.to_path_buf(),
            });
        }
        let node = tree
            .nodes
            .get(path)
            .ok_or_else(|| PermissionReadError::from_io(path, not_found(path)))?;
        Ok(AclViews::from_entries(node.acl.iter().cloned()))
    }

    fn share_acl(&self, _path: &Path) -> Result<Vec<RawAce>, PermissionReadError> {
        Ok(self.tree.read().share_acl.clone())
    }

    fn attributes(&self, path: &Path) -> io::Result<Option<NodeAttributes>> {
        Ok(self.tree.read().nodes.get(path).map(|node| NodeAttributes {
            kind: node.kind,
            size: node.content.len() as u64,
            modified: Some(node.modified),
            created: Some(node.modified),
            accessed: None,
        }))
    }

    fn read_content(&self, path: &Path, limit: u64) -> io::Result<Vec<u8>> {
        let tree = self.tree.read();
        let node = tree.nodes.get(path).ok_or_else(|| not_found(path))?;
        let end = node.content.len().min(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(node.content[..end].to_vec())
    }

    fn list_children(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let tree = self.tree.read();
        if !tree.nodes.contains_key(path) {
            return Err(not_found(path));
        }
        Ok(tree
            .nodes
            .keys()
            .filter(|candidate| candidate.parent() == Some(path))
            .cloned()
            .collect())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn lists_only_immediate_children() {
        let delegate = InMemoryDelegate::new();
        delegate.add_folder("/share", vec![]);
        delegate.add_folder("/share/docs", vec![]);
        delegate.add_file("/share/docs/a.txt", "a", vec![]);
        delegate.add_file("/share/b.txt", "b", vec![]);

        let children = delegate.list_children(Path::new("/share")).unwrap();
        assert_eq!(children, [PathBuf::from("/share/b.txt"), PathBuf::from("/share/docs")]);
    }

    #[test]
    fn injected_failures_and_read_counts() {
        let delegate = InMemoryDelegate::new();
        delegate.add_folder("/share", vec![RawAce::allow("alice")]);
        delegate.fail_acl_reads("/share");

        let err = delegate.acl_views(Path::new("/share")).unwrap_err();
        assert!(matches!(err, PermissionReadError::Denied { .. }));
        assert_eq!(delegate.acl_reads(Path::new("/share")), 1);
        assert_eq!(delegate.total_acl_reads(), 1);
    }

    #[test]
    fn remove_drops_subtree() {
        let delegate = InMemoryDelegate::new();
        delegate.add_folder("/share", vec![]);
        delegate.add_folder("/share/docs", vec![]);
        delegate.add_file("/share/docs/a.txt", "a", vec![]);
        delegate.remove(Path::new("/share/docs"));

        assert!(delegate.attributes(Path::new("/share/docs/a.txt")).unwrap().is_none());
        assert!(delegate.attributes(Path::new("/share")).unwrap().is_some());
    }
}
