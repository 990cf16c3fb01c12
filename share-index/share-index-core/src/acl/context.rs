use crate::delegate::NodeKind;
use crate::docid::CanonicalDocId;
use crate::named::{NamedResourceId, NamedResourceKind};

/// Identifiers of the parent's inherited variants, derived per visit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InheritanceContext {
    pub all_descendant_folders: NamedResourceId,
    pub all_descendant_files: NamedResourceId,
    pub child_folders_only: NamedResourceId,
    pub child_files_only: NamedResourceId,
    pub is_root: bool,
}

impl InheritanceContext {
    /// The root has no parent in the index; every slot points at its own
    /// share ACL so the chain ends there.
    pub fn for_root(root: &CanonicalDocId) -> Self {
        let share = NamedResourceId::new(root, NamedResourceKind::Share);
        Self {
            all_descendant_folders: share.clone(),
            all_descendant_files: share.clone(),
            child_folders_only: share.clone(),
            child_files_only: share,
            is_root: true,
        }
    }

    pub fn for_child(parent: &CanonicalDocId) -> Self {
        let id = |kind| NamedResourceId::new(parent, kind);
        Self {
            all_descendant_folders: id(NamedResourceKind::AllDescendantFolders),
            all_descendant_files: id(NamedResourceKind::AllDescendantFiles),
            child_folders_only: id(NamedResourceKind::ChildFoldersOnly),
            child_files_only: id(NamedResourceKind::ChildFilesOnly),
            is_root: false,
        }
    }

    /// Context for `node`, looking only at its parent link.
    pub fn resolve(node: &CanonicalDocId, root: &CanonicalDocId) -> Self {
        match node.parent() {
            Some(parent) if node != root => Self::for_child(&parent),
            _ => Self::for_root(root),
        }
    }

    /// Where the effective ACL of a node of `kind` points.
    pub fn inherit_from(&self, kind: NodeKind) -> &NamedResourceId {
        match kind {
            NodeKind::Folder => &self.child_folders_only,
            NodeKind::File => &self.child_files_only,
        }
    }
}
