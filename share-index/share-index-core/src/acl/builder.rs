use tracing::debug;

use super::{
    AccessControlEntry, AclSet, AclViews, InheritFlags, InheritanceContext, PrincipalFilter, RawAce,
};
use crate::docid::CanonicalDocId;
use crate::named::{NamedResourceBatch, NamedResourceId, NamedResourceKind};

/// Derives a node's effective ACL and its child-facing variants from one
/// permission snapshot.
///
/// Only direct entries are considered. Inherited entries are already
/// expressed by the reference chain and re-emitting them would count them
/// twice.
#[derive(Clone, Debug)]
pub struct AclBuilder {
    direct: Vec<RawAce>,
}

impl AclBuilder {
    /// Filters principals once; every variant derives from the filtered list.
    pub fn new(views: AclViews, filter: &PrincipalFilter) -> Self {
        let direct = views
            .direct
            .into_iter()
            .filter(|ace| {
                let keep = filter.is_publishable(&ace.entry.principal);
                if !keep {
                    debug!(principal = %ace.entry.principal, "dropping unsupported principal");
                }
                keep
            })
            .collect();
        Self { direct }
    }

    pub fn effective_acl(&self, inherit_from: &NamedResourceId) -> AclSet {
        self.select(inherit_from, |flags| !flags.contains(InheritFlags::INHERIT_ONLY))
    }

    pub fn all_descendant_folders_acl(&self, parent_all_folders: &NamedResourceId) -> AclSet {
        self.select(parent_all_folders, |flags| {
            flags.contains(InheritFlags::DIRECTORY_INHERIT)
                && !flags.contains(InheritFlags::NO_PROPAGATE_INHERIT)
        })
    }

    pub fn all_descendant_files_acl(&self, parent_all_files: &NamedResourceId) -> AclSet {
        self.select(parent_all_files, |flags| {
            flags.contains(InheritFlags::FILE_INHERIT)
                && !flags.contains(InheritFlags::NO_PROPAGATE_INHERIT)
        })
    }

    /// Immediate child folders get one-level grants too, but chain to the
    /// parent's all-descendants variant.
    pub fn child_folders_only_acl(&self, parent_all_folders: &NamedResourceId) -> AclSet {
        self.select(parent_all_folders, |flags| flags.contains(InheritFlags::DIRECTORY_INHERIT))
    }

    pub fn child_files_only_acl(&self, parent_all_files: &NamedResourceId) -> AclSet {
        self.select(parent_all_files, |flags| flags.contains(InheritFlags::FILE_INHERIT))
    }

    /// The four variants a container publishes for its children.
    pub fn inheritable_resources(
        &self,
        node: &CanonicalDocId,
        ctx: &InheritanceContext,
    ) -> NamedResourceBatch {
        let id = |kind| NamedResourceId::new(node, kind);
        NamedResourceBatch::from([
            (
                id(NamedResourceKind::AllDescendantFolders),
                self.all_descendant_folders_acl(&ctx.all_descendant_folders),
            ),
            (
                id(NamedResourceKind::AllDescendantFiles),
                self.all_descendant_files_acl(&ctx.all_descendant_files),
            ),
            (
                id(NamedResourceKind::ChildFoldersOnly),
                self.child_folders_only_acl(&ctx.all_descendant_folders),
            ),
            (
                id(NamedResourceKind::ChildFilesOnly),
                self.child_files_only_acl(&ctx.all_descendant_files),
            ),
        ])
    }

    fn select(
        &self,
        inherit_from: &NamedResourceId,
        keep: impl Fn(InheritFlags) -> bool,
    ) -> AclSet {
        let entries: Vec<AccessControlEntry> = self
            .direct
            .iter()
            .filter(|ace| keep(ace.flags))
            .map(|ace| ace.entry.clone())
            .collect();
        AclSet::new(entries, Some(inherit_from.clone()))
    }
}

/// Share-level ACL for the root. It terminates the chain.
pub fn share_acl(entries: Vec<RawAce>, filter: &PrincipalFilter) -> AclSet {
    let entries = entries
        .into_iter()
        .filter(|ace| filter.is_publishable(&ace.entry.principal))
        .map(|ace| ace.entry)
        .collect();
    AclSet::new(entries, None)
}
