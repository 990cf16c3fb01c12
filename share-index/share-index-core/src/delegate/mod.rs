//! Filesystem access used by the adaptor.

use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::acl::{AclViews, RawAce};
use crate::docid::{self, CanonicalDocId};
use crate::error::{IdentityError, PermissionReadError};

mod local;
mod memory;
pub mod nfs4;

pub use local::LocalDelegate;
pub use memory::InMemoryDelegate;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    File,
    Folder,
}

impl NodeKind {
    pub fn is_folder(&self) -> bool {
        matches!(self, NodeKind::Folder)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeAttributes {
    pub kind: NodeKind,
    pub size: u64,
    pub modified: Option<SystemTime>,
    pub created: Option<SystemTime>,
    pub accessed: Option<SystemTime>,
}

/// Trait for reading nodes and their permissions from a share.
pub trait FileDelegate: Send + Sync {
    /// Read the node's permission entries once, split into direct and inherited.
    fn acl_views(&self, path: &Path) -> Result<AclViews, PermissionReadError>;

    /// Permissions enforced by the share itself, above the root folder.
    fn share_acl(&self, path: &Path) -> Result<Vec<RawAce>, PermissionReadError>;

    fn doc_id(&self, path: &Path) -> Result<CanonicalDocId, IdentityError> {
        docid::canonicalize(path)
    }

    /// `None` when the node is missing or neither a file nor a folder.
    fn attributes(&self, path: &Path) -> io::Result<Option<NodeAttributes>>;

    /// Attributes of the configured root. Unlike `attributes`, a root that
    /// is a link to a folder is accepted.
    fn root_attributes(&self, path: &Path) -> io::Result<Option<NodeAttributes>> {
        self.attributes(path)
    }

    /// Read at most `limit` bytes of a file.
    fn read_content(&self, path: &Path, limit: u64) -> io::Result<Vec<u8>>;

    /// Immediate children of a folder, sorted by path.
    fn list_children(&self, path: &Path) -> io::Result<Vec<PathBuf>>;
}
