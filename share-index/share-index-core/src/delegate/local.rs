use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use super::{nfs4, FileDelegate, NodeAttributes, NodeKind};
use crate::acl::{AclViews, PrincipalKind, RawAce};
use crate::error::PermissionReadError;

/// Delegate backed by the local filesystem.
///
/// Permissions come from the NFSv4 ACL attribute when present, otherwise
/// from the POSIX read bits of owner, group and others.
#[derive(Clone, Debug, Default)]
pub struct LocalDelegate;

impl LocalDelegate {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(unix)]
fn mode_acl(path: &Path) -> Result<AclViews, PermissionReadError> {
    use std::os::unix::fs::PermissionsExt;

    let mode = fs::metadata(path)
        .map_err(|e| PermissionReadError::from_io(path, e))?
        .permissions()
        .mode();
    let entries = [
        ("OWNER@", 0o400, PrincipalKind::User),
        ("GROUP@", 0o040, PrincipalKind::Group),
        ("EVERYONE@", 0o004, PrincipalKind::Group),
    ]
    .into_iter()
    .filter(|(_, bit, _)| mode & bit != 0)
    .map(|(who, _, kind)| {
        let ace = RawAce::allow(who).with_mask(nfs4::ACE_READ_DATA);
        match kind {
            PrincipalKind::Group => ace.group(),
            PrincipalKind::User => ace,
        }
    });
    Ok(AclViews::from_entries(entries))
}

#[cfg(not(unix))]
fn mode_acl(path: &Path) -> Result<AclViews, PermissionReadError> {
    fs::metadata(path).map_err(|e| PermissionReadError::from_io(path, e))?;
    Ok(AclViews::default())
}

fn node_attributes(meta: io::Result<fs::Metadata>) -> io::Result<Option<NodeAttributes>> {
    let meta = match meta {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let kind = if meta.is_dir() {
        NodeKind::Folder
    } else if meta.is_file() {
        NodeKind::File
    } else {
        return Ok(None);
    };
    Ok(Some(NodeAttributes {
        kind,
        size: meta.len(),
        modified: meta.modified().ok(),
        created: meta.created().ok(),
        accessed: meta.accessed().ok(),
    }))
}

impl FileDelegate for LocalDelegate {
    fn acl_views(&self, path: &Path) -> Result<AclViews, PermissionReadError> {
        match nfs4::read_acl(path)? {
            Some(views) => Ok(views),
            None => mode_acl(path),
        }
    }

    /// A local mount has no share layer above the root.
    fn share_acl(&self, _path: &Path) -> Result<Vec<RawAce>, PermissionReadError> {
        Ok(Vec::new())
    }

    fn attributes(&self, path: &Path) -> io::Result<Option<NodeAttributes>> {
        node_attributes(fs::symlink_metadata(path))
    }

    fn root_attributes(&self, path: &Path) -> io::Result<Option<NodeAttributes>> {
        node_attributes(fs::metadata(path))
    }

    fn read_content(&self, path: &Path, limit: u64) -> io::Result<Vec<u8>> {
        let mut content = Vec::new();
        fs::File::open(path)?.take(limit).read_to_end(&mut content)?;
        Ok(content)
    }

    fn list_children(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let mut children = fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<io::Result<Vec<_>>>()?;
        children.sort();
        Ok(children)
    }
}
