//! Canonical document identity for filesystem paths.
//!
//! Identifiers are derived lexically from an absolute path: `.` components
//! are dropped, `..` pops the previous component, and separators are
//! normalised to `/`. On Windows the identifier is also lower-cased because
//! the filesystem is case-insensitive.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{IdentityError, IdentityMismatch, MismatchReason};
use crate::named::NamedResourceId;

/// Normalised, stable identity of a real filesystem node.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct CanonicalDocId(String);

impl CanonicalDocId {
    /// Wraps an identifier that is already canonical. Does not normalise.
    pub fn from_string(id: impl Into<String>) -> Result<Self, IdentityError> {
        let id = id.into();
        if NamedResourceId::has_reserved_prefix(&id) {
            return Err(IdentityError::ReservedPrefix(id));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_path(&self) -> PathBuf {
        PathBuf::from(&self.0)
    }

    /// Identifier of the containing folder, `None` at the filesystem root.
    pub fn parent(&self) -> Option<CanonicalDocId> {
        Path::new(&self.0)
            .parent()
            .and_then(|parent| canonicalize(parent).ok())
    }

    /// Last path component, or the whole identifier for a filesystem root.
    pub fn name(&self) -> &str {
        self.0
            .rsplit('/')
            .find(|part| !part.is_empty())
            .unwrap_or(&self.0)
    }
}

impl fmt::Display for CanonicalDocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for CanonicalDocId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        CanonicalDocId::from_string(raw).map_err(serde::de::Error::custom)
    }
}

/// Derive the canonical identifier for an absolute path.
pub fn canonicalize(path: &Path) -> Result<CanonicalDocId, IdentityError> {
    if !path.is_absolute() {
        return Err(IdentityError::NotAbsolute(path.to_path_buf()));
    }
    let non_unicode = || IdentityError::NonUnicode(path.to_path_buf());

    let mut prefix = String::new();
    let mut parts: Vec<&str> = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => {
                prefix = p.as_os_str().to_str().ok_or_else(non_unicode)?.to_string();
            }
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir => {
                parts.pop();
            }
            Component::Normal(name) => parts.push(name.to_str().ok_or_else(non_unicode)?),
        }
    }

    let mut id = prefix;
    id.push('/');
    id.push_str(&parts.join("/"));
    if cfg!(windows) {
        id = id.replace('\\', "/").to_lowercase();
    }
    CanonicalDocId::from_string(id)
}

/// Walk parent links from `id` until `root` is met or the chain runs out.
pub fn is_descendant_of(id: &CanonicalDocId, root: &CanonicalDocId) -> bool {
    let root = Path::new(root.as_str());
    Path::new(id.as_str())
        .ancestors()
        .any(|ancestor| ancestor == root)
}

/// Maps paths under a configured root to document identifiers and screens
/// incoming requests before any ACL work is done.
#[derive(Clone, Debug)]
pub struct DocIdMapper {
    root: CanonicalDocId,
}

impl DocIdMapper {
    pub fn new(root: &Path) -> Result<Self, IdentityError> {
        Ok(Self {
            root: canonicalize(root)?,
        })
    }

    pub fn root(&self) -> &CanonicalDocId {
        &self.root
    }

    pub fn is_root(&self, id: &CanonicalDocId) -> bool {
        *id == self.root
    }

    pub fn is_under_root(&self, id: &CanonicalDocId) -> bool {
        is_descendant_of(id, &self.root)
    }

    /// Accept `requested` only if it is a real document identifier that
    /// round-trips to itself and lies under the root.
    pub fn validate_request(&self, requested: &str) -> Result<CanonicalDocId, IdentityMismatch> {
        let mismatch = |reason| IdentityMismatch::new(requested, reason);

        if NamedResourceId::has_reserved_prefix(requested) {
            return Err(mismatch(MismatchReason::NamedResource));
        }
        let id = canonicalize(Path::new(requested))
            .map_err(|_| mismatch(MismatchReason::NotCanonical))?;
        if id.as_str() != requested {
            return Err(mismatch(MismatchReason::NotCanonical));
        }
        if !self.is_under_root(&id) {
            return Err(mismatch(MismatchReason::OutsideRoot));
        }
        Ok(id)
    }
}
