//! Error taxonomy for ACL resolution, identity checks and publishing.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// The raw permission read for a node failed.
///
/// Never collapse this into an empty ACL.
#[derive(Debug, thiserror::Error)]
pub enum PermissionReadError {
    #[error("permission denied reading ACL of {}", .path.display())]
    Denied { path: PathBuf },
    #[error("failed to read ACL of {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed ACL on {}: {reason}", .path.display())]
    Malformed { path: PathBuf, reason: String },
}

impl PermissionReadError {
    pub fn from_io(path: impl Into<PathBuf>, err: io::Error) -> Self {
        let path = path.into();
        if err.kind() == io::ErrorKind::PermissionDenied {
            Self::Denied { path }
        } else {
            Self::Io { path, source: err }
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Denied { path } | Self::Io { path, .. } | Self::Malformed { path, .. } => path,
        }
    }
}

/// A path could not be turned into a canonical document identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("path {} is not absolute", .0.display())]
    NotAbsolute(PathBuf),
    #[error("path {} is not valid unicode", .0.display())]
    NonUnicode(PathBuf),
    #[error("identifier {0:?} begins with a reserved named-resource prefix")]
    ReservedPrefix(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchReason {
    /// The identifier names a virtual ACL resource, not a document.
    NamedResource,
    /// The identifier does not canonicalize back to itself.
    NotCanonical,
    OutsideRoot,
    /// File became folder or vice versa since it was indexed.
    KindChanged,
    Missing,
}

impl fmt::Display for MismatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            MismatchReason::NamedResource => "identifier denotes a named resource",
            MismatchReason::NotCanonical => "identifier is not canonical",
            MismatchReason::OutsideRoot => "path is not a descendant of the root",
            MismatchReason::KindChanged => "document kind changed since it was indexed",
            MismatchReason::Missing => "path does not exist or is not a file or folder",
        };
        f.write_str(text)
    }
}

/// A requested document does not map to a servable node. Always answered
/// with "not found".
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("document {requested:?} not found: {reason}")]
pub struct IdentityMismatch {
    pub requested: String,
    pub reason: MismatchReason,
}

impl IdentityMismatch {
    pub fn new(requested: impl Into<String>, reason: MismatchReason) -> Self {
        Self {
            requested: requested.into(),
            reason,
        }
    }
}

/// Failure reported by the publishing collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    /// Safe to retry with the same batch.
    #[error("transient publish failure: {0}")]
    Transient(String),
    #[error("permanent publish failure: {0}")]
    Permanent(String),
}

impl PublishError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PublishError::Transient(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AdaptorError {
    #[error(transparent)]
    PermissionRead(#[from] PermissionReadError),
    #[error(transparent)]
    NotFound(#[from] IdentityMismatch),
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl AdaptorError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True when the request must be answered as if the document did not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, AdaptorError::NotFound(_) | AdaptorError::Identity(_))
    }
}
