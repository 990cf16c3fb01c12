//! Identifiers for the virtual ACL resources attached to real documents.
//!
//! A named resource is `prefix + CanonicalDocId`. It never denotes content;
//! it denotes one of the inherited ACL variants of the owning node so that a
//! child can point at its parent's variant without the parent resending it.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::acl::AclSet;
use crate::docid::CanonicalDocId;

/// Named resources produced for one node, keyed by identifier.
pub type NamedResourceBatch = BTreeMap<NamedResourceId, AclSet>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NamedResourceKind {
    /// Share-level ACL; published for the root only.
    Share,
    AllDescendantFolders,
    AllDescendantFiles,
    ChildFoldersOnly,
    ChildFilesOnly,
}

impl NamedResourceKind {
    pub const ALL: [NamedResourceKind; 5] = [
        NamedResourceKind::Share,
        NamedResourceKind::AllDescendantFolders,
        NamedResourceKind::AllDescendantFiles,
        NamedResourceKind::ChildFoldersOnly,
        NamedResourceKind::ChildFilesOnly,
    ];

    /// Canonical ids start with `/` or a drive prefix, so none of these can
    /// begin a real document identifier.
    pub fn prefix(&self) -> &'static str {
        match self {
            NamedResourceKind::Share => "ShareAcl:",
            NamedResourceKind::AllDescendantFolders => "AllDescendantFoldersAcl:",
            NamedResourceKind::AllDescendantFiles => "AllDescendantFilesAcl:",
            NamedResourceKind::ChildFoldersOnly => "ChildFoldersOnlyAcl:",
            NamedResourceKind::ChildFilesOnly => "ChildFilesOnlyAcl:",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NamedResourceId {
    kind: NamedResourceKind,
    node: CanonicalDocId,
}

impl NamedResourceId {
    pub fn new(node: &CanonicalDocId, kind: NamedResourceKind) -> Self {
        Self {
            kind,
            node: node.clone(),
        }
    }

    pub fn kind(&self) -> NamedResourceKind {
        self.kind
    }

    /// The real document this resource is attached to.
    pub fn owner(&self) -> &CanonicalDocId {
        &self.node
    }

    /// Strip the prefix off a rendered identifier.
    pub fn parse(raw: &str) -> Option<Self> {
        NamedResourceKind::ALL.iter().find_map(|kind| {
            let rest = raw.strip_prefix(kind.prefix())?;
            let node = CanonicalDocId::from_string(rest).ok()?;
            Some(Self { kind: *kind, node })
        })
    }

    pub fn has_reserved_prefix(raw: &str) -> bool {
        NamedResourceKind::ALL
            .iter()
            .any(|kind| raw.starts_with(kind.prefix()))
    }
}

pub fn make_named_resource_id(node: &CanonicalDocId, kind: NamedResourceKind) -> NamedResourceId {
    NamedResourceId::new(node, kind)
}

impl fmt::Display for NamedResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.prefix(), self.node)
    }
}

impl Serialize for NamedResourceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NamedResourceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NamedResourceId::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("not a named resource id: {raw}")))
    }
}
