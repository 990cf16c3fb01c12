//! Access-control entries, ACL sets and per-node inheritance resolution.

use serde::{Deserialize, Serialize};

use crate::named::NamedResourceId;

pub mod builder;
pub mod context;
pub mod principal;

pub use builder::{share_acl, AclBuilder};
pub use context::InheritanceContext;
pub use principal::PrincipalFilter;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AceEffect {
    Allow,
    Deny,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrincipalKind {
    User,
    Group,
}

/// Permission bits carried through untouched.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessMask(pub u32);

/// NFSv4 ACE inheritance flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct InheritFlags(u32);

impl InheritFlags {
    pub const NONE: InheritFlags = InheritFlags(0);
    pub const FILE_INHERIT: InheritFlags = InheritFlags(0x1);
    pub const DIRECTORY_INHERIT: InheritFlags = InheritFlags(0x2);
    pub const NO_PROPAGATE_INHERIT: InheritFlags = InheritFlags(0x4);
    pub const INHERIT_ONLY: InheritFlags = InheritFlags(0x8);
    /// Entry was inherited from an ancestor rather than set on the node.
    pub const INHERITED: InheritFlags = InheritFlags(0x80);

    const MASK: u32 = 0x8F;

    /// Keep only the inheritance bits of a raw NFSv4 ACE flag word.
    pub fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & Self::MASK)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: InheritFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn with(self, other: InheritFlags) -> Self {
        Self(self.0 | other.0)
    }
}

/// A single published permission entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessControlEntry {
    pub principal: String,
    pub kind: PrincipalKind,
    pub effect: AceEffect,
    pub mask: AccessMask,
}

/// Entry as read from the source filesystem, before filtering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawAce {
    pub entry: AccessControlEntry,
    pub flags: InheritFlags,
}

impl RawAce {
    pub fn allow(principal: impl Into<String>) -> Self {
        Self::with_effect(principal, AceEffect::Allow)
    }

    pub fn deny(principal: impl Into<String>) -> Self {
        Self::with_effect(principal, AceEffect::Deny)
    }

    fn with_effect(principal: impl Into<String>, effect: AceEffect) -> Self {
        Self {
            entry: AccessControlEntry {
                principal: principal.into(),
                kind: PrincipalKind::User,
                effect,
                mask: AccessMask(u32::MAX),
            },
            flags: InheritFlags::NONE,
        }
    }

    pub fn group(mut self) -> Self {
        self.entry.kind = PrincipalKind::Group;
        self
    }

    pub fn with_flags(mut self, flags: InheritFlags) -> Self {
        self.flags = self.flags.with(flags);
        self
    }

    pub fn with_mask(mut self, mask: u32) -> Self {
        self.entry.mask = AccessMask(mask);
        self
    }

    pub fn is_inherited(&self) -> bool {
        self.flags.contains(InheritFlags::INHERITED)
    }
}

/// One read of a node's permissions, split by origin.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AclViews {
    pub direct: Vec<RawAce>,
    pub inherited: Vec<RawAce>,
}

impl AclViews {
    pub fn from_entries(entries: impl IntoIterator<Item = RawAce>) -> Self {
        let (inherited, direct) = entries.into_iter().partition(RawAce::is_inherited);
        Self { direct, inherited }
    }
}

/// Ordered entries plus an optional pointer to the set they inherit from.
///
/// Entries are stored deny-before-allow, keeping the relative order of each
/// group. Everything reachable through `inherit_from` ranks after them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawAclSet")]
pub struct AclSet {
    entries: Vec<AccessControlEntry>,
    inherit_from: Option<NamedResourceId>,
}

#[derive(Deserialize)]
struct RawAclSet {
    entries: Vec<AccessControlEntry>,
    inherit_from: Option<NamedResourceId>,
}

impl From<RawAclSet> for AclSet {
    fn from(raw: RawAclSet) -> Self {
        AclSet::new(raw.entries, raw.inherit_from)
    }
}

impl AclSet {
    pub fn new(entries: Vec<AccessControlEntry>, inherit_from: Option<NamedResourceId>) -> Self {
        let (mut ordered, allows): (Vec<_>, Vec<_>) = entries
            .into_iter()
            .partition(|entry| entry.effect == AceEffect::Deny);
        ordered.extend(allows);
        Self {
            entries: ordered,
            inherit_from,
        }
    }

    pub fn empty(inherit_from: Option<NamedResourceId>) -> Self {
        Self {
            entries: Vec::new(),
            inherit_from,
        }
    }

    pub fn entries(&self) -> &[AccessControlEntry] {
        &self.entries
    }

    pub fn inherit_from(&self) -> Option<&NamedResourceId> {
        self.inherit_from.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
