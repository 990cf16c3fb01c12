//! Store of published ACLs with lazy evaluation of reference chains.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::acl::{AccessControlEntry, AceEffect, AclSet, PrincipalKind};
use crate::delegate::NodeKind;
use crate::docid::CanonicalDocId;
use crate::error::PublishError;
use crate::named::{NamedResourceBatch, NamedResourceId};
use crate::publisher::NamedResourcePusher;

/// Identity an access check is evaluated for.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub user: String,
    #[serde(default)]
    pub groups: HashSet<String>,
}

impl Subject {
    pub fn new<I, S>(user: impl Into<String>, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            user: user.into(),
            groups: groups.into_iter().map(Into::into).collect(),
        }
    }

    fn matches(&self, entry: &AccessControlEntry) -> bool {
        match entry.kind {
            PrincipalKind::User => entry.principal == self.user,
            PrincipalKind::Group => self.groups.contains(&entry.principal),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Decision {
    Permit,
    Deny,
    /// The chain references a resource that has not been published yet.
    Indeterminate,
}

impl Decision {
    pub fn is_permit(&self) -> bool {
        matches!(self, Decision::Permit)
    }
}

#[derive(Clone, Debug)]
struct DocumentAcl {
    kind: NodeKind,
    acl: AclSet,
}

#[derive(Default)]
pub struct AclIndex {
    resources: RwLock<HashMap<NamedResourceId, AclSet>>,
    documents: RwLock<HashMap<CanonicalDocId, DocumentAcl>>,
}

impl AclIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_document(&self, id: CanonicalDocId, kind: NodeKind, acl: AclSet) {
        self.documents.write().insert(id, DocumentAcl { kind, acl });
    }

    pub fn remove_document(&self, id: &CanonicalDocId) {
        self.documents.write().remove(id);
    }

    pub fn document_ids(&self) -> Vec<CanonicalDocId> {
        self.documents.read().keys().cloned().collect()
    }

    /// Nodes that currently own at least one published resource.
    pub fn resource_owners(&self) -> HashSet<CanonicalDocId> {
        self.resources.read().keys().map(|id| id.owner().clone()).collect()
    }

    /// Drop every named resource published for `owner`.
    pub fn remove_resources(&self, owner: &CanonicalDocId) -> usize {
        let mut resources = self.resources.write();
        let before = resources.len();
        resources.retain(|id, _| id.owner() != owner);
        before - resources.len()
    }

    pub fn indexed_kind(&self, id: &CanonicalDocId) -> Option<NodeKind> {
        self.documents.read().get(id).map(|doc| doc.kind)
    }

    pub fn document_acl(&self, id: &CanonicalDocId) -> Option<AclSet> {
        self.documents.read().get(id).map(|doc| doc.acl.clone())
    }

    pub fn resource(&self, id: &NamedResourceId) -> Option<AclSet> {
        self.resources.read().get(id).cloned()
    }

    pub fn document_count(&self) -> usize {
        self.documents.read().len()
    }

    pub fn resource_count(&self) -> usize {
        self.resources.read().len()
    }

    /// First matching entry along the chain decides. A chain that runs out
    /// denies.
    pub fn evaluate(&self, id: &CanonicalDocId, subject: &Subject) -> Decision {
        let Some(mut current) = self.document_acl(id) else {
            return Decision::Deny;
        };
        let resources = self.resources.read();
        let mut seen = HashSet::new();
        loop {
            if let Some(entry) = current.entries().iter().find(|e| subject.matches(e)) {
                return match entry.effect {
                    AceEffect::Allow => Decision::Permit,
                    AceEffect::Deny => Decision::Deny,
                };
            }
            let Some(next) = current.inherit_from() else {
                return Decision::Deny;
            };
            if !seen.insert(next.clone()) {
                warn!(document = %id, resource = %next, "cycle in ACL chain");
                return Decision::Deny;
            }
            match resources.get(next) {
                Some(set) => current = set.clone(),
                None => return Decision::Indeterminate,
            }
        }
    }

    /// The sets along a document's chain, stopping at the first missing or
    /// repeated reference.
    pub fn resolve_chain(&self, id: &CanonicalDocId) -> Vec<AclSet> {
        let mut chain = Vec::new();
        let mut next = self.document_acl(id);
        let resources = self.resources.read();
        let mut seen = HashSet::new();
        while let Some(set) = next.take() {
            next = set
                .inherit_from()
                .filter(|id| seen.insert((*id).clone()))
                .and_then(|id| resources.get(id).cloned());
            chain.push(set);
        }
        chain
    }
}

#[async_trait]
impl NamedResourcePusher for AclIndex {
    async fn push_named_resources(&self, batch: &NamedResourceBatch) -> Result<(), PublishError> {
        if let Some(id) = batch
            .iter()
            .find_map(|(id, set)| (set.inherit_from() == Some(id)).then_some(id))
        {
            return Err(PublishError::Permanent(format!("{id} references itself")));
        }
        let mut resources = self.resources.write();
        for (id, set) in batch {
            resources.insert(id.clone(), set.clone());
        }
        Ok(())
    }
}
