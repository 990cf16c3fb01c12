//! Serves documents and resolves per-node ACL state for a single share.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use tracing::{debug, info, warn};

use crate::acl::{share_acl, AclBuilder, AclSet, InheritanceContext, PrincipalFilter};
use crate::config::AdaptorConfig;
use crate::delegate::{FileDelegate, NodeAttributes, NodeKind};
use crate::docid::{CanonicalDocId, DocIdMapper};
use crate::error::{AdaptorError, IdentityMismatch, MismatchReason};
use crate::named::{NamedResourceBatch, NamedResourceId, NamedResourceKind};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Outcome of visiting one node: its own ACL plus, for containers, the
/// variants its children will reference.
#[derive(Clone, Debug)]
pub struct ResolvedNode {
    pub id: CanonicalDocId,
    pub path: PathBuf,
    pub attributes: NodeAttributes,
    pub acl: AclSet,
    pub resources: Option<NamedResourceBatch>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ListingEntry {
    pub id: CanonicalDocId,
    pub name: String,
    pub kind: NodeKind,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "data")]
pub enum DocContent {
    File(#[serde(serialize_with = "lossy_text")] Vec<u8>),
    Listing(Vec<ListingEntry>),
}

fn lossy_text<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(bytes))
}

#[derive(Clone, Debug, Serialize)]
pub struct DocResponse {
    pub id: CanonicalDocId,
    pub kind: NodeKind,
    pub acl: AclSet,
    pub last_modified: Option<DateTime<Utc>>,
    pub metadata: BTreeMap<String, String>,
    pub content: DocContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<NamedResourceBatch>,
}

pub struct ShareAdaptor {
    config: Arc<AdaptorConfig>,
    delegate: Arc<dyn FileDelegate>,
    filter: Arc<PrincipalFilter>,
    mapper: DocIdMapper,
}

impl ShareAdaptor {
    pub fn new(
        config: Arc<AdaptorConfig>,
        delegate: Arc<dyn FileDelegate>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let mapper = DocIdMapper::new(&config.root)
            .with_context(|| format!("invalid root {}", config.root.display()))?;
        let attrs = delegate
            .root_attributes(&config.root)
            .with_context(|| format!("reading root {}", config.root.display()))?;
        if attrs.is_none() {
            bail!("root {} is not a file or folder", config.root.display());
        }

        let filter = Arc::new(PrincipalFilter::from_config(&config));
        info!(root = %mapper.root(), "share root");
        info!(prefix = %config.builtin_prefix, "built-in account prefix");
        info!(accounts = ?config.supported_accounts, "supported built-in accounts");

        Ok(Self {
            config,
            delegate,
            filter,
            mapper,
        })
    }

    pub fn config(&self) -> &AdaptorConfig {
        &self.config
    }

    pub fn delegate(&self) -> &dyn FileDelegate {
        self.delegate.as_ref()
    }

    pub fn root(&self) -> &CanonicalDocId {
        self.mapper.root()
    }

    pub fn root_doc_ids(&self) -> Vec<CanonicalDocId> {
        vec![self.mapper.root().clone()]
    }

    /// Read the node's permissions once and derive its ACL state.
    pub fn resolve_node(&self, path: &Path) -> Result<ResolvedNode, AdaptorError> {
        let id = self.delegate.doc_id(path)?;
        if !self.mapper.is_under_root(&id) {
            return Err(IdentityMismatch::new(id.as_str(), MismatchReason::OutsideRoot).into());
        }
        let attributes = self.attributes(&id, path)?;
        self.resolve_with(id, path.to_path_buf(), attributes)
    }

    /// The head of the document's reference chain.
    pub fn resolve_effective_acl(&self, id: &CanonicalDocId) -> Result<AclSet, AdaptorError> {
        self.resolve_node(&id.to_path()).map(|node| node.acl)
    }

    /// Answer a document request. Identity problems of any kind are
    /// reported as not found before any permission is read.
    pub fn get_doc_content(
        &self,
        requested: &str,
        indexed_kind: Option<NodeKind>,
    ) -> Result<DocResponse, AdaptorError> {
        let id = self.mapper.validate_request(requested).map_err(|e| {
            if e.reason == MismatchReason::OutsideRoot {
                warn!(
                    document = requested,
                    root = %self.mapper.root(),
                    "not a descendant of the root"
                );
            }
            e
        })?;
        let path = id.to_path();
        let attributes = self.attributes(&id, &path)?;
        if indexed_kind.is_some_and(|kind| kind != attributes.kind) {
            return Err(IdentityMismatch::new(requested, MismatchReason::KindChanged).into());
        }

        let node = self.resolve_with(id, path, attributes)?;
        let metadata = metadata(&node.attributes);
        let content = match node.attributes.kind {
            NodeKind::File => DocContent::File(
                self.delegate
                    .read_content(&node.path, self.config.max_content_bytes)
                    .map_err(|e| AdaptorError::io(&node.path, e))?,
            ),
            NodeKind::Folder => DocContent::Listing(self.listing(&node.path)?),
        };

        Ok(DocResponse {
            last_modified: node.attributes.modified.map(DateTime::<Utc>::from),
            id: node.id,
            kind: node.attributes.kind,
            acl: node.acl,
            metadata,
            content,
            resources: node.resources,
        })
    }

    /// Files and folders directly below `path`; other node types are omitted.
    pub fn listing(&self, path: &Path) -> Result<Vec<ListingEntry>, AdaptorError> {
        let children = self
            .delegate
            .list_children(path)
            .map_err(|e| AdaptorError::io(path, e))?;
        let mut entries = Vec::with_capacity(children.len());
        for child in children {
            let Some(attrs) = self
                .delegate
                .attributes(&child)
                .map_err(|e| AdaptorError::io(&child, e))?
            else {
                continue;
            };
            let id = self.delegate.doc_id(&child)?;
            entries.push(ListingEntry {
                name: id.name().to_string(),
                id,
                kind: attrs.kind,
            });
        }
        Ok(entries)
    }

    fn attributes(&self, id: &CanonicalDocId, path: &Path) -> Result<NodeAttributes, AdaptorError> {
        let attributes = if self.mapper.is_root(id) {
            self.delegate.root_attributes(path)
        } else {
            self.delegate.attributes(path)
        };
        attributes
            .map_err(|e| AdaptorError::io(path, e))?
            .ok_or_else(|| IdentityMismatch::new(id.as_str(), MismatchReason::Missing).into())
    }

    fn resolve_with(
        &self,
        id: CanonicalDocId,
        path: PathBuf,
        attributes: NodeAttributes,
    ) -> Result<ResolvedNode, AdaptorError> {
        let views = self.delegate.acl_views(&path)?;
        let ctx = InheritanceContext::resolve(&id, self.mapper.root());
        let builder = AclBuilder::new(views, &self.filter);
        let acl = builder.effective_acl(ctx.inherit_from(attributes.kind));

        let mut resources = attributes
            .kind
            .is_folder()
            .then(|| builder.inheritable_resources(&id, &ctx));
        if ctx.is_root {
            let share = share_acl(self.delegate.share_acl(&path)?, &self.filter);
            resources
                .get_or_insert_with(NamedResourceBatch::new)
                .insert(NamedResourceId::new(&id, NamedResourceKind::Share), share);
        }
        debug!(
            document = %id,
            entries = acl.entries().len(),
            resources = resources.as_ref().map_or(0, |r| r.len()),
            "resolved node"
        );

        Ok(ResolvedNode {
            id,
            path,
            attributes,
            acl,
            resources,
        })
    }
}

fn format_date(time: Option<SystemTime>) -> Option<String> {
    time.map(|t| DateTime::<Utc>::from(t).format(DATE_FORMAT).to_string())
}

fn metadata(attrs: &NodeAttributes) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();
    if let Some(created) = format_date(attrs.created) {
        metadata.insert("Creation Time".to_string(), created);
    }
    if let Some(accessed) = format_date(attrs.accessed) {
        metadata.insert("Last Access Time".to_string(), accessed);
    }
    if attrs.kind == NodeKind::File {
        metadata.insert("File Size".to_string(), attrs.size.to_string());
    }
    metadata
}
