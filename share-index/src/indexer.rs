//! Crawler that walks the share, resolves every node and feeds the ACL
//! index, the publisher and the full-text index.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

use share_index_core::{
    adaptor::{ResolvedNode, ShareAdaptor},
    delegate::NodeKind,
    docid::CanonicalDocId,
    index::AclIndex,
    publisher::{AclPublisher, PublishStats},
    search::{IndexStats, SearchIndex},
};

/// Statistics from a crawl pass
#[derive(Debug, Clone, Serialize)]
pub struct CrawlStats {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub documents: u64,
    pub folders: u64,
    pub skipped: u64,
    /// Nodes indexed by an earlier pass and dropped by this one.
    pub removed: u64,
    pub acl_documents: usize,
    pub publish: PublishStats,
    pub search: IndexStats,
}

struct Visit {
    node: ResolvedNode,
    children: Vec<PathBuf>,
}

pub struct CrawlIndexer {
    adaptor: Arc<ShareAdaptor>,
    publisher: Arc<AclPublisher>,
    acl_index: Arc<AclIndex>,
    search: Arc<SearchIndex>,
    workers: usize,
}

impl CrawlIndexer {
    pub fn new(
        adaptor: Arc<ShareAdaptor>,
        publisher: Arc<AclPublisher>,
        acl_index: Arc<AclIndex>,
        search: Arc<SearchIndex>,
    ) -> Self {
        let workers = adaptor.config().crawl_workers.max(1);
        Self {
            adaptor,
            publisher,
            acl_index,
            search,
            workers,
        }
    }

    pub fn publisher(&self) -> &Arc<AclPublisher> {
        &self.publisher
    }

    /// Walk the share breadth first with at most `crawl_workers` nodes in
    /// flight. A node that fails is skipped along with its subtree, and
    /// whatever an earlier pass stored for it is removed.
    pub async fn crawl(&self) -> Result<CrawlStats> {
        let started_at = Utc::now();
        let mut queue: VecDeque<PathBuf> = self
            .adaptor
            .root_doc_ids()
            .iter()
            .map(CanonicalDocId::to_path)
            .collect();
        let mut tasks = JoinSet::new();
        let (mut documents, mut folders, mut skipped) = (0, 0, 0);
        let mut visited = HashSet::new();
        let mut owners = HashSet::new();

        loop {
            while tasks.len() < self.workers {
                let Some(path) = queue.pop_front() else { break };
                let adaptor = self.adaptor.clone();
                let search = self.search.clone();
                tasks.spawn_blocking(move || {
                    let visit = visit(&adaptor, &search, &path);
                    (path, visit)
                });
            }
            let Some(joined) = tasks.join_next().await else { break };
            let (path, visit) = match joined {
                Ok(done) => done,
                Err(e) => {
                    error!("crawl worker failed: {e}");
                    skipped += 1;
                    continue;
                }
            };
            let Visit { node, children } = match visit {
                Ok(visit) => visit,
                Err(e) => {
                    warn!(path = %path.display(), "skipping node: {e:#}");
                    skipped += 1;
                    continue;
                }
            };

            match node.attributes.kind {
                NodeKind::Folder => folders += 1,
                NodeKind::File => documents += 1,
            }
            visited.insert(node.id.clone());
            self.acl_index
                .record_document(node.id.clone(), node.attributes.kind, node.acl);
            if let Some(resources) = node.resources {
                owners.insert(node.id.clone());
                self.publisher.submit(node.id, resources).await;
            }
            queue.extend(children);
        }

        let publish = self.publisher.flush().await;
        let removed = self.prune(&visited, &owners);
        self.search.commit()?;
        let stats = CrawlStats {
            started_at,
            completed_at: Utc::now(),
            documents,
            folders,
            skipped,
            removed,
            acl_documents: self.acl_index.document_count(),
            publish,
            search: self.search.stats()?,
        };
        info!(
            documents,
            folders,
            skipped,
            removed,
            published = publish.published,
            failed = publish.failed,
            "crawl finished"
        );
        Ok(stats)
    }

    /// Forget documents this pass did not reach and resources no node
    /// published this pass.
    fn prune(&self, visited: &HashSet<CanonicalDocId>, owners: &HashSet<CanonicalDocId>) -> u64 {
        let mut removed = 0;
        for id in self.acl_index.document_ids() {
            if !visited.contains(&id) {
                debug!(document = %id, "removing stale document");
                self.acl_index.remove_document(&id);
                self.search.remove_document(&id);
                removed += 1;
            }
        }
        for owner in self.acl_index.resource_owners() {
            if !owners.contains(&owner) {
                self.acl_index.remove_resources(&owner);
            }
        }
        removed
    }
}

/// Resolve one node and index its text. Runs on a blocking worker.
fn visit(adaptor: &ShareAdaptor, search: &SearchIndex, path: &Path) -> Result<Visit> {
    let node = adaptor.resolve_node(path)?;
    let folders = folder_names(adaptor.root(), &node.id);
    let delegate = adaptor.delegate();

    let (content, children) = match node.attributes.kind {
        NodeKind::File => {
            let bytes = delegate
                .read_content(path, adaptor.config().max_content_bytes)
                .with_context(|| format!("reading {}", path.display()))?;
            (String::from_utf8_lossy(&bytes).into_owned(), Vec::new())
        }
        NodeKind::Folder => {
            let children = delegate
                .list_children(path)
                .with_context(|| format!("listing {}", path.display()))?;
            (String::new(), children)
        }
    };
    search.index_document(&node.id, node.id.name(), &content, &folders)?;
    Ok(Visit { node, children })
}

/// Names of the folders between the root and the node, nearest first.
fn folder_names(root: &CanonicalDocId, id: &CanonicalDocId) -> Vec<String> {
    let mut folders = Vec::new();
    let mut current = id.parent();
    while let Some(parent) = current {
        if parent == *root || !parent.as_str().starts_with(root.as_str()) {
            break;
        }
        folders.push(parent.name().to_string());
        current = parent.parent();
    }
    folders
}

/// Re-crawl the share every `interval`.
pub async fn crawl_task(crawler: Arc<CrawlIndexer>, interval: Duration) {
    loop {
        if let Err(e) = crawler.crawl().await {
            error!("crawl failed: {e:#}");
        }
        sleep(interval).await;
    }
}
