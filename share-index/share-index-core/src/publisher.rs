//! Bounded asynchronous publishing of named ACL resources.
//!
//! A semaphore gates task spawning so at most `max_concurrent` batches are
//! in flight and `submit` blocks while the pool is saturated. Batches for
//! the same node are chained so a node is never pushed twice at once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::config::{AdaptorConfig, MAX_PUBLISH_CONCURRENCY};
use crate::docid::CanonicalDocId;
use crate::error::PublishError;
use crate::named::NamedResourceBatch;

/// Receiver of named resources, usually the search index's ACL store.
#[async_trait]
pub trait NamedResourcePusher: Send + Sync {
    async fn push_named_resources(&self, batch: &NamedResourceBatch) -> Result<(), PublishError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    /// Delay before the first retry; attempt `n` waits `n * backoff`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            backoff: Duration::from_millis(200),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PublishStats {
    pub published: u64,
    pub retried: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> PublishStats {
        PublishStats {
            published: self.published.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

pub struct AclPublisher {
    pusher: Arc<dyn NamedResourcePusher>,
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    retry: RetryPolicy,
    counters: Arc<Counters>,
    pending: AsyncMutex<HashMap<CanonicalDocId, JoinHandle<()>>>,
}

impl AclPublisher {
    /// `max_concurrent` is clamped to `[1, 64]`.
    pub fn new(
        pusher: Arc<dyn NamedResourcePusher>,
        max_concurrent: usize,
        retry: RetryPolicy,
    ) -> Self {
        let max_concurrent = max_concurrent.clamp(1, MAX_PUBLISH_CONCURRENCY);
        Self {
            pusher,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            retry,
            counters: Arc::new(Counters::default()),
            pending: AsyncMutex::new(HashMap::new()),
        }
    }

    pub fn from_config(pusher: Arc<dyn NamedResourcePusher>, config: &AdaptorConfig) -> Self {
        Self::new(
            pusher,
            config.max_concurrent_publishes,
            RetryPolicy {
                retries: config.publish_retries,
                backoff: config.publish_backoff(),
            },
        )
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Queue `batch` for publishing, waiting for a free slot first.
    pub async fn submit(&self, node: CanonicalDocId, batch: NamedResourceBatch) {
        if batch.is_empty() {
            return;
        }
        let permit = match self.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                warn!(%node, "publisher closed, dropping batch");
                return;
            }
        };

        let mut pending = self.pending.lock().await;
        pending.retain(|_, handle| !handle.is_finished());
        let previous = AbortOnDrop(pending.remove(&node));

        let pusher = self.pusher.clone();
        let counters = self.counters.clone();
        let retry = self.retry;
        let task_node = node.clone();
        let handle = tokio::spawn(async move {
            let _permit = permit;
            let mut previous = previous;
            if let Some(handle) = previous.0.as_mut() {
                let _ = handle.await;
            }
            push_with_retry(pusher.as_ref(), &task_node, &batch, retry, &counters).await;
        });
        pending.insert(node, handle);
    }

    /// Wait for every outstanding batch and return the running totals.
    pub async fn flush(&self) -> PublishStats {
        let handles: Vec<_> = self.pending.lock().await.drain().map(|(_, h)| h).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!("publish task panicked: {e}");
                }
            }
        }
        self.stats()
    }

    pub fn stats(&self) -> PublishStats {
        self.counters.snapshot()
    }

    /// Cancel in-flight batches and wait for them to stop. Batches are
    /// idempotent, so a later crawl simply republishes them.
    pub async fn abort_all(&self) {
        let handles: Vec<_> = self.pending.lock().await.drain().collect();
        for (node, handle) in &handles {
            debug!(%node, "aborting publish");
            handle.abort();
        }
        for (_, handle) in handles {
            let _ = handle.await;
        }
    }
}

/// Earlier batch for the same node. Cancelling the batch chained on it
/// cancels it too.
struct AbortOnDrop(Option<JoinHandle<()>>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }
}

async fn push_with_retry(
    pusher: &dyn NamedResourcePusher,
    node: &CanonicalDocId,
    batch: &NamedResourceBatch,
    retry: RetryPolicy,
    counters: &Counters,
) {
    let mut attempt = 0;
    loop {
        match pusher.push_named_resources(batch).await {
            Ok(()) => {
                counters.published.fetch_add(1, Ordering::Relaxed);
                debug!(%node, resources = batch.len(), "published named resources");
                return;
            }
            Err(e) if e.is_transient() && attempt < retry.retries => {
                attempt += 1;
                counters.retried.fetch_add(1, Ordering::Relaxed);
                warn!(%node, attempt, "retrying publish: {e}");
                tokio::time::sleep(retry.backoff * attempt).await;
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(%node, attempts = attempt + 1, "giving up on publish: {e}");
                return;
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::acl::{AclSet, RawAce};
    use crate::docid::canonicalize;
    use crate::index::AclIndex;
    use crate::named::{NamedResourceId, NamedResourceKind};
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;

    fn node(s: &str) -> CanonicalDocId {
        canonicalize(Path::new(s)).unwrap()
    }

    fn batch(s: &str) -> NamedResourceBatch {
        let owner = node(s);
        NamedResourceBatch::from([(
            NamedResourceId::new(&owner, NamedResourceKind::ChildFilesOnly),
            AclSet::empty(None),
        )])
    }

    #[derive(Default)]
    struct SlowPusher {
        running: AtomicUsize,
        peak: AtomicUsize,
        busy: Mutex<HashSet<String>>,
        overlaps: AtomicUsize,
    }

    #[async_trait]
    impl NamedResourcePusher for SlowPusher {
        async fn push_named_resources(
            &self,
            batch: &NamedResourceBatch,
        ) -> Result<(), PublishError> {
            let key = batch.keys().next().map(|k| k.owner().to_string()).unwrap_or_default();
            if !self.busy.lock().insert(key.clone()) {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.busy.lock().remove(&key);
            Ok(())
        }
    }

    struct FlakyPusher {
        calls: AtomicUsize,
        fail_first: usize,
        error: PublishError,
    }

    #[async_trait]
    impl NamedResourcePusher for FlakyPusher {
        async fn push_named_resources(
            &self,
            _batch: &NamedResourceBatch,
        ) -> Result<(), PublishError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                Err(self.error.clone())
            } else {
                Ok(())
            }
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            retries: 3,
            backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn never_exceeds_max_concurrent() {
        let pusher = Arc::new(SlowPusher::default());
        let publisher = AclPublisher::new(pusher.clone(), 3, fast_retry());
        for i in 0..20 {
            let path = format!("/share/{i}");
            publisher.submit(node(&path), batch(&path)).await;
        }
        let stats = publisher.flush().await;

        assert_eq!(stats.published, 20);
        assert!(pusher.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn same_node_submissions_do_not_overlap() {
        let pusher = Arc::new(SlowPusher::default());
        let publisher = AclPublisher::new(pusher.clone(), 8, fast_retry());
        for _ in 0..5 {
            publisher.submit(node("/share/docs"), batch("/share/docs")).await;
        }
        let stats = publisher.flush().await;

        assert_eq!(stats.published, 5);
        assert_eq!(pusher.overlaps.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let pusher = Arc::new(FlakyPusher {
            calls: AtomicUsize::new(0),
            fail_first: 2,
            error: PublishError::Transient("busy".into()),
        });
        let publisher = AclPublisher::new(pusher.clone(), 1, fast_retry());
        publisher.submit(node("/share"), batch("/share")).await;
        let stats = publisher.flush().await;

        assert_eq!(pusher.calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            stats,
            PublishStats {
                published: 1,
                retried: 2,
                failed: 0
            }
        );
    }

    #[tokio::test]
    async fn transient_failures_give_up_after_retries() {
        let pusher = Arc::new(FlakyPusher {
            calls: AtomicUsize::new(0),
            fail_first: usize::MAX,
            error: PublishError::Transient("busy".into()),
        });
        let publisher = AclPublisher::new(pusher.clone(), 1, fast_retry());
        publisher.submit(node("/share"), batch("/share")).await;
        let stats = publisher.flush().await;

        assert_eq!(pusher.calls.load(Ordering::SeqCst), 4);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let pusher = Arc::new(FlakyPusher {
            calls: AtomicUsize::new(0),
            fail_first: usize::MAX,
            error: PublishError::Permanent("rejected".into()),
        });
        let publisher = AclPublisher::new(pusher.clone(), 1, fast_retry());
        publisher.submit(node("/share"), batch("/share")).await;
        let stats = publisher.flush().await;

        assert_eq!(pusher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.retried, 0);
    }

    #[tokio::test]
    async fn pool_size_is_clamped() {
        let pusher: Arc<dyn NamedResourcePusher> = Arc::new(SlowPusher::default());
        assert_eq!(AclPublisher::new(pusher.clone(), 0, fast_retry()).max_concurrent(), 1);
        assert_eq!(AclPublisher::new(pusher, 1000, fast_retry()).max_concurrent(), 64);
    }

    /// Stores into an `AclIndex` after a configurable delay.
    struct DelayedIndex {
        index: AclIndex,
        delay_ms: AtomicU64,
        stored: AtomicUsize,
    }

    #[async_trait]
    impl NamedResourcePusher for DelayedIndex {
        async fn push_named_resources(
            &self,
            batch: &NamedResourceBatch,
        ) -> Result<(), PublishError> {
            let delay = self.delay_ms.load(Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.index.push_named_resources(batch).await?;
            self.stored.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn granted(s: &str, principal: &str) -> NamedResourceBatch {
        let owner = node(s);
        NamedResourceBatch::from([(
            NamedResourceId::new(&owner, NamedResourceKind::AllDescendantFiles),
            AclSet::new(vec![RawAce::allow(principal).entry], None),
        )])
    }

    #[tokio::test]
    async fn abort_cancels_queued_and_chained_batches() {
        let pusher = Arc::new(DelayedIndex {
            index: AclIndex::new(),
            delay_ms: AtomicU64::new(50),
            stored: AtomicUsize::new(0),
        });
        let publisher = AclPublisher::new(pusher.clone(), 8, fast_retry());
        let mut batches = Vec::new();
        for path in ["/share/a", "/share/b", "/share/c"] {
            batches.push((node(path), granted(path, "alice")));
        }
        for principal in ["alice", "bob", "carol"] {
            batches.push((node("/share/d"), granted("/share/d", principal)));
        }
        for (owner, batch) in &batches {
            publisher.submit(owner.clone(), batch.clone()).await;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        publisher.abort_all().await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(pusher.stored.load(Ordering::SeqCst), 0);
        assert_eq!(pusher.index.resource_count(), 0);
        assert_eq!(publisher.stats().published, 0);

        pusher.delay_ms.store(0, Ordering::SeqCst);
        for (owner, batch) in &batches {
            publisher.submit(owner.clone(), batch.clone()).await;
        }
        let stats = publisher.flush().await;
        assert_eq!(stats.published, 6);

        let expected = AclIndex::new();
        for (_, batch) in &batches {
            expected.push_named_resources(batch).await.unwrap();
        }
        assert_eq!(pusher.index.resource_count(), expected.resource_count());
        for (_, batch) in &batches {
            for id in batch.keys() {
                assert_eq!(pusher.index.resource(id), expected.resource(id));
            }
        }
    }

    #[tokio::test]
    async fn empty_batches_are_skipped() {
        let pusher = Arc::new(SlowPusher::default());
        let publisher = AclPublisher::new(pusher, 1, fast_retry());
        publisher.submit(node("/share"), NamedResourceBatch::new()).await;
        assert_eq!(publisher.flush().await, PublishStats::default());
    }
}
