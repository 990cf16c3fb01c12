#![cfg(unix)]

use share_index::indexer::CrawlIndexer;
use share_index_core::{
    acl::{InheritFlags, RawAce},
    adaptor::ShareAdaptor,
    config::AdaptorConfig,
    delegate::{FileDelegate, InMemoryDelegate, LocalDelegate, NodeKind},
    docid::CanonicalDocId,
    index::{AclIndex, Decision, Subject},
    named::{NamedResourceId, NamedResourceKind},
    publisher::AclPublisher,
    search::SearchIndex,
};
use std::sync::Arc;

struct Harness {
    crawler: CrawlIndexer,
    acl_index: Arc<AclIndex>,
    search: Arc<SearchIndex>,
}

fn harness(root: &std::path::Path, delegate: Arc<dyn FileDelegate>) -> Harness {
    let mut config = AdaptorConfig::new(root);
    config.crawl_workers = 2;
    config.max_concurrent_publishes = 2;
    config.publish_backoff_ms = 1;
    let config = Arc::new(config);

    let adaptor = Arc::new(ShareAdaptor::new(config.clone(), delegate).unwrap());
    let acl_index = Arc::new(AclIndex::new());
    let publisher = Arc::new(AclPublisher::from_config(acl_index.clone(), &config));
    let search = Arc::new(SearchIndex::in_memory().unwrap());
    Harness {
        crawler: CrawlIndexer::new(adaptor, publisher, acl_index.clone(), search.clone()),
        acl_index,
        search,
    }
}

fn id(s: &str) -> CanonicalDocId {
    CanonicalDocId::from_string(s).unwrap()
}

#[tokio::test]
async fn crawl_publishes_every_folder_and_indexes_content() {
    let delegate = Arc::new(InMemoryDelegate::new());
    let inherit = InheritFlags::FILE_INHERIT.with(InheritFlags::DIRECTORY_INHERIT);
    delegate.add_folder("/share", vec![RawAce::allow("staff").group().with_flags(inherit)]);
    delegate.add_folder("/share/docs", vec![]);
    delegate.add_file("/share/docs/plan.txt", "quarterly budget", vec![]);
    delegate.add_file("/share/readme.txt", "welcome", vec![]);
    let h = harness(std::path::Path::new("/share"), delegate);

    let stats = h.crawler.crawl().await.unwrap();
    assert_eq!(stats.folders, 2);
    assert_eq!(stats.documents, 2);
    assert_eq!(stats.skipped, 0);
    assert_eq!(stats.publish.published, 2);
    assert_eq!(stats.publish.failed, 0);
    assert_eq!(stats.removed, 0);
    assert_eq!(stats.acl_documents, 4);

    assert_eq!(h.acl_index.resource_count(), 9);
    assert!(h
        .acl_index
        .resource(&NamedResourceId::new(&id("/share/docs"), NamedResourceKind::ChildFilesOnly))
        .is_some());
    assert_eq!(h.acl_index.indexed_kind(&id("/share/docs")), Some(NodeKind::Folder));

    assert_eq!(h.search.search("budget", 10).unwrap(), vec![id("/share/docs/plan.txt")]);
    let staff = Subject::new("alice", ["staff"]);
    assert_eq!(
        h.acl_index.evaluate(&id("/share/docs/plan.txt"), &staff),
        Decision::Permit
    );
}

#[tokio::test]
async fn failed_node_and_subtree_are_skipped() {
    let delegate = Arc::new(InMemoryDelegate::new());
    delegate.add_folder("/share", vec![]);
    delegate.add_folder("/share/locked", vec![]);
    delegate.add_file("/share/locked/secret.txt", "secret plans", vec![]);
    delegate.add_file("/share/open.txt", "public notes", vec![]);
    delegate.fail_acl_reads("/share/locked");
    let h = harness(std::path::Path::new("/share"), delegate);

    let stats = h.crawler.crawl().await.unwrap();
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.documents, 1);
    assert!(h.acl_index.indexed_kind(&id("/share/locked")).is_none());
    assert!(h.acl_index.indexed_kind(&id("/share/locked/secret.txt")).is_none());
    assert!(h.search.search("secret", 10).unwrap().is_empty());
    assert_eq!(h.search.search("public", 10).unwrap(), vec![id("/share/open.txt")]);
}

#[tokio::test]
async fn recrawl_forgets_failed_and_deleted_nodes() {
    let delegate = Arc::new(InMemoryDelegate::new());
    let inherit = InheritFlags::FILE_INHERIT.with(InheritFlags::DIRECTORY_INHERIT);
    delegate.add_folder("/share", vec![RawAce::allow("staff").group().with_flags(inherit)]);
    delegate.add_folder("/share/locked", vec![]);
    delegate.add_file("/share/locked/secret.txt", "secret plans", vec![]);
    delegate.add_folder("/share/archive", vec![]);
    delegate.add_file("/share/gone.txt", "obsolete memo", vec![]);
    delegate.add_file("/share/open.txt", "public notes", vec![]);
    let h = harness(std::path::Path::new("/share"), delegate.clone());
    let staff = Subject::new("alice", ["staff"]);

    h.crawler.crawl().await.unwrap();
    assert_eq!(h.acl_index.resource_count(), 13);
    assert_eq!(
        h.acl_index.evaluate(&id("/share/locked/secret.txt"), &staff),
        Decision::Permit
    );

    delegate.fail_acl_reads("/share/locked");
    delegate.remove("/share/gone.txt");
    delegate.remove("/share/archive");
    delegate.add_file("/share/archive", "archived", vec![]);
    let stats = h.crawler.crawl().await.unwrap();

    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.removed, 3);
    assert_eq!(stats.acl_documents, 3);
    for gone in ["/share/locked", "/share/locked/secret.txt", "/share/gone.txt"] {
        assert!(h.acl_index.indexed_kind(&id(gone)).is_none(), "{gone} still indexed");
        assert_eq!(h.acl_index.evaluate(&id(gone), &staff), Decision::Deny);
    }
    assert!(h.search.search("secret", 10).unwrap().is_empty());
    assert!(h.search.search("obsolete", 10).unwrap().is_empty());
    assert_eq!(h.search.search("public", 10).unwrap(), vec![id("/share/open.txt")]);

    assert_eq!(h.acl_index.indexed_kind(&id("/share/archive")), Some(NodeKind::File));
    assert_eq!(h.acl_index.resource_count(), 5);
    assert!(h
        .acl_index
        .resource(&NamedResourceId::new(&id("/share/locked"), NamedResourceKind::ChildFilesOnly))
        .is_none());
    assert_eq!(
        h.acl_index.evaluate(&id("/share/open.txt"), &staff),
        Decision::Permit
    );
}

#[tokio::test]
async fn crawl_local_directory_with_mode_bits() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let root = std::fs::canonicalize(dir.path()).unwrap();
    std::fs::create_dir(root.join("reports")).unwrap();
    let report = root.join("reports").join("q3.txt");
    std::fs::write(&report, "revenue forecast").unwrap();
    std::fs::set_permissions(&report, std::fs::Permissions::from_mode(0o644)).unwrap();

    let h = harness(&root, Arc::new(LocalDelegate::new()));
    let stats = h.crawler.crawl().await.unwrap();
    assert_eq!(stats.folders, 2);
    assert_eq!(stats.documents, 1);

    let report_id = CanonicalDocId::from_string(report.to_str().unwrap()).unwrap();
    assert_eq!(h.search.search("forecast", 10).unwrap(), vec![report_id.clone()]);
    let anyone = Subject::new("nobody", ["EVERYONE@"]);
    assert_eq!(h.acl_index.evaluate(&report_id, &anyone), Decision::Permit);
}
