use anyhow::Result;
use parking_lot::Mutex;
use std::path::Path;
use tantivy::{
    collector::TopDocs,
    directory::MmapDirectory,
    doc,
    query::QueryParser,
    schema::{Field, Schema, STORED, STRING, TEXT},
    Index, IndexReader, IndexWriter, ReloadPolicy, Term,
};

use crate::docid::CanonicalDocId;

const WRITER_HEAP_BYTES: usize = 50_000_000;

/// Full-text index of crawled documents.
///
/// One writer is shared by every crawl worker; tantivy allows only one per
/// index directory.
pub struct SearchIndex {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    id: Field,
    name: Field,
    content: Field,
    folder: Field,
}

impl SearchIndex {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;
        let dir = MmapDirectory::open(path)?;
        let (schema, fields) = schema();
        Self::with_index(Index::open_or_create(dir, schema)?, fields)
    }

    pub fn in_memory() -> Result<Self> {
        let (schema, fields) = schema();
        Self::with_index(Index::create_in_ram(schema), fields)
    }

    fn with_index(index: Index, [id, name, content, folder]: [Field; 4]) -> Result<Self> {
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        let writer = index.writer(WRITER_HEAP_BYTES)?;
        Ok(Self {
            index,
            reader,
            writer: Mutex::new(writer),
            id,
            name,
            content,
            folder,
        })
    }

    /// Replace whatever is indexed under `id`. Visible after `commit`.
    pub fn index_document(
        &self,
        id: &CanonicalDocId,
        name: &str,
        content: &str,
        folders: &[String],
    ) -> Result<()> {
        let writer = self.writer.lock();
        writer.delete_term(Term::from_field_text(self.id, id.as_str()));
        writer.add_document(doc!(
            self.id => id.as_str(),
            self.name => name,
            self.content => content,
            self.folder => folders.join(" "),
        ))?;
        Ok(())
    }

    pub fn remove_document(&self, id: &CanonicalDocId) {
        self.writer
            .lock()
            .delete_term(Term::from_field_text(self.id, id.as_str()));
    }

    pub fn commit(&self) -> Result<()> {
        self.writer.lock().commit()?;
        self.reader.reload()?;
        Ok(())
    }

    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<CanonicalDocId>> {
        let searcher = self.reader.searcher();
        let parser =
            QueryParser::for_index(&self.index, vec![self.name, self.content, self.folder]);
        let q = parser.parse_query(query)?;
        let docs = searcher.search(&q, &TopDocs::with_limit(limit))?;
        Ok(docs
            .into_iter()
            .filter_map(|(_score, addr)| {
                let retrieved = searcher.doc(addr).ok()?;
                let field = retrieved.get_first(self.id)?;
                field
                    .as_text()
                    .and_then(|s| CanonicalDocId::from_string(s).ok())
            })
            .collect())
    }

    /// Get index statistics
    pub fn stats(&self) -> Result<IndexStats> {
        let segments = self.index.searchable_segment_metas()?;
        Ok(IndexStats {
            total_docs: segments.iter().map(|s| s.num_docs()).sum(),
            deleted_docs: segments.iter().map(|s| s.num_deleted_docs()).sum(),
            num_segments: segments.len(),
        })
    }
}

fn schema() -> (Schema, [Field; 4]) {
    let mut schema_builder = Schema::builder();
    let id = schema_builder.add_text_field("id", STRING | STORED);
    let name = schema_builder.add_text_field("name", TEXT | STORED);
    let content = schema_builder.add_text_field("content", TEXT);
    let folder = schema_builder.add_text_field("folder", TEXT);
    (schema_builder.build(), [id, name, content, folder])
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct IndexStats {
    pub total_docs: u32,
    pub deleted_docs: u32,
    pub num_segments: usize,
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::docid::canonicalize;
    use tempfile::tempdir;

    fn id(s: &str) -> CanonicalDocId {
        canonicalize(Path::new(s)).unwrap()
    }

    #[test]
    fn finds_by_content_name_and_folder() {
        let dir = tempdir().unwrap();
        let index = SearchIndex::new(dir.path()).unwrap();
        index
            .index_document(
                &id("/share/docs/plan.txt"),
                "plan.txt",
                "quarterly budget",
                &["docs".into()],
            )
            .unwrap();
        index
            .index_document(&id("/share/notes.txt"), "notes.txt", "meeting notes", &[])
            .unwrap();
        index.commit().unwrap();

        assert_eq!(index.search("budget", 10).unwrap(), vec![id("/share/docs/plan.txt")]);
        assert_eq!(index.search("docs", 10).unwrap(), vec![id("/share/docs/plan.txt")]);
        assert_eq!(index.search("meeting", 10).unwrap(), vec![id("/share/notes.txt")]);
    }

    #[test]
    fn reindexing_replaces_document() {
        let index = SearchIndex::in_memory().unwrap();
        let doc = id("/share/a.txt");
        index.index_document(&doc, "a.txt", "old words", &[]).unwrap();
        index.commit().unwrap();
        index.index_document(&doc, "a.txt", "fresh words", &[]).unwrap();
        index.commit().unwrap();

        assert!(index.search("old", 10).unwrap().is_empty());
        assert_eq!(index.search("words", 10).unwrap(), vec![doc]);
    }

    #[test]
    fn removed_documents_disappear() {
        let index = SearchIndex::in_memory().unwrap();
        let doc = id("/share/a.txt");
        index.index_document(&doc, "a.txt", "hello", &[]).unwrap();
        index.commit().unwrap();
        index.remove_document(&doc);
        index.commit().unwrap();

        assert!(index.search("hello", 10).unwrap().is_empty());
    }
}
