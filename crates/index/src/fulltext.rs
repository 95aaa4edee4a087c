//! Fulltext index
//!
//! One string attribute, tokenized into a word list bounded by the
//! configured minimum length and [`MAX_WORD_LENGTH`]. Posting entries are
//! qualified by the document revision that produced them; removal only
//! drops the document from the live set, leaving stale posting entries
//! behind as tombstones. The periodic [`Index::cleanup`] hook compacts
//! them. Update is implemented as delete-then-insert because the old and
//! new token sets may overlap.

use crate::{Index, IndexKind};
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::{json, Value};
use std::any::Any;
use std::sync::Arc;
use tracing::trace;
use vellum_core::{DocumentRef, IndexId, PathId, Result, Revision, ShapedDocument, Shaper};

/// Upper bound on indexed word length, in characters
pub const MAX_WORD_LENGTH: usize = 40;

#[derive(Debug)]
struct FulltextInner {
    /// word → document key → revision that produced the posting
    postings: FxHashMap<String, FxHashMap<String, Revision>>,
    /// live documents: key → (revision, marker)
    docs: FxHashMap<String, (Revision, DocumentRef)>,
    /// posting entries orphaned by removes/updates since the last cleanup
    stale: usize,
}

/// Tokenized text index over one attribute
#[derive(Debug)]
pub struct FulltextIndex {
    id: IndexId,
    attribute: PathId,
    fields: Vec<String>,
    min_word_length: usize,
    index_substrings: bool,
    shaper: Arc<Shaper>,
    inner: RwLock<FulltextInner>,
}

impl FulltextIndex {
    /// Create a fulltext index over one attribute
    ///
    /// A non-positive `min_word_length` falls back to 1.
    pub fn new(
        id: IndexId,
        shaper: Arc<Shaper>,
        field: String,
        attribute: PathId,
        index_substrings: bool,
        min_word_length: usize,
    ) -> Self {
        FulltextIndex {
            id,
            attribute,
            fields: vec![field],
            min_word_length: min_word_length.max(1),
            index_substrings,
            shaper,
            inner: RwLock::new(FulltextInner {
                postings: FxHashMap::default(),
                docs: FxHashMap::default(),
                stale: 0,
            }),
        }
    }

    /// Documents containing every token of the query string
    pub fn query(&self, text: &str) -> Vec<DocumentRef> {
        let words = tokenize(text, self.min_word_length, MAX_WORD_LENGTH);
        if words.is_empty() {
            return Vec::new();
        }

        let inner = self.inner.read();
        let mut result: Option<FxHashSet<&str>> = None;
        for word in &words {
            let live: FxHashSet<&str> = match inner.postings.get(word) {
                Some(entries) => entries
                    .iter()
                    .filter(|(doc_key, rev)| {
                        inner
                            .docs
                            .get(doc_key.as_str())
                            .is_some_and(|(cur, _)| *cur == **rev)
                    })
                    .map(|(doc_key, _)| doc_key.as_str())
                    .collect(),
                None => FxHashSet::default(),
            };
            result = Some(match result {
                Some(acc) => acc.intersection(&live).copied().collect(),
                None => live,
            });
        }

        result
            .unwrap_or_default()
            .into_iter()
            .map(|key| Arc::clone(&inner.docs[key].1))
            .collect()
    }

    /// Total posting entries, live and stale; the storage footprint
    pub fn posting_count(&self) -> usize {
        self.inner.read().postings.values().map(|m| m.len()).sum()
    }

    fn wordlist(&self, shaped: &ShapedDocument) -> Vec<String> {
        let Some(Value::String(text)) = self.shaper.extract(shaped, self.attribute) else {
            return Vec::new();
        };
        let mut words = tokenize(text, self.min_word_length, MAX_WORD_LENGTH);
        if self.index_substrings {
            let mut suffixes = Vec::new();
            for word in &words {
                let chars: Vec<char> = word.chars().collect();
                for start in 1..chars.len() {
                    if chars.len() - start >= self.min_word_length {
                        suffixes.push(chars[start..].iter().collect());
                    }
                }
            }
            words.extend(suffixes);
            words.sort_unstable();
            words.dedup();
        }
        words
    }

    fn insert_words(&self, doc: &DocumentRef) {
        let words = self.wordlist(doc.shaped());
        if words.is_empty() {
            return;
        }
        let mut inner = self.inner.write();
        inner
            .docs
            .insert(doc.key().to_string(), (doc.revision(), Arc::clone(doc)));
        for word in words {
            inner
                .postings
                .entry(word)
                .or_default()
                .insert(doc.key().to_string(), doc.revision());
        }
    }

    fn delete_document(&self, doc_key: &str) {
        let mut inner = self.inner.write();
        if inner.docs.remove(doc_key).is_some() {
            inner.stale += 1;
        }
    }
}

/// Split text into normalized words within the length bounds
fn tokenize(text: &str, min_len: usize, max_len: usize) -> Vec<String> {
    let mut words: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| {
            let len = w.chars().count();
            len >= min_len && len <= max_len
        })
        .map(|w| w.to_lowercase())
        .collect();
    words.sort_unstable();
    words.dedup();
    words
}

impl Index for FulltextIndex {
    fn id(&self) -> IndexId {
        self.id
    }

    fn kind(&self) -> IndexKind {
        IndexKind::Fulltext
    }

    fn is_unique(&self) -> bool {
        false
    }

    fn fields(&self) -> &[String] {
        &self.fields
    }

    fn insert(&self, doc: &DocumentRef) -> Result<()> {
        self.insert_words(doc);
        Ok(())
    }

    fn update(&self, new_doc: &DocumentRef, _old: &ShapedDocument) -> Result<()> {
        // token sets may overlap, so delete then insert
        self.delete_document(new_doc.key());
        self.insert_words(new_doc);
        Ok(())
    }

    fn remove(&self, doc: &DocumentRef) -> Result<()> {
        self.delete_document(doc.key());
        Ok(())
    }

    fn describe(&self) -> Value {
        json!({
            "id": self.id.as_u64(),
            "unique": false,
            "type": "fulltext",
            "indexSubstrings": self.index_substrings,
            "minLength": self.min_word_length,
            "fields": self.fields,
        })
    }

    /// Compact posting entries left behind by removed or updated documents
    fn cleanup(&self) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.stale == 0 {
            return Ok(());
        }
        trace!(stale = inner.stale, "compacting fulltext tombstones");

        let FulltextInner {
            postings,
            docs,
            stale,
        } = &mut *inner;
        postings.retain(|_, entries| {
            entries.retain(|doc_key, rev| {
                docs.get(doc_key.as_str())
                    .is_some_and(|(cur, _)| *cur == *rev)
            });
            !entries.is_empty()
        });
        *stale = 0;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
