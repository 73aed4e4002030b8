//! Lore and rules lookups.
//!
//! Both are read-only collaborators: `(query) -> ranked records`. The
//! in-memory implementations build their keyword index once through a
//! [`CatalogCache`] that the host owns and can invalidate.

use crate::text::normalize;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// A lore or rules record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogRecord {
    pub id: String,
    pub title: String,
    pub text: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl CatalogRecord {
    pub fn new(id: impl Into<String>, title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            text: text.into(),
            tags: Vec::new(),
        }
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }
}

/// A record with its relevance score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedRecord {
    #[serde(flatten)]
    pub record: CatalogRecord,
    pub score: u32,
}

/// World lore lookup.
pub trait LoreLookup: Send + Sync {
    fn query(&self, query: &str, limit: usize) -> Vec<RankedRecord>;
}

/// Rules text lookup.
pub trait RulesLookup: Send + Sync {
    fn query(&self, query: &str, limit: usize) -> Vec<RankedRecord>;
}

// =============================================================================
// Cache
// =============================================================================

type Loader<T> = Box<dyn Fn() -> T + Send + Sync>;

/// Read-through cache: built on first use, rebuilt after [`invalidate`](Self::invalidate).
pub struct CatalogCache<T> {
    loader: Loader<T>,
    slot: RwLock<Option<Arc<T>>>,
}

impl<T> fmt::Debug for CatalogCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogCache")
            .field("built", &self.is_built())
            .finish()
    }
}

impl<T> CatalogCache<T> {
    pub fn new(loader: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self {
            loader: Box::new(loader),
            slot: RwLock::new(None),
        }
    }

    /// The cached value, building it if needed.
    pub fn get(&self) -> Arc<T> {
        if let Some(value) = self
            .slot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
        {
            return Arc::clone(value);
        }

        let mut slot = self
            .slot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(value) = slot.as_ref() {
            return Arc::clone(value);
        }
        let value = Arc::new((self.loader)());
        *slot = Some(Arc::clone(&value));
        debug!("catalog built");
        value
    }

    /// Drop the cached value; the next `get` rebuilds it.
    pub fn invalidate(&self) {
        *self
            .slot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }

    pub fn is_built(&self) -> bool {
        self.slot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }
}

// =============================================================================
// Keyword index
// =============================================================================

/// Inverted index over normalized words of title, tags and text.
#[derive(Debug, Clone, Default)]
pub struct KeywordIndex {
    records: Vec<CatalogRecord>,
    postings: HashMap<String, Vec<(usize, u32)>>,
}

const TITLE_WEIGHT: u32 = 3;
const TAG_WEIGHT: u32 = 2;
const TEXT_WEIGHT: u32 = 1;

fn index_words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 2)
        .map(str::to_string)
}

impl KeywordIndex {
    pub fn build(records: Vec<CatalogRecord>) -> Self {
        let mut postings: HashMap<String, HashMap<usize, u32>> = HashMap::new();
        for (i, record) in records.iter().enumerate() {
            let fields = [
                (normalize(&record.title), TITLE_WEIGHT),
                (normalize(&record.tags.join(" ")), TAG_WEIGHT),
                (normalize(&record.text), TEXT_WEIGHT),
            ];
            for (text, weight) in &fields {
                for word in index_words(text) {
                    let entry = postings.entry(word).or_default().entry(i).or_insert(0);
                    *entry = (*entry).max(*weight);
                }
            }
        }

        let postings = postings
            .into_iter()
            .map(|(word, hits)| (word, hits.into_iter().collect()))
            .collect();
        Self { records, postings }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records sharing words with `query`, best first. An empty query lists
    /// the first records.
    pub fn search(&self, query: &str, limit: usize) -> Vec<RankedRecord> {
        let query = normalize(query);
        let words: Vec<String> = index_words(&query).collect();
        if words.is_empty() {
            return self
                .records
                .iter()
                .take(limit)
                .map(|r| RankedRecord {
                    record: r.clone(),
                    score: 0,
                })
                .collect();
        }

        let mut scores: HashMap<usize, u32> = HashMap::new();
        for word in &words {
            if let Some(hits) = self.postings.get(word) {
                for (i, weight) in hits {
                    *scores.entry(*i).or_insert(0) += weight;
                }
            }
        }

        let mut ranked: Vec<(usize, u32)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked
            .into_iter()
            .take(limit)
            .map(|(i, score)| RankedRecord {
                record: self.records[i].clone(),
                score,
            })
            .collect()
    }
}

/// Keyword-ranked lore over a cached index.
#[derive(Debug, Clone)]
pub struct StaticLore {
    cache: Arc<CatalogCache<KeywordIndex>>,
}

impl StaticLore {
    pub fn new(records: Vec<CatalogRecord>) -> Self {
        Self::from_cache(Arc::new(CatalogCache::new(move || {
            KeywordIndex::build(records.clone())
        })))
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Share a cache the host controls.
    pub fn from_cache(cache: Arc<CatalogCache<KeywordIndex>>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<CatalogCache<KeywordIndex>> {
        &self.cache
    }
}

impl LoreLookup for StaticLore {
    fn query(&self, query: &str, limit: usize) -> Vec<RankedRecord> {
        self.cache.get().search(query, limit)
    }
}

/// Keyword-ranked rules text over a cached index.
#[derive(Debug, Clone)]
pub struct StaticRules {
    cache: Arc<CatalogCache<KeywordIndex>>,
}

impl StaticRules {
    pub fn new(records: Vec<CatalogRecord>) -> Self {
        Self::from_cache(Arc::new(CatalogCache::new(move || {
            KeywordIndex::build(records.clone())
        })))
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn from_cache(cache: Arc<CatalogCache<KeywordIndex>>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<CatalogCache<KeywordIndex>> {
        &self.cache
    }
}

impl RulesLookup for StaticRules {
    fn query(&self, query: &str, limit: usize) -> Vec<RankedRecord> {
        self.cache.get().search(query, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn lore() -> Vec<CatalogRecord> {
        vec![
            CatalogRecord::new("guilde", "Guilde des Marchands", "Elle contrôle le Port Est.")
                .with_tags(&["commerce"]),
            CatalogRecord::new("port", "Port Est", "Quais, entrepôts et contrebande."),
            CatalogRecord::new("temple", "Temple de l'Aube", "Un sanctuaire sur la colline."),
        ]
    }

    #[test]
    fn test_search_ranks_title_over_text() {
        let index = KeywordIndex::build(lore());
        let results = index.search("port", 5);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].record.id, "port");
        assert_eq!(results[0].score, TITLE_WEIGHT);
        assert_eq!(results[1].record.id, "guilde");
    }

    #[test]
    fn test_search_folds_accents() {
        let index = KeywordIndex::build(lore());
        let results = index.search("CONTRÔLE", 5);
        assert_eq!(results[0].record.id, "guilde");
    }

    #[test]
    fn test_empty_query_lists_records() {
        let index = KeywordIndex::build(lore());
        assert_eq!(index.search("", 2).len(), 2);
        assert!(index.search("dragon", 5).is_empty());
    }

    #[test]
    fn test_cache_builds_once_until_invalidated() {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&builds);
        let cache = CatalogCache::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            KeywordIndex::build(lore())
        });

        assert!(!cache.is_built());
        cache.get();
        cache.get();
        assert_eq!(builds.load(Ordering::SeqCst), 1);

        cache.invalidate();
        assert!(!cache.is_built());
        assert_eq!(cache.get().len(), 3);
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_static_lore_shares_cache() {
        let lore = StaticLore::new(lore());
        let cloned = lore.clone();
        lore.query("temple", 1);
        assert!(cloned.cache().is_built());
    }
}
