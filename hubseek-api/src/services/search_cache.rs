//! Read-through cache in front of search, keyed by the query parameters.
//!
//! Entries are stored as JSON and validated on read: an entry that no longer
//! deserializes (schema drift, corruption) is dropped and treated as a miss,
//! never served.

use std::time::Duration;

use itertools::Itertools;
use moka::sync::Cache;
use tracing::warn;

use crate::domain::embedding::Embedder;
use crate::domain::search::{SearchError, SearchIndex, SearchPage, SearchParams, SearchService};

pub struct SearchCache {
    cache: Cache<String, String>,
}

impl SearchCache {
    pub fn new(max_capacity: u64, time_to_live: Duration) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(time_to_live)
                .build(),
        }
    }

    /// Deterministic key for a search request. The repository scope is
    /// sorted so logically equal requests share an entry.
    pub fn key(params: &SearchParams) -> String {
        let repos = params
            .repo_ids
            .as_ref()
            .map(|ids| {
                let mut sorted = ids.clone();
                sorted.sort_unstable();
                sorted.iter().join(",")
            })
            .unwrap_or_default();

        format!(
            "q={}&page={}&page_size={}&lucky={}&repos={}",
            params.query.trim(),
            params.page,
            params.page_size,
            params.lucky,
            repos
        )
    }

    pub fn get(&self, key: &str) -> Option<SearchPage> {
        let raw = self.cache.get(key)?;
        match serde_json::from_str::<SearchPage>(&raw) {
            Ok(page) => Some(page),
            Err(e) => {
                warn!(error = %e, "Discarding cache entry that failed validation");
                self.cache.invalidate(key);
                None
            }
        }
    }

    pub fn insert(&self, key: String, page: &SearchPage) {
        match serde_json::to_string(page) {
            Ok(raw) => self.cache.insert(key, raw),
            Err(e) => warn!(error = %e, "Failed to serialize search page for caching"),
        }
    }

    #[cfg(test)]
    fn insert_raw(&self, key: String, raw: String) {
        self.cache.insert(key, raw);
    }
}

/// Read-through search: serve from cache when a valid entry exists,
/// otherwise execute the search and populate the cache.
pub async fn search_with_cache<E, X>(
    cache: &SearchCache,
    service: &SearchService<E, X>,
    params: &SearchParams,
) -> Result<SearchPage, SearchError>
where
    E: Embedder,
    X: SearchIndex,
{
    let key = SearchCache::key(params);
    if let Some(hit) = cache.get(&key) {
        return Ok(hit);
    }

    let page = service.search(params).await?;
    cache.insert(key, &page);
    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::embedding::embedder::MockEmbedder;
    use crate::domain::search::repository::{make_doc, MockSearchIndex};

    fn sample_params() -> SearchParams {
        SearchParams::new("memory leak")
    }

    #[test]
    fn keys_are_deterministic_and_scope_order_insensitive() {
        let mut a = sample_params();
        a.repo_ids = Some(vec![3, 1, 2]);
        let mut b = sample_params();
        b.repo_ids = Some(vec![1, 2, 3]);

        assert_eq!(SearchCache::key(&a), SearchCache::key(&b));

        let mut c = sample_params();
        c.page = 2;
        assert_ne!(SearchCache::key(&a), SearchCache::key(&c));
    }

    #[tokio::test]
    async fn second_lookup_is_served_from_cache() {
        let cache = SearchCache::new(100, Duration::from_secs(60));
        let embedder = MockEmbedder::returning(vec![1.0, 0.0, 0.0]);
        let index = MockSearchIndex::new()
            .with_docs(vec![make_doc(1, "memory leak in parser", vec![1.0, 0.0, 0.0])]);
        let service = SearchService::with_defaults(embedder.clone(), index);

        let params = sample_params();
        let first = search_with_cache(&cache, &service, &params).await.unwrap();
        let second = search_with_cache(&cache, &service, &params).await.unwrap();

        assert_eq!(first.results[0].id, second.results[0].id);
        // The second request never reached the embedder.
        assert_eq!(embedder.call_count(), 1);
    }

    #[tokio::test]
    async fn invalid_cache_entries_are_discarded_not_served() {
        let cache = SearchCache::new(100, Duration::from_secs(60));
        let embedder = MockEmbedder::returning(vec![1.0, 0.0, 0.0]);
        let index = MockSearchIndex::new()
            .with_docs(vec![make_doc(1, "memory leak in parser", vec![1.0, 0.0, 0.0])]);
        let service = SearchService::with_defaults(embedder.clone(), index);

        let params = sample_params();
        cache.insert_raw(SearchCache::key(&params), "{not json".to_string());

        let page = search_with_cache(&cache, &service, &params).await.unwrap();

        // The poisoned entry was bypassed and recomputed.
        assert_eq!(page.results.len(), 1);
        assert_eq!(embedder.call_count(), 1);
        // And replaced with a valid entry.
        assert!(cache.get(&SearchCache::key(&params)).is_some());
    }
}
