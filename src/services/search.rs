use std::collections::HashSet;

use mongodb::bson::{doc, DateTime};

use crate::backend::{CollectionPath, Query, Record, SharedStore, SortOrder, SEARCH_HISTORY, TRENDING_SEARCHES, USERS};
use crate::error::ServiceResult;
use crate::models::{decode, RecentSearch, SearchRecord, SearchSource, ALL_CATEGORIES};
use crate::utils::validation::normalize_query;

pub const DEFAULT_RECENT_LIMIT: usize = 8;

/// Personal and trending search history. Never fails: problems are
/// logged and reported as "nothing recorded" / "nothing found".
pub struct SearchHistory {
    store: SharedStore,
}

fn personal(uid: &str) -> CollectionPath {
    CollectionPath::nested(USERS, uid, SEARCH_HISTORY)
}

fn trending() -> CollectionPath {
    CollectionPath::root(TRENDING_SEARCHES)
}

impl SearchHistory {
    pub fn new(store: SharedStore) -> Self {
        SearchHistory { store }
    }

    pub async fn record_search(&self, user_id: Option<&str>, query: &str, category: Option<&str>) {
        let Some(query) = normalize_query(query) else {
            return;
        };
        let category = category
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(ALL_CATEGORIES);
        let timestamp = DateTime::now();

        if let Some(uid) = user_id.filter(|uid| !uid.is_empty()) {
            let entry = doc! { "query": query.as_str(), "category": category, "timestamp": timestamp };
            if let Err(e) = self.store.insert(&personal(uid), entry).await {
                log::warn!("could not save search history for {}: {}", uid, e);
            }
        }

        let entry = doc! {
            "query": query.as_str(),
            "category": category,
            "timestamp": timestamp,
            "anonymized": user_id.is_none(),
        };
        if let Err(e) = self.store.insert(&trending(), entry).await {
            log::warn!("could not save trending search: {}", e);
        }
    }

    /// The user's own recent searches when there are any, otherwise the
    /// trending pool. Each query text appears once, most recent first.
    pub async fn recent_searches(&self, user_id: Option<&str>, limit: Option<usize>) -> Vec<RecentSearch> {
        let limit = limit.filter(|l| *l > 0).unwrap_or(DEFAULT_RECENT_LIMIT);

        if let Some(uid) = user_id.filter(|uid| !uid.is_empty()) {
            match self.newest(&personal(uid), limit).await {
                Ok(records) if !records.is_empty() => {
                    return dedup(records, SearchSource::Personal, limit);
                }
                Ok(_) => {}
                Err(e) => log::warn!("could not load search history for {}: {}", uid, e),
            }
        }

        match self.newest(&trending(), limit * 2).await {
            Ok(records) => dedup(records, SearchSource::Trending, limit),
            Err(e) => {
                log::warn!("could not load trending searches: {}", e);
                Vec::new()
            }
        }
    }

    async fn newest(&self, path: &CollectionPath, limit: usize) -> ServiceResult<Vec<Record>> {
        let query = Query::all()
            .order_by("timestamp", SortOrder::Descending)
            .limit(limit as i64);
        Ok(self.store.query(path, &query).await?)
    }
}

fn dedup(records: Vec<Record>, source: SearchSource, limit: usize) -> Vec<RecentSearch> {
    let mut seen = HashSet::new();
    let mut searches = Vec::new();
    for record in records {
        let entry: SearchRecord = match decode(record.data) {
            Ok(entry) => entry,
            Err(e) => {
                log::debug!("skipping malformed search record {}: {}", record.id, e);
                continue;
            }
        };
        if !seen.insert(entry.query.clone()) {
            continue;
        }
        searches.push(RecentSearch {
            id: record.id,
            query: entry.query,
            category: entry.category,
            timestamp: entry.timestamp,
            source,
        });
        if searches.len() == limit {
            break;
        }
    }
    searches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryStore;
    use std::sync::Arc;

    fn history() -> SearchHistory {
        SearchHistory::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn blank_queries_are_ignored() {
        let searches = history();
        searches.record_search(Some("u1"), "   ", None).await;
        assert!(searches.recent_searches(Some("u1"), None).await.is_empty());
    }

    #[tokio::test]
    async fn personal_history_is_deduplicated_newest_first() {
        let searches = history();
        searches.record_search(Some("u1"), "Garden", None).await;
        searches.record_search(Some("u1"), "moving", Some("transport")).await;
        searches.record_search(Some("u1"), "  garden ", Some("garden")).await;

        let recent = searches.recent_searches(Some("u1"), None).await;
        let queries: Vec<_> = recent.iter().map(|s| s.query.as_str()).collect();
        assert_eq!(queries, vec!["garden", "moving"]);
        assert_eq!(recent[0].category, "garden");
        assert!(recent.iter().all(|s| s.source == SearchSource::Personal));
    }

    #[tokio::test]
    async fn anonymous_users_see_trending() {
        let searches = history();
        for query in ["dog walking", "ikea", "dog walking", "painting"] {
            searches.record_search(Some("someone"), query, None).await;
        }
        searches.record_search(None, "ikea", None).await;

        let recent = searches.recent_searches(None, Some(2)).await;
        let queries: Vec<_> = recent.iter().map(|s| s.query.as_str()).collect();
        assert_eq!(queries, vec!["ikea", "painting"]);
        assert!(recent.iter().all(|s| s.source == SearchSource::Trending));
    }

    #[tokio::test]
    async fn user_without_history_falls_back_to_trending() {
        let searches = history();
        searches.record_search(None, "babysitting", None).await;
        let recent = searches.recent_searches(Some("new-user"), None).await;
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].source, SearchSource::Trending);
        assert_eq!(recent[0].category, "all");
    }
}
