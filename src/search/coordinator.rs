//! Search flow coordinator / 搜索流程协调器
//!
//! The surface the presentation layer consumes: a debounced query input, a
//! gated "load more", and one results stream. Owns classification, the
//! debouncer, and the aggregator; collaborators arrive as explicit
//! constructor arguments.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use super::aggregator::SearchAggregator;
use super::classify::{classify, QueryRoute};
use super::session::SearchPage;
use crate::cache::CacheStore;
use crate::config::SyncTuning;
use crate::models::{HymnIdentifier, Language, SearchHit};
use crate::remote::RemoteClient;
use crate::request::{broadcast_stream, Debouncer};

/// 协调器
pub struct SearchCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    aggregator: SearchAggregator,
    cache: Arc<dyn CacheStore>,
    debouncer: Debouncer,
    language: Mutex<Language>,
    current_query: Mutex<String>,
    results: broadcast::Sender<SearchPage>,
}

impl SearchCoordinator {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        remote: Arc<dyn RemoteClient>,
        tuning: SyncTuning,
        language: Language,
    ) -> Self {
        let (results, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(Inner {
                aggregator: SearchAggregator::new(cache.clone(), remote, tuning.clone()),
                cache,
                debouncer: Debouncer::new(tuning.debounce()),
                language: Mutex::new(language),
                current_query: Mutex::new(String::new()),
                results,
            }),
        }
    }

    /// Merged result emissions / 合并结果流
    pub fn subscribe(&self) -> ReceiverStream<SearchPage> {
        broadcast_stream(self.inner.results.subscribe())
    }

    pub fn set_language(&self, language: Language) {
        *self.inner.language.lock() = language;
    }

    /// Feed one query-string change / 输入查询串变化
    ///
    /// Changes are debounced; the first transition out of an empty query is
    /// handled immediately. A later keystroke within the quiet interval
    /// discards the pending trigger.
    pub fn set_query(&self, raw: &str) {
        let query = raw.trim().to_string();
        let was_empty;
        {
            let mut current = self.inner.current_query.lock();
            if *current == query {
                return;
            }
            was_empty = current.is_empty();
            *current = query.clone();
        }

        if query.is_empty() {
            // 清空查询只作废挂起的触发
            self.inner.debouncer.cancel_pending();
            return;
        }

        let inner = self.inner.clone();
        self.inner
            .debouncer
            .schedule(was_empty, move || async move {
                inner.run_query(query).await;
            });
    }

    /// Gated "load more"; silently ignored unless honored / 加载更多
    pub fn load_more(&self, after_row: usize) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            if let Some(mut stream) = inner.aggregator.load_more(after_row).await {
                while let Some(page) = stream.next().await {
                    let _ = inner.results.send(page);
                }
            }
        });
    }
}

impl Inner {
    async fn run_query(self: Arc<Self>, query: String) {
        // 防抖触发时查询可能又变了
        if *self.current_query.lock() != query {
            return;
        }
        let preferred = *self.language.lock();

        match classify(&query, preferred) {
            None => {}
            Some(QueryRoute::DirectLookup(ids)) => {
                let page = self.resolve_direct(ids).await;
                self.emit_if_current(&query, page);
            }
            Some(QueryRoute::HymnCode(code)) => {
                let results = match self.cache.find_by_hymn_code(&code).await {
                    Ok(results) => results,
                    Err(e) => {
                        tracing::warn!("Hymn code lookup failed: {}", e);
                        Vec::new()
                    }
                };
                self.emit_if_current(
                    &query,
                    SearchPage {
                        results,
                        has_more_pages: false,
                    },
                );
            }
            Some(QueryRoute::FullText(text)) => {
                let mut stream = self.aggregator.search(&text, 1, preferred);
                while let Some(page) = stream.next().await {
                    let _ = self.results.send(page);
                }
            }
        }
    }

    /// Direct routes resolve titles with a best-effort local peek; cache
    /// misses fall back to the catalog label. / 直接路由用本地窥探补标题
    async fn resolve_direct(&self, ids: Vec<HymnIdentifier>) -> SearchPage {
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            let title = match self.cache.get_hymn(&id).await {
                Ok(Some(record)) if !record.title.trim().is_empty() => record.title,
                _ => format!("{} {}", id.hymn_type.label(), id.number),
            };
            results.push(SearchHit {
                identifier: id,
                title,
            });
        }
        SearchPage {
            results,
            has_more_pages: false,
        }
    }

    fn emit_if_current(&self, query: &str, page: SearchPage) {
        if *self.current_query.lock() == query {
            let _ = self.results.send(page);
        } else {
            tracing::debug!("Dropping results for superseded query '{}'", query);
        }
    }
}
