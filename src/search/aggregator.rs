//! Search result aggregator / 搜索结果聚合器
//!
//! Drives one [`SearchSession`]: ranks the local full-text batch, appends
//! unranked remote pages in response order with identifier dedup, and keeps
//! pagination state. Remote results arriving after the query string changed
//! are discarded by comparing the query captured at fetch start against the
//! session's current query.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;

use super::ranking;
use super::session::{SearchPage, SearchSession};
use crate::cache::CacheStore;
use crate::config::SyncTuning;
use crate::models::{Language, SearchHit};
use crate::remote::{parse_hymn_path, RemoteClient, SongResultsPage};

/// 聚合器
pub struct SearchAggregator {
    cache: Arc<dyn CacheStore>,
    remote: Arc<dyn RemoteClient>,
    tuning: SyncTuning,
    session: Arc<Mutex<SearchSession>>,
}

impl SearchAggregator {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        remote: Arc<dyn RemoteClient>,
        tuning: SyncTuning,
    ) -> Self {
        Self {
            cache,
            remote,
            tuning,
            session: Arc::new(Mutex::new(SearchSession::new())),
        }
    }

    /// Current merged results / 当前合并结果
    pub async fn snapshot(&self) -> SearchPage {
        self.session.lock().await.snapshot()
    }

    /// Search one query page / 搜索一页
    ///
    /// Emits the local-ranked batch first, then (for the same page
    /// transaction) the accumulated results with the remote page appended.
    /// A remote failure ends the stream after the local emission; partial
    /// results stand.
    pub fn search(
        &self,
        query: &str,
        page: u32,
        preferred: Language,
    ) -> ReceiverStream<SearchPage> {
        let (tx, rx) = mpsc::channel(4);
        let cache = self.cache.clone();
        let remote = self.remote.clone();
        let session = self.session.clone();
        let rank_limit = self.tuning.local_rank_limit;
        let query = query.trim().to_string();

        tokio::spawn(async move {
            {
                let mut guard = session.lock().await;
                let fresh_session = guard.query() != query;
                if fresh_session {
                    // 新查询串原子地作废旧会话
                    guard.reset(&query, preferred);
                }

                if page <= 1 || fresh_session {
                    // 本地批次：排序+截断完全离线，不消费分页状态
                    let hits = match cache.full_text_search(&query).await {
                        Ok(hits) => hits,
                        Err(e) => {
                            tracing::warn!("Local full-text search failed: {}", e);
                            Vec::new()
                        }
                    };
                    let ranked = ranking::rank_hits(hits, preferred, rank_limit);
                    guard.absorb_local(ranked);
                    let _ = tx.send(guard.snapshot()).await;
                }

                if guard.fetch_in_flight() {
                    // 同一查询串的抓取已在途，不重复发起
                    return;
                }
                guard.begin_fetch();
            }

            remote_phase(remote, session, query, page.max(1), tx).await;
        });

        ReceiverStream::new(rx)
    }

    /// Honor a "load more" request, or silently ignore it / 加载更多或静默忽略
    ///
    /// Honored only when more pages exist, no fetch is in flight, and the
    /// requesting row sits within the trailing window.
    pub async fn load_more(&self, after_row: usize) -> Option<ReceiverStream<SearchPage>> {
        let (query, next_page) = {
            let mut guard = self.session.lock().await;
            if !guard.should_load_more(after_row, self.tuning.load_more_window) {
                return None;
            }
            let next_page = guard.advance_page();
            guard.begin_fetch();
            (guard.query().to_string(), next_page)
        };

        let (tx, rx) = mpsc::channel(2);
        let remote = self.remote.clone();
        let session = self.session.clone();
        tokio::spawn(async move {
            remote_phase(remote, session, query, next_page, tx).await;
        });
        Some(ReceiverStream::new(rx))
    }
}

/// 远端阶段：抓取、比对查询串、追加、发射
async fn remote_phase(
    remote: Arc<dyn RemoteClient>,
    session: Arc<Mutex<SearchSession>>,
    query: String,
    page: u32,
    tx: mpsc::Sender<SearchPage>,
) {
    let response = remote.search(&query, Some(page)).await;

    let mut guard = session.lock().await;
    if guard.query() != query {
        // 会话已被新查询重置；迟到的结果直接丢弃
        tracing::debug!("Discarding stale remote results for '{}'", query);
        return;
    }
    guard.finish_fetch();

    match response {
        Ok(page_data) => {
            let hits = convert_remote_rows(&page_data);
            guard.append_remote(hits, page_data.has_more_pages);
            guard.set_page(page);
            let _ = tx.send(guard.snapshot()).await;
        }
        Err(e) => {
            // 远端失败只终止本次操作；已送达的本地结果保留
            tracing::warn!("Remote search failed for '{}': {}", query, e);
        }
    }
}

/// Remote rows are pre-sorted by the remote's own relevance engine; they
/// are converted in response order, never re-ranked. Malformed paths are
/// skipped without failing the batch. / 远端行按响应顺序转换，不重排
fn convert_remote_rows(page: &SongResultsPage) -> Vec<SearchHit> {
    let mut hits = Vec::with_capacity(page.results.len());
    for row in &page.results {
        match parse_hymn_path(&row.path) {
            Ok(identifier) => hits.push(SearchHit {
                identifier,
                title: row.name.clone(),
            }),
            Err(e) => {
                tracing::warn!("Skipping search row '{}': {}", row.name, e);
            }
        }
    }
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{SyncError, SyncResult};
    use crate::models::{FullTextHit, HymnIdentifier, HymnRecord, HymnType};
    use crate::remote::{HymnalNetJson, SongResult};
    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;
    use tokio_stream::StreamExt;

    fn blob(title: u32, lyrics: u32) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&title.to_le_bytes());
        out.extend_from_slice(&lyrics.to_le_bytes());
        out
    }

    fn local_hit(number: &str, title: &str, title_count: u32, lyrics_count: u32) -> FullTextHit {
        FullTextHit {
            identifier: HymnIdentifier::new(HymnType::Classic, number),
            title: title.to_string(),
            language: Language::English,
            match_info: blob(title_count, lyrics_count),
        }
    }

    fn remote_row(number: &str, name: &str) -> SongResult {
        SongResult {
            name: name.to_string(),
            path: format!("/en/hymn/h/{}", number),
        }
    }

    struct FtsCache {
        hits: Vec<FullTextHit>,
    }

    #[async_trait]
    impl CacheStore for FtsCache {
        fn is_usable(&self) -> bool {
            true
        }
        async fn get_hymn(&self, _id: &HymnIdentifier) -> SyncResult<Option<HymnRecord>> {
            Ok(None)
        }
        async fn save_hymn(&self, _record: &HymnRecord) -> SyncResult<i64> {
            Ok(1)
        }
        async fn full_text_search(&self, _query: &str) -> SyncResult<Vec<FullTextHit>> {
            Ok(self.hits.clone())
        }
        async fn find_by_hymn_code(&self, _code: &str) -> SyncResult<Vec<SearchHit>> {
            Ok(Vec::new())
        }
    }

    struct PagedRemote {
        pages: SyncMutex<HashMap<(String, u32), SongResultsPage>>,
        calls: AtomicUsize,
        /// 仅阻塞指定查询串的抓取
        gate: Option<(String, Arc<Notify>)>,
    }

    impl PagedRemote {
        fn new() -> Self {
            Self {
                pages: SyncMutex::new(HashMap::new()),
                calls: AtomicUsize::new(0),
                gate: None,
            }
        }

        fn with_page(self, query: &str, page: u32, rows: Vec<SongResult>, has_more: bool) -> Self {
            self.pages.lock().insert(
                (query.to_string(), page),
                SongResultsPage {
                    results: rows,
                    has_more_pages: Some(has_more),
                },
            );
            self
        }
    }

    #[async_trait]
    impl RemoteClient for PagedRemote {
        async fn fetch_hymn(&self, _id: &HymnIdentifier) -> SyncResult<HymnalNetJson> {
            Err(SyncError::Transport("not used".to_string()))
        }

        async fn search(&self, query: &str, page: Option<u32>) -> SyncResult<SongResultsPage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some((gated_query, gate)) = &self.gate {
                if gated_query == query {
                    gate.notified().await;
                }
            }
            self.pages
                .lock()
                .get(&(query.to_string(), page.unwrap_or(1)))
                .cloned()
                .ok_or_else(|| SyncError::Transport("no such page".to_string()))
        }
    }

    fn aggregator(cache_hits: Vec<FullTextHit>, remote: PagedRemote) -> SearchAggregator {
        SearchAggregator::new(
            Arc::new(FtsCache { hits: cache_hits }),
            Arc::new(remote),
            SyncTuning::default(),
        )
    }

    #[tokio::test]
    async fn test_local_batch_precedes_remote_and_dedups() {
        let remote = PagedRemote::new().with_page(
            "grace",
            1,
            vec![remote_row("1", "Amazing grace"), remote_row("7", "Grace greater")],
            false,
        );
        let agg = aggregator(
            vec![
                local_hit("1", "Amazing grace", 1, 2),
                local_hit("3", "Sweet grace", 0, 1),
            ],
            remote,
        );

        let pages: Vec<SearchPage> =
            agg.search("grace", 1, Language::English).collect().await;
        assert_eq!(pages.len(), 2);

        // 本地批次先到
        assert_eq!(pages[0].results.len(), 2);
        assert_eq!(pages[0].results[0].identifier.number, "1");

        // 合并后：重复的h1只出现一次且保持本地位置
        let merged: Vec<&str> = pages[1]
            .results
            .iter()
            .map(|h| h.identifier.number.as_str())
            .collect();
        assert_eq!(merged, vec!["1", "3", "7"]);
        assert!(!pages[1].has_more_pages);
    }

    #[tokio::test]
    async fn test_remote_failure_keeps_local_results() {
        // 远端无该查询的页面 → Transport错误
        let agg = aggregator(vec![local_hit("5", "Rest", 1, 0)], PagedRemote::new());

        let pages: Vec<SearchPage> = agg.search("rest", 1, Language::English).collect().await;
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].results.len(), 1);

        // 会话保留部分结果，后续查询不受影响
        let snapshot = agg.snapshot().await;
        assert_eq!(snapshot.results.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_remote_results_are_discarded() {
        let gate = Arc::new(Notify::new());
        let mut remote = PagedRemote::new()
            .with_page("old", 1, vec![remote_row("1", "Old result")], false)
            .with_page("new", 1, vec![remote_row("2", "New result")], false);
        remote.gate = Some(("old".to_string(), gate.clone()));
        let agg = aggregator(Vec::new(), remote);

        // 旧查询卡在远端阶段
        let mut old_stream = agg.search("old", 1, Language::English);
        assert_eq!(old_stream.next().await.unwrap().results.len(), 0);

        // 查询变更重置会话；新查询的抓取不受阻塞
        let mut new_stream = agg.search("new", 1, Language::English);
        assert_eq!(new_stream.next().await.unwrap().results.len(), 0);
        let merged = new_stream.next().await.unwrap();
        assert_eq!(merged.results.len(), 1);
        assert_eq!(merged.results[0].identifier.number, "2");

        // 放行旧抓取：迟到结果被丢弃，旧流结束且不再发射
        gate.notify_one();
        assert!(old_stream.next().await.is_none());

        let snapshot = agg.snapshot().await;
        assert_eq!(snapshot.results.len(), 1);
        assert_eq!(snapshot.results[0].title, "New result");
    }

    #[tokio::test]
    async fn test_load_more_appends_next_page() {
        let remote = PagedRemote::new()
            .with_page("hymn", 1, vec![remote_row("1", "One")], true)
            .with_page("hymn", 2, vec![remote_row("2", "Two")], false);
        let agg = aggregator(Vec::new(), remote);

        let pages: Vec<SearchPage> = agg.search("hymn", 1, Language::English).collect().await;
        assert!(pages.last().unwrap().has_more_pages);

        let stream = agg.load_more(0).await.expect("gate passes");
        let pages: Vec<SearchPage> = stream.collect().await;
        assert_eq!(pages.len(), 1);
        let merged: Vec<&str> = pages[0]
            .results
            .iter()
            .map(|h| h.identifier.number.as_str())
            .collect();
        assert_eq!(merged, vec!["1", "2"]);
        assert!(!pages[0].has_more_pages);
    }

    #[tokio::test]
    async fn test_load_more_is_noop_without_more_pages() {
        let remote =
            PagedRemote::new().with_page("q", 1, vec![remote_row("1", "One")], false);
        let agg = aggregator(Vec::new(), remote);
        let _: Vec<SearchPage> = agg.search("q", 1, Language::English).collect().await;

        let before = agg.snapshot().await.results.len();
        assert!(agg.load_more(0).await.is_none());
        assert_eq!(agg.snapshot().await.results.len(), before);
    }

    #[tokio::test]
    async fn test_malformed_remote_rows_are_skipped() {
        let remote = PagedRemote::new().with_page(
            "q",
            1,
            vec![
                remote_row("1", "Good"),
                SongResult {
                    name: "Broken".to_string(),
                    path: "/not/a/hymn/path".to_string(),
                },
            ],
            false,
        );
        let agg = aggregator(Vec::new(), remote);
        let pages: Vec<SearchPage> = agg.search("q", 1, Language::English).collect().await;
        let merged = &pages.last().unwrap().results;
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].title, "Good");
    }
}
