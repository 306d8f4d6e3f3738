//! Per-query search session / 单查询搜索会话
//!
//! Created when a query becomes non-empty, reset (not destroyed) whenever
//! the query string changes, destroyed when the owning flow is torn down.
//!
//! Invariants / 不变量：
//! - `accumulated` never contains duplicate identifiers
//! - the page number only advances when more pages exist and no fetch is
//!   in flight

use serde::Serialize;

use crate::models::{Language, SearchHit};

/// One emission of merged results / 一次合并结果发射
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchPage {
    pub results: Vec<SearchHit>,
    pub has_more_pages: bool,
}

/// 会话状态
#[derive(Debug)]
pub struct SearchSession {
    query: String,
    current_page: u32,
    has_more_pages: bool,
    fetch_in_flight: bool,
    accumulated: Vec<SearchHit>,
    last_language: Option<Language>,
}

impl SearchSession {
    pub fn new() -> Self {
        Self {
            query: String::new(),
            current_page: 1,
            has_more_pages: false,
            fetch_in_flight: false,
            accumulated: Vec::new(),
            last_language: None,
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn current_page(&self) -> u32 {
        self.current_page
    }

    pub fn has_more_pages(&self) -> bool {
        self.has_more_pages
    }

    pub fn fetch_in_flight(&self) -> bool {
        self.fetch_in_flight
    }

    pub fn result_count(&self) -> usize {
        self.accumulated.len()
    }

    pub fn last_language(&self) -> Option<Language> {
        self.last_language
    }

    /// A new query string invalidates the old session atomically / 原子重置
    pub fn reset(&mut self, query: &str, language: Language) {
        self.query = query.to_string();
        self.current_page = 1;
        self.has_more_pages = false;
        self.fetch_in_flight = false;
        self.accumulated.clear();
        self.last_language = Some(language);
    }

    /// Install the local-ranked batch; it is complete in one shot and never
    /// paginated / 写入本地排序批次
    pub fn absorb_local(&mut self, hits: Vec<SearchHit>) {
        self.accumulated.clear();
        for hit in hits {
            self.push_dedup(hit);
        }
    }

    /// Append one remote page in response order / 追加远端结果页
    ///
    /// Rows whose identifier is already accumulated keep their existing
    /// position (the local instance precedes remote in merge order); the
    /// most recently seen title still wins.
    pub fn append_remote(&mut self, hits: Vec<SearchHit>, has_more: Option<bool>) {
        for hit in hits {
            self.push_dedup(hit);
        }
        // 分页标志完全由远端响应驱动
        self.has_more_pages = has_more.unwrap_or(false);
    }

    fn push_dedup(&mut self, hit: SearchHit) {
        if let Some(existing) = self
            .accumulated
            .iter_mut()
            .find(|h| h.identifier == hit.identifier)
        {
            existing.title = hit.title;
        } else {
            self.accumulated.push(hit);
        }
    }

    pub fn begin_fetch(&mut self) {
        self.fetch_in_flight = true;
    }

    pub fn finish_fetch(&mut self) {
        self.fetch_in_flight = false;
    }

    /// 仅在允许时推进页码
    pub fn advance_page(&mut self) -> u32 {
        debug_assert!(self.has_more_pages && !self.fetch_in_flight);
        self.current_page += 1;
        self.current_page
    }

    pub fn set_page(&mut self, page: u32) {
        self.current_page = page.max(1);
    }

    /// "load more" gate: more pages known, nothing in flight, and the
    /// requesting row sits within the trailing window / 加载更多门槛
    pub fn should_load_more(&self, after_row: usize, window: usize) -> bool {
        self.has_more_pages
            && !self.fetch_in_flight
            && !self.accumulated.is_empty()
            && after_row + window >= self.accumulated.len()
    }

    pub fn snapshot(&self) -> SearchPage {
        SearchPage {
            results: self.accumulated.clone(),
            has_more_pages: self.has_more_pages,
        }
    }
}

impl Default for SearchSession {
    fn default() -> Self {
        Self::new()
    }
}
