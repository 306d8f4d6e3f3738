//! Cache store seam / 缓存存储接口
//!
//! The engine consumes the local store through this narrow interface only.
//! A store may report itself unusable (backing database failed to open);
//! callers degrade to network-only in that case, they never crash.

use async_trait::async_trait;

use crate::error::SyncResult;
use crate::models::{FullTextHit, HymnIdentifier, HymnRecord, SearchHit};

pub mod sqlite;

pub use sqlite::SqliteCacheStore;

/// Local persistence interface / 本地持久化接口
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Whether the backing store initialized successfully / 底层库是否可用
    fn is_usable(&self) -> bool;

    /// Point lookup by identifier / 按标识符查询
    async fn get_hymn(&self, id: &HymnIdentifier) -> SyncResult<Option<HymnRecord>>;

    /// Persist a record, returning its generated row id / 保存记录并返回行ID
    async fn save_hymn(&self, record: &HymnRecord) -> SyncResult<i64>;

    /// Full-text query over title and lyrics / 标题与歌词全文查询
    async fn full_text_search(&self, query: &str) -> SyncResult<Vec<FullTextHit>>;

    /// Lookup by the internal numeric hymn code / 按内部编码查询
    async fn find_by_hymn_code(&self, code: &str) -> SyncResult<Vec<SearchHit>>;
}
