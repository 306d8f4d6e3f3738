//! SQLite-backed hymn cache / SQLite诗歌缓存
//!
//! Storage layout / 存储方案：
//! - hymns表：一行一首诗歌，(hymn_type, hymn_number, query_params) 唯一
//! - hymns_fts：FTS4虚表 (title, lyrics)，rowid 复用 hymns.id
//!
//! 特性：
//! - WAL模式 + busy_timeout（并发安全）
//! - 打开失败不致命：降级为 is_usable() == false，引擎走网络
//! - matchinfo 归一化为每列一个u32计数后再交给排序层

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};

use super::CacheStore;
use crate::error::{SyncError, SyncResult};
use crate::models::{
    FullTextHit, HymnIdentifier, HymnRecord, HymnType, SearchHit, Verse,
};

/// Number of indexed FTS columns (title, lyrics) / 全文索引列数
const FTS_COLUMNS: usize = 2;

/// SQLite cache store / SQLite缓存
pub struct SqliteCacheStore {
    db: Option<Pool<Sqlite>>,
}

impl SqliteCacheStore {
    /// Open (or create) the database file. Failure is remembered, not raised:
    /// the store reports itself unusable and every call degrades gracefully.
    /// 打开（或创建）数据库文件；失败时记为不可用而不是报错
    pub async fn open(db_path: &Path) -> Self {
        match Self::try_open(db_path).await {
            Ok(db) => Self { db: Some(db) },
            Err(e) => {
                tracing::warn!("Hymn cache unavailable, running network-only: {}", e);
                Self { db: None }
            }
        }
    }

    /// In-memory store for tests. A memory database exists per connection,
    /// so the pool is pinned to one. / 测试用内存库（单连接）
    pub async fn open_in_memory() -> Self {
        match Self::connect("sqlite::memory:", 1).await {
            Ok(db) => Self { db: Some(db) },
            Err(e) => {
                tracing::warn!("In-memory hymn cache unavailable: {}", e);
                Self { db: None }
            }
        }
    }

    async fn try_open(db_path: &Path) -> Result<Pool<Sqlite>, String> {
        // 确保目录存在
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        let db_url = format!("sqlite:{}?mode=rwc", db_path.to_string_lossy());
        Self::connect(&db_url, 4).await
    }

    async fn connect(db_url: &str, max_connections: u32) -> Result<Pool<Sqlite>, String> {
        let db = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(db_url)
            .await
            .map_err(|e| e.to_string())?;

        // 启用WAL模式，提高并发性能
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&db)
            .await
            .map_err(|e| e.to_string())?;

        // 设置busy_timeout，避免锁超时
        sqlx::query("PRAGMA busy_timeout=5000")
            .execute(&db)
            .await
            .map_err(|e| e.to_string())?;

        sqlx::query("PRAGMA synchronous=NORMAL")
            .execute(&db)
            .await
            .map_err(|e| e.to_string())?;

        run_migrations(&db).await.map_err(|e| e.to_string())?;

        tracing::info!("Hymn cache database ready (WAL mode)");
        Ok(db)
    }

    fn pool(&self) -> SyncResult<&Pool<Sqlite>> {
        self.db
            .as_ref()
            .ok_or_else(|| SyncError::StoreUnusable("database not initialized".to_string()))
    }
}

/// Run database migrations / 运行数据库迁移
async fn run_migrations(pool: &Pool<Sqlite>) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS hymns (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            hymn_type TEXT NOT NULL,
            hymn_number TEXT NOT NULL,
            query_params TEXT NOT NULL DEFAULT '{}',
            title TEXT NOT NULL,
            verses TEXT NOT NULL,
            category TEXT,
            subcategory TEXT,
            author TEXT,
            composer TEXT,
            music_key TEXT,
            time_signature TEXT,
            meter TEXT,
            scriptures TEXT,
            hymn_code TEXT,
            lead_sheet_url TEXT,
            piano_sheet_url TEXT,
            languages TEXT NOT NULL DEFAULT '[]',
            relevant TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(hymn_type, hymn_number, query_params)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE VIRTUAL TABLE IF NOT EXISTS hymns_fts USING fts4(title, lyrics)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Canonical textual form of the params map / 参数映射的规范文本形式
///
/// BTreeMap serialization is key-sorted, so the same params always produce
/// the same string regardless of insertion order (the UNIQUE constraint
/// depends on this).
fn params_to_text(id: &HymnIdentifier) -> String {
    serde_json::to_string(&id.query_params).unwrap_or_else(|_| "{}".to_string())
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Option<HymnRecord> {
    let type_prefix: String = row.get("hymn_type");
    let hymn_type = match HymnType::from_prefix(&type_prefix) {
        Some(t) => t,
        None => {
            tracing::warn!("Unknown hymn type prefix in cache: {}", type_prefix);
            return None;
        }
    };
    let number: String = row.get("hymn_number");
    let params_text: String = row.get("query_params");
    let query_params = serde_json::from_str(&params_text).ok()?;
    let verses_text: String = row.get("verses");
    let verses: Vec<Verse> = serde_json::from_str(&verses_text).ok()?;
    let languages_text: String = row.get("languages");
    let relevant_text: String = row.get("relevant");

    Some(HymnRecord {
        identifier: HymnIdentifier::with_params(hymn_type, number, query_params),
        title: row.get("title"),
        verses,
        language: hymn_type.language(),
        category: row.get("category"),
        subcategory: row.get("subcategory"),
        author: row.get("author"),
        composer: row.get("composer"),
        key: row.get("music_key"),
        time: row.get("time_signature"),
        meter: row.get("meter"),
        scriptures: row.get("scriptures"),
        hymn_code: row.get("hymn_code"),
        lead_sheet_url: row.get("lead_sheet_url"),
        piano_sheet_url: row.get("piano_sheet_url"),
        languages: serde_json::from_str(&languages_text).unwrap_or_default(),
        relevant: serde_json::from_str(&relevant_text).unwrap_or_default(),
    })
}

/// Normalize a raw FTS4 matchinfo('x') blob to one u32 per column
/// 将原始matchinfo归一化为每列一个计数
///
/// Format 'x' carries three u32 slots per (phrase, column): hits in this
/// row, hits in all rows, docs with hits. Counts are summed across phrases
/// so downstream ranking sees exactly one count per indexed column.
fn normalize_matchinfo(raw: &[u8]) -> Vec<u8> {
    let words: Vec<u32> = raw
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    let per_phrase = FTS_COLUMNS * 3;
    let mut counts = [0u32; FTS_COLUMNS];
    if per_phrase > 0 && !words.is_empty() && words.len() % per_phrase == 0 {
        let phrases = words.len() / per_phrase;
        for p in 0..phrases {
            for (c, count) in counts.iter_mut().enumerate() {
                *count = count.saturating_add(words[(p * FTS_COLUMNS + c) * 3]);
            }
        }
    }

    let mut out = Vec::with_capacity(FTS_COLUMNS * 4);
    for count in counts {
        out.extend_from_slice(&count.to_le_bytes());
    }
    out
}

/// FTS MATCH treats quotes and operators specially; strip the quotes and
/// pass the rest through so user input cannot break query syntax.
fn sanitize_match_query(query: &str) -> String {
    let cleaned: String = query.chars().filter(|c| *c != '"' && *c != '\'').collect();
    cleaned
        .split_whitespace()
        .map(|tok| format!("\"{}\"", tok))
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    fn is_usable(&self) -> bool {
        self.db.is_some()
    }

    async fn get_hymn(&self, id: &HymnIdentifier) -> SyncResult<Option<HymnRecord>> {
        let pool = self.pool()?;
        let row = sqlx::query(
            "SELECT * FROM hymns WHERE hymn_type = ? AND hymn_number = ? AND query_params = ?",
        )
        .bind(id.hymn_type.prefix())
        .bind(&id.number)
        .bind(params_to_text(id))
        .fetch_optional(pool)
        .await
        .map_err(|e| SyncError::StoreUnusable(e.to_string()))?;

        match row {
            Some(row) => match row_to_record(&row) {
                Some(record) => Ok(Some(record)),
                None => {
                    // 损坏的行按缺失处理
                    tracing::warn!("Discarding unreadable cache row for {}", id);
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn save_hymn(&self, record: &HymnRecord) -> SyncResult<i64> {
        let pool = self.pool()?;
        let id = &record.identifier;
        let now = Utc::now().to_rfc3339();
        let verses = serde_json::to_string(&record.verses)
            .map_err(|e| SyncError::Conversion(e.to_string()))?;
        let languages = serde_json::to_string(&record.languages)
            .map_err(|e| SyncError::Conversion(e.to_string()))?;
        let relevant = serde_json::to_string(&record.relevant)
            .map_err(|e| SyncError::Conversion(e.to_string()))?;

        let row_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO hymns (
                hymn_type, hymn_number, query_params, title, verses,
                category, subcategory, author, composer, music_key,
                time_signature, meter, scriptures, hymn_code,
                lead_sheet_url, piano_sheet_url, languages, relevant,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(hymn_type, hymn_number, query_params) DO UPDATE SET
                title = excluded.title,
                verses = excluded.verses,
                category = excluded.category,
                subcategory = excluded.subcategory,
                author = excluded.author,
                composer = excluded.composer,
                music_key = excluded.music_key,
                time_signature = excluded.time_signature,
                meter = excluded.meter,
                scriptures = excluded.scriptures,
                hymn_code = excluded.hymn_code,
                lead_sheet_url = excluded.lead_sheet_url,
                piano_sheet_url = excluded.piano_sheet_url,
                languages = excluded.languages,
                relevant = excluded.relevant,
                updated_at = excluded.updated_at
            RETURNING id
            "#,
        )
        .bind(id.hymn_type.prefix())
        .bind(&id.number)
        .bind(params_to_text(id))
        .bind(&record.title)
        .bind(&verses)
        .bind(&record.category)
        .bind(&record.subcategory)
        .bind(&record.author)
        .bind(&record.composer)
        .bind(&record.key)
        .bind(&record.time)
        .bind(&record.meter)
        .bind(&record.scriptures)
        .bind(&record.hymn_code)
        .bind(&record.lead_sheet_url)
        .bind(&record.piano_sheet_url)
        .bind(&languages)
        .bind(&relevant)
        .bind(&now)
        .bind(&now)
        .fetch_one(pool)
        .await
        .map_err(|e| SyncError::StoreUnusable(e.to_string()))?;

        // 重建该行的全文索引
        sqlx::query("DELETE FROM hymns_fts WHERE rowid = ?")
            .bind(row_id)
            .execute(pool)
            .await
            .map_err(|e| SyncError::StoreUnusable(e.to_string()))?;

        sqlx::query("INSERT INTO hymns_fts (rowid, title, lyrics) VALUES (?, ?, ?)")
            .bind(row_id)
            .bind(&record.title)
            .bind(record.lyrics_text())
            .execute(pool)
            .await
            .map_err(|e| SyncError::StoreUnusable(e.to_string()))?;

        tracing::debug!("Cached hymn {} (row {})", id, row_id);
        Ok(row_id)
    }

    async fn full_text_search(&self, query: &str) -> SyncResult<Vec<FullTextHit>> {
        let pool = self.pool()?;
        let match_query = sanitize_match_query(query);
        if match_query.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT h.hymn_type, h.hymn_number, h.query_params, h.title,
                   matchinfo(hymns_fts, 'x') AS mi
            FROM hymns_fts
            JOIN hymns h ON h.id = hymns_fts.docid
            WHERE hymns_fts MATCH ?
            "#,
        )
        .bind(&match_query)
        .fetch_all(pool)
        .await
        .map_err(|e| SyncError::StoreUnusable(e.to_string()))?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let type_prefix: String = row.get("hymn_type");
            let hymn_type = match HymnType::from_prefix(&type_prefix) {
                Some(t) => t,
                None => {
                    tracing::warn!("Skipping hit with unknown type prefix: {}", type_prefix);
                    continue;
                }
            };
            let number: String = row.get("hymn_number");
            let params_text: String = row.get("query_params");
            let query_params = serde_json::from_str(&params_text).unwrap_or_default();
            let raw_mi: Vec<u8> = row.get("mi");

            hits.push(FullTextHit {
                identifier: HymnIdentifier::with_params(hymn_type, number, query_params),
                title: row.get("title"),
                language: hymn_type.language(),
                match_info: normalize_matchinfo(&raw_mi),
            });
        }
        Ok(hits)
    }

    async fn find_by_hymn_code(&self, code: &str) -> SyncResult<Vec<SearchHit>> {
        let pool = self.pool()?;
        let rows = sqlx::query(
            "SELECT hymn_type, hymn_number, query_params, title FROM hymns WHERE hymn_code = ? ORDER BY id",
        )
        .bind(code)
        .fetch_all(pool)
        .await
        .map_err(|e| SyncError::StoreUnusable(e.to_string()))?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let type_prefix: String = row.get("hymn_type");
            let hymn_type = match HymnType::from_prefix(&type_prefix) {
                Some(t) => t,
                None => continue,
            };
            let number: String = row.get("hymn_number");
            let params_text: String = row.get("query_params");
            let query_params = serde_json::from_str(&params_text).unwrap_or_default();
            hits.push(SearchHit {
                identifier: HymnIdentifier::with_params(hymn_type, number, query_params),
                title: row.get("title"),
            });
        }
        Ok(hits)
    }
}
