//! Engine error taxonomy / 引擎错误分类
//!
//! Collaborator errors (sqlx, reqwest, serde) are converted into these
//! variants at the engine boundary and never leak past it. Variants carry
//! plain strings so errors stay `Clone` and can travel broadcast channels.

use thiserror::Error;

/// Errors surfaced by the synchronization and search pipeline / 同步与搜索管线错误
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    /// Cache backing store failed to initialize; degrade to network-only / 缓存库不可用
    #[error("cache store is not usable: {0}")]
    StoreUnusable(String),

    /// Malformed local or network payload; treated as absent data / 数据转换失败
    #[error("failed to convert payload: {0}")]
    Conversion(String),

    /// Remote call failed; terminates only the in-flight operation / 网络请求失败
    #[error("remote request failed: {0}")]
    Transport(String),

    /// A cross-reference string could not be parsed; the row is skipped / 引用格式错误
    #[error("malformed reference: {0}")]
    MalformedReference(String),
}

pub type SyncResult<T> = Result<T, SyncError>;
