pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod remote;
pub mod repository;
pub mod request;
pub mod search;
pub mod sync;

pub use cache::{CacheStore, SqliteCacheStore};
pub use error::{SyncError, SyncResult};
pub use models::{Hymn, HymnIdentifier, HymnRecord, HymnType, Language, SearchHit};
pub use remote::{HymnalNetClient, RemoteClient};
pub use repository::HymnRepository;
pub use search::{SearchCoordinator, SearchPage};
