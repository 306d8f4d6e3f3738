//! Hymn repository / 诗歌仓库
//!
//! Concrete instantiation of the sync engine for "fetch one hymn by
//! identifier". Keeps a process-lifetime in-memory map above the persistent
//! cache (bounded in practice by catalog size) and coalesces concurrent
//! requests for the same identifier onto one in-flight operation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::cache::CacheStore;
use crate::error::SyncResult;
use crate::models::{Hymn, HymnIdentifier, HymnRecord};
use crate::remote::{HymnalNetJson, RemoteClient};
use crate::request::{broadcast_stream, Joined, RequestRegistry};
use crate::sync::{self, ResourceAdapter, ResourceUpdate};

/// Content resource coordinator / 内容资源协调器
pub struct HymnRepository {
    cache: Arc<dyn CacheStore>,
    remote: Arc<dyn RemoteClient>,
    /// Same-process result cache; never evicted within a process lifetime
    /// 进程内结果缓存，进程生命周期内不清除
    memory: Arc<RwLock<HashMap<HymnIdentifier, Hymn>>>,
    inflight: Arc<RequestRegistry<HymnIdentifier, ResourceUpdate<Hymn>>>,
}

impl HymnRepository {
    pub fn new(cache: Arc<dyn CacheStore>, remote: Arc<dyn RemoteClient>) -> Self {
        Self {
            cache,
            remote,
            memory: Arc::new(RwLock::new(HashMap::new())),
            inflight: Arc::new(RequestRegistry::new()),
        }
    }

    /// Fetch one hymn, emitting 0–2 values / 获取诗歌，发出0-2个值
    ///
    /// With `make_network_request == false` this is a best-effort local
    /// peek: no remote call is made and no coalescing entry is registered.
    pub fn get_hymn(
        &self,
        id: &HymnIdentifier,
        make_network_request: bool,
    ) -> ReceiverStream<ResourceUpdate<Hymn>> {
        // 内存缓存直接命中：不触碰缓存库与网络
        if let Some(hymn) = self.memory.read().get(id).cloned() {
            let (tx, rx) = mpsc::channel(1);
            let _ = tx.try_send(Ok(Some(hymn)));
            return ReceiverStream::new(rx);
        }

        if !make_network_request {
            // 本地窥探：不注册在途请求
            let adapter = self.adapter(id, false);
            let stream = sync::run(adapter, Default::default());
            return self.populate_memory(id.clone(), stream);
        }

        match self.inflight.join(id.clone()) {
            Joined::Existing(rx) => {
                tracing::debug!("Joining in-flight request for {}", id);
                broadcast_stream(rx)
            }
            Joined::Started(slot) => {
                let adapter = self.adapter(id, true);
                let mut engine = sync::run(adapter, slot.cancel.clone());

                let memory = self.memory.clone();
                let inflight = self.inflight.clone();
                let key = id.clone();
                let sender = slot.sender;
                tokio::spawn(async move {
                    while let Some(update) = engine.next().await {
                        if let Ok(Some(hymn)) = &update {
                            memory.write().insert(key.clone(), hymn.clone());
                        }
                        let _ = sender.send(update);
                    }
                    inflight.complete(&key);
                });

                broadcast_stream(slot.receiver)
            }
        }
    }

    fn adapter(&self, id: &HymnIdentifier, make_network_request: bool) -> HymnResourceAdapter {
        HymnResourceAdapter {
            id: id.clone(),
            cache: self.cache.clone(),
            remote: self.remote.clone(),
            make_network_request,
        }
    }

    /// 转发引擎结果并填充内存缓存
    fn populate_memory(
        &self,
        key: HymnIdentifier,
        mut engine: ReceiverStream<ResourceUpdate<Hymn>>,
    ) -> ReceiverStream<ResourceUpdate<Hymn>> {
        let memory = self.memory.clone();
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            while let Some(update) = engine.next().await {
                if let Ok(Some(hymn)) = &update {
                    memory.write().insert(key.clone(), hymn.clone());
                }
                if tx.send(update).await.is_err() {
                    break;
                }
            }
        });
        ReceiverStream::new(rx)
    }
}

/// Engine adapter for one identifier / 单个标识符的引擎适配器
struct HymnResourceAdapter {
    id: HymnIdentifier,
    cache: Arc<dyn CacheStore>,
    remote: Arc<dyn RemoteClient>,
    make_network_request: bool,
}

#[async_trait]
impl ResourceAdapter for HymnResourceAdapter {
    type Local = HymnRecord;
    type Network = HymnalNetJson;
    type Output = Hymn;

    async fn load_local(&self) -> SyncResult<Option<HymnRecord>> {
        self.cache.get_hymn(&self.id).await
    }

    fn should_fetch(&self, local: Option<&Hymn>) -> bool {
        // 诗歌内容不会变化：本地已有则不再请求
        self.make_network_request && local.is_none()
    }

    async fn fetch_remote(&self) -> SyncResult<HymnalNetJson> {
        self.remote.fetch_hymn(&self.id).await
    }

    fn convert_network(&self, payload: HymnalNetJson) -> SyncResult<Option<HymnRecord>> {
        payload.into_record(&self.id).map(Some)
    }

    fn convert_local(&self, local: Option<&HymnRecord>) -> SyncResult<Option<Hymn>> {
        Ok(local.and_then(|record| Hymn::from_record(record.clone())))
    }

    async fn save(
        &self,
        previous: Option<HymnRecord>,
        fresh: Option<HymnRecord>,
    ) -> Option<HymnRecord> {
        // 本地优先：已有缓存保持权威，网络值仅用于填补空缺。
        // 每次覆盖用户可见内容会造成闪烁。
        if previous.is_some() {
            return previous;
        }
        let fresh = fresh?;
        if let Err(e) = self.cache.save_hymn(&fresh).await {
            tracing::warn!("Failed to persist {}: {}", self.id, e);
        }
        Some(fresh)
    }
}
