//! Network-bound resource engine / 网络绑定资源引擎
//!
//! One invocation emits zero, one, or two values / 一次调用发出0-2个值：
//! 1. the converted local value, unconditionally (even `None`), so an empty
//!    cache still yields a deterministic "nothing yet" signal
//! 2. the reconciled value, only if a remote fetch ran and produced
//!    something different from the first emission
//!
//! Failure semantics / 失败语义：
//! - local load and local conversion failures are absorbed (logged, treated
//!   as empty), never fatal
//! - remote fetch / network conversion failures terminate the stream with
//!   an error; the first value already delivered stands
//! - cancellation stops delivery only; a reconciliation write that already
//!   started still commits

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::{SyncError, SyncResult};
use crate::request::CancelFlag;

/// One stream item: a value, or the terminal error / 流中的一项
pub type ResourceUpdate<R> = Result<Option<R>, SyncError>;

/// Pluggable operations for one (local, network, result) triple
/// 一组可插拔操作
///
/// `save` performs reconciliation and returns the authoritative local value
/// afterwards. Store failures inside `save` are the adapter's to absorb
/// (log and return the best value it has); by the time `save` runs the
/// remote payload was already fetched and the caller should still see it.
#[async_trait]
pub trait ResourceAdapter: Send + Sync + 'static {
    type Local: Send + 'static;
    type Network: Send + 'static;
    type Output: Clone + PartialEq + Send + 'static;

    /// Point lookup in the local store / 本地查询
    async fn load_local(&self) -> SyncResult<Option<Self::Local>>;

    /// Whether to go to the network, given the converted local value
    /// 是否需要网络请求
    fn should_fetch(&self, local: Option<&Self::Output>) -> bool;

    /// 远端获取
    async fn fetch_remote(&self) -> SyncResult<Self::Network>;

    /// 网络载荷转换为本地表示
    fn convert_network(&self, payload: Self::Network) -> SyncResult<Option<Self::Local>>;

    /// 本地表示转换为结果类型
    fn convert_local(&self, local: Option<&Self::Local>) -> SyncResult<Option<Self::Output>>;

    /// Reconcile and persist; returns the authoritative value / 调和并持久化
    async fn save(
        &self,
        previous: Option<Self::Local>,
        fresh: Option<Self::Local>,
    ) -> Option<Self::Local>;
}

/// Run one synchronization pass on a background task / 在后台任务执行一次同步
///
/// Results are delivered on whatever context polls the returned stream.
pub fn run<A: ResourceAdapter>(
    adapter: A,
    cancel: CancelFlag,
) -> ReceiverStream<ResourceUpdate<A::Output>> {
    let (tx, rx) = mpsc::channel(4);
    tokio::spawn(async move {
        drive(adapter, cancel, tx).await;
    });
    ReceiverStream::new(rx)
}

async fn drive<A: ResourceAdapter>(
    adapter: A,
    cancel: CancelFlag,
    tx: mpsc::Sender<ResourceUpdate<A::Output>>,
) {
    // 投递受取消标志控制；底层工作不受影响
    let deliver = |update: ResourceUpdate<A::Output>| {
        let tx = tx.clone();
        let cancel = cancel.clone();
        async move {
            if cancel.is_cancelled() {
                tracing::trace!("Suppressing delivery to cancelled request");
                return;
            }
            let _ = tx.send(update).await;
        }
    };

    // Step 1: local load; store failures degrade to "empty" / 本地加载
    let previous_local = match adapter.load_local().await {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("Local load failed, treating as empty: {}", e);
            None
        }
    };

    // Step 2: local conversion failures are "no data", not errors / 本地转换
    let first = match adapter.convert_local(previous_local.as_ref()) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("Local conversion failed, treating as empty: {}", e);
            None
        }
    };

    // Step 3: first value goes out unconditionally / 首个值无条件发出
    deliver(Ok(first.clone())).await;

    // Step 4 / 是否需要网络
    if !adapter.should_fetch(first.as_ref()) {
        return;
    }

    // Step 5 / 远端获取
    let payload = match adapter.fetch_remote().await {
        Ok(payload) => payload,
        Err(e) => {
            tracing::debug!("Remote fetch failed: {}", e);
            deliver(Err(e)).await;
            return;
        }
    };

    // Step 6: conversion failure terminates without touching the cache
    // 网络转换失败不写缓存
    let fresh = match adapter.convert_network(payload) {
        Ok(fresh) => fresh,
        Err(e) => {
            tracing::warn!("Network conversion failed: {}", e);
            deliver(Err(e)).await;
            return;
        }
    };

    // Step 7: reconcile + persist. Runs to completion even if the request
    // was cancelled meanwhile. / 调和持久化；取消不中断写入
    let merged = adapter.save(previous_local, fresh).await;

    // Step 8: second value only when it differs from the first / 去重后发出
    let second = match adapter.convert_local(merged.as_ref()) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("Post-save conversion failed, treating as empty: {}", e);
            None
        }
    };
    if second != first {
        deliver(Ok(second)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::Notify;
    use tokio_stream::StreamExt;

    /// 记录调用并按配置行为的测试适配器
    struct TestAdapter {
        local: Option<String>,
        fetch: SyncResult<String>,
        should_fetch: bool,
        saved: Arc<Mutex<Option<(Option<String>, Option<String>)>>>,
        save_calls: Arc<AtomicUsize>,
        fetch_gate: Option<Arc<Notify>>,
    }

    impl TestAdapter {
        fn new(local: Option<&str>, fetch: SyncResult<String>, should_fetch: bool) -> Self {
            Self {
                local: local.map(|s| s.to_string()),
                fetch,
                should_fetch,
                saved: Arc::new(Mutex::new(None)),
                save_calls: Arc::new(AtomicUsize::new(0)),
                fetch_gate: None,
            }
        }
    }

    #[async_trait]
    impl ResourceAdapter for TestAdapter {
        type Local = String;
        type Network = String;
        type Output = String;

        async fn load_local(&self) -> SyncResult<Option<String>> {
            Ok(self.local.clone())
        }

        fn should_fetch(&self, _local: Option<&String>) -> bool {
            self.should_fetch
        }

        async fn fetch_remote(&self) -> SyncResult<String> {
            if let Some(gate) = &self.fetch_gate {
                gate.notified().await;
            }
            self.fetch.clone()
        }

        fn convert_network(&self, payload: String) -> SyncResult<Option<String>> {
            if payload == "unconvertible" {
                return Err(SyncError::Conversion("bad payload".to_string()));
            }
            Ok(Some(payload))
        }

        fn convert_local(&self, local: Option<&String>) -> SyncResult<Option<String>> {
            Ok(local.cloned())
        }

        async fn save(
            &self,
            previous: Option<String>,
            fresh: Option<String>,
        ) -> Option<String> {
            self.save_calls.fetch_add(1, Ordering::SeqCst);
            *self.saved.lock() = Some((previous.clone(), fresh.clone()));
            // local-wins-if-present / 本地优先
            previous.or(fresh)
        }
    }

    async fn collect(adapter: TestAdapter) -> Vec<ResourceUpdate<String>> {
        let stream = run(adapter, CancelFlag::new());
        stream.collect().await
    }

    #[tokio::test]
    async fn test_cached_without_fetch_emits_exactly_once() {
        let adapter = TestAdapter::new(Some("cached"), Ok("net".to_string()), false);
        let save_calls = adapter.save_calls.clone();
        let updates = collect(adapter).await;
        assert_eq!(updates, vec![Ok(Some("cached".to_string()))]);
        assert_eq!(save_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_cache_with_network_emits_nil_then_value() {
        let adapter = TestAdapter::new(None, Ok("fresh".to_string()), true);
        let save_calls = adapter.save_calls.clone();
        let updates = collect(adapter).await;
        assert_eq!(
            updates,
            vec![Ok(None), Ok(Some("fresh".to_string()))]
        );
        assert_eq!(save_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_existing_local_wins_over_network() {
        let adapter = TestAdapter::new(Some("A"), Ok("B".to_string()), true);
        let saved = adapter.saved.clone();
        let updates = collect(adapter).await;

        // 本地值保持权威，第二个值与第一个相同故被抑制
        assert_eq!(updates, vec![Ok(Some("A".to_string()))]);
        let (previous, fresh) = saved.lock().clone().unwrap();
        assert_eq!(previous.as_deref(), Some("A"));
        assert_eq!(fresh.as_deref(), Some("B"));
    }

    #[tokio::test]
    async fn test_transport_error_keeps_first_emission() {
        let adapter = TestAdapter::new(
            Some("cached"),
            Err(SyncError::Transport("offline".to_string())),
            true,
        );
        let save_calls = adapter.save_calls.clone();
        let updates = collect(adapter).await;
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0], Ok(Some("cached".to_string())));
        assert!(matches!(updates[1], Err(SyncError::Transport(_))));
        assert_eq!(save_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_network_conversion_error_skips_save() {
        let adapter = TestAdapter::new(None, Ok("unconvertible".to_string()), true);
        let save_calls = adapter.save_calls.clone();
        let updates = collect(adapter).await;
        assert_eq!(updates[0], Ok(None));
        assert!(matches!(updates[1], Err(SyncError::Conversion(_))));
        assert_eq!(save_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancellation_stops_delivery_but_write_completes() {
        let gate = Arc::new(Notify::new());
        let mut adapter = TestAdapter::new(None, Ok("late".to_string()), true);
        adapter.fetch_gate = Some(gate.clone());
        let save_calls = adapter.save_calls.clone();

        let cancel = CancelFlag::new();
        let mut stream = run(adapter, cancel.clone());

        // 首个值正常送达
        assert_eq!(stream.next().await, Some(Ok(None)));

        // 取消后放行获取：写入仍然完成，但不再投递
        cancel.cancel();
        gate.notify_one();

        assert_eq!(stream.next().await, None);
        assert_eq!(save_calls.load(Ordering::SeqCst), 1);
    }
}
