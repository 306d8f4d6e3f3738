//! Request lifecycle management / 请求生命周期管理
//!
//! Coalesces concurrent requests for the same key onto one in-flight
//! operation, and debounces query-string changes. Cancellation is a shared
//! atomic flag checked at delivery points: a cancelled request stops
//! delivering to subscribers but never aborts a cache write already under
//! way.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;

/// Shared cancellation flag / 共享取消标志
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    flag: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// 单个在途请求：订阅者共享一个广播通道
struct InFlightRequest<T> {
    sender: broadcast::Sender<T>,
    cancel: CancelFlag,
}

/// A freshly registered request slot / 新注册的请求槽
pub struct RequestSlot<T> {
    pub receiver: broadcast::Receiver<T>,
    pub sender: broadcast::Sender<T>,
    pub cancel: CancelFlag,
}

/// Outcome of joining a key / 加入某个键的结果
pub enum Joined<T> {
    /// An identical request is already running; share its emissions
    /// 已有同键请求在途，共享其结果
    Existing(broadcast::Receiver<T>),
    /// No request was running; the caller must drive this slot and call
    /// [`RequestRegistry::complete`] when done / 需要调用方驱动的新请求
    Started(RequestSlot<T>),
}

/// In-flight request registry / 在途请求注册表
///
/// Created on first request for a key, shared by later requests for the
/// same key while still running, removed on completion or cancellation.
pub struct RequestRegistry<K, T> {
    inflight: Mutex<HashMap<K, InFlightRequest<T>>>,
}

impl<K, T> RequestRegistry<K, T>
where
    K: Eq + Hash + Clone,
    T: Clone,
{
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to an existing in-flight request or register a new one
    /// 订阅在途请求，或注册新请求
    pub fn join(&self, key: K) -> Joined<T> {
        let mut inflight = self.inflight.lock();
        if let Some(existing) = inflight.get(&key) {
            if !existing.cancel.is_cancelled() {
                return Joined::Existing(existing.sender.subscribe());
            }
            // 已取消的条目不再接收新订阅者
            inflight.remove(&key);
        }

        let (sender, receiver) = broadcast::channel(8);
        let cancel = CancelFlag::new();
        inflight.insert(
            key,
            InFlightRequest {
                sender: sender.clone(),
                cancel: cancel.clone(),
            },
        );
        Joined::Started(RequestSlot {
            receiver,
            sender,
            cancel,
        })
    }

    /// Stop delivery for a key; the underlying work may still run to
    /// completion / 停止投递（底层工作可继续完成）
    pub fn cancel(&self, key: &K) {
        let mut inflight = self.inflight.lock();
        if let Some(entry) = inflight.remove(key) {
            entry.cancel.cancel();
        }
    }

    /// Remove a finished request / 移除已完成的请求
    pub fn complete(&self, key: &K) {
        self.inflight.lock().remove(key);
    }

    pub fn len(&self) -> usize {
        self.inflight.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inflight.lock().is_empty()
    }
}

impl<K, T> Default for RequestRegistry<K, T>
where
    K: Eq + Hash + Clone,
    T: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Adapt a broadcast receiver into a caller-facing stream / 广播转流
///
/// Lagged subscribers skip ahead rather than erroring out; emission counts
/// here are tiny, so lagging only happens if a consumer stops polling.
pub fn broadcast_stream<T: Clone + Send + 'static>(
    mut rx: broadcast::Receiver<T>,
) -> ReceiverStream<T> {
    let (tx, out) = mpsc::channel(8);
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(value) => {
                    if tx.send(value).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Subscriber lagged, skipped {} updates", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
    ReceiverStream::new(out)
}

/// Quiet-interval debouncer / 静默期防抖器
///
/// Each schedule bumps a generation counter; when a sleep wakes it only
/// fires if no later schedule happened in between. The first transition out
/// of an empty query bypasses the quiet interval.
pub struct Debouncer {
    interval: Duration,
    generation: Arc<AtomicU64>,
}

impl Debouncer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Schedule `action` after the quiet interval, discarding any pending
    /// trigger. With `immediate` the action runs right away (still
    /// invalidating whatever was pending). / 调度动作；immediate 立即执行
    pub fn schedule<F, Fut>(&self, immediate: bool, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let current = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if immediate {
            tokio::spawn(action());
            return;
        }

        let generation = self.generation.clone();
        let interval = self.interval;
        tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            if generation.load(Ordering::SeqCst) == current {
                action().await;
            } else {
                tracing::trace!("Debounced trigger superseded");
            }
        });
    }

    /// Discard whatever is pending without scheduling anything new
    /// 丢弃挂起的触发
    pub fn cancel_pending(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}
