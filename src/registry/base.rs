//! 注册中心公共部分
//!
//! 维护接口到服务 URL 的映射（最后一次有效快照）和订阅者集合，
//! 所有后端都通过这里把变化广播出去

use crate::error::{DubboError, Result};
use crate::registry::url::ServiceUrl;
use crate::types::InterfaceName;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, watch};
use tracing::debug;

/// 接口 → 服务 URL 列表
pub type RegistryState = HashMap<InterfaceName, Vec<ServiceUrl>>;

/// 注册中心事件
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    /// 完整快照（不是增量）
    Changed(Arc<RegistryState>),
    /// 注册中心错误，仅作提示，不会关闭注册中心
    Error(DubboError),
}

/// 订阅者 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

/// 订阅句柄
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::UnboundedReceiver<RegistryEvent>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// 等待下一个事件，注册中心关闭订阅后返回 `None`
    pub async fn recv(&mut self) -> Option<RegistryEvent> {
        self.rx.recv().await
    }

    /// 非阻塞读取
    pub fn try_recv(&mut self) -> Option<RegistryEvent> {
        self.rx.try_recv().ok()
    }
}

#[derive(Default)]
struct InterfaceEntry {
    urls: Vec<ServiceUrl>,
    /// 已发起的最新刷新
    issued: u64,
    /// 已应用的最新刷新
    applied: u64,
}

/// 注册中心公共状态
pub struct RegistryBase {
    state: RwLock<HashMap<InterfaceName, InterfaceEntry>>,
    subscribers: Mutex<HashMap<SubscriberId, mpsc::UnboundedSender<RegistryEvent>>>,
    next_id: AtomicU64,
}

impl RegistryBase {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// 添加订阅者
    pub fn subscribe(&self) -> Subscription {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().insert(id, tx);
        debug!(subscriber = id.0, "Registry subscriber added");
        Subscription { id, rx }
    }

    /// 移除订阅者（幂等）
    pub fn unsubscribe(&self, id: SubscriberId) {
        if self.subscribers.lock().remove(&id).is_some() {
            debug!(subscriber = id.0, "Registry subscriber removed");
        }
    }

    /// 当前订阅者数量
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// 广播当前完整快照
    pub fn emit_data(&self) {
        let snapshot = Arc::new(self.snapshot());
        debug!(interfaces = snapshot.len(), "Emit registry data");
        self.broadcast(RegistryEvent::Changed(snapshot));
    }

    /// 广播错误
    pub fn emit_error(&self, err: DubboError) {
        debug!(error = %err, "Emit registry error");
        self.broadcast(RegistryEvent::Error(err));
    }

    fn broadcast(&self, event: RegistryEvent) {
        // 先在锁内拍下订阅者快照，发送时不持锁
        let targets: Vec<(SubscriberId, mpsc::UnboundedSender<RegistryEvent>)> = self
            .subscribers
            .lock()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut closed = Vec::new();
        for (id, tx) in targets {
            if tx.send(event.clone()).is_err() {
                closed.push(id);
            }
        }

        if !closed.is_empty() {
            let mut subscribers = self.subscribers.lock();
            for id in closed {
                subscribers.remove(&id);
            }
        }
    }

    /// 当前状态的不可变快照
    pub fn snapshot(&self) -> RegistryState {
        self.state
            .read()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.urls.clone()))
            .collect()
    }

    /// 指定接口当前已知的 URL
    pub fn urls(&self, interface: &str) -> Vec<ServiceUrl> {
        self.state
            .read()
            .get(interface)
            .map(|entry| entry.urls.clone())
            .unwrap_or_default()
    }

    /// 发起一次刷新，返回该次刷新的序号
    pub fn begin_refresh(&self, interface: &str) -> u64 {
        let mut state = self.state.write();
        let entry = state.entry(interface.to_string()).or_default();
        entry.issued += 1;
        entry.issued
    }

    /// 应用一次刷新结果
    ///
    /// 已有更新的结果被应用时丢弃本次结果；空结果不会覆盖已有的非空列表。
    /// 返回状态是否被写入
    pub fn apply_refresh(&self, interface: &str, generation: u64, urls: Vec<ServiceUrl>) -> bool {
        let mut state = self.state.write();
        let entry = state.entry(interface.to_string()).or_default();

        if generation < entry.applied {
            debug!(
                interface = %interface,
                generation,
                applied = entry.applied,
                "Discard superseded refresh result"
            );
            return false;
        }
        entry.applied = generation;

        if urls.is_empty() && !entry.urls.is_empty() {
            debug!(
                interface = %interface,
                known = entry.urls.len(),
                "Empty refresh result, keep last known urls"
            );
            return false;
        }

        entry.urls = urls;
        true
    }

    /// 直接替换接口 URL（推送式后端使用），同样遵循空结果不覆盖
    pub fn replace(&self, interface: &str, urls: Vec<ServiceUrl>) -> bool {
        let generation = self.begin_refresh(interface);
        self.apply_refresh(interface, generation, urls)
    }
}

impl Default for RegistryBase {
    fn default() -> Self {
        Self::new()
    }
}

/// 就绪状态
#[derive(Debug, Clone)]
pub enum ReadyState {
    Pending,
    Ready,
    Failed(DubboError),
}

/// 就绪信号
///
/// `Pending` 只能确定一次（成功或失败）；会话重建时可以从 `Ready` 回到 `Pending`，
/// `Failed` 不再变化
pub struct ReadySignal {
    tx: watch::Sender<ReadyState>,
}

impl ReadySignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ReadyState::Pending);
        Self { tx }
    }

    pub fn state(&self) -> ReadyState {
        self.tx.borrow().clone()
    }

    /// `Pending → Ready`
    pub fn resolve(&self) -> bool {
        self.tx.send_if_modified(|state| match state {
            ReadyState::Pending => {
                *state = ReadyState::Ready;
                true
            }
            _ => false,
        })
    }

    /// `Pending → Failed`
    pub fn reject(&self, err: DubboError) -> bool {
        self.tx.send_if_modified(|state| match state {
            ReadyState::Pending => {
                *state = ReadyState::Failed(err);
                true
            }
            _ => false,
        })
    }

    /// `Ready → Pending`
    pub fn reset(&self) -> bool {
        self.tx.send_if_modified(|state| match state {
            ReadyState::Ready => {
                *state = ReadyState::Pending;
                true
            }
            _ => false,
        })
    }

    /// 等待信号确定
    pub async fn wait(&self) -> Result<()> {
        let mut rx = self.tx.subscribe();
        loop {
            let state = rx.borrow_and_update().clone();
            match state {
                ReadyState::Ready => return Ok(()),
                ReadyState::Failed(err) => return Err(err),
                ReadyState::Pending => {}
            }
            if rx.changed().await.is_err() {
                return Err(DubboError::not_connected("registry dropped"));
            }
        }
    }
}

impl Default for ReadySignal {
    fn default() -> Self {
        Self::new()
    }
}
