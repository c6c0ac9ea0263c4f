//! ZooKeeper 注册中心
//!
//! 节点布局：
//! - `{root}/{interface}/providers/{percent-encoded dubbo url}`
//! - `{root}/{interface}/consumers/{percent-encoded consumer url}`
//!
//! 服务发现基于一次性子节点 watch：每次 watch 触发后重新列出子节点并重新挂 watch。
//! 列表失败时保留旧数据，按指数退避重试直到 watch 重新挂上。
//! 会话被动关闭时自动重连，重连后恢复注册节点；每次连接成功都会重新发现
//! 没有 watch 的已关注接口

use crate::config::ZookeeperConfig;
use crate::error::{DubboError, ErrorCode, Result};
use crate::registry::base::{ReadySignal, RegistryBase};
use crate::registry::store::{
    ChildWatcher, CreateMode, StoreClient, StoreConnection, StoreConnector, StoreEvent,
};
use crate::registry::trait_def::Registry;
use crate::registry::url::{
    DUBBO_SCHEME, ServiceUrl, build_consumer_url, build_provider_url, decode_node_name,
};
use crate::types::{RegisterConsumerService, RegisterServicesMeta};
use crate::utils::{join_path, parent_path, resolve_host};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, join_all};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 列表失败后的首次重试间隔
const RETRY_MIN_DELAY: Duration = Duration::from_millis(200);
/// 重试间隔上限
const RETRY_MAX_DELAY: Duration = Duration::from_secs(30);

/// 注册中心连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZkStatus {
    Connecting,
    Ready,
    Closed,
}

/// 接口 watch 状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    /// 没有挂 watch
    Idle,
    /// 已挂 watch，等待触发
    Watching,
    /// watch 已触发，正在重新列出
    Refreshing,
}

struct ActiveSession {
    client: Arc<dyn StoreClient>,
    epoch: u64,
}

/// 一次列表的结果
enum Listing {
    /// 列表成功，watch 已挂上
    Armed,
    /// 列表失败，需要在该会话内重试
    Failed(u64),
    /// 客户端已关闭或会话已更替
    Skipped,
}

#[derive(Clone, Copy)]
struct WatchEntry {
    state: WatchState,
    epoch: u64,
}

struct Inner {
    config: ZookeeperConfig,
    root: String,
    connector: Arc<dyn StoreConnector>,
    base: RegistryBase,
    session: RwLock<Option<ActiveSession>>,
    epoch: AtomicU64,
    status: RwLock<ZkStatus>,
    ready: ReadySignal,
    shutdown: CancellationToken,
    connect_guard: CancellationToken,
    watches: Mutex<HashMap<String, WatchEntry>>,
    /// 等待重试的接口及其会话
    retries: Mutex<HashMap<String, u64>>,
    /// 本实例写入的节点，会话重建后恢复
    registrations: Mutex<Vec<(String, CreateMode)>>,
}

/// ZooKeeper 注册中心
pub struct ZookeeperRegistry {
    inner: Arc<Inner>,
}

impl ZookeeperRegistry {
    /// 创建注册中心并立即发起连接
    ///
    /// 校验配置失败时直接返回错误；连接结果通过 [`Registry::ready`] 获取。
    /// 必须在 tokio 运行时内调用
    pub fn new(config: ZookeeperConfig, connector: Arc<dyn StoreConnector>) -> Result<Self> {
        config.validate()?;
        let root = config.root_path();
        let shutdown = CancellationToken::new();

        let inner = Arc::new(Inner {
            connect_guard: shutdown.child_token(),
            config,
            root,
            connector,
            base: RegistryBase::new(),
            session: RwLock::new(None),
            epoch: AtomicU64::new(0),
            status: RwLock::new(ZkStatus::Connecting),
            ready: ReadySignal::new(),
            shutdown,
            watches: Mutex::new(HashMap::new()),
            retries: Mutex::new(HashMap::new()),
            registrations: Mutex::new(Vec::new()),
        });

        info!(
            connect = %inner.config.connect,
            root = %inner.root,
            timeout_ms = inner.config.connect_timeout().as_millis() as u64,
            "Init zookeeper registry"
        );

        inner.arm_connect_guard();
        inner.connect();
        Ok(Self { inner })
    }

    /// 规范化后的根路径
    pub fn root_path(&self) -> &str {
        &self.inner.root
    }

    pub fn config(&self) -> &ZookeeperConfig {
        &self.inner.config
    }

    pub fn status(&self) -> ZkStatus {
        *self.inner.status.read()
    }

    /// 当前底层客户端，关闭后为 `None`
    pub fn client(&self) -> Option<Arc<dyn StoreClient>> {
        self.inner.current_session().map(|(client, _)| client)
    }

    /// 指定接口的 watch 状态
    pub fn watch_state(&self, interface: &str) -> WatchState {
        self.inner
            .watches
            .lock()
            .get(interface)
            .map_or(WatchState::Idle, |entry| entry.state)
    }

    /// 列出一个接口的提供者并挂 watch，不广播
    pub async fn find_dubbo_service_url(&self, interface: &str) {
        self.inner.refresh(interface.to_string()).await
    }

    pub fn providers_path(&self, interface: &str) -> String {
        self.inner.providers_path(interface)
    }

    pub fn consumers_path(&self, interface: &str) -> String {
        self.inner.consumers_path(interface)
    }
}

impl Inner {
    fn providers_path(&self, interface: &str) -> String {
        join_path(&join_path(&self.root, interface), "providers")
    }

    fn consumers_path(&self, interface: &str) -> String {
        join_path(&join_path(&self.root, interface), "consumers")
    }

    fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn current_session(&self) -> Option<(Arc<dyn StoreClient>, u64)> {
        self.session
            .read()
            .as_ref()
            .map(|s| (s.client.clone(), s.epoch))
    }

    fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// 连接超时保护，仅覆盖首次连接
    fn arm_connect_guard(self: &Arc<Self>) {
        let inner = self.clone();
        let guard = self.connect_guard.clone();
        let timeout = self.config.connect_timeout();
        tokio::spawn(async move {
            tokio::select! {
                _ = guard.cancelled() => {}
                _ = tokio::time::sleep(timeout) => inner.on_connect_timeout(),
            }
        });
    }

    fn connect(self: &Arc<Self>) {
        if self.is_closed() {
            return;
        }

        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(
            connect = %self.config.connect,
            epoch,
            debug_level = %self.config.debug_level,
            host_order_deterministic = self.config.host_order_deterministic,
            "Connecting zookeeper"
        );

        let StoreConnection { client, events } = self.connector.connect();
        *self.session.write() = Some(ActiveSession { client, epoch });
        *self.status.write() = ZkStatus::Connecting;

        let inner = self.clone();
        tokio::spawn(async move { inner.supervise(epoch, events).await });
    }

    async fn supervise(self: Arc<Self>, epoch: u64, mut events: mpsc::UnboundedReceiver<StoreEvent>) {
        loop {
            let event = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return,
                event = events.recv() => event,
            };

            match event {
                Some(StoreEvent::Connected) => self.on_connected(epoch).await,
                Some(StoreEvent::Error(err)) => self.on_error(epoch, err),
                Some(StoreEvent::Closed) => {
                    self.on_session_closed(epoch);
                    return;
                }
                None => {
                    debug!(epoch, "Zookeeper event stream ended");
                    return;
                }
            }
        }
    }

    async fn on_connected(self: &Arc<Self>, epoch: u64) {
        if self.is_closed() || epoch != self.current_epoch() {
            return;
        }
        info!(connect = %self.config.connect, epoch, "Connected with zookeeper");
        self.connect_guard.cancel();

        let Some((client, _)) = self.current_session() else {
            return;
        };

        if let Err(err) = client.mkdirp(&self.root).await {
            warn!(root = %self.root, error = %err, "Failed to create zookeeper root path");
            self.ready.reject(err.clone());
            self.base.emit_error(err);
            return;
        }

        if epoch != self.current_epoch() {
            return;
        }
        *self.status.write() = ZkStatus::Ready;
        self.ready.resolve();

        if epoch > 1 {
            self.restore(client.as_ref()).await;
        }
        self.rediscover(epoch).await;
    }

    /// 会话重建后恢复本实例写入的节点
    async fn restore(&self, client: &dyn StoreClient) {
        let registrations = self.registrations.lock().clone();
        for (path, mode) in registrations {
            if let Some(parent) = parent_path(&path) {
                if let Err(err) = client.mkdirp(parent).await {
                    warn!(path = %parent, error = %err, "Failed to restore zookeeper path");
                    continue;
                }
            }
            if let Err(err) = create_node(client, &path, mode).await {
                warn!(path = %path, error = %err, "Failed to restore zookeeper node");
            }
        }
    }

    /// 重新发现当前会话中没有 watch 的已关注接口
    async fn rediscover(self: &Arc<Self>, epoch: u64) {
        let interfaces: Vec<String> = self
            .base
            .snapshot()
            .into_keys()
            .filter(|interface| self.watch_state(interface, epoch) != Some(WatchState::Watching))
            .collect();
        if !interfaces.is_empty() {
            info!(count = interfaces.len(), epoch, "Rediscover dubbo services");
            self.find_all(&interfaces).await;
        }
    }

    fn on_error(&self, epoch: u64, err: DubboError) {
        if self.is_closed() || epoch != self.current_epoch() {
            return;
        }
        warn!(error = %err, "Zookeeper error");
        self.ready.reject(err.clone());
        self.base.emit_error(err);
    }

    fn on_session_closed(self: &Arc<Self>, epoch: u64) {
        if self.is_closed() || epoch != self.current_epoch() {
            return;
        }
        warn!(connect = %self.config.connect, epoch, "Zookeeper was closed, reconnecting");
        self.base
            .emit_error(DubboError::session_lost("Zookeeper was closed"));

        if let Some(session) = self.session.write().take() {
            session.client.close();
        }
        self.watches.lock().clear();
        self.ready.reset();

        self.connect();
    }

    fn on_connect_timeout(&self) {
        if self.is_closed() {
            return;
        }
        let err = DubboError::connect_timeout(format!(
            "zookeeper connect {} timeout",
            self.config.connect
        ));
        warn!(
            connect = %self.config.connect,
            timeout_ms = self.config.connect_timeout().as_millis() as u64,
            "Zookeeper connect timeout"
        );
        self.ready.reject(err.clone());
        self.base.emit_error(err);
        self.close();
    }

    fn close(&self) {
        self.connect_guard.cancel();
        self.shutdown.cancel();
        *self.status.write() = ZkStatus::Closed;

        if let Some(session) = self.session.write().take() {
            info!(connect = %self.config.connect, "Close zookeeper registry");
            session.client.close();
        }
        self.watches.lock().clear();
        self.retries.lock().clear();
        self.ready.reject(DubboError::not_connected("zookeeper registry closed"));
    }

    /// 列出提供者、挂 watch 并写入状态
    ///
    /// 列表失败时保留旧数据并安排重试；已关闭时直接返回
    fn refresh(self: &Arc<Self>, interface: String) -> BoxFuture<'static, ()> {
        let inner = self.clone();
        async move {
            if let Listing::Failed(epoch) = inner.list_providers(&interface).await {
                inner.schedule_retry(interface, epoch);
            }
        }
        .boxed()
    }

    async fn list_providers(self: &Arc<Self>, interface: &str) -> Listing {
        let Some((client, epoch)) = self.current_session() else {
            debug!(interface = %interface, "Zookeeper client closed, skip discovery");
            return Listing::Skipped;
        };
        let generation = self.base.begin_refresh(interface);
        let path = self.providers_path(interface);

        // 路径不存在时无法挂 watch
        if let Err(err) = client.mkdirp(&path).await {
            debug!(path = %path, error = %err, "Failed to ensure providers path");
        }

        let (urls, listing) = match client.get_children_and_watch(&path).await {
            Ok((children, watcher)) => {
                self.arm_watch(interface.to_string(), epoch, watcher);
                (decode_providers(interface, children), Listing::Armed)
            }
            Err(err) => {
                debug!(
                    path = %path,
                    interface = %interface,
                    error = %err,
                    "Get dubbo service urls failed"
                );
                (Vec::new(), Listing::Failed(epoch))
            }
        };

        if epoch != self.current_epoch() {
            debug!(interface = %interface, epoch, "Discard discovery result from old session");
            return Listing::Skipped;
        }
        debug!(interface = %interface, count = urls.len(), "Dubbo service urls");
        self.base.apply_refresh(interface, generation, urls);
        listing
    }

    /// 按指数退避重试列表，直到 watch 挂上、会话更替或注册中心关闭
    ///
    /// 每个接口在同一会话内只有一个重试任务
    fn schedule_retry(self: &Arc<Self>, interface: String, epoch: u64) {
        {
            let mut retries = self.retries.lock();
            if retries.get(&interface).is_some_and(|pending| *pending >= epoch) {
                return;
            }
            retries.insert(interface.clone(), epoch);
        }

        let inner = self.clone();
        tokio::spawn(async move {
            let mut delay = RETRY_MIN_DELAY;
            loop {
                tokio::select! {
                    _ = inner.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
                if epoch != inner.current_epoch()
                    || inner.watch_state(&interface, epoch) == Some(WatchState::Watching)
                {
                    break;
                }

                debug!(
                    interface = %interface,
                    delay_ms = delay.as_millis() as u64,
                    "Retry dubbo service discovery"
                );
                match inner.list_providers(&interface).await {
                    Listing::Armed => {
                        inner.base.emit_data();
                        break;
                    }
                    Listing::Failed(_) => delay = (delay * 2).min(RETRY_MAX_DELAY),
                    Listing::Skipped => break,
                }
            }

            let mut retries = inner.retries.lock();
            if retries.get(&interface) == Some(&epoch) {
                retries.remove(&interface);
            }
        });
    }

    /// 为接口挂上唯一的 watch 任务
    fn arm_watch(self: &Arc<Self>, interface: String, epoch: u64, watcher: ChildWatcher) {
        {
            let mut watches = self.watches.lock();
            let entry = watches.entry(interface.clone()).or_insert(WatchEntry {
                state: WatchState::Idle,
                epoch,
            });
            if epoch < entry.epoch
                || (epoch == entry.epoch && entry.state == WatchState::Watching)
            {
                return;
            }
            *entry = WatchEntry {
                state: WatchState::Watching,
                epoch,
            };
        }

        let inner = self.clone();
        tokio::spawn(async move {
            let fired = tokio::select! {
                _ = inner.shutdown.cancelled() => false,
                fired = watcher.changed() => fired,
            };

            if !fired || inner.is_closed() || epoch != inner.current_epoch() {
                inner.set_watch_state(&interface, epoch, WatchState::Idle);
                return;
            }

            debug!(interface = %interface, "Providers changed, rewatch");
            inner.set_watch_state(&interface, epoch, WatchState::Refreshing);
            inner.refresh(interface.clone()).await;
            if inner.watch_state(&interface, epoch) == Some(WatchState::Refreshing) {
                inner.set_watch_state(&interface, epoch, WatchState::Idle);
            }
            inner.base.emit_data();
        });
    }

    fn watch_state(&self, interface: &str, epoch: u64) -> Option<WatchState> {
        self.watches
            .lock()
            .get(interface)
            .filter(|entry| entry.epoch == epoch)
            .map(|entry| entry.state)
    }

    fn set_watch_state(&self, interface: &str, epoch: u64, state: WatchState) {
        if let Some(entry) = self.watches.lock().get_mut(interface) {
            if entry.epoch == epoch {
                entry.state = state;
            }
        }
    }

    async fn find_all(self: &Arc<Self>, interfaces: &[String]) {
        join_all(interfaces.iter().map(|i| self.refresh(i.clone()))).await;
        self.base.emit_data();
    }

    fn remember(&self, path: &str, mode: CreateMode) {
        let mut registrations = self.registrations.lock();
        if !registrations.iter().any(|(p, _)| p == path) {
            registrations.push((path.to_string(), mode));
        }
    }

    fn require_client(&self) -> Result<Arc<dyn StoreClient>> {
        self.current_session()
            .map(|(client, _)| client)
            .ok_or_else(|| DubboError::not_connected("zookeeper client closed"))
    }
}

/// 子节点解码并过滤出 `dubbo://` 提供者
fn decode_providers(interface: &str, children: Vec<String>) -> Vec<ServiceUrl> {
    let prefix = format!("{}://", DUBBO_SCHEME);
    children
        .into_iter()
        .filter_map(|child| match decode_node_name(&child) {
            Ok(url) => Some(url),
            Err(err) => {
                debug!(interface = %interface, node = %child, error = %err, "Skip undecodable node");
                None
            }
        })
        .filter(|url| url.starts_with(&prefix))
        .filter_map(|url| match url.parse::<ServiceUrl>() {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                debug!(interface = %interface, url = %url, error = %err, "Skip malformed provider url");
                None
            }
        })
        .collect()
}

/// 创建节点，已存在时视为成功
async fn create_node(client: &dyn StoreClient, path: &str, mode: CreateMode) -> Result<()> {
    if client.exists(path).await? {
        debug!(path = %path, "Zookeeper node already exists");
        return Ok(());
    }
    match client.create(path, &[], mode).await {
        Ok(()) => {
            debug!(path = %path, ?mode, "Create zookeeper node");
            Ok(())
        }
        Err(err) if err.code() == ErrorCode::NodeExists => Ok(()),
        Err(err) => Err(err),
    }
}

#[async_trait]
impl Registry for ZookeeperRegistry {
    async fn ready(&self) -> Result<()> {
        self.inner.ready.wait().await
    }

    async fn find_dubbo_service_urls(&self, interfaces: &[String]) -> Result<()> {
        debug!(interfaces = ?interfaces, "Find dubbo service urls");
        self.inner.find_all(interfaces).await;
        Ok(())
    }

    async fn register_services(&self, meta: &RegisterServicesMeta) -> Result<()> {
        self.ready().await?;
        let client = self.inner.require_client()?;
        let host = resolve_host(meta.application.host.as_deref());

        for service in &meta.services {
            let providers = self.inner.providers_path(&service.interface);
            client.mkdirp(&providers).await?;

            let url = build_provider_url(
                &host,
                meta.port,
                &meta.application,
                meta.dubbo.as_deref(),
                service,
            );
            let path = join_path(&providers, &url.to_node_name());
            let mode = if service.persistent {
                CreateMode::Persistent
            } else {
                CreateMode::Ephemeral
            };
            create_node(client.as_ref(), &path, mode).await?;
            self.inner.remember(&path, mode);
            info!(interface = %service.interface, url = %url, "Register dubbo service");
        }
        Ok(())
    }

    async fn register_consumers(&self, meta: &RegisterConsumerService) -> Result<()> {
        debug!(count = meta.services.len(), "Register consumers");
        self.ready().await?;
        let client = self.inner.require_client()?;
        let host = resolve_host(meta.application.host.as_deref());

        let mut interfaces: Vec<String> = Vec::new();
        for service in &meta.services {
            if !interfaces.contains(&service.interface) {
                interfaces.push(service.interface.clone());
            }

            let consumers = self.inner.consumers_path(&service.interface);
            client.mkdirp(&consumers).await?;

            let url = build_consumer_url(&host, &meta.application, service);
            let path = join_path(&consumers, &url.to_node_name());
            create_node(client.as_ref(), &path, CreateMode::Ephemeral).await?;
            self.inner.remember(&path, CreateMode::Ephemeral);
        }

        self.find_dubbo_service_urls(&interfaces).await
    }

    fn close(&self) {
        self.inner.close();
    }

    fn is_connected(&self) -> bool {
        self.inner.session.read().is_some()
    }

    fn base(&self) -> &RegistryBase {
        &self.inner.base
    }
}

impl Drop for ZookeeperRegistry {
    fn drop(&mut self) {
        self.inner.close();
    }
}
