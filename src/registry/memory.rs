//! 内存协调存储
//!
//! 进程内的层级节点存储，实现 [`StoreConnector`] / [`StoreClient`]，
//! 语义与 ZooKeeper 保持一致：临时节点随会话消失，子节点 watch 一次性触发。
//! 用于测试和单进程嵌入，另外提供故障注入（会话过期、列表失败、永不连接）

use crate::error::{DubboError, Result};
use crate::registry::store::{
    ChildWatcher, CreateMode, StoreClient, StoreConnection, StoreConnector, StoreEvent,
};
use crate::utils::parent_path;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

type SessionId = u64;

struct Node {
    data: Vec<u8>,
    /// 临时节点所属会话
    owner: Option<SessionId>,
}

struct Watch {
    session: SessionId,
    tx: oneshot::Sender<()>,
}

struct Session {
    events: mpsc::UnboundedSender<StoreEvent>,
}

#[derive(Default)]
struct StoreState {
    nodes: BTreeMap<String, Node>,
    watches: HashMap<String, Vec<Watch>>,
    sessions: HashMap<SessionId, Session>,
    /// 已发起但尚未报告连接成功的会话
    pending: HashMap<SessionId, Session>,
}

impl StoreState {
    /// 取出路径上的全部 watch，调用方在锁外触发
    fn take_watches(&mut self, path: &str) -> Vec<Watch> {
        self.watches.remove(path).unwrap_or_default()
    }

    fn children(&self, path: &str) -> Vec<String> {
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{}/", path)
        };
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(p, _)| p.starts_with(&prefix))
            .filter_map(|(p, _)| {
                let rest = &p[prefix.len()..];
                (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
            })
            .collect()
    }

    /// 删除节点及其子树，返回需要触发的 watch
    fn remove_subtree(&mut self, path: &str) -> Vec<Watch> {
        let prefix = format!("{}/", path);
        let doomed: Vec<String> = self
            .nodes
            .keys()
            .filter(|p| *p == path || p.starts_with(&prefix))
            .cloned()
            .collect();
        if doomed.is_empty() {
            return Vec::new();
        }

        let mut fired = Vec::new();
        for p in &doomed {
            self.nodes.remove(p);
            fired.extend(self.take_watches(p));
        }
        if let Some(parent) = parent_path(path) {
            fired.extend(self.take_watches(parent));
        }
        fired
    }
}

fn fire(watches: Vec<Watch>) {
    for watch in watches {
        let _ = watch.tx.send(());
    }
}

struct Shared {
    state: Mutex<StoreState>,
    next_session: AtomicU64,
    auto_connect: AtomicBool,
    connect_count: AtomicUsize,
    close_count: AtomicUsize,
    failing: Mutex<HashSet<String>>,
}

/// 内存协调存储
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    /// 创建存储，连接后立即报告 `Connected`
    pub fn new() -> Self {
        Self::with_auto_connect(true)
    }

    /// 创建一个永远不报告连接成功的存储
    pub fn unresponsive() -> Self {
        Self::with_auto_connect(false)
    }

    fn with_auto_connect(auto_connect: bool) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(StoreState::default()),
                next_session: AtomicU64::new(1),
                auto_connect: AtomicBool::new(auto_connect),
                connect_count: AtomicUsize::new(0),
                close_count: AtomicUsize::new(0),
                failing: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// 之后的连接是否自动成功
    pub fn set_auto_connect(&self, enabled: bool) {
        self.shared.auto_connect.store(enabled, Ordering::SeqCst);
    }

    /// 让所有尚未连接的会话连接成功
    pub fn accept_pending(&self) {
        let accepted: Vec<mpsc::UnboundedSender<StoreEvent>> = {
            let mut state = self.shared.state.lock();
            let pending: Vec<(SessionId, Session)> = state.pending.drain().collect();
            pending
                .into_iter()
                .map(|(id, session)| {
                    let events = session.events.clone();
                    state.sessions.insert(id, session);
                    events
                })
                .collect()
        };

        debug!(sessions = accepted.len(), "Memory store accept pending sessions");
        for events in accepted {
            let _ = events.send(StoreEvent::Connected);
        }
    }

    /// 以管理员身份写入持久节点（父路径自动创建），触发父路径 watch
    pub fn add_node(&self, path: &str) {
        let mut fired = Vec::new();
        {
            let mut state = self.shared.state.lock();
            let mut current = String::new();
            for segment in path.split('/').filter(|s| !s.is_empty()) {
                current.push('/');
                current.push_str(segment);
                if !state.nodes.contains_key(&current) {
                    state.nodes.insert(
                        current.clone(),
                        Node {
                            data: Vec::new(),
                            owner: None,
                        },
                    );
                    if let Some(parent) = parent_path(&current) {
                        fired.extend(state.take_watches(parent));
                    }
                }
            }
        }
        fire(fired);
    }

    /// 删除节点及其子树，触发相关 watch
    pub fn remove_node(&self, path: &str) {
        let fired = self.shared.state.lock().remove_subtree(path);
        fire(fired);
    }

    /// 让所有在线会话过期：丢弃会话 watch，删除临时节点，通知客户端 `Closed`
    pub fn expire_sessions(&self) {
        let (fired, notify) = {
            let mut state = self.shared.state.lock();
            let sessions: Vec<(SessionId, Session)> = state.sessions.drain().collect();
            let expired: HashSet<SessionId> = sessions.iter().map(|(id, _)| *id).collect();

            for watches in state.watches.values_mut() {
                watches.retain(|w| !expired.contains(&w.session));
            }

            let ephemeral: Vec<String> = state
                .nodes
                .iter()
                .filter(|(_, node)| node.owner.is_some_and(|o| expired.contains(&o)))
                .map(|(path, _)| path.clone())
                .collect();
            let mut fired = Vec::new();
            for path in ephemeral {
                fired.extend(state.remove_subtree(&path));
            }
            (fired, sessions)
        };

        debug!(sessions = notify.len(), "Memory store sessions expired");
        fire(fired);
        for (_, session) in notify {
            let _ = session.events.send(StoreEvent::Closed);
        }
    }

    /// 向所有在线会话报告错误
    pub fn inject_error(&self, err: DubboError) {
        let targets: Vec<mpsc::UnboundedSender<StoreEvent>> = self
            .shared
            .state
            .lock()
            .sessions
            .values()
            .map(|s| s.events.clone())
            .collect();
        for tx in targets {
            let _ = tx.send(StoreEvent::Error(err.clone()));
        }
    }

    /// 让指定路径的子节点列表失败（或恢复）
    pub fn fail_listing(&self, path: &str, failing: bool) {
        let mut set = self.shared.failing.lock();
        if failing {
            set.insert(path.to_string());
        } else {
            set.remove(path);
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        self.shared.state.lock().nodes.contains_key(path)
    }

    pub fn children(&self, path: &str) -> Vec<String> {
        self.shared.state.lock().children(path)
    }

    /// 节点数据
    pub fn data(&self, path: &str) -> Option<Vec<u8>> {
        self.shared.state.lock().nodes.get(path).map(|node| node.data.clone())
    }

    /// 节点是否为临时节点
    pub fn is_ephemeral(&self, path: &str) -> bool {
        self.shared
            .state
            .lock()
            .nodes
            .get(path)
            .is_some_and(|node| node.owner.is_some())
    }

    /// 路径上当前挂着的 watch 数量
    pub fn watch_count(&self, path: &str) -> usize {
        self.shared
            .state
            .lock()
            .watches
            .get(path)
            .map_or(0, |w| w.iter().filter(|w| !w.tx.is_closed()).count())
    }

    pub fn connect_count(&self) -> usize {
        self.shared.connect_count.load(Ordering::SeqCst)
    }

    /// 客户端调用 `close` 的次数
    pub fn close_count(&self) -> usize {
        self.shared.close_count.load(Ordering::SeqCst)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreConnector for MemoryStore {
    fn connect(&self) -> StoreConnection {
        let session = self.shared.next_session.fetch_add(1, Ordering::SeqCst);
        self.shared.connect_count.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();

        let client = MemoryClient {
            shared: self.shared.clone(),
            session,
            closed: AtomicBool::new(false),
        };

        if self.shared.auto_connect.load(Ordering::SeqCst) {
            self.shared
                .state
                .lock()
                .sessions
                .insert(session, Session { events: tx.clone() });
            let _ = tx.send(StoreEvent::Connected);
        } else {
            self.shared
                .state
                .lock()
                .pending
                .insert(session, Session { events: tx });
        }
        debug!(session, "Memory store connect");

        StoreConnection {
            client: Arc::new(client),
            events: rx,
        }
    }
}

struct MemoryClient {
    shared: Arc<Shared>,
    session: SessionId,
    closed: AtomicBool,
}

impl MemoryClient {
    fn check_session(&self, state: &StoreState) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DubboError::not_connected("memory store client closed"));
        }
        if !state.sessions.contains_key(&self.session) {
            return Err(DubboError::session_lost(format!(
                "memory store session {} is not alive",
                self.session
            )));
        }
        Ok(())
    }

    fn owner(&self, mode: CreateMode) -> Option<SessionId> {
        match mode {
            CreateMode::Persistent => None,
            CreateMode::Ephemeral => Some(self.session),
        }
    }
}

#[async_trait]
impl StoreClient for MemoryClient {
    async fn mkdirp(&self, path: &str) -> Result<()> {
        let mut fired = Vec::new();
        {
            let mut state = self.shared.state.lock();
            self.check_session(&state)?;
            let mut current = String::new();
            for segment in path.split('/').filter(|s| !s.is_empty()) {
                current.push('/');
                current.push_str(segment);
                if state.nodes.contains_key(&current) {
                    continue;
                }
                state.nodes.insert(
                    current.clone(),
                    Node {
                        data: Vec::new(),
                        owner: None,
                    },
                );
                if let Some(parent) = parent_path(&current) {
                    fired.extend(state.take_watches(parent));
                }
            }
        }
        fire(fired);
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let state = self.shared.state.lock();
        self.check_session(&state)?;
        Ok(state.nodes.contains_key(path))
    }

    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<()> {
        let fired = {
            let mut state = self.shared.state.lock();
            self.check_session(&state)?;
            if state.nodes.contains_key(path) {
                return Err(DubboError::node_exists(path));
            }
            let parent = parent_path(path).ok_or_else(|| DubboError::no_node(path))?;
            if parent != "/" && !state.nodes.contains_key(parent) {
                return Err(DubboError::no_node(parent));
            }
            state.nodes.insert(
                path.to_string(),
                Node {
                    data: data.to_vec(),
                    owner: self.owner(mode),
                },
            );
            state.take_watches(parent)
        };
        fire(fired);
        Ok(())
    }

    async fn get_children_and_watch(&self, path: &str) -> Result<(Vec<String>, ChildWatcher)> {
        if self.shared.failing.lock().contains(path) {
            return Err(DubboError::store(format!("injected listing failure: {}", path)));
        }

        let mut state = self.shared.state.lock();
        self.check_session(&state)?;
        if !state.nodes.contains_key(path) {
            return Err(DubboError::no_node(path));
        }
        let children = state.children(path);
        let (tx, watcher) = ChildWatcher::channel();
        state
            .watches
            .entry(path.to_string())
            .or_default()
            .push(Watch {
                session: self.session,
                tx,
            });
        Ok((children, watcher))
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.close_count.fetch_add(1, Ordering::SeqCst);

        let fired = {
            let mut state = self.shared.state.lock();
            state.sessions.remove(&self.session);
            state.pending.remove(&self.session);
            for watches in state.watches.values_mut() {
                watches.retain(|w| w.session != self.session);
            }
            let ephemeral: Vec<String> = state
                .nodes
                .iter()
                .filter(|(_, node)| node.owner == Some(self.session))
                .map(|(path, _)| path.clone())
                .collect();
            let mut fired = Vec::new();
            for path in ephemeral {
                fired.extend(state.remove_subtree(&path));
            }
            fired
        };
        fire(fired);
        debug!(session = self.session, "Memory store client closed");
    }
}
