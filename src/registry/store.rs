//! 协调存储抽象
//!
//! ZooKeeper 风格的层级存储：路径节点、临时/持久节点、一次性子节点 watch。
//! 连接器立即返回客户端句柄，连接结果通过事件流异步报告

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// 存储会话事件
#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// 会话建立
    Connected,
    /// 连接错误（可能还会重试）
    Error(crate::error::DubboError),
    /// 会话关闭（过期或连接断开）
    Closed,
}

/// 节点类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    Persistent,
    Ephemeral,
}

/// 一次性子节点 watch，触发一次后失效
pub struct ChildWatcher {
    rx: oneshot::Receiver<()>,
}

impl ChildWatcher {
    /// 创建 watch，返回 (触发端, 等待端)
    pub fn channel() -> (oneshot::Sender<()>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// 等待子节点变化；返回 false 表示 watch 被丢弃（会话结束）
    pub async fn changed(self) -> bool {
        self.rx.await.is_ok()
    }
}

/// 协调存储客户端
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// 递归创建持久路径（幂等）
    async fn mkdirp(&self, path: &str) -> Result<()>;

    /// 节点是否存在
    async fn exists(&self, path: &str) -> Result<bool>;

    /// 创建节点，已存在时返回 `NodeExists`
    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<()>;

    /// 列出子节点并安装一次性 watch
    async fn get_children_and_watch(&self, path: &str) -> Result<(Vec<String>, ChildWatcher)>;

    /// 关闭连接
    fn close(&self);
}

/// 一次连接尝试
pub struct StoreConnection {
    pub client: Arc<dyn StoreClient>,
    pub events: mpsc::UnboundedReceiver<StoreEvent>,
}

/// 协调存储连接器
pub trait StoreConnector: Send + Sync {
    /// 发起连接，立即返回句柄
    fn connect(&self) -> StoreConnection;
}
