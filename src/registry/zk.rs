//! 基于 `zookeeper-client` 的存储适配器

use crate::config::ZookeeperConfig;
use crate::error::{DubboError, ErrorCode, InfraResultExt, Result};
use crate::registry::store::{
    ChildWatcher, CreateMode, StoreClient, StoreConnection, StoreConnector, StoreEvent,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zookeeper_client as zk;

/// 连接失败后的重试间隔
const RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// ZooKeeper 连接器
pub struct ZkConnector {
    cluster: String,
}

impl ZkConnector {
    pub fn new(config: &ZookeeperConfig) -> Self {
        Self {
            cluster: config.connect.clone(),
        }
    }
}

impl StoreConnector for ZkConnector {
    fn connect(&self) -> StoreConnection {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = Arc::new(ZkClient {
            inner: RwLock::new(None),
            cancel: CancellationToken::new(),
        });

        let cluster = self.cluster.clone();
        let session = client.clone();
        tokio::spawn(async move { session.run(cluster, tx).await });

        StoreConnection { client, events: rx }
    }
}

/// 单个会话的客户端句柄
struct ZkClient {
    inner: RwLock<Option<zk::Client>>,
    cancel: CancellationToken,
}

impl ZkClient {
    /// 建立会话并跟踪会话状态，直到会话终止或被关闭
    async fn run(self: Arc<Self>, cluster: String, events: mpsc::UnboundedSender<StoreEvent>) {
        let client = loop {
            let attempt = tokio::select! {
                _ = self.cancel.cancelled() => return,
                attempt = zk::Client::connect(&cluster) => attempt,
            };
            match attempt {
                Ok(client) => break client,
                Err(err) => {
                    warn!(cluster = %cluster, error = %err, "Zookeeper connect failed, retrying");
                    let _ = events.send(StoreEvent::Error(
                        DubboError::connection_failed(format!("zookeeper connect {} failed", cluster))
                            .with_details(err.to_string()),
                    ));
                    tokio::select! {
                        _ = self.cancel.cancelled() => return,
                        _ = tokio::time::sleep(RETRY_INTERVAL) => {}
                    }
                }
            }
        };

        let mut state_watcher = client.state_watcher();
        *self.inner.write() = Some(client);
        info!(cluster = %cluster, "Zookeeper session established");
        let _ = events.send(StoreEvent::Connected);

        loop {
            let state = tokio::select! {
                _ = self.cancel.cancelled() => return,
                state = state_watcher.changed() => state,
            };
            debug!(cluster = %cluster, ?state, "Zookeeper session state changed");
            if state.is_terminated() {
                let _ = events.send(StoreEvent::Closed);
                return;
            }
        }
    }

    fn client(&self) -> Result<zk::Client> {
        self.inner
            .read()
            .clone()
            .ok_or_else(|| DubboError::not_connected("zookeeper session not established"))
    }
}

fn map_zk_error(err: zk::Error, path: &str) -> DubboError {
    match err {
        zk::Error::NodeExists => DubboError::node_exists(path),
        zk::Error::NoNode => DubboError::no_node(path),
        other => DubboError::store(format!("zookeeper operation on {} failed", path))
            .with_details(other.to_string()),
    }
}

#[async_trait]
impl StoreClient for ZkClient {
    async fn mkdirp(&self, path: &str) -> Result<()> {
        let client = self.client()?;
        let options = zk::CreateMode::Persistent.with_acls(zk::Acls::anyone_all());
        let mut current = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            match client.create(&current, &[], &options).await {
                Ok(_) | Err(zk::Error::NodeExists) => {}
                Err(err) => return Err(map_zk_error(err, &current)),
            }
        }
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let client = self.client()?;
        let stat = client
            .check_stat(path)
            .await
            .into_dubbo(ErrorCode::StoreOperationFailed, format!("check {} failed", path))?;
        Ok(stat.is_some())
    }

    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<()> {
        let client = self.client()?;
        let zk_mode = match mode {
            CreateMode::Persistent => zk::CreateMode::Persistent,
            CreateMode::Ephemeral => zk::CreateMode::Ephemeral,
        };
        let options = zk_mode.with_acls(zk::Acls::anyone_all());
        client
            .create(path, data, &options)
            .await
            .map(|_| ())
            .map_err(|err| map_zk_error(err, path))
    }

    async fn get_children_and_watch(&self, path: &str) -> Result<(Vec<String>, ChildWatcher)> {
        let client = self.client()?;
        let (children, _stat, oneshot) = client
            .get_and_watch_children(path)
            .await
            .map_err(|err| map_zk_error(err, path))?;

        let (tx, watcher) = ChildWatcher::channel();
        tokio::spawn(async move {
            let event = oneshot.changed().await;
            // 会话事件表示 watch 失效，不算子节点变化
            if event.event_type != zk::EventType::Session {
                let _ = tx.send(());
            }
        });
        Ok((children, watcher))
    }

    fn close(&self) {
        self.cancel.cancel();
        if self.inner.write().take().is_some() {
            debug!("Zookeeper client released");
        }
    }
}
