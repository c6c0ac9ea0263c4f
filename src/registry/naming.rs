//! 命名服务抽象
//!
//! Nacos 风格的命名服务：服务下挂实例，订阅后每次变化推送完整实例列表

use crate::error::{DubboError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

/// Nacos 默认分组
pub const DEFAULT_GROUP: &str = "DEFAULT_GROUP";

/// 服务实例
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NacosInstance {
    #[serde(default)]
    pub instance_id: Option<String>,
    pub ip: String,
    pub port: u16,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default = "default_true")]
    pub healthy: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub ephemeral: bool,
    /// `{group}@@{service}`
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

fn default_weight() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

impl NacosInstance {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            instance_id: None,
            ip: ip.into(),
            port,
            weight: default_weight(),
            healthy: true,
            enabled: true,
            ephemeral: true,
            service_name: String::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_service_name(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = service_name.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// 同一服务下以 `ip:port` 区分实例
    pub fn same_instance(&self, other: &NacosInstance) -> bool {
        self.ip == other.ip && self.port == other.port
    }
}

/// 带分组的服务名
pub fn grouped_service_name(service: &str) -> String {
    if service.contains("@@") {
        service.to_string()
    } else {
        format!("{}@@{}", DEFAULT_GROUP, service)
    }
}

/// 命名服务客户端
#[async_trait]
pub trait NamingClient: Send + Sync {
    /// 等待客户端就绪
    async fn ready(&self) -> Result<()>;

    /// 订阅服务，之后每次变化推送完整实例列表
    async fn subscribe(&self, service: &str) -> Result<mpsc::UnboundedReceiver<Vec<NacosInstance>>>;

    /// 注册实例
    async fn register_instance(&self, service: &str, instance: NacosInstance) -> Result<()>;

    /// 注销实例
    async fn deregister_instance(&self, service: &str, instance: &NacosInstance) -> Result<()>;

    /// 关闭客户端，停止所有订阅和心跳
    fn close(&self);
}

/// 内存命名服务
pub struct MemoryNaming {
    services: Mutex<HashMap<String, Vec<NacosInstance>>>,
    subscribers: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Vec<NacosInstance>>>>>,
    ready_error: Option<DubboError>,
    closed: AtomicBool,
}

impl MemoryNaming {
    pub fn new() -> Self {
        Self {
            services: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
            ready_error: None,
            closed: AtomicBool::new(false),
        }
    }

    /// `ready` 总是返回给定错误
    pub fn failing(err: DubboError) -> Self {
        Self {
            ready_error: Some(err),
            ..Self::new()
        }
    }

    /// 覆盖服务的实例列表并推送给订阅者
    pub fn set_instances(&self, service: &str, instances: Vec<NacosInstance>) {
        let name = grouped_service_name(service);
        let instances: Vec<NacosInstance> = instances
            .into_iter()
            .map(|i| i.with_service_name(name.clone()))
            .collect();
        self.services
            .lock()
            .insert(service.to_string(), instances.clone());
        self.push(service, instances);
    }

    /// 服务当前的实例
    pub fn instances(&self, service: &str) -> Vec<NacosInstance> {
        self.services
            .lock()
            .get(service)
            .cloned()
            .unwrap_or_default()
    }

    /// 服务的在线订阅数量
    pub fn subscriber_count(&self, service: &str) -> usize {
        self.subscribers
            .lock()
            .get(service)
            .map_or(0, |subs| subs.iter().filter(|tx| !tx.is_closed()).count())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn push(&self, service: &str, instances: Vec<NacosInstance>) {
        let targets = self
            .subscribers
            .lock()
            .get(service)
            .cloned()
            .unwrap_or_default();
        debug!(service = %service, instances = instances.len(), subscribers = targets.len(), "Push instances");
        for tx in targets {
            let _ = tx.send(instances.clone());
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(DubboError::not_connected("naming client closed"));
        }
        Ok(())
    }
}

impl Default for MemoryNaming {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NamingClient for MemoryNaming {
    async fn ready(&self) -> Result<()> {
        match &self.ready_error {
            Some(err) => Err(err.clone()),
            None => self.check_open(),
        }
    }

    async fn subscribe(&self, service: &str) -> Result<mpsc::UnboundedReceiver<Vec<NacosInstance>>> {
        self.check_open()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(self.instances(service));
        self.subscribers
            .lock()
            .entry(service.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }

    async fn register_instance(&self, service: &str, instance: NacosInstance) -> Result<()> {
        self.check_open()?;
        let instance = instance.with_service_name(grouped_service_name(service));
        let instances = {
            let mut services = self.services.lock();
            let list = services.entry(service.to_string()).or_default();
            list.retain(|i| !i.same_instance(&instance));
            list.push(instance);
            list.clone()
        };
        self.push(service, instances);
        Ok(())
    }

    async fn deregister_instance(&self, service: &str, instance: &NacosInstance) -> Result<()> {
        self.check_open()?;
        let instances = {
            let mut services = self.services.lock();
            let list = services.entry(service.to_string()).or_default();
            list.retain(|i| !i.same_instance(instance));
            list.clone()
        };
        self.push(service, instances);
        Ok(())
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.subscribers.lock().clear();
        }
    }
}
