//! Dubbo 客户端模块
//!
//! 订阅注册中心变化，维护接口 → URL 映射和按 URL 缓存的传输，
//! 为每个接口创建消费者服务

pub mod consumer;
pub mod contract;
pub mod transport;

pub use consumer::{CallContext, ConsumerService};
pub use contract::{MethodDescriptor, MethodKind, ServiceContract, ServiceDescriptor};
#[cfg(feature = "grpc")]
pub use transport::GrpcTransportFactory;
pub use transport::{TransportFactory, TransportOptions};

use crate::config::ApplicationConfig;
use crate::registry::base::{RegistryEvent, RegistryState, SubscriberId};
use crate::registry::load_balancer::{LoadBalanceStrategy, LoadBalancer};
use crate::registry::trait_def::Registry;
use crate::registry::url::ServiceUrl;
use crate::types::{ConsumerServiceMeta, RegisterConsumerService, normalize_group, normalize_version};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 消费者服务配置
#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    /// 服务名，默认取接口名
    pub name: Option<String>,
    pub service: ServiceDescriptor,
    pub group: Option<String>,
    pub version: Option<String>,
    /// 调用超时（毫秒）
    pub timeout: Option<u64>,
    pub load_balance: LoadBalanceStrategy,
    pub virtual_nodes: usize,
}

impl ConsumerOptions {
    pub fn new(service: ServiceDescriptor) -> Self {
        Self {
            name: None,
            service,
            group: None,
            version: None,
            timeout: None,
            load_balance: LoadBalanceStrategy::default(),
            virtual_nodes: crate::registry::load_balancer::DEFAULT_VIRTUAL_NODES,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout = Some(timeout_ms);
        self
    }

    pub fn load_balance(mut self, strategy: LoadBalanceStrategy) -> Self {
        self.load_balance = strategy;
        self
    }

    pub fn virtual_nodes(mut self, virtual_nodes: usize) -> Self {
        self.virtual_nodes = virtual_nodes;
        self
    }
}

/// 客户端与消费者服务共享的状态
pub(crate) struct ClientShared<F: TransportFactory> {
    factory: F,
    urls: RwLock<HashMap<String, Vec<ServiceUrl>>>,
    /// 完整 URL → 传输
    transports: RwLock<HashMap<String, F::Transport>>,
}

impl<F: TransportFactory> ClientShared<F> {
    fn new(factory: F) -> Self {
        Self {
            factory,
            urls: RwLock::new(HashMap::new()),
            transports: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn urls(&self, interface: &str) -> Vec<ServiceUrl> {
        self.urls.read().get(interface).cloned().unwrap_or_default()
    }

    pub(crate) fn transport(&self, url: &ServiceUrl) -> Option<F::Transport> {
        self.transports.read().get(&url.to_string()).cloned()
    }

    /// 应用注册中心快照
    ///
    /// 空列表不覆盖已知列表；新出现的 URL 按 `host:port` 惰性创建传输
    fn apply(&self, state: &RegistryState) {
        let mut fresh: Vec<ServiceUrl> = Vec::new();
        {
            let mut urls = self.urls.write();
            for (interface, list) in state {
                if list.is_empty() && urls.get(interface).is_some_and(|known| !known.is_empty()) {
                    debug!(interface = %interface, "Registry returned empty urls, keep known urls");
                    continue;
                }
                urls.insert(interface.clone(), list.clone());
                fresh.extend(list.iter().cloned());
            }
        }

        for url in fresh {
            let key = url.to_string();
            if self.transports.read().contains_key(&key) {
                continue;
            }

            let options = TransportOptions::from_url(&url);
            match self.factory.create_transport(options) {
                Ok(transport) => {
                    debug!(address = %url.address(), "Create dubbo transport");
                    self.transports.write().entry(key).or_insert(transport);
                }
                Err(err) => {
                    warn!(address = %url.address(), error = %err, "Failed to create dubbo transport");
                }
            }
        }
    }
}

/// Dubbo 客户端
pub struct DubboClient<F: TransportFactory> {
    application: ApplicationConfig,
    registry: Arc<dyn Registry>,
    shared: Arc<ClientShared<F>>,
    services: RwLock<HashMap<String, Arc<ConsumerService<F>>>>,
    subscriber: SubscriberId,
    shutdown: CancellationToken,
}

impl<F: TransportFactory> DubboClient<F> {
    /// 创建客户端并订阅注册中心，必须在 tokio 运行时内调用
    pub fn new(application: ApplicationConfig, registry: Arc<dyn Registry>, factory: F) -> Self {
        let shared = Arc::new(ClientShared::new(factory));
        let mut subscription = registry.subscribe();
        let subscriber = subscription.id();
        shared.apply(&registry.snapshot());

        let shutdown = CancellationToken::new();
        let listener = shared.clone();
        let token = shutdown.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = token.cancelled() => break,
                    event = subscription.recv() => event,
                };
                match event {
                    Some(RegistryEvent::Changed(state)) => listener.apply(&state),
                    Some(RegistryEvent::Error(err)) => {
                        warn!(error = %err, "Registry error");
                    }
                    None => break,
                }
            }
            debug!("Registry listener stopped");
        });

        Self {
            application,
            registry,
            shared,
            services: RwLock::new(HashMap::new()),
            subscriber,
            shutdown,
        }
    }

    pub fn application(&self) -> &ApplicationConfig {
        &self.application
    }

    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.registry
    }

    /// 直接应用一次注册中心快照
    pub fn handle_registry_change(&self, state: &RegistryState) {
        self.shared.apply(state);
    }

    /// 当前已知的接口 URL
    pub fn service_urls(&self, interface: &str) -> Vec<ServiceUrl> {
        self.shared.urls(interface)
    }

    /// 已创建的传输数量
    pub fn transport_count(&self) -> usize {
        self.shared.transports.read().len()
    }

    /// 添加消费者服务
    ///
    /// 消费者注册在后台进行，失败只记录日志
    pub fn add_consumer_service(&self, options: ConsumerOptions) -> Arc<ConsumerService<F>> {
        let group = normalize_group(options.group.as_deref());
        let version = normalize_version(options.version.as_deref());
        let interface = options.service.type_name.clone();
        let name = options.name.clone().unwrap_or_else(|| interface.clone());

        let meta = RegisterConsumerService {
            application: self.application.clone(),
            services: vec![ConsumerServiceMeta {
                interface: interface.clone(),
                group: Some(group.clone()),
                version: Some(version.clone()),
                timeout: options.timeout,
            }],
        };
        let registry = self.registry.clone();
        let target = interface.clone();
        tokio::spawn(async move {
            match registry.register_consumers(&meta).await {
                Ok(()) => info!(interface = %target, "Register consumer success"),
                Err(err) => warn!(interface = %target, error = %err, "Register consumer error"),
            }
        });

        let balancer =
            LoadBalancer::new(options.load_balance).with_virtual_nodes(options.virtual_nodes);
        let service = Arc::new(ConsumerService::new(
            name.clone(),
            options.service,
            group,
            version,
            options.timeout.map(Duration::from_millis),
            balancer,
            self.shared.clone(),
        ));
        self.services.write().insert(name, service.clone());
        service
    }

    /// 按名称获取消费者服务
    pub fn service(&self, name: &str) -> Option<Arc<ConsumerService<F>>> {
        self.services.read().get(name).cloned()
    }

    /// 停止监听注册中心
    pub fn close(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        self.registry.unsubscribe(self.subscriber);
    }
}

impl<F: TransportFactory> Drop for DubboClient<F> {
    fn drop(&mut self) {
        self.close();
    }
}
