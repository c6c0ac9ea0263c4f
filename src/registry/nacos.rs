//! Nacos 注册中心
//!
//! 推送模型：每个接口一个常驻订阅，命名服务每次推送完整实例列表，
//! 映射成 `dubbo://ip:port/interface?metadata` 后替换该接口的条目并广播。
//! 订阅失败时按指数退避重试，直到订阅成功或注册中心关闭

use crate::config::NacosConfig;
use crate::error::{DubboError, Result};
use crate::registry::base::{ReadySignal, RegistryBase};
use crate::registry::naming::{NacosInstance, NamingClient};
use crate::registry::trait_def::Registry;
use crate::registry::url::{
    DUBBO_SCHEME, ServiceUrl, build_consumer_url, build_provider_url,
};
use crate::types::{RegisterConsumerService, RegisterServicesMeta};
use crate::utils::resolve_host;
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 消费者实例注册在 `consumers:{interface}` 服务下
pub const CONSUMER_SERVICE_PREFIX: &str = "consumers:";

/// 消费者 URL 没有端口，注册实例时使用的占位端口
const CONSUMER_PLACEHOLDER_PORT: u16 = 80;

/// 订阅失败后的首次重试间隔
const RETRY_MIN_DELAY: Duration = Duration::from_millis(200);
/// 重试间隔上限
const RETRY_MAX_DELAY: Duration = Duration::from_secs(30);

struct Inner {
    config: NacosConfig,
    client: Arc<dyn NamingClient>,
    base: RegistryBase,
    ready: ReadySignal,
    subscribed: Mutex<HashSet<String>>,
    shutdown: CancellationToken,
}

/// Nacos 注册中心
pub struct NacosRegistry {
    inner: Arc<Inner>,
}

impl NacosRegistry {
    /// 创建注册中心，就绪信号来自命名客户端自身的 `ready`
    ///
    /// 必须在 tokio 运行时内调用
    pub fn new(config: NacosConfig, client: Arc<dyn NamingClient>) -> Result<Self> {
        config.validate()?;
        info!(
            servers = ?config.server_list(),
            namespace = %config.namespace_id(),
            "Init nacos registry"
        );

        let inner = Arc::new(Inner {
            config,
            client,
            base: RegistryBase::new(),
            ready: ReadySignal::new(),
            subscribed: Mutex::new(HashSet::new()),
            shutdown: CancellationToken::new(),
        });

        let task = inner.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = task.shutdown.cancelled() => return,
                result = task.client.ready() => result,
            };
            match result {
                Ok(()) => {
                    debug!("Nacos naming client ready");
                    task.ready.resolve();
                }
                Err(err) => {
                    warn!(error = %err, "Nacos naming client failed");
                    task.ready.reject(err);
                }
            }
        });

        Ok(Self { inner })
    }

    pub fn config(&self) -> &NacosConfig {
        &self.inner.config
    }

    /// 底层命名客户端
    pub fn client(&self) -> Arc<dyn NamingClient> {
        self.inner.client.clone()
    }

    /// 为接口安装常驻订阅（每个接口只安装一次）
    pub async fn find_dubbo_service_url(&self, interface: &str) {
        self.inner.subscribe(interface).await
    }
}

impl Inner {
    async fn subscribe(self: &Arc<Self>, interface: &str) {
        if self.shutdown.is_cancelled() {
            return;
        }
        if !self.subscribed.lock().insert(interface.to_string()) {
            return;
        }

        match self.client.subscribe(interface).await {
            Ok(rx) => {
                debug!(interface = %interface, "Nacos subscribed");
                self.listen(interface.to_string(), rx);
            }
            Err(err) => {
                warn!(interface = %interface, error = %err, "Nacos subscribe failed");
                self.base.emit_error(err);
                self.retry_subscribe(interface.to_string());
            }
        }
    }

    /// 订阅失败后按指数退避重试，接口保持在已订阅集合中避免重复安装
    fn retry_subscribe(self: &Arc<Self>, interface: String) {
        let inner = self.clone();
        tokio::spawn(async move {
            let mut delay = RETRY_MIN_DELAY;
            loop {
                tokio::select! {
                    _ = inner.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
                match inner.client.subscribe(&interface).await {
                    Ok(rx) => {
                        info!(interface = %interface, "Nacos subscribed after retry");
                        inner.listen(interface, rx);
                        return;
                    }
                    Err(err) => {
                        warn!(
                            interface = %interface,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "Nacos subscribe retry failed"
                        );
                        delay = (delay * 2).min(RETRY_MAX_DELAY);
                    }
                }
            }
            inner.subscribed.lock().remove(&interface);
        });
    }

    /// 消费推送，直到订阅结束或注册中心关闭
    fn listen(self: &Arc<Self>, interface: String, mut rx: mpsc::UnboundedReceiver<Vec<NacosInstance>>) {
        let inner = self.clone();
        tokio::spawn(async move {
            loop {
                let instances = tokio::select! {
                    _ = inner.shutdown.cancelled() => break,
                    instances = rx.recv() => match instances {
                        Some(instances) => instances,
                        None => break,
                    },
                };

                let urls: Vec<ServiceUrl> = instances.iter().filter_map(instance_to_url).collect();
                debug!(interface = %interface, count = urls.len(), "Nacos instances changed");
                inner.base.replace(&interface, urls);
                inner.base.emit_data();
            }
            inner.subscribed.lock().remove(&interface);
            debug!(interface = %interface, "Nacos subscription ended");
        });
    }

    async fn register(&self, service: &str, instance: NacosInstance) -> Result<()> {
        debug!(service = %service, ip = %instance.ip, port = instance.port, "Register nacos instance");
        self.client.register_instance(service, instance).await
    }
}

/// 实例映射为提供者 URL，接口名取服务名中 `@@` 之后的部分；不可用实例跳过
pub fn instance_to_url(instance: &NacosInstance) -> Option<ServiceUrl> {
    if !instance.enabled || !instance.healthy {
        return None;
    }
    let interface = match instance.service_name.split_once("@@") {
        Some((_, name)) => name,
        None => instance.service_name.as_str(),
    };
    if interface.is_empty() || instance.ip.is_empty() {
        return None;
    }

    let mut url = ServiceUrl::new(DUBBO_SCHEME, instance.ip.clone(), Some(instance.port), interface);
    for (key, value) in &instance.metadata {
        url.set_param(key.clone(), value);
    }
    Some(url)
}

/// URL 转为实例，查询参数写入 metadata
fn url_to_instance(url: &ServiceUrl, ephemeral: bool) -> NacosInstance {
    let mut instance = NacosInstance::new(
        url.host(),
        url.port().unwrap_or(CONSUMER_PLACEHOLDER_PORT),
    );
    instance.ephemeral = ephemeral;
    for (key, value) in url.params() {
        instance.metadata.insert(key.clone(), value.clone());
    }
    instance
}

#[async_trait]
impl Registry for NacosRegistry {
    async fn ready(&self) -> Result<()> {
        self.inner.ready.wait().await
    }

    async fn find_dubbo_service_urls(&self, interfaces: &[String]) -> Result<()> {
        debug!(interfaces = ?interfaces, "Find dubbo service urls");
        join_all(interfaces.iter().map(|i| self.inner.subscribe(i))).await;
        Ok(())
    }

    async fn register_services(&self, meta: &RegisterServicesMeta) -> Result<()> {
        self.ready().await?;
        let host = resolve_host(meta.application.host.as_deref());

        for service in &meta.services {
            let url = build_provider_url(
                &host,
                meta.port,
                &meta.application,
                meta.dubbo.as_deref(),
                service,
            );
            let instance = url_to_instance(&url, !service.persistent);
            self.inner.register(&service.interface, instance).await?;
            info!(interface = %service.interface, url = %url, "Register dubbo service");
        }
        Ok(())
    }

    async fn register_consumers(&self, meta: &RegisterConsumerService) -> Result<()> {
        debug!(count = meta.services.len(), "Register consumers");
        self.ready().await?;
        let host = resolve_host(meta.application.host.as_deref());

        let mut interfaces: Vec<String> = Vec::new();
        for service in &meta.services {
            if !interfaces.contains(&service.interface) {
                interfaces.push(service.interface.clone());
            }
            let url = build_consumer_url(&host, &meta.application, service);
            let name = format!("{}{}", CONSUMER_SERVICE_PREFIX, service.interface);
            self.inner.register(&name, url_to_instance(&url, true)).await?;
        }

        self.find_dubbo_service_urls(&interfaces).await
    }

    fn close(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        info!("Close nacos registry");
        self.inner.shutdown.cancel();
        self.inner.client.close();
        self.inner
            .ready
            .reject(DubboError::not_connected("nacos registry closed"));
    }

    fn is_connected(&self) -> bool {
        !self.inner.shutdown.is_cancelled()
    }

    fn base(&self) -> &RegistryBase {
        &self.inner.base
    }
}

impl Drop for NacosRegistry {
    fn drop(&mut self) {
        self.close();
    }
}
