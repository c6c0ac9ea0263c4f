//! 消费者服务
//!
//! 每个接口一个实例，绑定 group/version、方法表和负载均衡器，
//! 端点和传输从客户端共享的映射中读取

use crate::client::ClientShared;
use crate::client::contract::{MethodDescriptor, ServiceDescriptor};
use crate::client::transport::TransportFactory;
use crate::error::{DubboError, Result};
use crate::registry::load_balancer::LoadBalancer;
use crate::registry::url::ServiceUrl;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// 一次调用的上下文，交给外部 RPC stub 使用
#[derive(Debug, Clone)]
pub struct CallContext<T> {
    pub transport: T,
    pub url: ServiceUrl,
    pub group: String,
    pub version: String,
    pub method: MethodDescriptor,
    pub timeout: Option<Duration>,
}

/// 消费者服务
pub struct ConsumerService<F: TransportFactory> {
    name: String,
    descriptor: ServiceDescriptor,
    group: String,
    version: String,
    timeout: Option<Duration>,
    methods: HashMap<String, MethodDescriptor>,
    balancer: LoadBalancer,
    shared: Arc<ClientShared<F>>,
}

impl<F: TransportFactory> ConsumerService<F> {
    pub(crate) fn new(
        name: String,
        descriptor: ServiceDescriptor,
        group: String,
        version: String,
        timeout: Option<Duration>,
        balancer: LoadBalancer,
        shared: Arc<ClientShared<F>>,
    ) -> Self {
        let methods = descriptor
            .methods
            .iter()
            .map(|m| (m.name.clone(), m.clone()))
            .collect();
        Self {
            name,
            descriptor,
            group,
            version,
            timeout,
            methods,
            balancer,
            shared,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interface(&self) -> &str {
        &self.descriptor.type_name
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn balancer(&self) -> &LoadBalancer {
        &self.balancer
    }

    /// 方法描述，未知方法返回 `NotFound`
    pub fn method(&self, name: &str) -> Result<&MethodDescriptor> {
        self.methods.get(name).ok_or_else(|| {
            DubboError::not_found(format!("{} has no method {}", self.interface(), name))
        })
    }

    /// 当前可用且 group/version 匹配的 URL
    pub fn find_service_urls(&self) -> Vec<ServiceUrl> {
        self.shared
            .urls(self.interface())
            .into_iter()
            .filter(|url| url.group() == self.group && url.version() == self.version)
            .collect()
    }

    /// 解析一次调用：过滤 URL、负载均衡、取传输
    pub fn resolve(&self, method: &str, hash_key: Option<&str>) -> Result<CallContext<F::Transport>> {
        let method = self.method(method)?.clone();

        let urls = self.find_service_urls();
        if urls.is_empty() {
            return Err(DubboError::not_found(format!(
                "no dubbo url for {} (group={:?}, version={:?})",
                self.interface(),
                self.group,
                self.version
            )));
        }

        let url = self.balancer.select(&urls, hash_key)?;
        let transport = self.shared.transport(&url).ok_or_else(|| {
            DubboError::unavailable(format!("no transport for {}", url.address()))
        })?;

        debug!(
            interface = %self.interface(),
            method = %method.name,
            address = %url.address(),
            "Resolved dubbo call"
        );

        Ok(CallContext {
            transport,
            url,
            group: self.group.clone(),
            version: self.version.clone(),
            method,
            timeout: self.timeout,
        })
    }

    /// 发起调用
    ///
    /// 选中端点后通过外部 stub 分发，调用期间计入该端点的活跃调用数
    pub async fn invoke<S, Fut, R>(&self, method: &str, hash_key: Option<&str>, stub: S) -> Result<R>
    where
        S: FnOnce(CallContext<F::Transport>) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let ctx = self.resolve(method, hash_key)?;
        let _active = self.balancer.begin_call(&ctx.url);
        stub(ctx).await
    }
}
