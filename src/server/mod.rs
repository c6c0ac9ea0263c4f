//! Dubbo 服务端模块
//!
//! 只负责把提供者服务发布到注册中心，RPC 监听由外部 HTTP/2 服务承担

use crate::client::contract::ServiceDescriptor;
use crate::config::ApplicationConfig;
use crate::error::{DubboError, Result};
use crate::registry::trait_def::Registry;
use crate::types::{ProviderService, RegisterServicesMeta};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

/// 默认 dubbo 协议版本
pub const DEFAULT_DUBBO_VERSION: &str = "2.0.2";

/// 提供者服务配置
#[derive(Debug, Clone)]
pub struct ProviderOptions {
    pub service: ServiceDescriptor,
    pub port: u16,
    pub group: Option<String>,
    pub version: Option<String>,
    pub dubbo: Option<String>,
    /// 写入持久节点
    pub persistent: bool,
}

impl ProviderOptions {
    pub fn new(service: ServiceDescriptor, port: u16) -> Self {
        Self {
            service,
            port,
            group: None,
            version: None,
            dubbo: None,
            persistent: false,
        }
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn dubbo(mut self, dubbo: impl Into<String>) -> Self {
        self.dubbo = Some(dubbo.into());
        self
    }

    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }
}

/// Dubbo 服务端
pub struct DubboServer {
    application: ApplicationConfig,
    registry: Arc<dyn Registry>,
    services: RwLock<Vec<ProviderService>>,
}

impl DubboServer {
    pub fn new(application: ApplicationConfig, registry: Arc<dyn Registry>) -> Self {
        Self {
            application,
            registry,
            services: RwLock::new(Vec::new()),
        }
    }

    pub fn application(&self) -> &ApplicationConfig {
        &self.application
    }

    /// 发布提供者服务，等待注册中心就绪后写入
    pub async fn add_provider_service(&self, options: ProviderOptions) -> Result<()> {
        if options.service.type_name.is_empty() {
            return Err(DubboError::invalid_argument("provider interface is empty"));
        }

        let provider = ProviderService {
            interface: options.service.type_name.clone(),
            group: options.group,
            version: options.version,
            methods: options.service.method_names(),
            persistent: options.persistent,
        };
        let meta = RegisterServicesMeta {
            application: self.application.clone(),
            port: options.port,
            dubbo: Some(
                options
                    .dubbo
                    .unwrap_or_else(|| DEFAULT_DUBBO_VERSION.to_string()),
            ),
            services: vec![provider.clone()],
        };

        self.registry.register_services(&meta).await?;
        info!(
            interface = %provider.interface,
            port = options.port,
            "Provider service registered"
        );
        self.services.write().push(provider);
        Ok(())
    }

    /// 已发布的提供者服务
    pub fn services(&self) -> Vec<ProviderService> {
        self.services.read().clone()
    }
}
