//! 入口：把应用配置和注册中心组装成客户端、服务端

use crate::client::{DubboClient, TransportFactory};
use crate::config::{ApplicationConfig, Config};
use crate::error::Result;
use crate::registry::{Registry, create_registry};
use crate::server::DubboServer;
use std::sync::Arc;

/// 一个应用共享一个注册中心
pub struct Dubbo {
    application: ApplicationConfig,
    registry: Arc<dyn Registry>,
}

impl Dubbo {
    pub fn new(application: ApplicationConfig, registry: Arc<dyn Registry>) -> Self {
        Self {
            application,
            registry,
        }
    }

    /// 按配置创建注册中心，必须在 tokio 运行时内调用
    pub fn from_config(config: &Config) -> Result<Self> {
        let registry = create_registry(&config.registry)?;
        Ok(Self::new(config.application.clone(), registry))
    }

    pub fn application(&self) -> &ApplicationConfig {
        &self.application
    }

    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.registry
    }

    pub fn new_client<F: TransportFactory>(&self, factory: F) -> DubboClient<F> {
        DubboClient::new(self.application.clone(), self.registry.clone(), factory)
    }

    pub fn new_server(&self) -> DubboServer {
        DubboServer::new(self.application.clone(), self.registry.clone())
    }

    /// 关闭注册中心
    pub fn close(&self) {
        self.registry.close();
    }
}
