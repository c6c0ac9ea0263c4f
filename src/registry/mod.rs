//! 服务注册发现模块
//!
//! 支持两种注册中心后端：ZooKeeper（watch 驱动）和 Nacos（推送驱动），
//! 以及客户端使用的负载均衡策略

pub mod base;
pub mod load_balancer;
pub mod memory;
pub mod nacos;
#[cfg(feature = "nacos")]
pub mod nacos_http;
pub mod naming;
pub mod store;
pub mod trait_def;
pub mod url;
#[cfg(feature = "zookeeper")]
pub mod zk;
pub mod zookeeper;

use crate::config::RegistryConfig;
use crate::error::Result;
use std::sync::Arc;

pub use base::{ReadySignal, ReadyState, RegistryBase, RegistryEvent, RegistryState, SubscriberId, Subscription};
pub use load_balancer::{
    ActiveGuard, HashRing, LoadBalanceStrategy, LoadBalancer, SelectOptions, WeightedCandidate,
    calc_hash, select,
};
pub use memory::MemoryStore;
pub use nacos::NacosRegistry;
#[cfg(feature = "nacos")]
pub use nacos_http::HttpNamingClient;
pub use naming::{MemoryNaming, NacosInstance, NamingClient};
pub use store::{ChildWatcher, CreateMode, StoreClient, StoreConnection, StoreConnector, StoreEvent};
pub use trait_def::Registry;
pub use url::ServiceUrl;
#[cfg(feature = "zookeeper")]
pub use zk::ZkConnector;
pub use zookeeper::{WatchState, ZkStatus, ZookeeperRegistry};

/// 根据配置创建注册中心
///
/// 必须在 tokio 运行时内调用；对应后端的 feature 未开启时返回 `OperationNotSupported`
pub fn create_registry(config: &RegistryConfig) -> Result<Arc<dyn Registry>> {
    config.validate()?;
    match config {
        RegistryConfig::Zookeeper(cfg) => {
            #[cfg(feature = "zookeeper")]
            {
                let connector = Arc::new(ZkConnector::new(cfg));
                let registry = ZookeeperRegistry::new(cfg.clone(), connector)?;
                Ok(Arc::new(registry))
            }
            #[cfg(not(feature = "zookeeper"))]
            {
                let _ = cfg;
                Err(crate::error::DubboError::coded(
                    crate::error::ErrorCode::OperationNotSupported,
                    "zookeeper registry requires the `zookeeper` feature",
                ))
            }
        }
        RegistryConfig::Nacos(cfg) => {
            #[cfg(feature = "nacos")]
            {
                let client = Arc::new(HttpNamingClient::new(cfg)?);
                let registry = NacosRegistry::new(cfg.clone(), client)?;
                Ok(Arc::new(registry))
            }
            #[cfg(not(feature = "nacos"))]
            {
                let _ = cfg;
                Err(crate::error::DubboError::coded(
                    crate::error::ErrorCode::OperationNotSupported,
                    "nacos registry requires the `nacos` feature",
                ))
            }
        }
    }
}
