//! 注册中心 Trait 定义

use crate::error::{DubboError, Result};
use crate::registry::base::{RegistryBase, RegistryState, SubscriberId, Subscription};
use crate::types::{RegisterConsumerService, RegisterServicesMeta};
use async_trait::async_trait;

/// 注册中心 Trait
///
/// 客户端和服务端只通过这个接口使用注册中心，ZooKeeper 与 Nacos 各自实现
#[async_trait]
pub trait Registry: Send + Sync {
    /// 等待注册中心就绪
    async fn ready(&self) -> Result<()>;

    /// 查找一组接口的服务 URL，完成后广播完整快照
    async fn find_dubbo_service_urls(&self, interfaces: &[String]) -> Result<()>;

    /// 注册提供者
    async fn register_services(&self, meta: &RegisterServicesMeta) -> Result<()>;

    /// 注册消费者，并触发对这些接口的服务发现
    async fn register_consumers(&self, meta: &RegisterConsumerService) -> Result<()>;

    /// 关闭注册中心，释放底层连接
    fn close(&self);

    /// 底层客户端是否存在（关闭后为 false）
    fn is_connected(&self) -> bool;

    /// 公共状态
    fn base(&self) -> &RegistryBase;

    /// 订阅变化
    fn subscribe(&self) -> Subscription {
        self.base().subscribe()
    }

    /// 取消订阅
    fn unsubscribe(&self, id: SubscriberId) {
        self.base().unsubscribe(id)
    }

    /// 广播当前快照
    fn emit_data(&self) {
        self.base().emit_data()
    }

    /// 广播错误
    fn emit_error(&self, err: DubboError) {
        self.base().emit_error(err)
    }

    /// 当前快照
    fn snapshot(&self) -> RegistryState {
        self.base().snapshot()
    }
}
