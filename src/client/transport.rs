//! 传输层抽象
//!
//! 客户端只关心「按端点创建传输句柄」，句柄本身对核心不透明

use crate::error::Result;
use crate::registry::url::ServiceUrl;
use std::time::Duration;

/// 创建传输的参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportOptions {
    /// `host:port`
    pub base_url: String,
    /// 调用超时，取提供者 URL 的 `timeout` 参数
    pub timeout: Option<Duration>,
}

impl TransportOptions {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: None,
        }
    }

    /// 按提供者 URL 生成参数
    pub fn from_url(url: &ServiceUrl) -> Self {
        Self {
            base_url: url.address(),
            timeout: url.timeout(),
        }
    }
}

/// 传输工厂
pub trait TransportFactory: Send + Sync + 'static {
    /// 传输句柄，由外部 RPC stub 使用
    type Transport: Clone + Send + Sync + 'static;

    fn create_transport(&self, options: TransportOptions) -> Result<Self::Transport>;
}

#[cfg(feature = "grpc")]
pub use grpc::GrpcTransportFactory;

#[cfg(feature = "grpc")]
mod grpc {
    use super::{TransportFactory, TransportOptions};
    use crate::error::{ErrorCode, InfraResultExt, Result};
    use std::time::Duration;
    use tonic::transport::{Channel, Endpoint};

    /// 基于 tonic 的惰性连接工厂，首次调用时才建立连接
    #[derive(Debug, Clone)]
    pub struct GrpcTransportFactory {
        connect_timeout: Duration,
        tcp_nodelay: bool,
    }

    impl GrpcTransportFactory {
        pub fn new() -> Self {
            Self {
                connect_timeout: Duration::from_secs(5),
                tcp_nodelay: true,
            }
        }

        pub fn connect_timeout(mut self, timeout: Duration) -> Self {
            self.connect_timeout = timeout;
            self
        }

        pub fn tcp_nodelay(mut self, nodelay: bool) -> Self {
            self.tcp_nodelay = nodelay;
            self
        }
    }

    impl Default for GrpcTransportFactory {
        fn default() -> Self {
            Self::new()
        }
    }

    impl TransportFactory for GrpcTransportFactory {
        type Transport = Channel;

        fn create_transport(&self, options: TransportOptions) -> Result<Channel> {
            let address = if options.base_url.contains("://") {
                options.base_url.clone()
            } else {
                format!("http://{}", options.base_url)
            };

            let mut endpoint = Endpoint::from_shared(address)
                .into_dubbo(ErrorCode::ConnectionFailed, "Invalid transport address")?
                .connect_timeout(self.connect_timeout)
                .tcp_nodelay(self.tcp_nodelay);
            if let Some(timeout) = options.timeout {
                endpoint = endpoint.timeout(timeout);
            }
            Ok(endpoint.connect_lazy())
        }
    }
}
