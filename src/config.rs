//! 配置模块
//!
//! 应用与注册中心配置，支持从 TOML 文件加载

use crate::error::{DubboError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// ZooKeeper 默认根路径
pub const DEFAULT_ZK_ROOT_PATH: &str = "/dubbo";
/// ZooKeeper 默认连接超时（毫秒）
pub const DEFAULT_ZK_TIMEOUT_MS: u64 = 40_000;
/// Nacos 默认命名空间
pub const DEFAULT_NACOS_NAMESPACE: &str = "public";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub application: ApplicationConfig,
    pub registry: RegistryConfig,
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApplicationConfig {
    pub name: String,
    /// 注册时使用的本机地址，不填则自动探测
    #[serde(default)]
    pub host: Option<String>,
}

impl ApplicationConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: None,
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }
}

/// 注册中心配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RegistryConfig {
    Zookeeper(ZookeeperConfig),
    Nacos(NacosConfig),
}

impl RegistryConfig {
    pub fn validate(&self) -> Result<()> {
        match self {
            RegistryConfig::Zookeeper(cfg) => cfg.validate(),
            RegistryConfig::Nacos(cfg) => cfg.validate(),
        }
    }
}

/// ZooKeeper 注册中心配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ZookeeperConfig {
    /// 连接串，如 `127.0.0.1:2181,127.0.0.1:2182`
    pub connect: String,
    /// 连接超时（毫秒）
    #[serde(default = "default_zk_timeout")]
    pub timeout: u64,
    /// 根路径
    #[serde(default = "default_zk_root_path", rename = "zkRootPath", alias = "zk_root_path")]
    pub zk_root_path: String,
    /// 客户端日志级别
    #[serde(default = "default_debug_level")]
    pub debug_level: String,
    /// 是否按配置顺序连接服务器
    #[serde(default)]
    pub host_order_deterministic: bool,
}

fn default_zk_timeout() -> u64 {
    DEFAULT_ZK_TIMEOUT_MS
}

fn default_zk_root_path() -> String {
    DEFAULT_ZK_ROOT_PATH.to_string()
}

fn default_debug_level() -> String {
    "warn".to_string()
}

impl ZookeeperConfig {
    pub fn new(connect: impl Into<String>) -> Self {
        Self {
            connect: connect.into(),
            timeout: DEFAULT_ZK_TIMEOUT_MS,
            zk_root_path: default_zk_root_path(),
            debug_level: default_debug_level(),
            host_order_deterministic: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout.as_millis() as u64;
        self
    }

    pub fn with_root_path(mut self, root: impl Into<String>) -> Self {
        self.zk_root_path = root.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.connect.trim().is_empty() {
            return Err(DubboError::config("Please specify zookeeper connect url"));
        }
        Ok(())
    }

    /// 连接超时
    pub fn connect_timeout(&self) -> Duration {
        if self.timeout == 0 {
            Duration::from_millis(DEFAULT_ZK_TIMEOUT_MS)
        } else {
            Duration::from_millis(self.timeout)
        }
    }

    /// 规范化后的根路径：以 `/` 开头，不以 `/` 结尾
    pub fn root_path(&self) -> String {
        let trimmed = self.zk_root_path.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            return DEFAULT_ZK_ROOT_PATH.to_string();
        }
        if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{}", trimmed)
        }
    }
}

/// Nacos 注册中心配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NacosConfig {
    /// 服务器列表，逗号分隔
    pub connect: String,
    #[serde(default = "default_nacos_namespace")]
    pub namespace: String,
    /// 订阅轮询间隔（毫秒）
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    /// 实例心跳间隔（毫秒）
    #[serde(default = "default_beat_interval")]
    pub beat_interval: u64,
}

fn default_nacos_namespace() -> String {
    DEFAULT_NACOS_NAMESPACE.to_string()
}

fn default_poll_interval() -> u64 {
    10_000
}

fn default_beat_interval() -> u64 {
    5_000
}

impl NacosConfig {
    pub fn new(connect: impl Into<String>) -> Self {
        Self {
            connect: connect.into(),
            namespace: default_nacos_namespace(),
            poll_interval: default_poll_interval(),
            beat_interval: default_beat_interval(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.connect.trim().is_empty() {
            return Err(DubboError::config(
                "Please specify nacos props, connect is required",
            ));
        }
        if self.server_list().is_empty() {
            return Err(DubboError::config(
                "Please specify nacos props, connect should list at least one server",
            ));
        }
        Ok(())
    }

    /// 服务器列表（支持集群）
    pub fn server_list(&self) -> Vec<String> {
        self.connect
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect()
    }

    /// 命名空间，空值回退为 `public`
    pub fn namespace_id(&self) -> &str {
        if self.namespace.trim().is_empty() {
            DEFAULT_NACOS_NAMESPACE
        } else {
            &self.namespace
        }
    }
}

impl Config {
    pub fn load_from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.registry.validate()?;
        Ok(config)
    }
}
