use crate::config::ApplicationConfig;
use serde::{Deserialize, Serialize};

/// 逻辑接口名，服务发现的主键
pub type InterfaceName = String;

/// 未限定版本的默认值
pub const UNSCOPED_VERSION: &str = "0.0.0";

/// 规范化 group：空白视为未限定
pub fn normalize_group(group: Option<&str>) -> String {
    group.map(|g| g.trim().to_string()).unwrap_or_default()
}

/// 规范化 version：空白和 `0.0.0` 都视为未限定
pub fn normalize_version(version: Option<&str>) -> String {
    match version.map(|v| v.trim()) {
        None | Some("") | Some(UNSCOPED_VERSION) => String::new(),
        Some(v) => v.to_string(),
    }
}

/// 提供者服务描述
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderService {
    pub interface: InterfaceName,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    /// 方法名列表
    #[serde(default)]
    pub methods: Vec<String>,
    /// 是否写入持久节点（默认临时节点）
    #[serde(default)]
    pub persistent: bool,
}

impl ProviderService {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            group: None,
            version: None,
            methods: Vec::new(),
            persistent: false,
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.methods = methods.into_iter().map(Into::into).collect();
        self
    }
}

/// 提供者注册元数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterServicesMeta {
    pub application: ApplicationConfig,
    pub port: u16,
    /// dubbo 协议版本
    #[serde(default)]
    pub dubbo: Option<String>,
    pub services: Vec<ProviderService>,
}

/// 消费者声明的服务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerServiceMeta {
    pub interface: InterfaceName,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    /// 调用超时（毫秒）
    #[serde(default)]
    pub timeout: Option<u64>,
}

impl ConsumerServiceMeta {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            group: None,
            version: None,
            timeout: None,
        }
    }
}

/// 消费者注册元数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterConsumerService {
    pub application: ApplicationConfig,
    pub services: Vec<ConsumerServiceMeta>,
}
