//! Dubbo 服务 URL
//!
//! 格式：`scheme://host[:port]/interface?query`，scheme 为 `dubbo`（提供者）或 `consumer`（消费者）

use crate::config::ApplicationConfig;
use crate::error::{DubboError, Result};
use crate::types::{ConsumerServiceMeta, ProviderService, normalize_group, normalize_version};
use crate::utils::pid;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use url::form_urlencoded;

pub const DUBBO_SCHEME: &str = "dubbo";
pub const CONSUMER_SCHEME: &str = "consumer";

pub const INTERFACE_KEY: &str = "interface";
pub const GROUP_KEY: &str = "group";
pub const VERSION_KEY: &str = "version";
pub const WEIGHT_KEY: &str = "weight";
pub const SIDE_KEY: &str = "side";
pub const TIMEOUT_KEY: &str = "timeout";

/// 默认权重
pub const DEFAULT_WEIGHT: i64 = 100;
/// 权重上限（Dubbo 权重为 32 位整数）
pub const MAX_WEIGHT: i64 = i32::MAX as i64;

/// 服务端点描述
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceUrl {
    scheme: String,
    host: String,
    port: Option<u16>,
    interface: String,
    params: Vec<(String, String)>,
}

impl ServiceUrl {
    /// 创建不带查询参数的 URL
    pub fn new(
        scheme: impl Into<String>,
        host: impl Into<String>,
        port: Option<u16>,
        interface: impl Into<String>,
    ) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into(),
            port,
            interface: interface.into(),
            params: Vec::new(),
        }
    }

    /// 追加查询参数（保持插入顺序，同名参数覆盖）
    pub fn with_param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.set_param(key, value);
        self
    }

    /// 设置查询参数，同名参数原位覆盖
    pub fn set_param(&mut self, key: impl Into<String>, value: impl ToString) {
        let key = key.into();
        let value = value.to_string();
        match self.params.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.params.push((key, value)),
        }
    }

    /// 协议，提供者为 `dubbo`
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// 主机（IPv6 不带方括号）
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// 路径中的接口名
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// 按原顺序排列的全部查询参数
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// 指定查询参数的值
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// 是否为 `dubbo://` 提供者 URL
    pub fn is_provider(&self) -> bool {
        self.scheme == DUBBO_SCHEME
    }

    /// 规范化后的 group，未设置为空串
    pub fn group(&self) -> String {
        normalize_group(self.param(GROUP_KEY))
    }

    /// 规范化后的 version，未设置或 `0.0.0` 为空串
    pub fn version(&self) -> String {
        normalize_version(self.param(VERSION_KEY))
    }

    /// 权重，默认 100，限制在 `1..=i32::MAX`
    pub fn weight(&self) -> i64 {
        self.param(WEIGHT_KEY)
            .and_then(|w| w.trim().parse::<i64>().ok())
            .unwrap_or(DEFAULT_WEIGHT)
            .clamp(1, MAX_WEIGHT)
    }

    /// 提供者声明的调用超时（毫秒），未设置或为 0 时返回 `None`
    pub fn timeout(&self) -> Option<Duration> {
        self.param(TIMEOUT_KEY)
            .and_then(|t| t.trim().parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// `host:port`，无端口时只有 host
    pub fn address(&self) -> String {
        let host = bracket_host(&self.host);
        match self.port {
            Some(port) => format!("{}:{}", host, port),
            None => host,
        }
    }

    /// 是否为同一个端点：(scheme, host, port, interface) 相同
    pub fn same_endpoint(&self, other: &ServiceUrl) -> bool {
        self.scheme == other.scheme
            && self.host == other.host
            && self.port == other.port
            && self.interface == other.interface
    }

    /// 是否为等价注册：同一端点且查询参数完全相同（与顺序无关）
    pub fn equivalent(&self, other: &ServiceUrl) -> bool {
        if !self.same_endpoint(other) || self.params.len() != other.params.len() {
            return false;
        }
        let mut left: Vec<_> = self.params.iter().collect();
        let mut right: Vec<_> = other.params.iter().collect();
        left.sort();
        right.sort();
        left == right
    }

    /// 编码为存储节点名
    pub fn to_node_name(&self) -> String {
        encode_node_name(&self.to_string())
    }

    /// 从存储节点名解析
    pub fn from_node_name(name: &str) -> Result<Self> {
        decode_node_name(name)?.parse()
    }
}

fn bracket_host(host: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]", host)
    } else {
        host.to_string()
    }
}

impl fmt::Display for ServiceUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.address(), self.interface)?;
        if !self.params.is_empty() {
            let query = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(self.params.iter())
                .finish();
            write!(f, "?{}", query)?;
        }
        Ok(())
    }
}

impl FromStr for ServiceUrl {
    type Err = DubboError;

    fn from_str(s: &str) -> Result<Self> {
        let parsed = url::Url::parse(s.trim())?;
        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| DubboError::url_parse(format!("missing host: {}", s)))?;
        let host = host.trim_start_matches('[').trim_end_matches(']').to_string();

        let path = parsed.path().trim_start_matches('/');
        let interface = urlencoding::decode(path)
            .map_err(|e| DubboError::url_parse(format!("invalid interface in {}: {}", s, e)))?
            .into_owned();
        if interface.is_empty() {
            return Err(DubboError::url_parse(format!("missing interface: {}", s)));
        }

        let params = parsed
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        Ok(Self {
            scheme: parsed.scheme().to_string(),
            host,
            port: parsed.port(),
            interface,
            params,
        })
    }
}

/// 整个 URL 百分号编码，用作节点名
pub fn encode_node_name(url: &str) -> String {
    urlencoding::encode(url).into_owned()
}

/// 节点名解码
pub fn decode_node_name(name: &str) -> Result<String> {
    urlencoding::decode(name)
        .map(|s| s.into_owned())
        .map_err(|e| DubboError::url_parse(format!("invalid node name {}: {}", name, e)))
}

/// 构造提供者 URL
///
/// group / version 等于未限定默认值（空 group、`0.0.0`）时不写入查询串
pub fn build_provider_url(
    host: &str,
    port: u16,
    application: &ApplicationConfig,
    dubbo: Option<&str>,
    service: &ProviderService,
) -> ServiceUrl {
    let mut url = ServiceUrl::new(DUBBO_SCHEME, host, Some(port), service.interface.clone())
        .with_param(INTERFACE_KEY, &service.interface)
        .with_param("methods", service.methods.join(","))
        .with_param(SIDE_KEY, "provider")
        .with_param("pid", pid())
        .with_param("protocol", DUBBO_SCHEME)
        .with_param("anyhost", true)
        .with_param("timestamp", chrono::Utc::now().timestamp_millis());

    let application_name = if application.name.is_empty() {
        "node-dubbo-service"
    } else {
        application.name.as_str()
    };
    url.set_param("application", application_name);

    if let Some(dubbo) = dubbo.filter(|d| !d.is_empty()) {
        url.set_param("dubbo", dubbo);
    }
    let group = normalize_group(service.group.as_deref());
    if !group.is_empty() {
        url.set_param(GROUP_KEY, group);
    }
    let version = normalize_version(service.version.as_deref());
    if !version.is_empty() {
        url.set_param(VERSION_KEY, version);
    }
    url
}

/// 构造消费者 URL
pub fn build_consumer_url(
    host: &str,
    application: &ApplicationConfig,
    service: &ConsumerServiceMeta,
) -> ServiceUrl {
    let version = service.version.clone().unwrap_or_default();
    let group = service.group.clone().unwrap_or_default();
    let timeout = service.timeout.map(|t| t.to_string()).unwrap_or_default();

    ServiceUrl::new(CONSUMER_SCHEME, host, None, service.interface.clone())
        .with_param("application", &application.name)
        .with_param(INTERFACE_KEY, &service.interface)
        .with_param("category", "consumers")
        .with_param("method", "")
        .with_param("revision", &version)
        .with_param(VERSION_KEY, &version)
        .with_param(GROUP_KEY, group)
        .with_param(TIMEOUT_KEY, timeout)
        .with_param(SIDE_KEY, "consumer")
        .with_param("check", false)
        .with_param("pid", pid())
}
