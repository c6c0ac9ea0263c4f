//! Dubbo 统一错误类型

use super::code::{ErrorCategory, ErrorCode};
use thiserror::Error;

/// Dubbo 统一错误类型
#[derive(Error, Debug, Clone)]
pub enum DubboError {
    /// 带错误代码的错误
    #[error("错误 [{code}] {reason}", code = .code.as_str())]
    Coded {
        code: ErrorCode,
        reason: String,
        details: Option<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// 系统错误（内部错误）
    #[error("系统错误: {0}")]
    System(String),
}

impl DubboError {
    /// 创建带错误代码的错误
    pub fn coded(code: ErrorCode, reason: impl Into<String>) -> Self {
        DubboError::Coded {
            code,
            reason: reason.into(),
            details: None,
            timestamp: chrono::Utc::now(),
        }
    }

    /// 创建系统错误
    pub fn system(msg: impl Into<String>) -> Self {
        DubboError::System(msg.into())
    }

    /// 附加错误详情
    #[must_use]
    pub fn with_details(self, extra: impl Into<String>) -> Self {
        match self {
            DubboError::Coded {
                code,
                reason,
                timestamp,
                ..
            } => DubboError::Coded {
                code,
                reason,
                details: Some(extra.into()),
                timestamp,
            },
            other => other,
        }
    }

    // ============================================================
    // 便捷方法：注册中心
    // ============================================================

    /// 配置缺失或非法
    pub fn config(reason: impl Into<String>) -> Self {
        Self::coded(ErrorCode::ConfigurationError, reason)
    }

    /// 连接协调存储超时
    pub fn connect_timeout(reason: impl Into<String>) -> Self {
        Self::coded(ErrorCode::ConnectTimeout, reason)
    }

    /// 存储会话被动关闭
    pub fn session_lost(reason: impl Into<String>) -> Self {
        Self::coded(ErrorCode::SessionLost, reason)
    }

    /// 注册中心尚未连接或已关闭
    pub fn not_connected(reason: impl Into<String>) -> Self {
        Self::coded(ErrorCode::NotConnected, reason)
    }

    /// 连接失败
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        Self::coded(ErrorCode::ConnectionFailed, reason)
    }

    /// 单次存储操作失败
    pub fn store(reason: impl Into<String>) -> Self {
        Self::coded(ErrorCode::StoreOperationFailed, reason)
    }

    /// 节点已存在
    pub fn node_exists(path: impl Into<String>) -> Self {
        Self::coded(ErrorCode::NodeExists, path)
    }

    /// 节点不存在
    pub fn no_node(path: impl Into<String>) -> Self {
        Self::coded(ErrorCode::NoNode, path)
    }

    // ============================================================
    // 便捷方法：选择与路由
    // ============================================================

    /// 选择参数缺失或非法
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::coded(ErrorCode::InvalidArgument, reason)
    }

    /// 找不到可用的服务地址
    pub fn not_found(reason: impl Into<String>) -> Self {
        Self::coded(ErrorCode::NotFound, reason)
    }

    /// 选中的地址没有可用的传输
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::coded(ErrorCode::Unavailable, reason)
    }

    /// URL 解析失败
    pub fn url_parse(reason: impl Into<String>) -> Self {
        Self::coded(ErrorCode::UrlParseError, reason)
    }

    // ============================================================
    // 信息获取方法
    // ============================================================

    /// 获取错误代码
    pub fn code(&self) -> ErrorCode {
        match self {
            DubboError::Coded { code, .. } => *code,
            DubboError::System(_) => ErrorCode::InternalError,
        }
    }

    /// 获取错误类别
    pub fn category(&self) -> ErrorCategory {
        self.code().category()
    }

    /// 获取错误原因
    pub fn reason(&self) -> &str {
        match self {
            DubboError::Coded { reason, .. } => reason,
            DubboError::System(msg) => msg,
        }
    }

    /// 获取错误详情
    pub fn details(&self) -> Option<&str> {
        match self {
            DubboError::Coded { details, .. } => details.as_deref(),
            DubboError::System(_) => None,
        }
    }

    /// 判断是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }
}

impl From<std::io::Error> for DubboError {
    fn from(err: std::io::Error) -> Self {
        DubboError::system(format!("io: {}", err))
    }
}

impl From<url::ParseError> for DubboError {
    fn from(err: url::ParseError) -> Self {
        DubboError::url_parse(err.to_string())
    }
}

impl From<toml::de::Error> for DubboError {
    fn from(err: toml::de::Error) -> Self {
        DubboError::config(format!("invalid toml: {}", err))
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, DubboError>;
