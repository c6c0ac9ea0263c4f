//! 错误代码和错误类别定义
//!
//! 错误代码按类别分组，每个类别占用1000个代码范围：
//! - 1000-1999: 配置相关错误
//! - 2000-2999: 注册中心连接相关错误
//! - 3000-3999: 注册中心存储操作错误
//! - 4000-4999: 负载均衡选择错误
//! - 5000-5999: 调用路由错误
//! - 6000-6999: 序列化相关错误
//! - 9000-9999: 通用错误

use serde::{Deserialize, Serialize};
use std::fmt;

/// 错误代码枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u32)]
pub enum ErrorCode {
    // ============================================================
    // 配置相关错误 (1000-1999)
    // ============================================================
    ConfigurationError = 1000,

    // ============================================================
    // 连接相关错误 (2000-2999)
    // ============================================================
    ConnectionFailed = 2000,
    ConnectTimeout = 2001,
    SessionLost = 2002,
    NotConnected = 2003,

    // ============================================================
    // 存储操作错误 (3000-3999)
    // ============================================================
    StoreOperationFailed = 3000,
    NodeExists = 3001,
    NoNode = 3002,

    // ============================================================
    // 选择错误 (4000-4999)
    // ============================================================
    InvalidArgument = 4000,

    // ============================================================
    // 路由错误 (5000-5999)
    // ============================================================
    NotFound = 5000,
    Unavailable = 5001,

    // ============================================================
    // 序列化相关错误 (6000-6999)
    // ============================================================
    UrlParseError = 6000,

    // ============================================================
    // 通用错误 (9000-9999)
    // ============================================================
    InternalError = 9000,
    OperationNotSupported = 9001,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ErrorCode {
    /// 获取错误代码的数字值
    #[inline]
    pub fn as_u32(&self) -> u32 {
        *self as u32
    }

    /// 从数字值创建错误代码
    pub fn from_u32(code: u32) -> Option<Self> {
        match code {
            1000 => Some(ErrorCode::ConfigurationError),
            2000 => Some(ErrorCode::ConnectionFailed),
            2001 => Some(ErrorCode::ConnectTimeout),
            2002 => Some(ErrorCode::SessionLost),
            2003 => Some(ErrorCode::NotConnected),
            3000 => Some(ErrorCode::StoreOperationFailed),
            3001 => Some(ErrorCode::NodeExists),
            3002 => Some(ErrorCode::NoNode),
            4000 => Some(ErrorCode::InvalidArgument),
            5000 => Some(ErrorCode::NotFound),
            5001 => Some(ErrorCode::Unavailable),
            6000 => Some(ErrorCode::UrlParseError),
            9000 => Some(ErrorCode::InternalError),
            9001 => Some(ErrorCode::OperationNotSupported),
            _ => None,
        }
    }

    /// 获取错误代码的英文标识符
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorCode::ConnectionFailed => "CONNECTION_FAILED",
            ErrorCode::ConnectTimeout => "CONNECT_TIMEOUT",
            ErrorCode::SessionLost => "SESSION_LOST",
            ErrorCode::NotConnected => "NOT_CONNECTED",
            ErrorCode::StoreOperationFailed => "STORE_OPERATION_FAILED",
            ErrorCode::NodeExists => "NODE_EXISTS",
            ErrorCode::NoNode => "NO_NODE",
            ErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Unavailable => "UNAVAILABLE",
            ErrorCode::UrlParseError => "URL_PARSE_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::OperationNotSupported => "OPERATION_NOT_SUPPORTED",
        }
    }

    /// 获取错误代码的类别
    pub fn category(&self) -> ErrorCategory {
        match self {
            ErrorCode::ConfigurationError => ErrorCategory::Config,
            ErrorCode::ConnectTimeout => ErrorCategory::ConnectTimeout,
            ErrorCode::SessionLost => ErrorCategory::SessionLost,
            ErrorCode::ConnectionFailed
            | ErrorCode::NotConnected
            | ErrorCode::StoreOperationFailed
            | ErrorCode::NodeExists
            | ErrorCode::NoNode => ErrorCategory::TransientStore,
            ErrorCode::InvalidArgument => ErrorCategory::Selection,
            ErrorCode::NotFound | ErrorCode::Unavailable => ErrorCategory::Routing,
            ErrorCode::UrlParseError => ErrorCategory::Serialization,
            ErrorCode::InternalError | ErrorCode::OperationNotSupported => ErrorCategory::General,
        }
    }

    /// 判断是否为可重试的错误
    ///
    /// 框架本身不做跨调用重试，调用方可以据此决定是否重新选择并发起调用
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::ConnectTimeout
                | ErrorCode::SessionLost
                | ErrorCode::NotConnected
                | ErrorCode::StoreOperationFailed
                | ErrorCode::Unavailable
        )
    }
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    /// 注册中心配置缺失或非法，构造时立即失败
    Config,
    /// 协调存储在超时时间内不可达
    ConnectTimeout,
    /// 单次 list/create/watch 操作失败
    TransientStore,
    /// 存储会话被动断开，会自动重连
    SessionLost,
    /// 候选为空或选择参数缺失
    Selection,
    /// 没有匹配的 group/version，或缓存不一致
    Routing,
    Serialization,
    General,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Config => write!(f, "CONFIG"),
            ErrorCategory::ConnectTimeout => write!(f, "CONNECT_TIMEOUT"),
            ErrorCategory::TransientStore => write!(f, "TRANSIENT_STORE"),
            ErrorCategory::SessionLost => write!(f, "SESSION_LOST"),
            ErrorCategory::Selection => write!(f, "SELECTION"),
            ErrorCategory::Routing => write!(f, "ROUTING"),
            ErrorCategory::Serialization => write!(f, "SERIALIZATION"),
            ErrorCategory::General => write!(f, "GENERAL"),
        }
    }
}
