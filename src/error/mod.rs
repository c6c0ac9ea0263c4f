//! 错误处理模块
//!
//! 提供统一的错误类型和错误代码分类，注册中心、负载均衡和调用路由共用

pub mod code;
pub mod dubbo_error;

pub use code::{ErrorCategory, ErrorCode};
pub use dubbo_error::{DubboError, Result};

/// 将底层存储/网络错误转换为 `DubboError`
pub fn map_infra_error<E, S>(error: E, code: ErrorCode, message: S) -> DubboError
where
    E: std::fmt::Display,
    S: Into<String>,
{
    DubboError::coded(code, message).with_details(error.to_string())
}

/// 底层结果的辅助扩展，用于快速转换为统一的错误类型
pub trait InfraResultExt<T> {
    fn into_dubbo<S>(self, code: ErrorCode, message: S) -> Result<T>
    where
        S: Into<String>;
}

impl<T, E> InfraResultExt<T> for std::result::Result<T, E>
where
    E: std::fmt::Display,
{
    fn into_dubbo<S>(self, code: ErrorCode, message: S) -> Result<T>
    where
        S: Into<String>,
    {
        self.map_err(|err| map_infra_error(err, code, message))
    }
}
