//! 服务契约描述
//!
//! 方法表在创建消费者服务时一次性解析，调用时按方法名查表

use serde::{Deserialize, Serialize};

/// 调用模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodKind {
    Unary,
    ServerStreaming,
    ClientStreaming,
    BiDiStreaming,
}

/// 方法描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub name: String,
    pub kind: MethodKind,
    /// 请求消息类型名
    pub input: String,
    /// 响应消息类型名
    pub output: String,
}

impl MethodDescriptor {
    pub fn unary(
        name: impl Into<String>,
        input: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: MethodKind::Unary,
            input: input.into(),
            output: output.into(),
        }
    }

    pub fn with_kind(mut self, kind: MethodKind) -> Self {
        self.kind = kind;
        self
    }
}

/// 服务描述：接口名 + 方法表
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    /// 接口名，即注册中心中的服务键
    pub type_name: String,
    pub methods: Vec<MethodDescriptor>,
}

impl ServiceDescriptor {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            methods: Vec::new(),
        }
    }

    pub fn method(mut self, method: MethodDescriptor) -> Self {
        self.methods.push(method);
        self
    }

    /// 从契约类型获取描述
    pub fn of<C: ServiceContract>() -> Self {
        C::descriptor()
    }

    pub fn method_names(&self) -> Vec<String> {
        self.methods.iter().map(|m| m.name.clone()).collect()
    }
}

/// 服务契约，由生成代码或手写 stub 实现
pub trait ServiceContract {
    fn descriptor() -> ServiceDescriptor;
}
