//! Flare Dubbo Core Library
//!
//! Service discovery core for Dubbo-style RPC: registry backends (ZooKeeper, Nacos),
//! load balancing, and consumer-side routing to transports.

pub mod config;
pub mod error;
pub mod types;

pub mod client;
pub mod dubbo;
pub mod registry;
pub mod server;
pub mod utils;

// Re-exports
pub use config::{ApplicationConfig, Config, NacosConfig, RegistryConfig, ZookeeperConfig};
pub use error::{DubboError, ErrorCategory, ErrorCode, InfraResultExt, Result};
pub use types::{
    ConsumerServiceMeta, ProviderService, RegisterConsumerService, RegisterServicesMeta,
    normalize_group, normalize_version,
};

pub use client::{
    CallContext, ConsumerOptions, ConsumerService, DubboClient, MethodDescriptor, MethodKind,
    ServiceContract, ServiceDescriptor, TransportFactory, TransportOptions,
};
#[cfg(feature = "grpc")]
pub use client::GrpcTransportFactory;
pub use dubbo::Dubbo;
pub use registry::{
    LoadBalanceStrategy, LoadBalancer, NacosRegistry, Registry, RegistryEvent, RegistryState,
    ServiceUrl, ZookeeperRegistry, create_registry,
};
pub use server::{DubboServer, ProviderOptions};
