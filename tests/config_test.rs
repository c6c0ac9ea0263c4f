//! 配置加载测试

use flare_dubbo_core::config::{Config, RegistryConfig, ZookeeperConfig};
use flare_dubbo_core::{Dubbo, ErrorCode};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

/// 测试：加载 ZooKeeper 配置，未填字段使用默认值
#[test]
fn test_load_zookeeper_config() {
    let config = assert_ok!(Config::from_toml_str(
        r#"
        [application]
        name = "demo"

        [registry]
        type = "zookeeper"
        connect = "127.0.0.1:2181,127.0.0.1:2182"
        zkRootPath = "services/"
        "#,
    ));

    assert_eq!(config.application.name, "demo");
    assert!(config.application.host.is_none());
    match config.registry {
        RegistryConfig::Zookeeper(zk) => {
            assert_eq!(zk.root_path(), "/services");
            assert_eq!(zk.connect_timeout(), Duration::from_secs(40));
            assert!(!zk.host_order_deterministic);
        }
        other => panic!("unexpected registry config: {:?}", other),
    }
}

/// 测试：加载 Nacos 集群配置，命名空间默认 public
#[test]
fn test_load_nacos_config() {
    let config = assert_ok!(Config::from_toml_str(
        r#"
        [application]
        name = "demo"
        host = "10.0.0.9"

        [registry]
        type = "nacos"
        connect = "10.0.0.1:8848, 10.0.0.2:8848"
        "#,
    ));

    assert_eq!(config.application.host.as_deref(), Some("10.0.0.9"));
    match config.registry {
        RegistryConfig::Nacos(nacos) => {
            assert_eq!(nacos.server_list(), vec!["10.0.0.1:8848", "10.0.0.2:8848"]);
            assert_eq!(nacos.namespace_id(), "public");
        }
        other => panic!("unexpected registry config: {:?}", other),
    }
}

/// 测试：缺少连接串或格式错误时加载失败
#[test]
fn test_invalid_config() {
    let err = assert_err!(Config::from_toml_str(
        r#"
        [application]
        name = "demo"

        [registry]
        type = "zookeeper"
        connect = ""
        "#,
    ));
    assert_eq!(err.code(), ErrorCode::ConfigurationError);

    assert_err!(Config::from_toml_str("[registry]\ntype = \"etcd\"\n"));
    assert_err!(Config::load_from_file("/nonexistent/dubbo.toml"));
}

/// 测试：超时为 0 时回退到默认超时
#[test]
fn test_zero_timeout_falls_back() {
    let mut config = ZookeeperConfig::new("127.0.0.1:2181");
    config.timeout = 0;
    assert_eq!(config.connect_timeout(), Duration::from_millis(40_000));
}

/// 测试：未开启对应后端时按配置创建注册中心失败
#[cfg(not(feature = "zookeeper"))]
#[tokio::test]
async fn test_backend_feature_required() {
    let config = assert_ok!(Config::from_toml_str(
        r#"
        [application]
        name = "demo"

        [registry]
        type = "zookeeper"
        connect = "127.0.0.1:2181"
        "#,
    ));
    let err = Dubbo::from_config(&config)
        .err()
        .expect("zookeeper feature is disabled");
    assert_eq!(err.code(), ErrorCode::OperationNotSupported);
}

/// 测试：按 Nacos 配置创建注册中心
#[cfg(feature = "nacos")]
#[tokio::test]
async fn test_nacos_from_config() {
    let config = assert_ok!(Config::from_toml_str(
        r#"
        [application]
        name = "demo"

        [registry]
        type = "nacos"
        connect = "127.0.0.1:8848"
        "#,
    ));
    let dubbo = assert_ok!(Dubbo::from_config(&config));
    assert_eq!(dubbo.application().name, "demo");
    assert!(dubbo.registry().is_connected());
    dubbo.close();
    assert!(!dubbo.registry().is_connected());
}
