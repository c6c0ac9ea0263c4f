//! ZooKeeper 注册中心测试
//!
//! 使用内存协调存储模拟 ZooKeeper 的节点、会话和一次性 watch 语义。
//! 真实 ZooKeeper 的测试默认忽略，需要使用
//! `cargo test --features zookeeper --test zookeeper_registry_test -- --ignored` 运行。

use flare_dubbo_core::config::{ApplicationConfig, ZookeeperConfig};
use flare_dubbo_core::registry::url::encode_node_name;
use flare_dubbo_core::registry::{
    MemoryStore, Registry, RegistryEvent, RegistryState, Subscription, WatchState, ZkStatus,
    ZookeeperRegistry,
};
use flare_dubbo_core::types::{
    ConsumerServiceMeta, ProviderService, RegisterConsumerService, RegisterServicesMeta,
};
use flare_dubbo_core::{DubboError, ErrorCode};
use std::sync::Arc;
use std::time::Duration;

const FOO: &str = "com.example.Foo";
const FOO_PROVIDERS: &str = "/dubbo/com.example.Foo/providers";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("flare_dubbo_core=debug")
        .with_test_writer()
        .try_init();
}

fn zk_config() -> ZookeeperConfig {
    ZookeeperConfig::new("127.0.0.1:2181").with_timeout(Duration::from_secs(5))
}

fn new_registry(store: &MemoryStore) -> ZookeeperRegistry {
    ZookeeperRegistry::new(zk_config(), Arc::new(store.clone())).unwrap()
}

/// 以提供者身份在存储中写入一个节点
fn add_provider(store: &MemoryStore, url: &str) -> String {
    let path = format!("{}/{}", FOO_PROVIDERS, encode_node_name(url));
    store.add_node(&path);
    path
}

async fn next_event(subscription: &mut Subscription) -> RegistryEvent {
    tokio::time::timeout(Duration::from_secs(3), subscription.recv())
        .await
        .expect("registry event timeout")
        .expect("subscription closed")
}

async fn next_change(subscription: &mut Subscription) -> Arc<RegistryState> {
    loop {
        if let RegistryEvent::Changed(state) = next_event(subscription).await {
            return state;
        }
    }
}

async fn next_error(subscription: &mut Subscription) -> DubboError {
    loop {
        if let RegistryEvent::Error(err) = next_event(subscription).await {
            return err;
        }
    }
}

fn app() -> ApplicationConfig {
    ApplicationConfig::new("demo").with_host("10.0.0.9")
}

/// 测试：发现已存在的提供者并广播快照
#[tokio::test]
async fn test_discover_existing_provider() {
    init_tracing();
    let store = MemoryStore::new();
    add_provider(&store, "dubbo://10.0.0.5:20880/com.example.Foo?version=1.0.0");

    let registry = new_registry(&store);
    registry.ready().await.unwrap();
    assert_eq!(registry.status(), ZkStatus::Ready);
    assert!(registry.is_connected());
    assert!(store.exists("/dubbo"));

    let mut subscription = registry.subscribe();
    registry
        .find_dubbo_service_urls(&[FOO.to_string()])
        .await
        .unwrap();

    let state = next_change(&mut subscription).await;
    let urls = &state[FOO];
    assert_eq!(urls.len(), 1);
    assert_eq!(urls[0].host(), "10.0.0.5");
    assert_eq!(urls[0].port(), Some(20880));
    assert_eq!(urls[0].version(), "1.0.0");
    assert_eq!(registry.watch_state(FOO), WatchState::Watching);
}

/// 测试：非 dubbo 协议节点被过滤，不存在的接口路径会被创建
#[tokio::test]
async fn test_filters_non_dubbo_nodes() {
    let store = MemoryStore::new();
    add_provider(&store, "dubbo://10.0.0.5:20880/com.example.Foo");
    add_provider(&store, "rest://10.0.0.6:8080/com.example.Foo");

    let registry = new_registry(&store);
    registry.ready().await.unwrap();
    registry
        .find_dubbo_service_urls(&[FOO.to_string(), "com.example.Missing".to_string()])
        .await
        .unwrap();

    let snapshot = registry.snapshot();
    assert_eq!(snapshot[FOO].len(), 1);
    assert_eq!(snapshot[FOO][0].host(), "10.0.0.5");
    assert!(snapshot["com.example.Missing"].is_empty());
    assert!(store.exists("/dubbo/com.example.Missing/providers"));
}

/// 测试：watch 触发后重新列出并重新挂上，每个接口始终只有一个 watch
#[tokio::test]
async fn test_watch_rearmed_after_each_change() {
    init_tracing();
    let store = MemoryStore::new();
    add_provider(&store, "dubbo://10.0.0.5:20880/com.example.Foo");

    let registry = new_registry(&store);
    registry.ready().await.unwrap();
    let mut subscription = registry.subscribe();
    registry
        .find_dubbo_service_urls(&[FOO.to_string()])
        .await
        .unwrap();
    next_change(&mut subscription).await;
    assert_eq!(store.watch_count(FOO_PROVIDERS), 1);

    let second = add_provider(&store, "dubbo://10.0.0.6:20880/com.example.Foo");
    let state = next_change(&mut subscription).await;
    assert_eq!(state[FOO].len(), 2);
    assert_eq!(store.watch_count(FOO_PROVIDERS), 1);

    store.remove_node(&second);
    let state = next_change(&mut subscription).await;
    assert_eq!(state[FOO].len(), 1);
    assert_eq!(state[FOO][0].host(), "10.0.0.5");
    assert_eq!(store.watch_count(FOO_PROVIDERS), 1);

    // 重复发现不会叠加 watch 任务
    registry
        .find_dubbo_service_urls(&[FOO.to_string()])
        .await
        .unwrap();
    next_change(&mut subscription).await;
    assert_eq!(registry.watch_state(FOO), WatchState::Watching);
}

/// 测试：最后一个提供者下线时保留上一次的列表
#[tokio::test]
async fn test_empty_listing_keeps_stale_providers() {
    let store = MemoryStore::new();
    let only = add_provider(&store, "dubbo://10.0.0.5:20880/com.example.Foo");

    let registry = new_registry(&store);
    registry.ready().await.unwrap();
    let mut subscription = registry.subscribe();
    registry
        .find_dubbo_service_urls(&[FOO.to_string()])
        .await
        .unwrap();
    next_change(&mut subscription).await;

    store.remove_node(&only);
    let state = next_change(&mut subscription).await;
    assert_eq!(state[FOO].len(), 1);
    assert_eq!(state[FOO][0].host(), "10.0.0.5");
}

/// 等待接口的提供者数量达到预期
async fn wait_for_providers(subscription: &mut Subscription, expected: usize) -> Arc<RegistryState> {
    loop {
        let state = next_change(subscription).await;
        if state.get(FOO).is_some_and(|urls| urls.len() == expected) {
            return state;
        }
    }
}

/// 测试：列表失败时保留旧数据，恢复后重新挂 watch 并继续跟踪变化
#[tokio::test]
async fn test_listing_failure_recovers_watch() {
    init_tracing();
    let store = MemoryStore::new();
    add_provider(&store, "dubbo://10.0.0.5:20880/com.example.Foo");

    let registry = new_registry(&store);
    registry.ready().await.unwrap();
    let mut subscription = registry.subscribe();
    registry
        .find_dubbo_service_urls(&[FOO.to_string()])
        .await
        .unwrap();
    next_change(&mut subscription).await;

    store.fail_listing(FOO_PROVIDERS, true);
    add_provider(&store, "dubbo://10.0.0.6:20880/com.example.Foo");

    let state = next_change(&mut subscription).await;
    assert_eq!(state[FOO].len(), 1);
    assert_eq!(registry.watch_state(FOO), WatchState::Idle);
    assert_eq!(store.watch_count(FOO_PROVIDERS), 0);

    store.fail_listing(FOO_PROVIDERS, false);
    wait_for_providers(&mut subscription, 2).await;
    assert_eq!(registry.watch_state(FOO), WatchState::Watching);
    assert_eq!(store.watch_count(FOO_PROVIDERS), 1);

    add_provider(&store, "dubbo://10.0.0.7:20880/com.example.Foo");
    let state = wait_for_providers(&mut subscription, 3).await;
    assert!(state[FOO].iter().any(|url| url.host() == "10.0.0.7"));
    assert_eq!(store.watch_count(FOO_PROVIDERS), 1);
}

/// 测试：连接建立前发起的发现在连接成功后补上
#[tokio::test]
async fn test_discovery_before_connected() {
    init_tracing();
    let store = MemoryStore::unresponsive();
    add_provider(&store, "dubbo://10.0.0.5:20880/com.example.Foo");

    let registry = new_registry(&store);
    let mut subscription = registry.subscribe();
    registry
        .find_dubbo_service_urls(&[FOO.to_string()])
        .await
        .unwrap();
    assert!(registry.snapshot()[FOO].is_empty());
    assert_eq!(registry.watch_state(FOO), WatchState::Idle);

    store.accept_pending();
    registry.ready().await.unwrap();
    let state = wait_for_providers(&mut subscription, 1).await;
    assert_eq!(state[FOO][0].host(), "10.0.0.5");
    assert_eq!(registry.watch_state(FOO), WatchState::Watching);
    assert_eq!(store.watch_count(FOO_PROVIDERS), 1);
}

/// 测试：连接超时后报 ConnectTimeout 并关闭客户端
#[tokio::test]
async fn test_connect_timeout() {
    init_tracing();
    let store = MemoryStore::unresponsive();
    let config = zk_config().with_timeout(Duration::from_millis(100));
    let registry = ZookeeperRegistry::new(config, Arc::new(store.clone())).unwrap();
    let mut subscription = registry.subscribe();

    let err = registry.ready().await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ConnectTimeout);
    assert!(err.reason().contains("127.0.0.1:2181"));

    let event = next_error(&mut subscription).await;
    assert_eq!(event.code(), ErrorCode::ConnectTimeout);

    assert!(store.close_count() >= 1);
    assert!(!registry.is_connected());
    assert_eq!(registry.status(), ZkStatus::Closed);
}

/// 测试：连接串为空时构造失败
#[tokio::test]
async fn test_empty_connect_rejected() {
    let store = MemoryStore::new();
    let err = ZookeeperRegistry::new(ZookeeperConfig::new(""), Arc::new(store.clone()))
        .err()
        .expect("empty connect should be rejected");
    assert_eq!(err.code(), ErrorCode::ConfigurationError);
    assert_eq!(store.connect_count(), 0);
}

/// 测试：根路径自动补全前导斜杠
#[tokio::test]
async fn test_custom_root_path() {
    let store = MemoryStore::new();
    let config = zk_config().with_root_path("services/");
    let registry = ZookeeperRegistry::new(config, Arc::new(store.clone())).unwrap();
    registry.ready().await.unwrap();

    assert_eq!(registry.root_path(), "/services");
    assert!(store.exists("/services"));
    assert_eq!(registry.providers_path(FOO), "/services/com.example.Foo/providers");
}

/// 测试：提供者注册为临时节点，持久化服务写入持久节点
#[tokio::test]
async fn test_register_services() {
    let store = MemoryStore::new();
    let registry = new_registry(&store);

    let meta = RegisterServicesMeta {
        application: app(),
        port: 20880,
        dubbo: Some("2.0.2".to_string()),
        services: vec![
            ProviderService::new(FOO).with_version("1.0.0").with_methods(["sayHello"]),
            ProviderService {
                persistent: true,
                ..ProviderService::new("com.example.Bar")
            },
        ],
    };
    registry.register_services(&meta).await.unwrap();

    let children = store.children(FOO_PROVIDERS);
    assert_eq!(children.len(), 1);
    let node = format!("{}/{}", FOO_PROVIDERS, children[0]);
    assert!(store.is_ephemeral(&node));

    let url = flare_dubbo_core::registry::ServiceUrl::from_node_name(&children[0]).unwrap();
    assert_eq!(url.address(), "10.0.0.9:20880");
    assert_eq!(url.version(), "1.0.0");
    assert_eq!(url.param("methods"), Some("sayHello"));

    let bar = store.children("/dubbo/com.example.Bar/providers");
    assert_eq!(bar.len(), 1);
    assert!(!store.is_ephemeral(&format!("/dubbo/com.example.Bar/providers/{}", bar[0])));

    // 重复注册不报错
    registry.register_services(&meta).await.unwrap();
}

/// 测试：注册消费者写入消费者节点并发现提供者
#[tokio::test]
async fn test_register_consumers() {
    let store = MemoryStore::new();
    add_provider(&store, "dubbo://10.0.0.5:20880/com.example.Foo");
    let registry = new_registry(&store);
    let mut subscription = registry.subscribe();

    let meta = RegisterConsumerService {
        application: app(),
        services: vec![ConsumerServiceMeta::new(FOO), ConsumerServiceMeta::new(FOO)],
    };
    registry.register_consumers(&meta).await.unwrap();

    let consumers = store.children("/dubbo/com.example.Foo/consumers");
    assert_eq!(consumers.len(), 1);
    assert!(consumers[0].starts_with("consumer%3A%2F%2F10.0.0.9"));

    let state = next_change(&mut subscription).await;
    assert_eq!(state[FOO].len(), 1);
}

/// 测试：会话丢失后自动重连，恢复注册节点并重新发现
#[tokio::test]
async fn test_session_lost_reconnects_and_restores() {
    init_tracing();
    let store = MemoryStore::new();
    let registry = new_registry(&store);

    let meta = RegisterServicesMeta {
        application: app(),
        port: 20880,
        dubbo: None,
        services: vec![ProviderService::new(FOO)],
    };
    registry.register_services(&meta).await.unwrap();
    let node = format!("{}/{}", FOO_PROVIDERS, store.children(FOO_PROVIDERS)[0]);

    let mut subscription = registry.subscribe();
    registry
        .find_dubbo_service_urls(&[FOO.to_string()])
        .await
        .unwrap();
    assert_eq!(next_change(&mut subscription).await[FOO].len(), 1);

    store.expire_sessions();
    let err = next_error(&mut subscription).await;
    assert_eq!(err.code(), ErrorCode::SessionLost);

    let state = next_change(&mut subscription).await;
    assert_eq!(state[FOO].len(), 1);
    assert!(store.exists(&node));
    assert!(store.is_ephemeral(&node));
    assert_eq!(store.connect_count(), 2);
    assert_eq!(store.watch_count(FOO_PROVIDERS), 1);

    registry.ready().await.unwrap();
    assert_eq!(registry.status(), ZkStatus::Ready);
}

/// 测试：存储报错时转发给订阅者
#[tokio::test]
async fn test_store_error_forwarded() {
    let store = MemoryStore::new();
    let registry = new_registry(&store);
    registry.ready().await.unwrap();
    let mut subscription = registry.subscribe();

    store.inject_error(DubboError::store("disk full"));
    let err = next_error(&mut subscription).await;
    assert_eq!(err.code(), ErrorCode::StoreOperationFailed);

    // 已就绪时错误不会改变就绪状态
    registry.ready().await.unwrap();
}

/// 测试：关闭后发现直接返回，重复关闭无副作用
#[tokio::test]
async fn test_close_short_circuits() {
    let store = MemoryStore::new();
    add_provider(&store, "dubbo://10.0.0.5:20880/com.example.Foo");
    let registry = new_registry(&store);
    registry.ready().await.unwrap();

    registry.close();
    registry.close();
    assert!(!registry.is_connected());
    assert!(registry.client().is_none());
    assert_eq!(store.close_count(), 1);

    registry
        .find_dubbo_service_urls(&[FOO.to_string()])
        .await
        .unwrap();
    assert!(registry.snapshot().get(FOO).is_none_or(|urls| urls.is_empty()));
    assert_eq!(store.watch_count(FOO_PROVIDERS), 0);

    let err = registry
        .register_services(&RegisterServicesMeta {
            application: app(),
            port: 20880,
            dubbo: None,
            services: vec![ProviderService::new(FOO)],
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotConnected);
}

/// 测试：连接真实 ZooKeeper
#[cfg(feature = "zookeeper")]
#[tokio::test]
#[ignore]
async fn test_live_zookeeper() {
    use flare_dubbo_core::registry::ZkConnector;

    init_tracing();
    let connect = std::env::var("ZK_CONNECT").unwrap_or_else(|_| "127.0.0.1:2181".to_string());
    let config = ZookeeperConfig::new(connect).with_root_path("/dubbo-test");
    let connector = Arc::new(ZkConnector::new(&config));
    let registry = ZookeeperRegistry::new(config, connector).unwrap();
    registry.ready().await.unwrap();

    let meta = RegisterServicesMeta {
        application: app(),
        port: 20880,
        dubbo: None,
        services: vec![ProviderService::new(FOO)],
    };
    registry.register_services(&meta).await.unwrap();

    let mut subscription = registry.subscribe();
    registry
        .find_dubbo_service_urls(&[FOO.to_string()])
        .await
        .unwrap();
    let state = next_change(&mut subscription).await;
    assert!(state[FOO].iter().any(|url| url.address() == "10.0.0.9:20880"));

    registry.close();
}
