//! 注册中心公共状态测试

use flare_dubbo_core::registry::{ReadySignal, ReadyState, RegistryBase, RegistryEvent, ServiceUrl};
use flare_dubbo_core::{DubboError, ErrorCode};

fn provider(host: &str) -> ServiceUrl {
    ServiceUrl::new("dubbo", host, Some(20880), "com.example.Foo")
}

/// 测试：空结果不覆盖已知列表，但可以写入新接口
#[test]
fn test_empty_result_keeps_last_known() {
    let base = RegistryBase::new();

    let generation = base.begin_refresh("com.example.Foo");
    assert!(base.apply_refresh("com.example.Foo", generation, vec![provider("10.0.0.5")]));

    let generation = base.begin_refresh("com.example.Foo");
    assert!(!base.apply_refresh("com.example.Foo", generation, Vec::new()));
    assert_eq!(base.urls("com.example.Foo"), vec![provider("10.0.0.5")]);

    assert!(base.replace("com.example.Bar", Vec::new()));
    let snapshot = base.snapshot();
    assert_eq!(snapshot.len(), 2);
    assert!(snapshot["com.example.Bar"].is_empty());
}

/// 测试：较晚发起的刷新先完成时，较早的结果被丢弃
#[test]
fn test_superseded_refresh_discarded() {
    let base = RegistryBase::new();

    let first = base.begin_refresh("com.example.Foo");
    let second = base.begin_refresh("com.example.Foo");
    assert!(base.apply_refresh("com.example.Foo", second, vec![provider("10.0.0.6")]));
    assert!(!base.apply_refresh("com.example.Foo", first, vec![provider("10.0.0.5")]));

    assert_eq!(base.urls("com.example.Foo"), vec![provider("10.0.0.6")]);
}

/// 测试：订阅者收到完整快照和错误，取消订阅幂等
#[tokio::test]
async fn test_subscribe_and_emit() {
    let base = RegistryBase::new();
    let mut first = base.subscribe();
    let mut second = base.subscribe();
    assert_ne!(first.id(), second.id());
    assert_eq!(base.subscriber_count(), 2);

    base.replace("com.example.Foo", vec![provider("10.0.0.5")]);
    base.emit_data();

    match first.recv().await {
        Some(RegistryEvent::Changed(state)) => {
            assert_eq!(state["com.example.Foo"], vec![provider("10.0.0.5")]);
        }
        other => panic!("unexpected event: {:?}", other),
    }

    base.unsubscribe(first.id());
    base.unsubscribe(first.id());
    assert_eq!(base.subscriber_count(), 1);

    base.emit_error(DubboError::session_lost("Zookeeper was closed"));
    assert!(matches!(second.try_recv(), Some(RegistryEvent::Changed(_))));
    match second.try_recv() {
        Some(RegistryEvent::Error(err)) => assert_eq!(err.code(), ErrorCode::SessionLost),
        other => panic!("unexpected event: {:?}", other),
    }
    assert!(first.try_recv().is_none());
}

/// 测试：丢弃的订阅句柄在下一次广播时被清理
#[test]
fn test_dropped_subscriber_pruned() {
    let base = RegistryBase::new();
    let subscription = base.subscribe();
    drop(subscription);

    base.emit_data();
    assert_eq!(base.subscriber_count(), 0);
}

/// 测试：就绪信号只确定一次，会话重建可回到等待状态
#[tokio::test]
async fn test_ready_signal_transitions() {
    let signal = ReadySignal::new();
    assert!(matches!(signal.state(), ReadyState::Pending));

    assert!(signal.resolve());
    assert!(!signal.reject(DubboError::connect_timeout("late")));
    assert!(signal.wait().await.is_ok());

    assert!(signal.reset());
    assert!(matches!(signal.state(), ReadyState::Pending));

    assert!(signal.reject(DubboError::not_connected("closed")));
    assert!(!signal.resolve());
    assert!(!signal.reset());
    let err = signal.wait().await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotConnected);
}
