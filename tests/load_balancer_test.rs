//! 负载均衡测试
//!
//! 覆盖四种策略的选择行为、一致性哈希环的稳定性以及参数校验

use flare_dubbo_core::ErrorCode;
use flare_dubbo_core::registry::ServiceUrl;
use flare_dubbo_core::registry::load_balancer::{
    HashRing, LoadBalanceStrategy, LoadBalancer, SelectOptions, WeightedCandidate, calc_hash,
    least_active_select, random_select, round_robin_select, select, select_with_rng,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::HashMap;

fn provider(host: &str, weight: Option<i64>) -> ServiceUrl {
    let url = ServiceUrl::new("dubbo", host, Some(20880), "com.example.Foo");
    match weight {
        Some(w) => url.with_param("weight", w),
        None => url,
    }
}

/// 测试：字符串哈希与 31 进制多项式哈希一致，溢出时按 32 位回绕
#[test]
fn test_calc_hash_known_values() {
    assert_eq!(calc_hash(""), 0);
    assert_eq!(calc_hash("a"), 97);
    assert_eq!(calc_hash("ab"), 97 * 31 + 98);
    assert_eq!(calc_hash("hello"), 99162322);
    assert_eq!(calc_hash("polygenelubricants"), i32::MIN);
}

/// 测试：策略名不区分大小写，未知策略报 InvalidArgument
#[test]
fn test_strategy_parse() {
    assert_eq!(
        "RoundRobin".parse::<LoadBalanceStrategy>().unwrap(),
        LoadBalanceStrategy::RoundRobin
    );
    assert_eq!(
        "consistentHash".parse::<LoadBalanceStrategy>().unwrap(),
        LoadBalanceStrategy::ConsistentHash
    );
    assert_eq!(
        "LEASTACTIVE".parse::<LoadBalanceStrategy>().unwrap(),
        LoadBalanceStrategy::LeastActive
    );

    let err = "fastest".parse::<LoadBalanceStrategy>().unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
}

/// 测试：缺少输入或未知策略都报 InvalidArgument
#[test]
fn test_select_invalid_arguments() {
    let err = select::<&str>("random", SelectOptions::default()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);

    let err = select::<&str>("roundRobin", SelectOptions::default()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);

    let err = select::<&str>(
        "consistentHash",
        SelectOptions {
            hash: Some(42),
            ..Default::default()
        },
    )
    .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);

    let mut choices = vec![WeightedCandidate::new("a", 1)];
    let err = select(
        "weighted",
        SelectOptions {
            choices: Some(&mut choices),
            ..Default::default()
        },
    )
    .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);

    let mut empty: Vec<WeightedCandidate<&str>> = Vec::new();
    let mut rng = StdRng::seed_from_u64(1);
    assert!(random_select(&empty, &mut rng).is_err());
    assert!(round_robin_select(&mut empty, &mut rng).is_err());
    assert!(least_active_select(&empty, &mut rng).is_err());
}

/// 测试：加权随机的分布大致符合权重
#[test]
fn test_random_follows_weights() {
    let choices = vec![WeightedCandidate::new("a", 90), WeightedCandidate::new("b", 10)];
    let mut rng = StdRng::seed_from_u64(7);

    let mut hits = 0;
    for _ in 0..10_000 {
        if random_select(&choices, &mut rng).unwrap() == 0 {
            hits += 1;
        }
    }
    assert!((8_500..9_500).contains(&hits), "heavy choice hit {} times", hits);
}

/// 测试：非正权重按 1 处理，过大的权重截断到 32 位整数上限
#[test]
fn test_weight_clamped() {
    let candidate = WeightedCandidate::new("a", 0);
    assert_eq!(candidate.weight, 1);
    assert_eq!(WeightedCandidate::new("b", i64::MAX).weight, i32::MAX as i64);
    assert_eq!(provider("10.0.0.1", Some(i64::MAX)).weight(), i32::MAX as i64);
    assert_eq!(provider("10.0.0.1", Some(-5)).weight(), 1);
    assert_eq!(provider("10.0.0.1", None).weight(), 100);
}

/// 测试：平滑加权轮询每一轮按权重分配，且累加值保持有界
#[test]
fn test_round_robin_converges_to_weights() {
    let mut choices = vec![
        WeightedCandidate::new("a", 5),
        WeightedCandidate::new("b", 1),
        WeightedCandidate::new("c", 1),
    ];
    let mut rng = StdRng::seed_from_u64(3);

    for _ in 0..10 {
        let mut counts = [0usize; 3];
        for _ in 0..7 {
            counts[round_robin_select(&mut choices, &mut rng).unwrap()] += 1;
        }
        assert_eq!(counts, [5, 1, 1]);

        let sum: i64 = choices.iter().map(|c| c.current_weight).sum();
        assert_eq!(sum, 0);
        assert!(choices.iter().all(|c| c.current_weight.abs() <= 7));
    }
}

/// 测试：等权重时一轮内每个候选项各选中一次
#[test]
fn test_round_robin_equal_weights_no_repeats() {
    let mut choices = vec![
        WeightedCandidate::new("a", 1),
        WeightedCandidate::new("b", 1),
        WeightedCandidate::new("c", 1),
    ];
    let mut rng = StdRng::seed_from_u64(11);

    for _ in 0..20 {
        let mut seen = Vec::new();
        for _ in 0..3 {
            let idx = round_robin_select(&mut choices, &mut rng).unwrap();
            assert!(!seen.contains(&idx), "picked {} twice in one round", idx);
            seen.push(idx);
        }
    }
}

/// 测试：并列最大值时随机打破平局，不总是取第一个
#[test]
fn test_round_robin_ties_are_randomized() {
    let mut firsts = HashMap::new();
    for seed in 0..64 {
        let mut choices = vec![WeightedCandidate::new("a", 1), WeightedCandidate::new("b", 1)];
        let mut rng = StdRng::seed_from_u64(seed);
        let idx = round_robin_select(&mut choices, &mut rng).unwrap();
        *firsts.entry(idx).or_insert(0) += 1;
    }
    assert_eq!(firsts.len(), 2);
}

/// 测试：最少活跃调用优先
#[test]
fn test_least_active_prefers_idle() {
    let choices = vec![
        WeightedCandidate::new("busy", 100).with_active(3),
        WeightedCandidate::new("idle", 1).with_active(0),
        WeightedCandidate::new("warm", 100).with_active(1),
    ];
    let mut rng = StdRng::seed_from_u64(5);
    for _ in 0..100 {
        assert_eq!(least_active_select(&choices, &mut rng).unwrap(), 1);
    }
}

/// 测试：哈希环查找在末尾回绕，哈希值 0 同样有效
#[test]
fn test_hash_ring_lookup_and_wrap() {
    let ring = HashRing::build(
        ["10.0.0.1:20880", "10.0.0.2:20880", "10.0.0.3:20880"]
            .into_iter()
            .map(|addr| (addr, addr.to_string())),
        5,
    );
    assert_eq!(ring.len(), 15);
    assert_eq!(ring.lookup(i32::MAX), ring.lookup(i32::MIN));

    let picked = select(
        "consistentHash",
        SelectOptions {
            hash: Some(0),
            hash_ring: Some(&ring),
            ..Default::default()
        },
    )
    .unwrap();
    assert!(picked.starts_with("10.0.0."));

    let empty: HashRing<String> = HashRing::new();
    let mut rng = StdRng::seed_from_u64(0);
    let err = select_with_rng(
        "consistentHash",
        SelectOptions {
            hash: Some(1),
            hash_ring: Some(&empty),
            ..Default::default()
        },
        &mut rng,
    )
    .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
}

/// 测试：一致性哈希对同一个键稳定，移除节点只影响落在该节点上的键
#[test]
fn test_consistent_hash_stability_and_bounded_remap() {
    let urls = vec![
        provider("10.0.0.1", None),
        provider("10.0.0.2", None),
        provider("10.0.0.3", None),
    ];
    let balancer = LoadBalancer::new(LoadBalanceStrategy::ConsistentHash).with_virtual_nodes(5);

    let keys: Vec<String> = (0..200).map(|i| format!("user-{}", i)).collect();
    let before: Vec<ServiceUrl> = keys
        .iter()
        .map(|k| balancer.select(&urls, Some(k)).unwrap())
        .collect();
    for (key, url) in keys.iter().zip(&before) {
        assert_eq!(&balancer.select(&urls, Some(key)).unwrap(), url);
    }

    let remaining = &urls[..2];
    for (key, old) in keys.iter().zip(&before) {
        let new = balancer.select(remaining, Some(key)).unwrap();
        if old.host() != "10.0.0.3" {
            assert_eq!(&new, old, "key {} moved although its node stayed", key);
        }
    }

    let err = balancer.select(&urls, None).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
}

/// 测试：有状态负载均衡器按 URL 权重轮询
#[test]
fn test_balancer_round_robin_uses_url_weight() {
    let urls = vec![provider("10.0.0.1", Some(200)), provider("10.0.0.2", Some(100))];
    let balancer = LoadBalancer::new(LoadBalanceStrategy::RoundRobin);

    let mut counts: HashMap<String, usize> = HashMap::new();
    for _ in 0..30 {
        let url = balancer.select(&urls, None).unwrap();
        *counts.entry(url.host().to_string()).or_insert(0) += 1;
    }
    assert_eq!(counts["10.0.0.1"], 20);
    assert_eq!(counts["10.0.0.2"], 10);
}

/// 测试：进行中的调用计入活跃数，守卫释放后归零
#[test]
fn test_balancer_least_active_tracks_calls() {
    let urls = vec![provider("10.0.0.1", None), provider("10.0.0.2", None)];
    let balancer = LoadBalancer::new(LoadBalanceStrategy::LeastActive);

    let guard = balancer.begin_call(&urls[0]);
    assert_eq!(balancer.active_count(&urls[0]), 1);
    for _ in 0..50 {
        assert_eq!(balancer.select(&urls, None).unwrap(), urls[1]);
    }

    drop(guard);
    assert_eq!(balancer.active_count(&urls[0]), 0);

    let err = balancer.select(&[], None).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
}

/// 测试：提供者声明极大权重时各策略仍能正常选择
#[test]
fn test_oversized_weights_select() {
    let urls = vec![provider("10.0.0.1", Some(i64::MAX)), provider("10.0.0.2", Some(i64::MAX))];

    let random = LoadBalancer::new(LoadBalanceStrategy::Random);
    let mut rng = StdRng::seed_from_u64(11);
    let mut hits: HashMap<String, usize> = HashMap::new();
    for _ in 0..1_000 {
        let url = random.select_with_rng(&urls, None, &mut rng).unwrap();
        *hits.entry(url.host().to_string()).or_insert(0) += 1;
    }
    assert_eq!(hits.len(), 2);

    let round_robin = LoadBalancer::new(LoadBalanceStrategy::RoundRobin);
    let mut counts: HashMap<String, usize> = HashMap::new();
    for _ in 0..100 {
        let url = round_robin.select(&urls, None).unwrap();
        *counts.entry(url.host().to_string()).or_insert(0) += 1;
    }
    assert_eq!(counts["10.0.0.1"], 50);
    assert_eq!(counts["10.0.0.2"], 50);

    let mut choices = vec![
        WeightedCandidate::new("a", i64::MAX),
        WeightedCandidate::new("b", i64::MAX),
        WeightedCandidate::new("c", 1),
    ];
    for _ in 0..10 {
        round_robin_select(&mut choices, &mut rng).unwrap();
    }
    assert!(choices.iter().all(|c| c.current_weight.abs() <= 3 * i32::MAX as i64));
}

/// 测试：同一地址重新注册后一致性哈希返回新的 URL
#[test]
fn test_consistent_hash_follows_reregistration() {
    let balancer = LoadBalancer::new(LoadBalanceStrategy::ConsistentHash);
    let old = vec![
        provider("10.0.0.1", None).with_param("timestamp", 1),
        provider("10.0.0.2", None).with_param("timestamp", 1),
    ];
    let picked = balancer.select(&old, Some("user-7")).unwrap();
    assert_eq!(picked.param("timestamp"), Some("1"));

    let renewed: Vec<ServiceUrl> = old
        .iter()
        .map(|url| url.clone().with_param("timestamp", 2))
        .collect();
    let repicked = balancer.select(&renewed, Some("user-7")).unwrap();
    assert_eq!(repicked.address(), picked.address());
    assert_eq!(repicked.param("timestamp"), Some("2"));
}
