//! 负载均衡模块
//!
//! 提供多种负载均衡策略，用于从多个服务 URL 中选择一个：
//! - 加权随机（Random）
//! - 平滑加权轮询（RoundRobin），最大值并列时按权重随机
//! - 最少活跃调用（LeastActive），并列时按权重随机
//! - 一致性哈希（ConsistentHash），虚拟节点 + 有序哈希环

use crate::error::{DubboError, Result};
use crate::registry::url::{MAX_WEIGHT, ServiceUrl};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// 默认虚拟节点数
pub const DEFAULT_VIRTUAL_NODES: usize = 1;

/// 负载均衡策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadBalanceStrategy {
    /// 加权随机
    #[default]
    Random,
    /// 平滑加权轮询
    RoundRobin,
    /// 最少活跃调用
    LeastActive,
    /// 一致性哈希
    ConsistentHash,
}

impl LoadBalanceStrategy {
    /// 策略的规范名称
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadBalanceStrategy::Random => "random",
            LoadBalanceStrategy::RoundRobin => "roundrobin",
            LoadBalanceStrategy::LeastActive => "leastactive",
            LoadBalanceStrategy::ConsistentHash => "consistenthash",
        }
    }
}

impl fmt::Display for LoadBalanceStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoadBalanceStrategy {
    type Err = DubboError;

    /// 名称不区分大小写
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "random" => Ok(LoadBalanceStrategy::Random),
            "roundrobin" => Ok(LoadBalanceStrategy::RoundRobin),
            "leastactive" => Ok(LoadBalanceStrategy::LeastActive),
            "consistenthash" => Ok(LoadBalanceStrategy::ConsistentHash),
            _ => Err(DubboError::invalid_argument(format!(
                "unknown load balance type: {}",
                s
            ))),
        }
    }
}

/// 带权重的候选项
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedCandidate<T> {
    pub item: T,
    pub weight: i64,
    /// 平滑轮询的累加值
    pub current_weight: i64,
    /// 进行中的调用数
    pub active: u64,
}

impl<T> WeightedCandidate<T> {
    /// 权重限制在 `1..=i32::MAX`
    pub fn new(item: T, weight: i64) -> Self {
        Self {
            item,
            weight: weight.clamp(1, MAX_WEIGHT),
            current_weight: 0,
            active: 0,
        }
    }

    /// 设置进行中的调用数
    pub fn with_active(mut self, active: u64) -> Self {
        self.active = active;
        self
    }
}

fn missing_choices() -> DubboError {
    DubboError::invalid_argument("please give choices")
}

/// 按权重随机取下标，权重全为 0 时均匀随机
fn weighted_pick<R: Rng + ?Sized>(weights: &[i64], rng: &mut R) -> usize {
    let total = weights
        .iter()
        .fold(0i64, |acc, w| acc.saturating_add((*w).max(0)));
    if total > 0 {
        let mut remaining = rng.gen_range(0..total);
        for (idx, weight) in weights.iter().enumerate() {
            remaining -= (*weight).max(0);
            if remaining < 0 {
                return idx;
            }
        }
    }
    rng.gen_range(0..weights.len())
}

/// 加权随机，返回选中项的下标
pub fn random_select<T, R: Rng + ?Sized>(
    choices: &[WeightedCandidate<T>],
    rng: &mut R,
) -> Result<usize> {
    if choices.is_empty() {
        return Err(missing_choices());
    }
    let weights: Vec<i64> = choices.iter().map(|c| c.weight).collect();
    Ok(weighted_pick(&weights, rng))
}

/// 平滑加权轮询
///
/// 每次调用所有候选项累加自身权重，取累加值最大者（并列时按权重随机），
/// 被选中者减去总权重。每轮结束后累加值之和回到调用前的值，因此不会无限增长
pub fn round_robin_select<T, R: Rng + ?Sized>(
    choices: &mut [WeightedCandidate<T>],
    rng: &mut R,
) -> Result<usize> {
    if choices.is_empty() {
        return Err(missing_choices());
    }

    let total = choices
        .iter()
        .fold(0i64, |acc, c| acc.saturating_add(c.weight));
    let mut max = i64::MIN;
    for choice in choices.iter_mut() {
        choice.current_weight = choice.current_weight.saturating_add(choice.weight);
        max = max.max(choice.current_weight);
    }

    let tied: Vec<usize> = choices
        .iter()
        .enumerate()
        .filter(|(_, c)| c.current_weight == max)
        .map(|(idx, _)| idx)
        .collect();
    let weights: Vec<i64> = tied.iter().map(|idx| choices[*idx].weight).collect();
    let chosen = tied[weighted_pick(&weights, rng)];

    choices[chosen].current_weight = choices[chosen].current_weight.saturating_sub(total);
    Ok(chosen)
}

/// 最少活跃调用，并列时按权重随机
pub fn least_active_select<T, R: Rng + ?Sized>(
    choices: &[WeightedCandidate<T>],
    rng: &mut R,
) -> Result<usize> {
    let min = choices
        .iter()
        .map(|c| c.active)
        .min()
        .ok_or_else(missing_choices)?;

    let tied: Vec<usize> = choices
        .iter()
        .enumerate()
        .filter(|(_, c)| c.active == min)
        .map(|(idx, _)| idx)
        .collect();
    let weights: Vec<i64> = tied.iter().map(|idx| choices[*idx].weight).collect();
    Ok(tied[weighted_pick(&weights, rng)])
}

/// 31 进制多项式字符串哈希（按 UTF-16 码元计算，截断为 32 位有符号整数）
pub fn calc_hash(key: &str) -> i32 {
    key.encode_utf16()
        .fold(0i32, |hash, unit| hash.wrapping_mul(31).wrapping_add(unit as i32))
}

/// 一致性哈希环
#[derive(Debug, Clone)]
pub struct HashRing<T> {
    ring: BTreeMap<i32, T>,
}

impl<T: Clone> HashRing<T> {
    /// 空哈希环
    pub fn new() -> Self {
        Self {
            ring: BTreeMap::new(),
        }
    }

    /// 为每个候选项按身份串生成 `virtual_nodes` 个虚拟节点
    pub fn build<I, S>(members: I, virtual_nodes: usize) -> Self
    where
        I: IntoIterator<Item = (S, T)>,
        S: AsRef<str>,
    {
        let mut ring = Self::new();
        for (identity, item) in members {
            ring.insert(identity.as_ref(), item, virtual_nodes);
        }
        ring
    }

    /// 加入一个成员，虚拟节点键为 `{identity}#{idx}`
    pub fn insert(&mut self, identity: &str, item: T, virtual_nodes: usize) {
        for idx in 0..virtual_nodes.max(1) {
            let key = calc_hash(&format!("{}#{}", identity, idx));
            self.ring.insert(key, item.clone());
        }
    }

    /// 第一个不小于 `hash` 的节点，没有则回绕到最小节点
    pub fn lookup(&self, hash: i32) -> Option<&T> {
        self.ring
            .range(hash..)
            .next()
            .or_else(|| self.ring.iter().next())
            .map(|(_, item)| item)
    }

    /// 虚拟节点数
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

impl<T: Clone> Default for HashRing<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// 一致性哈希选择
pub fn consistent_hash_select<T: Clone>(hash: i32, ring: &HashRing<T>) -> Result<&T> {
    ring.lookup(hash)
        .ok_or_else(|| DubboError::invalid_argument("hash ring is empty"))
}

/// 按名称选择时的输入
pub struct SelectOptions<'a, T> {
    pub choices: Option<&'a mut [WeightedCandidate<T>]>,
    pub hash: Option<i32>,
    pub hash_ring: Option<&'a HashRing<T>>,
}

impl<T> Default for SelectOptions<'_, T> {
    fn default() -> Self {
        Self {
            choices: None,
            hash: None,
            hash_ring: None,
        }
    }
}

/// 按策略名选择（名称不区分大小写）
pub fn select<T: Clone>(policy: &str, options: SelectOptions<'_, T>) -> Result<T> {
    select_with_rng(policy, options, &mut rand::thread_rng())
}

/// 同 [`select`]，使用指定的随机数发生器
pub fn select_with_rng<T: Clone, R: Rng + ?Sized>(
    policy: &str,
    options: SelectOptions<'_, T>,
    rng: &mut R,
) -> Result<T> {
    let strategy: LoadBalanceStrategy = policy.parse()?;
    match strategy {
        LoadBalanceStrategy::Random => {
            let choices = options.choices.ok_or_else(missing_choices)?;
            let idx = random_select(choices, rng)?;
            Ok(choices[idx].item.clone())
        }
        LoadBalanceStrategy::RoundRobin => {
            let choices = options.choices.ok_or_else(missing_choices)?;
            let idx = round_robin_select(choices, rng)?;
            Ok(choices[idx].item.clone())
        }
        LoadBalanceStrategy::LeastActive => {
            let choices = options.choices.ok_or_else(missing_choices)?;
            let idx = least_active_select(choices, rng)?;
            Ok(choices[idx].item.clone())
        }
        LoadBalanceStrategy::ConsistentHash => match (options.hash, options.hash_ring) {
            (Some(hash), Some(ring)) => consistent_hash_select(hash, ring).cloned(),
            _ => Err(DubboError::invalid_argument("need hash and hashRing")),
        },
    }
}

#[derive(Default)]
struct BalancerState {
    /// URL → 平滑轮询累加值
    current_weights: HashMap<String, i64>,
    ring: HashRing<ServiceUrl>,
    ring_members: Vec<String>,
}

/// 有状态的负载均衡器
///
/// 持有轮询累加值、活跃调用计数和哈希环，按 URL 身份跟踪候选集变化
pub struct LoadBalancer {
    strategy: LoadBalanceStrategy,
    virtual_nodes: usize,
    state: Mutex<BalancerState>,
    active: Arc<Mutex<HashMap<String, u64>>>,
}

impl LoadBalancer {
    /// 创建指定策略的负载均衡器
    pub fn new(strategy: LoadBalanceStrategy) -> Self {
        Self {
            strategy,
            virtual_nodes: DEFAULT_VIRTUAL_NODES,
            state: Mutex::new(BalancerState::default()),
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// 设置一致性哈希的虚拟节点数（最少 1 个）
    pub fn with_virtual_nodes(mut self, virtual_nodes: usize) -> Self {
        self.virtual_nodes = virtual_nodes.max(1);
        self
    }

    /// 当前策略
    pub fn strategy(&self) -> LoadBalanceStrategy {
        self.strategy
    }

    /// 从 URL 列表中选择一个
    ///
    /// 一致性哈希需要 `hash_key`，对应的哈希环在候选 URL 变化时重建
    pub fn select(&self, urls: &[ServiceUrl], hash_key: Option<&str>) -> Result<ServiceUrl> {
        self.select_with_rng(urls, hash_key, &mut rand::thread_rng())
    }

    /// 同 [`LoadBalancer::select`]，使用指定的随机数发生器
    pub fn select_with_rng<R: Rng + ?Sized>(
        &self,
        urls: &[ServiceUrl],
        hash_key: Option<&str>,
        rng: &mut R,
    ) -> Result<ServiceUrl> {
        if urls.is_empty() {
            return Err(missing_choices());
        }

        let keys: Vec<String> = urls.iter().map(|u| u.to_string()).collect();
        match self.strategy {
            LoadBalanceStrategy::Random => {
                let choices = self.candidates(urls, &keys, None);
                let idx = random_select(&choices, rng)?;
                Ok(urls[idx].clone())
            }
            LoadBalanceStrategy::LeastActive => {
                let choices = self.candidates(urls, &keys, None);
                let idx = least_active_select(&choices, rng)?;
                Ok(urls[idx].clone())
            }
            LoadBalanceStrategy::RoundRobin => {
                let mut state = self.state.lock();
                let mut choices = self.candidates(urls, &keys, Some(&state.current_weights));
                let idx = round_robin_select(&mut choices, rng)?;

                state.current_weights = keys
                    .iter()
                    .zip(choices.iter())
                    .map(|(key, c)| (key.clone(), c.current_weight))
                    .collect();
                Ok(urls[idx].clone())
            }
            LoadBalanceStrategy::ConsistentHash => {
                let hash_key =
                    hash_key.ok_or_else(|| DubboError::invalid_argument("need hash and hashRing"))?;
                let mut state = self.state.lock();

                // 同一地址重新注册（参数或时间戳变化）也要重建
                let mut members = keys;
                members.sort();
                members.dedup();
                if members != state.ring_members {
                    debug!(members = members.len(), virtual_nodes = self.virtual_nodes, "Rebuild hash ring");
                    state.ring = HashRing::build(
                        urls.iter().map(|u| (u.address(), u.clone())),
                        self.virtual_nodes,
                    );
                    state.ring_members = members;
                }
                consistent_hash_select(calc_hash(hash_key), &state.ring).cloned()
            }
        }
    }

    fn candidates(
        &self,
        urls: &[ServiceUrl],
        keys: &[String],
        current: Option<&HashMap<String, i64>>,
    ) -> Vec<WeightedCandidate<()>> {
        let active = self.active.lock();
        urls.iter()
            .zip(keys)
            .map(|(url, key)| {
                let mut candidate = WeightedCandidate::new((), url.weight())
                    .with_active(active.get(key).copied().unwrap_or(0));
                if let Some(current) = current {
                    candidate.current_weight = current.get(key).copied().unwrap_or(0);
                }
                candidate
            })
            .collect()
    }

    /// 记录一次调用开始，返回的守卫在释放时结束计数
    pub fn begin_call(&self, url: &ServiceUrl) -> ActiveGuard {
        let key = url.to_string();
        *self.active.lock().entry(key.clone()).or_insert(0) += 1;
        ActiveGuard {
            active: self.active.clone(),
            key,
        }
    }

    /// 当前进行中的调用数
    pub fn active_count(&self, url: &ServiceUrl) -> u64 {
        self.active
            .lock()
            .get(&url.to_string())
            .copied()
            .unwrap_or(0)
    }
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self::new(LoadBalanceStrategy::default())
    }
}

/// 活跃调用计数守卫
pub struct ActiveGuard {
    active: Arc<Mutex<HashMap<String, u64>>>,
    key: String,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let mut active = self.active.lock();
        if let Some(count) = active.get_mut(&self.key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                active.remove(&self.key);
            }
        }
    }
}
