//! 时间桶账本
//!
//! 用固定时长的时间桶聚合用量来近似滑动窗口：
//! 相比每次请求一条记录（规模一上来就撑爆），每个分段键
//! 最多保留约 60 个桶，窗口再长内存也有界。代价是窗口尾部
//! 最多一个桶宽的精度损失，对限流场景可以接受。

use std::collections::BTreeMap;

use crate::ratelimit::fixed_point;

/// 目标桶数量
///
/// 桶时长按窗口长度等分出大约这么多个桶。
const TARGET_BUCKET_COUNT: u64 = 60;

/// 最小桶时长（毫秒）
const MIN_BUCKET_SIZE_MS: u64 = 1000;

/// 计算某个窗口对应的桶时长（毫秒）
///
/// `max(1000, 窗口毫秒数 / 60)`。必须是窗口长度的纯函数：
/// 两个进程对同一条策略独立计算时要得到一致的桶边界。
pub fn bucket_size_ms(window_seconds: u64) -> u64 {
    (window_seconds * 1000 / TARGET_BUCKET_COUNT).max(MIN_BUCKET_SIZE_MS)
}

/// 时间戳对齐到所属桶的起始时刻
pub fn bucket_start(timestamp_ms: u64, bucket_size_ms: u64) -> u64 {
    timestamp_ms / bucket_size_ms * bucket_size_ms
}

/// 单个分段键的用量账本
///
/// 桶起始时刻到定点单位用量的有序映射。不做任何内部加锁，
/// 同一实例的操作必须由外部（协调器的按键 worker）串行化。
#[derive(Debug, Default, Clone)]
pub struct UsageLedger {
    buckets: BTreeMap<u64, u64>,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// 统计窗口内的用量，顺带剪掉窗口外的旧桶
    ///
    /// 求和范围是 `bucket_start >= 对齐后的窗口起点`；
    /// 严格更旧的桶在同一次访问中删除（惰性清理）。
    pub fn sum_since(&mut self, window_start_ms: u64, bucket_size_ms: u64) -> u64 {
        let aligned_start = bucket_start(window_start_ms, bucket_size_ms);
        self.buckets = self.buckets.split_off(&aligned_start);
        self.buckets
            .values()
            .fold(0u64, |acc, v| fixed_point::add(acc, *v))
    }

    /// 把一笔用量记入时间戳所属的桶，桶不存在则创建
    pub fn append(&mut self, timestamp_ms: u64, bucket_size_ms: u64, amount: u64) {
        let start = bucket_start(timestamp_ms, bucket_size_ms);
        let entry = self.buckets.entry(start).or_insert(0);
        *entry = fixed_point::add(*entry, amount);
    }

    /// 最旧的桶起始时刻（用于计算配额何时开始回落）
    pub fn oldest_bucket(&self) -> Option<u64> {
        self.buckets.keys().next().copied()
    }

    /// 当前保留的桶数量
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// 账本是否为空（所有桶都已过期被剪掉）
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
