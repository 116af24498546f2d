//! 账本存储
//!
//! 账本背后的存储是整个限流链路里唯一的共享资源：单进程部署用
//! 进程内存储即可；水平扩展时换成外部存储实现，按键串行的纪律
//! 必须在全局而不只是进程内成立。协调器只通过这个 trait 访问
//! 存储，存储故障走部署配置的 fail-open / fail-closed 策略。

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

use crate::ratelimit::ledger::UsageLedger;
use crate::ratelimit::policy::SegmentKey;

/// 存储错误
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// 存储不可用（连接失败、事务冲突等）
    #[error("存储不可用: {0}")]
    Unavailable(String),
}

/// 时间桶存储接口
///
/// 实现不需要自己保证按键互斥——协调器保证同一个键的调用
/// 永远来自同一个串行 worker。
#[async_trait]
pub trait BucketStore: Send + Sync + 'static {
    /// 剪掉窗口外的旧桶并返回窗口内的用量合计（定点单位）
    async fn prune_and_sum(
        &self,
        key: &SegmentKey,
        window_start_ms: u64,
        bucket_size_ms: u64,
    ) -> Result<u64, StoreError>;

    /// 把一笔用量记入时间戳所属的桶
    async fn append(
        &self,
        key: &SegmentKey,
        timestamp_ms: u64,
        bucket_size_ms: u64,
        amount: u64,
    ) -> Result<(), StoreError>;

    /// 窗口内最旧的桶起始时刻（用于 reset 时间计算）
    async fn oldest_bucket(&self, key: &SegmentKey) -> Result<Option<u64>, StoreError>;
}

/// 进程内存储
///
/// 每个分段键一个 `UsageLedger`，惰性创建；剪空之后的账本
/// 直接从映射里摘掉，长期不活跃的键不占内存。
#[derive(Debug, Default)]
pub struct MemoryBucketStore {
    ledgers: DashMap<SegmentKey, UsageLedger>,
}

impl MemoryBucketStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前持有账本的键数量（测试与观测用）
    pub fn ledger_count(&self) -> usize {
        self.ledgers.len()
    }
}

#[async_trait]
impl BucketStore for MemoryBucketStore {
    async fn prune_and_sum(
        &self,
        key: &SegmentKey,
        window_start_ms: u64,
        bucket_size_ms: u64,
    ) -> Result<u64, StoreError> {
        let Some(mut ledger) = self.ledgers.get_mut(key) else {
            return Ok(0);
        };
        let total = ledger.sum_since(window_start_ms, bucket_size_ms);
        let empty = ledger.is_empty();
        drop(ledger);
        if empty {
            self.ledgers.remove_if(key, |_, l| l.is_empty());
        }
        Ok(total)
    }

    async fn append(
        &self,
        key: &SegmentKey,
        timestamp_ms: u64,
        bucket_size_ms: u64,
        amount: u64,
    ) -> Result<(), StoreError> {
        self.ledgers
            .entry(key.clone())
            .or_default()
            .append(timestamp_ms, bucket_size_ms, amount);
        Ok(())
    }

    async fn oldest_bucket(&self, key: &SegmentKey) -> Result<Option<u64>, StoreError> {
        Ok(self.ledgers.get(key).and_then(|l| l.oldest_bucket()))
    }
}

/// 恒定失败的存储，用于故障放行策略的测试
#[cfg(test)]
#[derive(Debug, Default)]
pub struct FailingBucketStore;

#[cfg(test)]
#[async_trait]
impl BucketStore for FailingBucketStore {
    async fn prune_and_sum(
        &self,
        _key: &SegmentKey,
        _window_start_ms: u64,
        _bucket_size_ms: u64,
    ) -> Result<u64, StoreError> {
        Err(StoreError::Unavailable("模拟存储故障".to_string()))
    }

    async fn append(
        &self,
        _key: &SegmentKey,
        _timestamp_ms: u64,
        _bucket_size_ms: u64,
        _amount: u64,
    ) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("模拟存储故障".to_string()))
    }

    async fn oldest_bucket(&self, _key: &SegmentKey) -> Result<Option<u64>, StoreError> {
        Err(StoreError::Unavailable("模拟存储故障".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::policy::{RateLimitPolicy, SegmentKey};

    fn key(subject: &str) -> SegmentKey {
        let policy = RateLimitPolicy::parse("10;w=60").unwrap();
        SegmentKey::build(&policy, subject)
    }

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryBucketStore::new();
        let k = key("org_1");

        store.append(&k, 1_000, 1000, 5).await.unwrap();
        store.append(&k, 1_500, 1000, 5).await.unwrap();
        assert_eq!(store.prune_and_sum(&k, 0, 1000).await.unwrap(), 10);
        assert_eq!(store.oldest_bucket(&k).await.unwrap(), Some(1_000));
    }

    #[tokio::test]
    async fn test_memory_store_unknown_key_is_zero() {
        let store = MemoryBucketStore::new();
        assert_eq!(store.prune_and_sum(&key("nobody"), 0, 1000).await.unwrap(), 0);
        assert_eq!(store.oldest_bucket(&key("nobody")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_store_evicts_empty_ledgers() {
        let store = MemoryBucketStore::new();
        let k = key("org_1");

        store.append(&k, 1_000, 1000, 5).await.unwrap();
        assert_eq!(store.ledger_count(), 1);

        // 窗口推进到所有桶都过期后，账本整体被回收
        assert_eq!(store.prune_and_sum(&k, 60_000, 1000).await.unwrap(), 0);
        assert_eq!(store.ledger_count(), 0);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let store = MemoryBucketStore::new();
        store.append(&key("a"), 1_000, 1000, 7).await.unwrap();
        store.append(&key("b"), 1_000, 1000, 3).await.unwrap();

        assert_eq!(store.prune_and_sum(&key("a"), 0, 1000).await.unwrap(), 7);
        assert_eq!(store.prune_and_sum(&key("b"), 0, 1000).await.unwrap(), 3);
    }
}
