//! 限流协调器
//!
//! 每个分段键由恰好一个串行 worker 任务持有，evaluate 通过消息
//! 路由到对应 worker，读-改-写对同一个键永远不交错；不同键之间
//! 不共享任何锁，互不阻塞。这个所有权划分在单进程里就是
//! "按键的 mpsc 队列表"，换到分布式部署时变成一致性哈希 /
//! 外部协调下的按键所有权，算法本身不变。
//!
//! # 单位约定
//!
//! `cost` 与所有返回值都在定点单位域内（见 `fixed_point`）：
//! 请求数策略一次请求记 `SCALE` 个单位，金额策略按厘分换算。

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::config::{FailureMode, RateLimitConfig};
use crate::error::GatewayError;
use crate::ratelimit::fixed_point;
use crate::ratelimit::ledger;
use crate::ratelimit::policy::{RateLimitPolicy, SegmentKey};
use crate::ratelimit::store::{BucketStore, MemoryBucketStore};

/// 当前壁钟时间（毫秒）
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// 一次限流评估的结果
///
/// 拒绝不是错误：`allowed = false` 是正常控制流，由调用方
/// 转换成 429 响应和配额响应头。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluateOutcome {
    /// 是否放行
    pub allowed: bool,
    /// 剩余配额（定点单位）
    pub remaining: u64,
    /// 窗口内当前用量（定点单位，放行且非 check-only 时含本次）
    pub current_usage: u64,
    /// 最旧的在窗桶滑出窗口还需多少秒（窗口内无用量时为 None）
    pub reset_seconds: Option<u64>,
    /// 本结果是否出自存储故障/超时后的降级路径
    pub degraded: bool,
}

impl EvaluateOutcome {
    /// 剩余配额换算回原始单位（响应头展示用）
    pub fn remaining_decimal(&self) -> f64 {
        fixed_point::from_units(self.remaining)
    }

    /// 当前用量换算回原始单位
    pub fn current_usage_decimal(&self) -> f64 {
        fixed_point::from_units(self.current_usage)
    }
}

/// 发给按键 worker 的消息
enum WorkerMsg {
    Evaluate {
        policy: RateLimitPolicy,
        cost_units: u64,
        check_only: bool,
        now_ms: u64,
        reply: oneshot::Sender<Result<EvaluateOutcome, GatewayError>>,
    },
    Record {
        policy: RateLimitPolicy,
        cost_units: u64,
        now_ms: u64,
        reply: oneshot::Sender<Result<(), GatewayError>>,
    },
}

/// 限流协调器
///
/// 持有存储句柄和按键 worker 路由表。创建一次、全局共享；
/// `Clone` 共享同一份状态。
#[derive(Clone)]
pub struct RateLimitCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    store: Arc<dyn BucketStore>,
    config: RateLimitConfig,
    workers: DashMap<SegmentKey, mpsc::Sender<WorkerMsg>>,
}

impl RateLimitCoordinator {
    /// 用进程内存储创建协调器
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_store(Arc::new(MemoryBucketStore::new()), config)
    }

    /// 用指定存储创建协调器
    pub fn with_store(store: Arc<dyn BucketStore>, config: RateLimitConfig) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                store,
                config,
                workers: DashMap::new(),
            }),
        }
    }

    /// 评估一次请求是否超出配额
    ///
    /// 五个步骤（取账本、算桶宽、汇总窗口、判边界、记账）对同一个
    /// 键原子地执行；`check_only = true` 时只读不记账。评估本身被
    /// 配置的超时上限约束，超时或存储故障按部署的 fail-open /
    /// fail-closed 策略降级，不会把请求挂死。
    ///
    /// 只有真正的内部错误（worker 进程级故障）才返回 `Err`。
    pub async fn evaluate(
        &self,
        segment_key: &SegmentKey,
        policy: &RateLimitPolicy,
        cost_units: u64,
        check_only: bool,
        now_ms: u64,
    ) -> Result<EvaluateOutcome, GatewayError> {
        let (tx, rx) = oneshot::channel();
        self.send_to_worker(
            segment_key,
            WorkerMsg::Evaluate {
                policy: policy.clone(),
                cost_units,
                check_only,
                now_ms,
                reply: tx,
            },
        )
        .await?;

        let result = match self.inner.config.evaluate_timeout() {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(reply) => reply.unwrap_or_else(|_| {
                    Err(GatewayError::Internal(
                        "限流 worker 在应答前退出".to_string(),
                    ))
                }),
                Err(_) => Err(GatewayError::EvaluateTimeout {
                    timeout_ms: self.inner.config.evaluate_timeout_ms,
                }),
            },
            None => rx.await.unwrap_or_else(|_| {
                Err(GatewayError::Internal(
                    "限流 worker 在应答前退出".to_string(),
                ))
            }),
        };

        match result {
            Ok(outcome) => Ok(outcome),
            // 超时与存储故障都走部署配置的降级路径，不向调用方报错
            Err(
                err @ (GatewayError::EvaluateTimeout { .. }
                | GatewayError::LedgerStoreUnavailable(_)),
            ) => {
                tracing::warn!(
                    "[RATE_LIMIT] {}, key={}, 按 {:?} 降级",
                    err,
                    segment_key,
                    self.inner.config.failure_mode_for(policy.unit)
                );
                Ok(self.degraded_outcome(policy))
            }
            Err(err) => Err(err),
        }
    }

    /// 事后记账（金额策略的结算路径）
    ///
    /// 金额策略在请求前只做 check-only 预检（成本要等上游响应了
    /// 才知道），实际成本在响应之后无条件记入账本。存储故障只
    /// 记日志，不影响已经送出的响应。
    pub async fn record(
        &self,
        segment_key: &SegmentKey,
        policy: &RateLimitPolicy,
        cost_units: u64,
        now_ms: u64,
    ) -> Result<(), GatewayError> {
        let (tx, rx) = oneshot::channel();
        self.send_to_worker(
            segment_key,
            WorkerMsg::Record {
                policy: policy.clone(),
                cost_units,
                now_ms,
                reply: tx,
            },
        )
        .await?;

        match rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(GatewayError::LedgerStoreUnavailable(msg))) => {
                tracing::warn!(
                    "[RATE_LIMIT] 事后记账失败（存储不可用）: {}, key={}",
                    msg,
                    segment_key
                );
                Ok(())
            }
            Ok(Err(err)) => Err(err),
            Err(_) => Err(GatewayError::Internal(
                "限流 worker 在应答前退出".to_string(),
            )),
        }
    }

    /// 当前活跃的 worker 数量（观测与测试用）
    pub fn worker_count(&self) -> usize {
        self.inner.workers.len()
    }

    /// 降级结果：fail-open 视作配额全空，fail-closed 直接拒绝
    fn degraded_outcome(&self, policy: &RateLimitPolicy) -> EvaluateOutcome {
        match self.inner.config.failure_mode_for(policy.unit) {
            FailureMode::FailOpen => EvaluateOutcome {
                allowed: true,
                remaining: policy.quota_in_units(),
                current_usage: 0,
                reset_seconds: None,
                degraded: true,
            },
            FailureMode::FailClosed => EvaluateOutcome {
                allowed: false,
                remaining: 0,
                current_usage: 0,
                reset_seconds: None,
                degraded: true,
            },
        }
    }

    /// 把消息投递给键的 owner worker，不存在或已退出则惰性重建
    async fn send_to_worker(
        &self,
        segment_key: &SegmentKey,
        msg: WorkerMsg,
    ) -> Result<(), GatewayError> {
        let mut msg = msg;
        for _ in 0..3 {
            let sender = self
                .inner
                .workers
                .entry(segment_key.clone())
                .or_insert_with(|| spawn_worker(self.inner.clone(), segment_key.clone()))
                .clone();

            match sender.send(msg).await {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(returned)) => {
                    // worker 空闲退出了，摘掉失效表项后重建
                    self.inner
                        .workers
                        .remove_if(segment_key, |_, s| s.same_channel(&sender));
                    msg = returned;
                }
            }
        }
        Err(GatewayError::Internal(format!(
            "无法投递到限流 worker: {}",
            segment_key
        )))
    }
}

/// 启动某个分段键的串行 worker
fn spawn_worker(inner: Arc<CoordinatorInner>, key: SegmentKey) -> mpsc::Sender<WorkerMsg> {
    let (tx, mut rx) = mpsc::channel::<WorkerMsg>(64);
    let self_tx = tx.clone();
    let idle = inner.config.worker_idle_timeout();

    tokio::spawn(async move {
        loop {
            match tokio::time::timeout(idle, rx.recv()).await {
                Ok(Some(msg)) => handle_msg(&inner, &key, msg).await,
                // 所有 sender 都没了（协调器被丢弃）
                Ok(None) => break,
                // 空闲回收：先把自己从路由表摘掉再排空收尾消息，
                // 期间新到的 evaluate 会路由到重建的 worker
                Err(_elapsed) => {
                    inner
                        .workers
                        .remove_if(&key, |_, s| s.same_channel(&self_tx));
                    rx.close();
                    while let Ok(msg) = rx.try_recv() {
                        handle_msg(&inner, &key, msg).await;
                    }
                    tracing::debug!("[RATE_LIMIT] worker 空闲回收: {}", key);
                    break;
                }
            }
        }
    });

    tx
}

async fn handle_msg(inner: &CoordinatorInner, key: &SegmentKey, msg: WorkerMsg) {
    match msg {
        WorkerMsg::Evaluate {
            policy,
            cost_units,
            check_only,
            now_ms,
            reply,
        } => {
            let result =
                evaluate_on_store(inner, key, &policy, cost_units, check_only, now_ms).await;
            let _ = reply.send(result);
        }
        WorkerMsg::Record {
            policy,
            cost_units,
            now_ms,
            reply,
        } => {
            let bucket_size = ledger::bucket_size_ms(policy.window_seconds);
            let result = inner
                .store
                .append(key, now_ms, bucket_size, cost_units)
                .await
                .map_err(|e| GatewayError::LedgerStoreUnavailable(e.to_string()));
            let _ = reply.send(result);
        }
    }
}

/// §算法本体：取账本 → 桶宽 → 汇总 → 边界判定 → 记账
///
/// 边界是严格的 `current + cost <= quota`：恰好落在配额上的请求
/// 放行，再多一个单位才拒绝。
async fn evaluate_on_store(
    inner: &CoordinatorInner,
    key: &SegmentKey,
    policy: &RateLimitPolicy,
    cost_units: u64,
    check_only: bool,
    now_ms: u64,
) -> Result<EvaluateOutcome, GatewayError> {
    let bucket_size = ledger::bucket_size_ms(policy.window_seconds);
    let window_ms = policy.window_seconds * 1000;
    let window_start = now_ms.saturating_sub(window_ms);
    let quota_units = policy.quota_in_units();

    let current_usage = inner
        .store
        .prune_and_sum(key, window_start, bucket_size)
        .await
        .map_err(|e| GatewayError::LedgerStoreUnavailable(e.to_string()))?;

    let allowed = fixed_point::add(current_usage, cost_units) <= quota_units;

    let final_usage = if allowed && !check_only {
        inner
            .store
            .append(key, now_ms, bucket_size, cost_units)
            .await
            .map_err(|e| GatewayError::LedgerStoreUnavailable(e.to_string()))?;
        fixed_point::add(current_usage, cost_units)
    } else {
        current_usage
    };

    let reset_seconds = match inner
        .store
        .oldest_bucket(key)
        .await
        .map_err(|e| GatewayError::LedgerStoreUnavailable(e.to_string()))?
    {
        Some(oldest) => {
            let expires_at = oldest + window_ms;
            Some(expires_at.saturating_sub(now_ms).div_ceil(1000))
        }
        None => None,
    };

    Ok(EvaluateOutcome {
        allowed,
        remaining: quota_units.saturating_sub(final_usage),
        current_usage: final_usage,
        reset_seconds,
        degraded: false,
    })
}
