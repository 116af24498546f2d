//! 网关核心配置
//!
//! 覆盖限流子系统的部署级配置：后端存储故障时的放行策略，
//! 以及单次限流评估的超时上限。这些是按部署一次性决定的配置，
//! 不是按请求的决策。

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ratelimit::policy::PolicyUnit;

/// 存储故障时的放行策略
///
/// - `FailOpen`: 放行请求（保可用性，适合尽力而为的请求数策略）
/// - `FailClosed`: 拒绝请求（保成本控制，适合金额策略）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureMode {
    FailOpen,
    FailClosed,
}

/// 限流协调器配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitConfig {
    /// 请求数策略的存储故障放行策略
    pub request_failure_mode: FailureMode,
    /// 金额策略的存储故障放行策略
    pub cost_failure_mode: FailureMode,
    /// 单次 evaluate 的超时（毫秒），0 表示无超时
    pub evaluate_timeout_ms: u64,
    /// 空闲多久后回收某个 segment key 的 worker（毫秒）
    pub worker_idle_timeout_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            // 请求数策略尽力而为，金额策略避免无上限的账单风险
            request_failure_mode: FailureMode::FailOpen,
            cost_failure_mode: FailureMode::FailClosed,
            evaluate_timeout_ms: 1_000,
            worker_idle_timeout_ms: 5 * 60 * 1000,
        }
    }
}

impl RateLimitConfig {
    /// 获取 evaluate 超时 Duration
    pub fn evaluate_timeout(&self) -> Option<Duration> {
        if self.evaluate_timeout_ms > 0 {
            Some(Duration::from_millis(self.evaluate_timeout_ms))
        } else {
            None
        }
    }

    /// 获取 worker 空闲回收 Duration
    pub fn worker_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_idle_timeout_ms.max(1000))
    }

    /// 按策略单位选择故障放行策略
    pub fn failure_mode_for(&self, unit: PolicyUnit) -> FailureMode {
        match unit {
            PolicyUnit::RequestCount => self.request_failure_mode,
            PolicyUnit::CostCentiUnits => self.cost_failure_mode,
        }
    }
}
