//! 分布式限流子系统
//!
//! 按分段键的滑动窗口配额执行器，同时支持整数（请求数）和
//! 小数（金额）两种计量单位。
//!
//! # 架构
//!
//! ```text
//! evaluate(key, policy, cost)
//!     │  消息路由（DashMap<SegmentKey, mpsc::Sender>）
//!     ▼
//! 按键串行 worker ──> BucketStore ──> UsageLedger（约 60 个时间桶）
//! ```
//!
//! - `fixed_point`: 定点单位算术，账本里没有浮点数
//! - `policy`: 策略描述符解析与分段键构造
//! - `ledger`: 时间桶账本（有界内存的滑动窗口近似）
//! - `store`: 账本存储接口与进程内实现
//! - `coordinator`: 按键串行的评估协调器

pub mod coordinator;
pub mod fixed_point;
pub mod ledger;
pub mod policy;
pub mod store;

pub use coordinator::{now_ms, EvaluateOutcome, RateLimitCoordinator};
pub use ledger::{bucket_size_ms, UsageLedger};
pub use policy::{PolicyUnit, RateLimitPolicy, SegmentKey};
pub use store::{BucketStore, MemoryBucketStore, StoreError};
