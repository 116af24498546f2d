//! modelgate — LLM API 网关核心
//!
//! 请求路径上的两块核心能力：
//!
//! - [`ratelimit`]: 按分段键的分布式滑动窗口限流（定点单位、
//!   有界时间桶、按键串行、可配置的降级策略）
//! - [`stream`]: 流式协议转换（SSE 字节重组、chat 风格 →
//!   事件风格的状态机翻译、共用映射表的非流式转换）
//!
//! 认证、供应商选择、计价表、请求体落盘等都在本 crate 之外，
//! 由集成方作为协作者接入。

pub mod config;
pub mod error;
pub mod logging;
pub mod ratelimit;
pub mod stream;

pub use config::{FailureMode, RateLimitConfig};
pub use error::{GatewayError, Result};
pub use ratelimit::{EvaluateOutcome, RateLimitCoordinator, RateLimitPolicy, SegmentKey};
pub use stream::{StreamPipeline, TranslatedEvent};
