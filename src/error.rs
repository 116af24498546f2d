//! 网关核心错误类型
//!
//! 只有真正意外的内部错误会作为 `Err` 传播给调用方；
//! 限流拒绝、畸形流事件、传输中断等属于正常控制流，
//! 在检测到它们的组件内部就地处理。

use thiserror::Error;

/// 网关核心错误
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    /// 限流账本后端存储不可用
    #[error("账本存储不可用: {0}")]
    LedgerStoreUnavailable(String),

    /// 限流评估超时
    #[error("限流评估超时: {timeout_ms}ms")]
    EvaluateTimeout { timeout_ms: u64 },

    /// 限流策略描述符解析失败
    #[error("无效的限流策略: {0}")]
    MalformedPolicy(String),

    /// 内部错误（不变量被破坏）
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GatewayError::EvaluateTimeout { timeout_ms: 500 };
        assert_eq!(format!("{}", err), "限流评估超时: 500ms");

        let err = GatewayError::MalformedPolicy("缺少配额".to_string());
        assert!(format!("{}", err).contains("缺少配额"));
    }
}
