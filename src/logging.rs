//! 日志初始化
//!
//! 库本身只通过 `tracing` 宏输出事件（fire-and-forget，不阻塞热路径），
//! 这里提供一个给二进制/测试用的订阅器初始化入口。

use tracing_subscriber::EnvFilter;

/// 初始化 tracing 订阅器
///
/// 默认级别 `info`，可通过 `MODELGATE_LOG` 环境变量覆盖，
/// 例如 `MODELGATE_LOG=modelgate=debug`。重复调用是安全的。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_env("MODELGATE_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
