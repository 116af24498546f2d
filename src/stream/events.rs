//! 目标协议事件类型与字段映射表
//!
//! 事件风格的目标协议：流式输出是下面封闭的 `TranslatedEvent`
//! 集合，非流式输出是 `ResponseBody`。流式与非流式共用同一张
//! 字段映射表（角色映射、工具调用→函数调用的形状、用量字段名），
//! 保证等价内容经两条路径得到结构一致的结果。
//!
//! 每个事件带显式 `type` 标签，外层的目标协议帧层据此序列化。

use serde::{Deserialize, Serialize};

use crate::stream::chat::ChatUsage;

/// 用量统计（目标协议字段名）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

/// 翻译后的流事件
///
/// 顺序不变量（由转换器的构造保证）：
/// `Created ≺ {TextDelta|FunctionCall}* ≺ TextDone ≺ Completed`，
/// 每个会话最多一个 `Completed`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranslatedEvent {
    /// 会话开始（携带身份信息）
    Created {
        response_id: String,
        model: String,
        role: String,
    },
    /// 文本增量（收到即转发，不缓冲）
    TextDelta { text: String },
    /// 某段文本完结，携带全量文本
    TextDone { full_text: String },
    /// 一次归并完成的函数调用
    FunctionCall {
        call_id: String,
        name: String,
        arguments_json: String,
    },
    /// 会话结束（每个会话至多一次，且是最后一个事件）
    Completed { usage: Option<UsageTotals> },
    /// 源流里出现的显式错误帧（终止事件，之后不再有输出）
    Error { message: String },
}

/// 非流式的目标协议响应体
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseBody {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub model: String,
    pub status: String,
    pub output: Vec<OutputItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageTotals>,
}

/// 目标协议的输出条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputItem {
    /// 文本消息
    Message { id: String, role: String, text: String },
    /// 函数调用（与流式 `FunctionCall` 事件同形状）
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
    },
}

// ============================================================================
// 字段映射表（流式 finalize 与非流式转换共用）
// ============================================================================

/// 角色映射：源协议缺省时目标协议固定是 assistant
pub fn map_role(role: Option<&str>) -> String {
    match role {
        Some(r) if !r.is_empty() => r.to_string(),
        _ => "assistant".to_string(),
    }
}

/// 用量字段映射：prompt/completion → input/output
///
/// 源协议漏掉 total 时从两个分量重算。
pub fn map_usage(usage: &ChatUsage) -> UsageTotals {
    let total = if usage.total_tokens > 0 {
        usage.total_tokens
    } else {
        usage.prompt_tokens + usage.completion_tokens
    };
    UsageTotals {
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
        total_tokens: total,
    }
}

/// 参数流归并结果的规范化：空参数补成合法的空对象
pub fn normalize_arguments(arguments: &str) -> String {
    if arguments.trim().is_empty() {
        "{}".to_string()
    } else {
        arguments.to_string()
    }
}
