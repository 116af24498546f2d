//! 非流式响应转换
//!
//! 已经完整到手的 chat 风格响应体直接转成事件风格响应体。
//! 字段映射与流式翻译器的收尾转移共用同一组助手函数，保证
//! 等价内容经两条路径得到结构一致的结果。尽力而为：映射不了
//! 的字段丢弃，绝不因为个别字段失败整个转换。

use crate::stream::chat::ChatCompletionBody;
use crate::stream::events::{
    map_role, map_usage, normalize_arguments, OutputItem, ResponseBody,
};

/// chat 风格完整响应 → 事件风格完整响应
pub fn convert(body: &ChatCompletionBody) -> ResponseBody {
    let mut output = Vec::new();

    for choice in &body.choices {
        // 工具调用先行，与流式路径的事件顺序一致
        if let Some(tool_calls) = &choice.message.tool_calls {
            for tc in tool_calls {
                output.push(OutputItem::FunctionCall {
                    call_id: tc.id.clone(),
                    name: tc.function.name.clone(),
                    arguments: normalize_arguments(&tc.function.arguments),
                });
            }
        }

        if let Some(text) = &choice.message.content {
            if !text.is_empty() {
                output.push(OutputItem::Message {
                    id: format!("msg_{}_{}", body.id, choice.index),
                    role: map_role(choice.message.role.as_deref()),
                    text: text.clone(),
                });
            }
        }
    }

    ResponseBody {
        id: body.id.clone(),
        object: "response".to_string(),
        created: body.created,
        model: body.model.clone(),
        status: "completed".to_string(),
        output,
        usage: body.usage.as_ref().map(map_usage),
    }
}
