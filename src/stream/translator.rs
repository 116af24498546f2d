//! 协议事件状态机
//!
//! 每个会话一台显式状态机：`Uninitialized → Active → Terminal`。
//! 转移函数 `handle_frame` 只吃重组好的整帧、吐翻译后的事件，
//! 不碰任何传输层，因此顺序不变量可以脱离真实连接直接测试。
//!
//! 顺序不变量由构造保证：文本增量收到即转发，`TextDone` 与
//! `Completed` 只由 finalize 转移合成，所以输出序列天然满足
//! `Created ≺ {TextDelta|FunctionCall}* ≺ TextDone ≺ Completed`。

use std::collections::BTreeMap;

use crate::stream::chat::{ChatCompletionChunk, ToolCallDelta};
use crate::stream::events::{map_role, map_usage, normalize_arguments, TranslatedEvent, UsageTotals};
use crate::stream::reassembler::extract_data;

/// 源协议的终止标记
const DONE_MARKER: &str = "[DONE]";

/// 归并中的工具调用片段
///
/// 同一个调用的 id/name/参数分散在多个 chunk 里，按 chunk 内
/// 的 index 归并：id 和 name 取首见值，参数按到达顺序拼接。
#[derive(Debug, Default, Clone)]
struct ToolCallFragment {
    call_id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// 活跃会话的累积数据
#[derive(Debug, Default)]
struct StreamSession {
    response_id: String,
    model: String,
    role: String,
    accumulated_text: String,
    text_closed: bool,
    tool_fragments: BTreeMap<u32, ToolCallFragment>,
    next_fragment_index: u32,
    usage: Option<UsageTotals>,
}

/// 会话状态
#[derive(Debug)]
enum SessionState {
    Uninitialized,
    Active(StreamSession),
    Terminal,
}

/// chat 风格流 → 事件风格流的翻译器
#[derive(Debug)]
pub struct ProtocolEventTranslator {
    state: SessionState,
}

impl Default for ProtocolEventTranslator {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolEventTranslator {
    pub fn new() -> Self {
        Self {
            state: SessionState::Uninitialized,
        }
    }

    /// 会话是否已终止（之后的帧一律忽略）
    pub fn is_terminal(&self) -> bool {
        matches!(self.state, SessionState::Terminal)
    }

    /// 处理一个完整的 SSE 帧，返回本次转移吐出的事件
    ///
    /// 解析失败的帧跳过并记警告，绝不把单帧错误当成流终止。
    pub fn handle_frame(&mut self, frame: &str) -> Vec<TranslatedEvent> {
        let Some(data) = extract_data(frame) else {
            // 纯注释/事件名帧，没有负载
            return Vec::new();
        };

        if data.trim() == DONE_MARKER {
            return self.finalize();
        }

        if matches!(self.state, SessionState::Terminal) {
            tracing::warn!("[TRANSLATE] 会话已终止，忽略后续帧");
            return Vec::new();
        }

        let value: serde_json::Value = match serde_json::from_str(&data) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("[TRANSLATE] 跳过无法解析的帧: {}", e);
                return Vec::new();
            }
        };

        // 源流的显式错误帧：和 Completed 一样是终止事件，
        // 会话数据直接丢弃，之后的帧一律无效
        if let Some(err) = value.get("error") {
            let message = err
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("上游返回错误")
                .to_string();
            self.state = SessionState::Terminal;
            return vec![TranslatedEvent::Error { message }];
        }

        let chunk: ChatCompletionChunk = match serde_json::from_value(value) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("[TRANSLATE] 跳过形状不符的 chunk: {}", e);
                return Vec::new();
            }
        };

        self.handle_chunk(chunk)
    }

    /// 流结束（传输层关闭或上游收尾）时调用
    ///
    /// 活跃会话补发收尾事件；取消场景不要走这里，直接丢弃
    /// 整个翻译器即可。
    pub fn finish(&mut self) -> Vec<TranslatedEvent> {
        match self.state {
            SessionState::Active(_) => self.finalize(),
            _ => Vec::new(),
        }
    }

    // ========================================================================
    // 状态转移
    // ========================================================================

    fn handle_chunk(&mut self, chunk: ChatCompletionChunk) -> Vec<TranslatedEvent> {
        let mut events = Vec::new();

        // 首个 chunk 携带身份信息 → Created，进入 Active
        if matches!(self.state, SessionState::Uninitialized) {
            let role = chunk
                .choices
                .first()
                .and_then(|c| c.delta.role.as_deref());
            let session = StreamSession {
                response_id: if chunk.id.is_empty() {
                    format!("resp_{}", uuid::Uuid::new_v4().simple())
                } else {
                    chunk.id.clone()
                },
                model: chunk.model.clone(),
                role: map_role(role),
                ..Default::default()
            };
            events.push(TranslatedEvent::Created {
                response_id: session.response_id.clone(),
                model: session.model.clone(),
                role: session.role.clone(),
            });
            self.state = SessionState::Active(session);
        }

        let SessionState::Active(session) = &mut self.state else {
            return events;
        };

        let mut saw_finish = false;
        for choice in &chunk.choices {
            // 文本增量：收到即转发，同时累积全文
            if let Some(text) = choice.delta.content.as_deref() {
                if !text.is_empty() {
                    session.accumulated_text.push_str(text);
                    events.push(TranslatedEvent::TextDelta {
                        text: text.to_string(),
                    });
                }
            }

            // 工具调用片段归并
            if let Some(tool_calls) = &choice.delta.tool_calls {
                for tc in tool_calls {
                    session.merge_tool_call(tc);
                }
            }

            if choice.finish_reason.is_some() {
                saw_finish = true;
            }
        }

        if let Some(usage) = &chunk.usage {
            session.usage = Some(map_usage(usage));
        }

        // 源侧的 finish 标记：归并完成的函数调用先出，文本随后闭合
        if saw_finish {
            events.extend(session.flush_function_calls());
            events.extend(session.close_text());
        }

        // 携带用量的 chunk 即收尾信号
        if chunk.usage.is_some() {
            events.extend(self.finalize());
        }

        events
    }

    /// 收尾转移：补发未完成的函数调用与 `TextDone`，最后恰好
    /// 一个 `Completed`，状态置 Terminal
    fn finalize(&mut self) -> Vec<TranslatedEvent> {
        let state = std::mem::replace(&mut self.state, SessionState::Terminal);
        let SessionState::Active(mut session) = state else {
            return Vec::new();
        };

        let mut events = Vec::new();
        events.extend(session.flush_function_calls());
        events.extend(session.close_text());
        events.push(TranslatedEvent::Completed {
            usage: session.usage,
        });
        events
    }
}

impl StreamSession {
    fn merge_tool_call(&mut self, tc: &ToolCallDelta) {
        let index = tc.index.unwrap_or_else(|| {
            let i = self.next_fragment_index;
            self.next_fragment_index += 1;
            i
        });
        let fragment = self.tool_fragments.entry(index).or_default();
        if fragment.call_id.is_none() {
            fragment.call_id = tc.id.clone().filter(|s| !s.is_empty());
        }
        if let Some(func) = &tc.function {
            if fragment.name.is_none() {
                fragment.name = func.name.clone().filter(|s| !s.is_empty());
            }
            if let Some(args) = &func.arguments {
                fragment.arguments.push_str(args);
            }
        }
    }

    /// 把归并完成的工具调用片段全部转成 `FunctionCall` 事件
    ///
    /// 参数流始终为空的调用补成规范的空对象 `"{}"`。
    fn flush_function_calls(&mut self) -> Vec<TranslatedEvent> {
        let fragments = std::mem::take(&mut self.tool_fragments);
        fragments
            .into_iter()
            .map(|(index, f)| TranslatedEvent::FunctionCall {
                call_id: f
                    .call_id
                    .unwrap_or_else(|| format!("call_{}_{}", self.response_id, index)),
                name: f.name.unwrap_or_default(),
                arguments_json: normalize_arguments(&f.arguments),
            })
            .collect()
    }

    fn close_text(&mut self) -> Vec<TranslatedEvent> {
        if self.text_closed || self.accumulated_text.is_empty() {
            return Vec::new();
        }
        self.text_closed = true;
        vec![TranslatedEvent::TextDone {
            full_text: self.accumulated_text.clone(),
        }]
    }
}
