//! 流处理管线
//!
//! 把字节重组与协议翻译装配成一条管线：传输层进来的任意切分
//! 的字节块，出去的是有序的目标协议事件。同时提供一个异步流
//! 包装，带取消令牌：客户端一侧断开后立刻停止消费上游，丢弃
//! 会话状态，不补发任何收尾事件。

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::stream::events::TranslatedEvent;
use crate::stream::reassembler::StreamFrameReassembler;
use crate::stream::translator::ProtocolEventTranslator;

/// 重组器 + 翻译器的同步管线
#[derive(Debug)]
pub struct StreamPipeline {
    session_id: String,
    reassembler: StreamFrameReassembler,
    translator: ProtocolEventTranslator,
}

impl Default for StreamPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamPipeline {
    pub fn new() -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().simple().to_string(),
            reassembler: StreamFrameReassembler::new(),
            translator: ProtocolEventTranslator::new(),
        }
    }

    /// 会话标识（日志用）
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// 处理一个传输层字节块
    pub fn process_chunk(&mut self, chunk: &[u8]) -> Vec<TranslatedEvent> {
        let mut events = Vec::new();
        for frame in self.reassembler.feed(chunk) {
            events.extend(self.translator.handle_frame(&frame));
        }
        events
    }

    /// 上游正常结束：处理尾帧残留并补发收尾事件
    pub fn finish(&mut self) -> Vec<TranslatedEvent> {
        let mut events = Vec::new();
        if let Some(leftover) = self.reassembler.finish() {
            events.extend(self.translator.handle_frame(&leftover));
        }
        events.extend(self.translator.finish());
        events
    }

    /// 会话是否已终止
    pub fn is_terminal(&self) -> bool {
        self.translator.is_terminal()
    }
}

/// 把上游字节流翻译成目标协议事件流
///
/// 取消令牌触发后立刻停止消费上游并结束输出流，进行中的会话
/// 状态直接丢弃，不发 `TextDone`/`Completed`。
pub fn translate_byte_stream<S>(
    byte_stream: S,
    cancel: CancellationToken,
) -> impl Stream<Item = TranslatedEvent>
where
    S: Stream<Item = Bytes>,
{
    async_stream::stream! {
        let mut pipeline = StreamPipeline::new();
        tokio::pin!(byte_stream);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(
                        "[PIPELINE] 会话 {} 被取消，丢弃会话状态",
                        pipeline.session_id()
                    );
                    return;
                }
                chunk = byte_stream.next() => {
                    match chunk {
                        Some(bytes) => {
                            for event in pipeline.process_chunk(&bytes) {
                                yield event;
                            }
                            if pipeline.is_terminal() {
                                return;
                            }
                        }
                        None => {
                            for event in pipeline.finish() {
                                yield event;
                            }
                            return;
                        }
                    }
                }
            }
        }
    }
}
