//! 流式协议转换子系统
//!
//! 把 chat 风格的上游 SSE 流实时翻译成事件风格的目标协议流，
//! 以及同一映射表下的非流式整体转换。
//!
//! # 架构
//!
//! ```text
//! 传输层字节块
//!     │  StreamFrameReassembler（字节边界无关）
//!     ▼
//! 完整 SSE 帧
//!     │  ProtocolEventTranslator（显式状态机）
//!     ▼
//! TranslatedEvent 有序序列
//! ```
//!
//! - `chat`: 源协议（chat 补全风格）的宽松线格式类型
//! - `events`: 目标协议事件与共用字段映射表
//! - `reassembler`: SSE 帧重组（保证字节边界无关性）
//! - `translator`: 会话状态机（保证事件顺序不变量）
//! - `nonstream`: 非流式整体转换（与流式共用映射表）
//! - `pipeline`: 装配层与带取消的异步流包装

pub mod chat;
pub mod events;
pub mod nonstream;
pub mod pipeline;
pub mod reassembler;
pub mod translator;

pub use events::{OutputItem, ResponseBody, TranslatedEvent, UsageTotals};
pub use pipeline::{translate_byte_stream, StreamPipeline};
pub use reassembler::StreamFrameReassembler;
pub use translator::ProtocolEventTranslator;
