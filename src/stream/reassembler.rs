//! 流帧重组器
//!
//! 传输层交来的字节块边界没有任何语义：一个逻辑事件可能横跨
//! 多个块，一个块也可能装着好几个事件。这里维护内部字节缓冲，
//! 按 SSE 的事件分隔符切出完整的帧；尾部的半截帧留在缓冲里等
//! 下一次 `feed`。下游一律拿到整帧，字节边界无关性由本模块
//! 独自保证。

use bytes::BytesMut;

/// 缓冲上限，超过后只保留尾部（防御不含分隔符的恶意/损坏流）
const MAX_BUFFER_BYTES: usize = 512 * 1024;
const TAIL_KEEP_BYTES: usize = 128 * 1024;

/// SSE 帧重组器
#[derive(Debug, Default)]
pub struct StreamFrameReassembler {
    buffer: BytesMut,
}

impl StreamFrameReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 喂入一个字节块，返回其中完整出帧的事件
    ///
    /// 只返回完全分隔的帧；尾部未闭合的部分留待下次。
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        loop {
            let Some((pos, delimiter_len)) = find_frame_delimiter(self.buffer.as_ref()) else {
                break;
            };
            let frame_bytes = self.buffer.split_to(pos);
            let _ = self.buffer.split_to(delimiter_len);

            let frame = String::from_utf8_lossy(frame_bytes.as_ref()).into_owned();
            if !frame.trim().is_empty() {
                frames.push(frame);
            }
        }

        if self.buffer.len() > MAX_BUFFER_BYTES {
            tracing::warn!(
                "[SSE] 缓冲超过 {} 字节仍未见分隔符，截断为尾部 {} 字节",
                MAX_BUFFER_BYTES,
                TAIL_KEEP_BYTES
            );
            let keep_from = self.buffer.len().saturating_sub(TAIL_KEEP_BYTES);
            self.buffer = self.buffer.split_off(keep_from);
        }

        frames
    }

    /// 流结束：尾部若是一个缺了结尾分隔符但可解析的完整事件，
    /// 把它交出去；否则丢弃并记一条警告。绝不 panic。
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let leftover = String::from_utf8_lossy(self.buffer.as_ref()).into_owned();
        self.buffer.clear();

        if leftover.trim().is_empty() {
            return None;
        }
        if extract_data(&leftover).is_some() {
            return Some(leftover);
        }
        tracing::warn!(
            "[SSE] 丢弃流尾部 {} 字节无法解析的残留",
            leftover.len()
        );
        None
    }

    /// 当前缓冲的字节数（测试用）
    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }
}

/// 在缓冲里找最早的帧分隔符
///
/// 单趟前向扫描，混合换行风格也会在最早的事件边界切开，
/// 而不是取决于先搜到哪种分隔符。
fn find_frame_delimiter(buf: &[u8]) -> Option<(usize, usize)> {
    let mut idx = 0usize;
    while idx + 1 < buf.len() {
        if buf[idx] == b'\n' && buf[idx + 1] == b'\n' {
            return Some((idx, 2));
        }
        if idx + 3 < buf.len()
            && buf[idx] == b'\r'
            && buf[idx + 1] == b'\n'
            && buf[idx + 2] == b'\r'
            && buf[idx + 3] == b'\n'
        {
            return Some((idx, 4));
        }
        idx += 1;
    }
    None
}

/// 从一个完整帧里抽出 data 负载
///
/// 多个 `data:` 行按 SSE 规则以换行拼接；`event:` 行和 `:` 注释
/// 行跳过；行尾的 `\r` 容忍。没有任何 data 行时返回 `None`。
pub fn extract_data(frame: &str) -> Option<String> {
    let mut out = String::new();
    for line in frame.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        let Some(rest) = line.strip_prefix("data:") else {
            continue;
        };
        let rest = rest.strip_prefix(' ').unwrap_or(rest);
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(rest);
    }
    (!out.is_empty()).then_some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_chunk_many_frames() {
        let mut r = StreamFrameReassembler::new();
        let frames = r.feed(b"data: {\"a\":1}\n\ndata: {\"b\":2}\n\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(extract_data(&frames[0]).unwrap(), "{\"a\":1}");
        assert_eq!(extract_data(&frames[1]).unwrap(), "{\"b\":2}");
        assert_eq!(r.buffered_bytes(), 0);
    }

    #[test]
    fn test_frame_spanning_chunks() {
        let mut r = StreamFrameReassembler::new();
        assert!(r.feed(b"data: {\"text\":").is_empty());
        assert!(r.feed(b"\"hello\"}").is_empty());
        let frames = r.feed(b"\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(extract_data(&frames[0]).unwrap(), "{\"text\":\"hello\"}");
    }

    #[test]
    fn test_byte_by_byte_equals_whole() {
        let input = b"event: x\ndata: {\"a\":1}\n\ndata: [DONE]\n\n";

        let mut whole = StreamFrameReassembler::new();
        let whole_frames = whole.feed(input);

        let mut tiny = StreamFrameReassembler::new();
        let mut tiny_frames = Vec::new();
        for b in input.iter() {
            tiny_frames.extend(tiny.feed(std::slice::from_ref(b)));
        }

        assert_eq!(whole_frames, tiny_frames);
    }

    #[test]
    fn test_crlf_delimiters() {
        let mut r = StreamFrameReassembler::new();
        let frames = r.feed(b"data: one\r\n\r\ndata: two\r\n\r\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(extract_data(&frames[0]).unwrap(), "one");
        assert_eq!(extract_data(&frames[1]).unwrap(), "two");
    }

    #[test]
    fn test_mixed_newline_styles_split_at_earliest() {
        let mut r = StreamFrameReassembler::new();
        let frames = r.feed(b"data: a\n\ndata: b\r\n\r\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(extract_data(&frames[0]).unwrap(), "a");
        assert_eq!(extract_data(&frames[1]).unwrap(), "b");
    }

    #[test]
    fn test_finish_salvages_complete_trailing_event() {
        let mut r = StreamFrameReassembler::new();
        assert!(r.feed(b"data: {\"a\":1}").is_empty());
        let leftover = r.finish().unwrap();
        assert_eq!(extract_data(&leftover).unwrap(), "{\"a\":1}");
        assert_eq!(r.buffered_bytes(), 0);
    }

    #[test]
    fn test_finish_discards_garbage() {
        let mut r = StreamFrameReassembler::new();
        assert!(r.feed(b"garbage without data line").is_empty());
        assert!(r.finish().is_none());
        assert!(r.finish().is_none());
    }

    #[test]
    fn test_extract_data_joins_multiple_lines() {
        assert_eq!(
            extract_data("data: line1\ndata: line2").unwrap(),
            "line1\nline2"
        );
        assert_eq!(extract_data(": comment\nevent: ping"), None);
        assert_eq!(extract_data("data:no-space").unwrap(), "no-space");
    }

    #[test]
    fn test_empty_frames_are_skipped() {
        let mut r = StreamFrameReassembler::new();
        let frames = r.feed(b"\n\n\n\ndata: x\n\n");
        assert_eq!(frames.len(), 1);
    }
}
