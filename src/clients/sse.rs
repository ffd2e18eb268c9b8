use tracing::warn;

/// 未结束事件允许缓冲的最大字节数
const MAX_PENDING_BYTES: usize = 1024 * 1024;

/// Server-Sent Events 帧解码
///
/// 只关心 `data:` 字段；空行结束一个事件，多行 data 以 `\n` 连接。
/// 行尾可以是 `\r\n`、`\n` 或单独的 `\r`。
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    /// 上一个字节是 `\r`，紧跟的 `\n` 属于同一个行尾
    after_cr: bool,
    /// 超长事件被丢弃，直到下一个空行
    discarding: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一段字节，返回已经完整的事件数据
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        for &byte in chunk {
            match byte {
                b'\r' => {
                    self.buffer.push(b'\n');
                    self.after_cr = true;
                }
                b'\n' if self.after_cr => self.after_cr = false,
                _ => {
                    self.buffer.push(byte);
                    self.after_cr = false;
                }
            }
        }

        let mut events = Vec::new();
        while let Some(end) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let frame: Vec<u8> = self.buffer.drain(..end + 2).collect();
            if self.discarding {
                self.discarding = false;
                continue;
            }
            if let Some(data) = parse_frame(&String::from_utf8_lossy(&frame)) {
                events.push(data);
            }
        }

        if self.buffer.len() > MAX_PENDING_BYTES {
            warn!(
                "⚠️  SSE 事件超过 {} 字节仍未结束，已丢弃",
                MAX_PENDING_BYTES
            );
            self.buffer.clear();
            self.discarding = true;
        }
        events
    }

    /// 缓冲区中尚未结束的字节数
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

fn parse_frame(frame: &str) -> Option<String> {
    let mut data_lines = Vec::new();
    for line in frame.lines() {
        if line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }

    if data_lines.is_empty() {
        None
    } else {
        Some(data_lines.join("\n"))
    }
}
