use serde::de::IgnoredAny;

/// Incremental decoder for a `text/event-stream` body.
///
/// Bytes are buffered until a full line is available, so chunk boundaries may fall anywhere,
/// including inside a multi-byte character. An event is dispatched at a blank line; its
/// `data:` lines are joined with `\n` when they form one JSON document together, and are
/// dispatched one by one otherwise. Comment lines and other fields are ignored.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return the payloads of every event it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        while let Some(end) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=end).collect();
            let line = String::from_utf8_lossy(&raw[..end]);
            payloads.extend(self.line(line.strip_suffix('\r').unwrap_or(&line)));
        }
        payloads
    }

    /// Flush whatever is left once the stream has closed
    pub fn finish(&mut self) -> Vec<String> {
        if !self.buffer.is_empty() {
            let raw = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&raw).into_owned();
            let payloads = self.line(line.strip_suffix('\r').unwrap_or(&line));
            if !payloads.is_empty() {
                return payloads;
            }
        }
        self.dispatch()
    }

    fn line(&mut self, line: &str) -> Vec<String> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return Vec::new();
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            self.data.push(value.to_string());
        }
        Vec::new()
    }

    fn dispatch(&mut self) -> Vec<String> {
        let lines = std::mem::take(&mut self.data);
        if lines.len() < 2 {
            return lines;
        }
        let joined = lines.join("\n");
        if serde_json::from_str::<IgnoredAny>(&joined).is_ok() {
            vec![joined]
        } else {
            lines
        }
    }
}
