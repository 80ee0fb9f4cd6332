const BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

/// One dispatched server-sent event. Only the fields a completion stream
/// uses are kept.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

impl SseFrame {
    /// OpenAI-style streams end with a literal `[DONE]` payload.
    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

/// Incremental decoder for a `text/event-stream` body. Bytes can be fed in
/// arbitrary slices; a line is only decoded once its terminator has arrived,
/// so multi-byte characters split across chunks survive.
#[derive(Debug, Default)]
pub struct SseParser {
    pending: Vec<u8>,
    frame: SseFrame,
    has_fields: bool,
    bom_checked: bool,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.pending.extend_from_slice(chunk);

        if !self.bom_checked {
            let n = self.pending.len().min(BOM.len());
            if self.pending[..n] != BOM[..n] {
                self.bom_checked = true;
            } else if n == BOM.len() {
                self.pending.drain(..BOM.len());
                self.bom_checked = true;
            } else {
                return Vec::new();
            }
        }

        let mut frames = Vec::new();
        while let Some((line_end, next_start)) = self.next_line_break() {
            let line = String::from_utf8_lossy(&self.pending[..line_end]).into_owned();
            self.pending.drain(..next_start);

            if line.is_empty() {
                if self.has_fields {
                    frames.push(std::mem::take(&mut self.frame));
                    self.has_fields = false;
                }
            } else {
                self.take_field(&line);
            }
        }
        frames
    }

    /// Flushes an event left open by a body that ended without a blank line.
    pub fn finish(&mut self) -> Option<SseFrame> {
        if !self.pending.is_empty() {
            let line = String::from_utf8_lossy(&std::mem::take(&mut self.pending)).into_owned();
            self.take_field(line.trim_end_matches('\r'));
        }
        if self.has_fields {
            self.has_fields = false;
            Some(std::mem::take(&mut self.frame))
        } else {
            None
        }
    }

    // Accepts LF, CRLF and bare CR. A trailing CR waits for the next chunk
    // in case an LF follows.
    fn next_line_break(&self) -> Option<(usize, usize)> {
        let idx = self.pending.iter().position(|&b| b == b'\n' || b == b'\r')?;
        if self.pending[idx] == b'\n' {
            return Some((idx, idx + 1));
        }
        match self.pending.get(idx + 1) {
            Some(b'\n') => Some((idx, idx + 2)),
            Some(_) => Some((idx, idx + 1)),
            None => None,
        }
    }

    fn take_field(&mut self, line: &str) {
        if line.starts_with(':') {
            return;
        }
        let (name, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);

        match name {
            "data" => {
                if self.has_fields && !self.frame.data.is_empty() {
                    self.frame.data.push('\n');
                }
                self.frame.data.push_str(value);
                self.has_fields = true;
            }
            "event" => {
                self.frame.event = Some(value.to_string());
                self.has_fields = true;
            }
            _ => {}
        }
    }
}
