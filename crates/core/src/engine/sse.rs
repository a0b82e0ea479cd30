//! Incremental Server-Sent-Events decoder.
//!
//! Bytes arrive in arbitrary chunks; a frame is complete only once its blank
//! line terminator has been seen. Handles `\r\n` line endings, multi-line
//! `data:` fields and `:` comment lines (keep-alives).

use crate::engine::base::StreamFrame;

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every frame it completed.
    pub fn push(&mut self, chunk: &str) -> Vec<StreamFrame> {
        self.buffer.push_str(chunk);
        let mut frames = Vec::new();
        while let Some(block) = self.next_block() {
            if let Some(frame) = parse_block(&block) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Whether a partial frame is still buffered.
    pub fn has_pending(&self) -> bool {
        !self.buffer.trim().is_empty()
    }

    fn next_block(&mut self) -> Option<String> {
        let (end, delim_len) = [("\r\n\r\n", 4), ("\n\n", 2), ("\r\r", 2)]
            .iter()
            .filter_map(|(delim, len)| self.buffer.find(delim).map(|i| (i, *len)))
            .min_by_key(|(i, _)| *i)?;
        let block = self.buffer[..end].to_string();
        self.buffer.drain(..end + delim_len);
        Some(block)
    }
}

fn parse_block(block: &str) -> Option<StreamFrame> {
    let mut id = None;
    let mut event = None;
    let mut data_lines: Vec<&str> = Vec::new();

    for raw in block.lines() {
        let line = raw.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => data_lines.push(value),
            "event" => event = Some(value.to_string()),
            "id" => id = Some(value.to_string()),
            _ => {}
        }
    }

    if data_lines.is_empty() {
        return None;
    }

    Some(StreamFrame {
        id,
        event: event.unwrap_or_else(|| "message".to_string()),
        data: data_lines.join("\n"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_event_with_id() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push("id: 7\nevent: status\ndata: {\"status\":\"executing\"}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].id.as_deref(), Some("7"));
        assert_eq!(frames[0].event, "status");
        assert_eq!(frames[0].data, "{\"status\":\"executing\"}");
    }

    #[test]
    fn test_frame_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push("event: thinking\ndata: {\"con").is_empty());
        assert!(decoder.has_pending());
        let frames = decoder.push("tent\":\"hi\"}\n\nevent: step_complete\ndata: {}\n\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data, "{\"content\":\"hi\"}");
        assert_eq!(frames[1].event, "step_complete");
        assert!(!decoder.has_pending());
    }

    #[test]
    fn test_crlf_and_multiline_data() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push("event: terminal\r\ndata: line one\r\ndata: line two\r\n\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "line one\nline two");
    }

    #[test]
    fn test_comments_and_empty_frames_skipped() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(": keep-alive\n\nevent: ping\n\ndata:no-space\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "message");
        assert_eq!(frames[0].data, "no-space");
    }
}
