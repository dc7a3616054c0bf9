use bytes::Bytes;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental server-sent-events parser.
///
/// Feed raw bytes as they arrive; complete events are returned as soon as
/// their terminating blank line has been seen. Partial lines are buffered
/// across calls.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    event: Option<String>,
    data_lines: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&mut self, chunk: &Bytes) -> Vec<SseEvent> {
        match std::str::from_utf8(chunk) {
            Ok(text) => self.push_str(text),
            Err(_) => Vec::new(),
        }
    }

    pub fn push_str(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.find('\n') {
            let mut line = self.buffer[..pos].to_string();
            self.buffer.drain(..=pos);
            if line.ends_with('\r') {
                line.pop();
            }
            self.take_line(&line, &mut events);
        }

        events
    }

    /// Flush whatever remains after the upstream closed mid-event.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let mut line = std::mem::take(&mut self.buffer);
            if line.ends_with('\r') {
                line.pop();
            }
            self.take_line(&line, &mut events);
        }
        self.flush_pending(&mut events);
        events
    }

    fn take_line(&mut self, line: &str, events: &mut Vec<SseEvent>) {
        if line.is_empty() {
            self.flush_pending(events);
            return;
        }
        // Comment lines keep streams alive; they carry no payload.
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.find(':') {
            Some(idx) => (&line[..idx], line[idx + 1..].trim_start()),
            None => (line, ""),
        };
        match field {
            "event" => {
                self.event = (!value.is_empty()).then(|| value.to_string());
            }
            "data" => self.data_lines.push(value.to_string()),
            _ => {}
        }
    }

    fn flush_pending(&mut self, events: &mut Vec<SseEvent>) {
        if self.event.is_none() && self.data_lines.is_empty() {
            return;
        }
        events.push(SseEvent {
            event: self.event.take(),
            data: self.data_lines.join("\n"),
        });
        self.data_lines.clear();
    }
}

/// Encode one event as wire bytes. Multi-line data gets one `data:` line
/// per input line.
pub fn encode(event: Option<&str>, data: &str) -> Bytes {
    let mut out = String::new();
    if let Some(event) = event {
        out.push_str("event: ");
        out.push_str(event);
        out.push('\n');
    }
    for line in data.split('\n') {
        out.push_str("data: ");
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
    Bytes::from(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_named_events_split_across_reads() {
        let mut parser = SseParser::new();
        assert!(parser.push_str("event: message_start\nda").is_empty());
        let events = parser.push_str("ta: {\"a\":1}\n\n");
        assert_eq!(
            events,
            vec![SseEvent {
                event: Some("message_start".to_string()),
                data: "{\"a\":1}".to_string(),
            }]
        );
    }

    #[test]
    fn joins_multiple_data_lines() {
        let mut parser = SseParser::new();
        let events = parser.push_str("data: one\ndata: two\n\n");
        assert_eq!(events[0].data, "one\ntwo");
    }

    #[test]
    fn ignores_comments_and_handles_crlf() {
        let mut parser = SseParser::new();
        let events = parser.push_str(": keep-alive\r\ndata: x\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "x");
    }

    #[test]
    fn finish_flushes_unterminated_event() {
        let mut parser = SseParser::new();
        assert!(parser.push_str("data: tail").is_empty());
        let events = parser.finish();
        assert_eq!(events[0].data, "tail");
    }

    #[test]
    fn encode_round_trips_through_parser() {
        let bytes = encode(Some("delta"), "{\"t\":\"x\"}");
        let mut parser = SseParser::new();
        let events = parser.push_bytes(&bytes);
        assert_eq!(events[0].event.as_deref(), Some("delta"));
        assert_eq!(events[0].data, "{\"t\":\"x\"}");
    }
}
