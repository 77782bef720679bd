use crate::error::DecodeError;
use crate::protocol::{Event, decode_event};

const EVENT_DELIMITER: &str = "\n\n";
const DATA_PREFIX: &str = "data:";

/// Incremental decoder for a `text/event-stream` body.
///
/// Chunks may split an event, its delimiter, a CRLF pair or a UTF-8 sequence
/// anywhere; whatever is incomplete stays buffered until the next call.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    pending: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let text = take_utf8(&mut self.pending);
        self.push(&text)
    }

    /// Appends `chunk` and returns every payload completed by it, in order.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        if chunk.is_empty() {
            return Vec::new();
        }

        self.buffer.push_str(chunk);
        // Normalized over the whole buffer so a CR/LF pair split across two
        // chunks is still caught.
        if self.buffer.contains('\r') {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }

        let mut payloads = Vec::new();
        while let Some(idx) = self.buffer.find(EVENT_DELIMITER) {
            let block: String = self.buffer.drain(..idx + EVENT_DELIMITER.len()).collect();
            let block = &block[..idx];

            match extract_data(block) {
                Some(payload) => payloads.push(payload),
                None if is_ignorable(block) => {}
                None => {
                    tracing::warn!(block = %truncate(block, 120), "skipping event without data field");
                }
            }
        }
        payloads
    }

    /// Consumes the decoder, returning any unterminated remainder.
    pub fn finish(self) -> Option<String> {
        let mut rest = self.buffer;
        if !self.pending.is_empty() {
            rest.push_str(&String::from_utf8_lossy(&self.pending));
        }
        let rest = rest.trim();
        if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        }
    }
}

/// `SseDecoder` followed by per-payload validation into `Event`s.
#[derive(Debug, Default)]
pub struct EventDecoder {
    sse: SseDecoder,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Result<Event, DecodeError>> {
        self.sse
            .push_bytes(bytes)
            .iter()
            .map(|payload| decode_event(payload))
            .collect()
    }

    /// Ends the stream. An unterminated trailing event is reported and dropped.
    pub fn finish(self) {
        if let Some(rest) = self.sse.finish() {
            tracing::warn!(
                bytes = rest.len(),
                fragment = %truncate(&rest, 120),
                "stream ended inside an unterminated event"
            );
        }
    }
}

fn extract_data(block: &str) -> Option<String> {
    let mut data_lines = Vec::new();
    for line in block.lines() {
        if let Some(data) = line.strip_prefix(DATA_PREFIX) {
            data_lines.push(data.trim());
        }
    }

    if data_lines.is_empty() {
        None
    } else {
        Some(data_lines.join("\n").trim().to_string())
    }
}

// Blank separators and `:` comment lines (keep-alives).
fn is_ignorable(block: &str) -> bool {
    block
        .lines()
        .all(|line| line.trim().is_empty() || line.starts_with(':'))
}

fn take_utf8(pending: &mut Vec<u8>) -> String {
    let mut out = String::new();
    loop {
        let (valid, invalid_len) = match std::str::from_utf8(pending) {
            Ok(text) => {
                out.push_str(text);
                pending.clear();
                return out;
            }
            Err(err) => (err.valid_up_to(), err.error_len()),
        };

        out.push_str(&String::from_utf8_lossy(&pending[..valid]));
        match invalid_len {
            Some(len) => {
                out.push(char::REPLACEMENT_CHARACTER);
                pending.drain(..valid + len);
            }
            // Incomplete sequence at the end: wait for the rest of it.
            None => {
                pending.drain(..valid);
                return out;
            }
        }
    }
}

fn truncate(value: &str, max: usize) -> &str {
    match value.char_indices().nth(max) {
        Some((end, _)) => &value[..end],
        None => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &str = concat!(
        "data: {\"author\":\"planner_agent\",\"content\":{\"parts\":[{\"text\":\"plan ready\"}]}}\n\n",
        ": keep-alive\n\n",
        "data: {\"author\":\"coder_agent\",\"content\":{\"parts\":[{\"text\":\"héllo ✓\"}]}}\r\n\r\n",
        "event: message\ndata: {\"author\":\"fixer_agent\",\n",
        "data: \"errorCode\":\"SAFETY\"}\n\n",
        "data: not json\n\n",
        "data: {\"author\":\"tail\""
    );

    fn decode_whole(input: &[u8]) -> Vec<String> {
        let mut decoder = SseDecoder::new();
        decoder.push_bytes(input)
    }

    fn decode_split(input: &[u8], cuts: &[usize]) -> Vec<String> {
        let mut decoder = SseDecoder::new();
        let mut out = Vec::new();
        let mut start = 0;
        for &cut in cuts {
            out.extend(decoder.push_bytes(&input[start..cut]));
            start = cut;
        }
        out.extend(decoder.push_bytes(&input[start..]));
        out
    }

    #[test]
    fn whole_stream_yields_payloads_in_order() {
        let payloads = decode_whole(STREAM.as_bytes());
        assert_eq!(
            payloads,
            vec![
                "{\"author\":\"planner_agent\",\"content\":{\"parts\":[{\"text\":\"plan ready\"}]}}",
                "{\"author\":\"coder_agent\",\"content\":{\"parts\":[{\"text\":\"héllo ✓\"}]}}",
                "{\"author\":\"fixer_agent\",\n\"errorCode\":\"SAFETY\"}",
                "not json",
            ]
        );
    }

    #[test]
    fn every_single_split_point_matches_whole_stream() {
        let bytes = STREAM.as_bytes();
        let expected = decode_whole(bytes);
        for cut in 0..=bytes.len() {
            assert_eq!(decode_split(bytes, &[cut]), expected, "split at {cut}");
        }
    }

    #[test]
    fn byte_at_a_time_matches_whole_stream() {
        let bytes = STREAM.as_bytes();
        let cuts: Vec<usize> = (1..bytes.len()).collect();
        assert_eq!(decode_split(bytes, &cuts), decode_whole(bytes));
    }

    #[test]
    fn two_way_splits_match_whole_stream() {
        let bytes = STREAM.as_bytes();
        let expected = decode_whole(bytes);
        for first in (0..bytes.len()).step_by(7) {
            for second in (first..=bytes.len()).step_by(5) {
                assert_eq!(decode_split(bytes, &[first, second]), expected);
            }
        }
    }

    #[test]
    fn empty_and_undelimited_input_yield_nothing() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push("").is_empty());
        assert!(decoder.push("data: {\"author\":\"a\"}").is_empty());
        assert!(decoder.push("\n").is_empty());
        assert_eq!(decoder.push("\n"), vec!["{\"author\":\"a\"}"]);
    }

    #[test]
    fn finish_returns_unterminated_remainder() {
        let mut decoder = SseDecoder::new();
        decoder.push("data: one\n\ndata: {\"partial\"");
        assert_eq!(decoder.finish().as_deref(), Some("data: {\"partial\""));

        let mut decoder = SseDecoder::new();
        decoder.push("data: one\n\n");
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn invalid_utf8_is_replaced_not_dropped() {
        let mut decoder = SseDecoder::new();
        let payloads = decoder.push_bytes(b"data: a\xffb\n\n");
        assert_eq!(payloads, vec!["a\u{FFFD}b"]);
    }

    #[test]
    fn event_decoder_isolates_bad_payloads() {
        let mut decoder = EventDecoder::new();
        let events = decoder.feed(STREAM.as_bytes());
        assert_eq!(events.len(), 4);
        assert_eq!(events[0].as_ref().unwrap().author, "planner_agent");
        assert_eq!(events[1].as_ref().unwrap().author, "coder_agent");
        assert_eq!(
            events[2].as_ref().unwrap().error_code.as_deref(),
            Some("SAFETY")
        );
        assert!(matches!(events[3], Err(DecodeError::Json(_))));
        decoder.finish();
    }
}
