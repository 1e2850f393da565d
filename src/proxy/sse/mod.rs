// SSE (Server-Sent Events) scanning
//
// The backend always streams, even when the client asked for a plain JSON
// response. Each event is a `data: <json>` line; the final one is typed
// `response.completed` (older deployments send `response.done`) and carries
// the full response object under `response`.
//
// Scanning is incremental: chunks arrive split at arbitrary byte offsets, so
// the scanner keeps the unterminated tail of the previous chunk and only
// parses complete lines. Splitting on `\n` bytes never cuts a UTF-8 sequence.

use serde_json::Value;

/// Event types that carry the final response payload
pub const COMPLETION_EVENTS: &[&str] = &["response.done", "response.completed"];

// ============================================================================
// SSE Detection
// ============================================================================

/// Check if a response is SSE based on content-type header
pub fn is_sse_response(headers: &reqwest::header::HeaderMap) -> bool {
    headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.contains("text/event-stream"))
        .unwrap_or(false)
}

// ============================================================================
// Completion Scanner
// ============================================================================

/// Incremental scanner that remembers the first completion payload
#[derive(Debug, Default)]
pub struct SseCompletionScanner {
    partial: Vec<u8>,
    completion: Option<Value>,
    events: usize,
}

impl SseCompletionScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk of bytes
    pub fn feed(&mut self, chunk: &[u8]) {
        self.partial.extend_from_slice(chunk);
        let partial = std::mem::take(&mut self.partial);

        let mut start = 0;
        while let Some(offset) = partial[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset + 1;
            self.scan_line(&partial[start..end]);
            start = end;
        }

        // Keep only the unterminated tail
        self.partial = partial;
        self.partial.drain(..start);
    }

    /// Flush a final line that had no trailing newline
    pub fn finish(&mut self) {
        if !self.partial.is_empty() {
            let line = std::mem::take(&mut self.partial);
            self.scan_line(&line);
        }
    }

    fn scan_line(&mut self, bytes: &[u8]) {
        if self.completion.is_some() {
            return;
        }
        let line = String::from_utf8_lossy(bytes);
        let Some(data) = parse_sse_data_line(line.trim_end_matches(['\r', '\n'])) else {
            return;
        };
        self.events += 1;

        let event_type = data.get("type").and_then(|v| v.as_str()).unwrap_or("");
        if COMPLETION_EVENTS.contains(&event_type) {
            if let Some(response) = data.get("response").filter(|r| r.is_object()) {
                self.completion = Some(response.clone());
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completion.is_some()
    }

    pub fn into_completion(self) -> Option<Value> {
        self.completion
    }

    /// Data events parsed so far (up to and including the completion)
    pub fn events(&self) -> usize {
        self.events
    }
}

// ============================================================================
// Internal Helpers
// ============================================================================

/// Parse an SSE "data:" line into JSON
///
/// Returns None if:
/// - Line doesn't start with "data:"
/// - Data is empty or "[DONE]"
/// - JSON parsing fails
fn parse_sse_data_line(line: &str) -> Option<Value> {
    let json_str = line.strip_prefix("data:")?.trim();
    if json_str.is_empty() || json_str == "[DONE]" {
        return None;
    }
    serde_json::from_str(json_str).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn find_completion(body: &str) -> Option<Value> {
        let mut scanner = SseCompletionScanner::new();
        scanner.feed(body.as_bytes());
        scanner.finish();
        scanner.into_completion()
    }

    const STREAM: &str = "event: response.created\n\
data: {\"type\":\"response.created\",\"response\":{\"id\":\"resp_1\",\"status\":\"in_progress\"}}\n\
\n\
event: response.output_text.delta\n\
data: {\"type\":\"response.output_text.delta\",\"delta\":\"Hi\"}\n\
\n\
event: response.completed\n\
data: {\"type\":\"response.completed\",\"response\":{\"id\":\"resp_1\",\"status\":\"completed\"}}\n\
\n";

    #[test]
    fn test_finds_completed_payload() {
        assert_eq!(
            find_completion(STREAM),
            Some(json!({"id": "resp_1", "status": "completed"}))
        );
    }

    #[test]
    fn test_chunk_boundaries_do_not_matter() {
        let bytes = STREAM.as_bytes();
        for split in [1, 7, 33, 100, bytes.len() - 3] {
            let mut scanner = SseCompletionScanner::new();
            for chunk in bytes.chunks(split) {
                scanner.feed(chunk);
            }
            scanner.finish();
            assert!(scanner.is_complete(), "chunk size {}", split);
            assert_eq!(scanner.events(), 3);
        }
    }

    #[test]
    fn test_many_lines_in_one_chunk_keep_tail() {
        let mut big = String::new();
        for i in 0..5_000 {
            big.push_str(&format!(
                "data: {{\"type\":\"response.output_text.delta\",\"delta\":\"{}\"}}\n\n",
                i
            ));
        }
        big.push_str("data: {\"type\":\"response.completed\",");

        let mut scanner = SseCompletionScanner::new();
        scanner.feed(big.as_bytes());
        assert_eq!(scanner.events(), 5_000);
        assert!(!scanner.is_complete());

        scanner.feed(b"\"response\":{\"id\":\"r\"}}\n");
        assert_eq!(scanner.events(), 5_001);
        assert_eq!(scanner.into_completion(), Some(json!({"id": "r"})));
    }

    #[test]
    fn test_first_completion_wins() {
        let body = "data: {\"type\":\"response.done\",\"response\":{\"n\":1}}\n\
data: {\"type\":\"response.completed\",\"response\":{\"n\":2}}\n";
        assert_eq!(find_completion(body), Some(json!({"n": 1})));
    }

    #[test]
    fn test_missing_trailing_newline_and_crlf() {
        let body = "data: {\"type\":\"response.completed\",\"response\":{\"ok\":true}}\r";
        assert_eq!(find_completion(body), Some(json!({"ok": true})));
    }

    #[test]
    fn test_no_completion() {
        assert_eq!(find_completion("data: [DONE]\n"), None);
        assert_eq!(find_completion("{\"error\":\"bad\"}"), None);
        assert_eq!(
            find_completion("data: {\"type\":\"response.completed\"}\n"),
            None
        );
    }

    #[test]
    fn test_is_sse_response() {
        let mut headers = reqwest::header::HeaderMap::new();
        assert!(!is_sse_response(&headers));
        headers.insert(
            "content-type",
            "text/event-stream; charset=utf-8".parse().unwrap(),
        );
        assert!(is_sse_response(&headers));
    }
}
