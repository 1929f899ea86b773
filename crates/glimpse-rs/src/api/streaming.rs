//! Server-Sent Events (SSE) streaming for OpenAI-compatible chat completions.
//!
//! Provides [`StreamEvent`], an incremental [`SseDecoder`], and the
//! [`ChatClient::chat_stream`] method. After every chunk the accumulated,
//! reasoning-stripped answer is pushed to the caller so a viewer can render
//! the summary while it is being written.

use crate::error::{ResearchError, Result};
use crate::{ChatClient, PartialSink, Prompt, api_error_message};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// A single event decoded from an SSE stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// An incremental text content delta.
    TextDelta(String),
    /// An incremental reasoning delta (servers that split reasoning out).
    ReasoningDelta(String),
    /// The stream is complete (`data: [DONE]`).
    Done,
}

#[derive(Deserialize, Debug)]
struct StreamChunk {
    choices: Option<Vec<StreamChoice>>,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    delta: Option<StreamDelta>,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamDelta {
    content: Option<String>,
    #[serde(alias = "reasoning_content")]
    reasoning: Option<String>,
}

/// Line-oriented SSE decoder. Feed raw bytes, get events for every complete
/// `data:` line. Comment lines and blank keep-alives are skipped.
///
/// Bytes are buffered until a newline arrives, so a UTF-8 sequence split
/// across network chunks is decoded whole.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `data: [DONE]` has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Decode all complete lines contained in `bytes` (plus any buffered
    /// remainder from earlier calls).
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();
        while !self.done
            && let Some(newline_pos) = self.buffer.iter().position(|&b| b == b'\n')
        {
            let line: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            self.decode_line(String::from_utf8_lossy(&line).trim(), &mut events);
        }
        events
    }

    /// Decode whatever is left in the buffer (an unterminated final line).
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        let remaining = std::mem::take(&mut self.buffer);
        if !self.done {
            self.decode_line(String::from_utf8_lossy(&remaining).trim(), &mut events);
        }
        if !self.done {
            self.done = true;
            events.push(StreamEvent::Done);
        }
        events
    }

    fn decode_line(&mut self, line: &str, events: &mut Vec<StreamEvent>) {
        if line.is_empty() || line.starts_with(':') {
            return;
        }
        let Some(data) = line
            .strip_prefix("data:")
            .map(str::trim_start)
        else {
            return;
        };
        if data == "[DONE]" {
            self.done = true;
            events.push(StreamEvent::Done);
            return;
        }
        parse_sse_data(data, events);
    }
}

/// Parse a single SSE `data:` payload into stream events.
fn parse_sse_data(data: &str, events: &mut Vec<StreamEvent>) {
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => {
            for choice in chunk.choices.unwrap_or_default() {
                if let Some(delta) = choice.delta {
                    if let Some(content) = delta.content
                        && !content.is_empty()
                    {
                        events.push(StreamEvent::TextDelta(content));
                    }
                    if let Some(reasoning) = delta.reasoning
                        && !reasoning.is_empty()
                    {
                        events.push(StreamEvent::ReasoningDelta(reasoning));
                    }
                }
                if choice.finish_reason.is_some() {
                    trace!("Stream finish_reason: {:?}", choice.finish_reason);
                }
            }
        }
        Err(e) => {
            warn!("Failed to parse SSE chunk: {e} - data: {data}");
        }
    }
}

/// Assemble the text content from a sequence of stream events.
pub fn collect_text(events: &[StreamEvent]) -> String {
    let mut text = String::new();
    for event in events {
        if let StreamEvent::TextDelta(delta) = event {
            text.push_str(delta);
        }
    }
    text
}

impl ChatClient {
    /// Send a chat completion request with SSE streaming.
    ///
    /// `on_partial` receives the accumulated, reasoning-stripped answer after
    /// every chunk that changed it. Returns the final stripped answer.
    pub async fn chat_stream(
        &self,
        prompt: &Prompt,
        cancel: &CancellationToken,
        on_partial: PartialSink<'_>,
    ) -> Result<String> {
        let body = self.request_body(prompt, true);
        debug!(
            "Sending streaming chat request: model={}, mode={:?}",
            body.model, prompt.mode
        );

        let send = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send();
        let mut resp = tokio::select! {
            _ = cancel.cancelled() => return Err(ResearchError::Cancelled),
            r = send => r?,
        };

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(ResearchError::Api(api_error_message(status, &text)));
        }

        let mut decoder = SseDecoder::new();
        let mut raw = String::new();
        let mut last_pushed = String::new();
        let mut chunks = 0usize;

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Err(ResearchError::Cancelled),
                c = resp.chunk() => c.map_err(|e| {
                    ResearchError::Transport(format!("failed to read streaming chunk: {e}"))
                })?,
            };
            let events = match next {
                Some(bytes) => decoder.feed(&bytes),
                None => decoder.finish(),
            };
            chunks += 1;

            for event in &events {
                if let StreamEvent::TextDelta(delta) = event {
                    raw.push_str(delta);
                }
            }
            let visible = self.filter.strip_partial(&raw);
            if visible != last_pushed {
                on_partial(&visible);
                last_pushed = visible;
            }

            if decoder.is_done() {
                break;
            }
        }

        debug!(
            "Stream completed after {} chunk(s), {} chars",
            chunks,
            raw.len()
        );
        let final_text = self.filter.strip(&raw);
        if final_text != last_pushed {
            on_partial(&final_text);
        }
        Ok(final_text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(content: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({"choices":[{"delta":{"content":content}}]})
        )
    }

    #[test]
    fn decodes_split_lines_across_feeds() {
        let mut dec = SseDecoder::new();
        let line = chunk("Hello");
        let (a, b) = line.split_at(10);
        assert!(dec.feed(a.as_bytes()).is_empty());
        let events = dec.feed(b.as_bytes());
        assert_eq!(events, vec![StreamEvent::TextDelta("Hello".into())]);
    }

    #[test]
    fn multibyte_char_split_across_feeds() {
        let mut dec = SseDecoder::new();
        let line = chunk("日本");
        let bytes = line.as_bytes();
        // One byte into the three-byte '日'.
        let cut = line.find('日').unwrap() + 1;
        assert!(dec.feed(&bytes[..cut]).is_empty());
        let events = dec.feed(&bytes[cut..]);
        assert_eq!(events, vec![StreamEvent::TextDelta("日本".into())]);
    }

    #[test]
    fn done_terminates_and_ignores_trailing_data() {
        let mut dec = SseDecoder::new();
        let input = format!("{}data: [DONE]\n{}", chunk("a"), chunk("b"));
        let events = dec.feed(input.as_bytes());
        assert_eq!(
            events,
            vec![StreamEvent::TextDelta("a".into()), StreamEvent::Done]
        );
        assert!(dec.is_done());
        assert!(dec.finish().is_empty());
    }

    #[test]
    fn comments_and_keepalives_skipped() {
        let mut dec = SseDecoder::new();
        let input = format!(": keep-alive\n\n{}", chunk("x"));
        assert_eq!(
            dec.feed(input.as_bytes()),
            vec![StreamEvent::TextDelta("x".into())]
        );
    }

    #[test]
    fn finish_flushes_unterminated_line() {
        let mut dec = SseDecoder::new();
        let line = chunk("tail");
        dec.feed(line.trim_end().as_bytes());
        let events = dec.finish();
        assert_eq!(
            events,
            vec![StreamEvent::TextDelta("tail".into()), StreamEvent::Done]
        );
    }

    #[test]
    fn reasoning_content_alias() {
        let mut dec = SseDecoder::new();
        let input = "data: {\"choices\":[{\"delta\":{\"reasoning_content\":\"hmm\"}}]}\n";
        assert_eq!(
            dec.feed(input.as_bytes()),
            vec![StreamEvent::ReasoningDelta("hmm".into())]
        );
    }

    #[test]
    fn malformed_chunk_is_skipped() {
        let mut dec = SseDecoder::new();
        let input = format!("data: {{not json\n{}", chunk("ok"));
        assert_eq!(
            dec.feed(input.as_bytes()),
            vec![StreamEvent::TextDelta("ok".into())]
        );
    }

    #[test]
    fn collect_text_from_deltas() {
        let events = vec![
            StreamEvent::TextDelta("Hello ".into()),
            StreamEvent::ReasoningDelta("ignored".into()),
            StreamEvent::TextDelta("world!".into()),
            StreamEvent::Done,
        ];
        assert_eq!(collect_text(&events), "Hello world!");
    }
}
