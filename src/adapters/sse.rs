//! Server-Sent Events decoding for upstream response bodies.

use std::{borrow::Cow, collections::VecDeque, pin::Pin};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use super::{AdapterError, AdapterResult, ChunkStream};

/// Buffers incoming byte chunks into complete SSE blocks, normalizing CRLF.
pub(crate) struct ChunkProcessor {
    pending: String,
}

impl ChunkProcessor {
    pub fn new() -> Self {
        Self {
            pending: String::new(),
        }
    }

    pub fn push_chunk(&mut self, chunk: &[u8]) {
        let text = String::from_utf8_lossy(chunk);
        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\r' && chars.peek() == Some(&'\n') {
                continue;
            }
            self.pending.push(c);
        }
    }

    /// Next complete block (terminated by a blank line), if buffered.
    pub fn next_block(&mut self) -> Option<String> {
        loop {
            let pos = self.pending.find("\n\n")?;
            let block = self.pending[..pos].to_string();
            self.pending.drain(..pos + 2);
            if !block.trim().is_empty() {
                return Some(block);
            }
        }
    }

    pub fn has_remaining(&self) -> bool {
        !self.pending.trim().is_empty()
    }

    pub fn take_remaining(&mut self) -> String {
        std::mem::take(&mut self.pending)
    }
}

/// Extract the joined `data:` payload of one SSE block.
pub(crate) fn block_data(block: &str) -> Cow<'_, str> {
    let mut data_lines: Vec<&str> = Vec::new();
    for line in block.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.trim_start());
        }
    }
    if data_lines.len() == 1 {
        Cow::Borrowed(data_lines[0])
    } else {
        Cow::Owned(data_lines.join("\n"))
    }
}

/// Interpretation of one `data:` payload by a provider-specific parser.
pub(crate) enum SseData {
    /// A content delta to forward
    Text(String),
    /// End-of-stream marker
    Done,
    /// A frame with nothing to forward (role deltas, usage, keep-alives)
    Skip,
}

pub(crate) type DataParser = fn(&str) -> AdapterResult<SseData>;

struct DecodeState {
    body: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    processor: ChunkProcessor,
    queue: VecDeque<AdapterResult<String>>,
    done: bool,
    parse: DataParser,
}

impl DecodeState {
    fn handle_block(&mut self, block: &str) {
        let data = block_data(block);
        if data.is_empty() {
            return;
        }
        match (self.parse)(&data) {
            Ok(SseData::Text(text)) => {
                if !text.is_empty() {
                    self.queue.push_back(Ok(text));
                }
            }
            Ok(SseData::Done) => self.done = true,
            Ok(SseData::Skip) => {}
            Err(err) => {
                self.queue.push_back(Err(err));
                self.done = true;
            }
        }
    }
}

/// Decode an SSE response body into a stream of text chunks.
///
/// Built directly over the response body so dropping the returned stream
/// drops the connection. The `parse` hook maps each `data:` payload to
/// chunks in the provider's wire format.
pub(crate) fn decode_sse_body(response: reqwest::Response, parse: DataParser) -> ChunkStream {
    let state = DecodeState {
        body: Box::pin(response.bytes_stream()),
        processor: ChunkProcessor::new(),
        queue: VecDeque::new(),
        done: false,
        parse,
    };

    Box::pin(futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.queue.pop_front() {
                return Some((item, state));
            }
            if state.done {
                return None;
            }
            match state.body.next().await {
                Some(Ok(bytes)) => {
                    state.processor.push_chunk(&bytes);
                    while let Some(block) = state.processor.next_block() {
                        state.handle_block(&block);
                        if state.done {
                            break;
                        }
                    }
                }
                Some(Err(err)) => {
                    state
                        .queue
                        .push_back(Err(AdapterError::Network(err.to_string())));
                    state.done = true;
                }
                None => {
                    // Upstream closed; a trailing block without its blank
                    // line is still decoded.
                    state.done = true;
                    if state.processor.has_remaining() {
                        let rest = state.processor.take_remaining();
                        state.handle_block(&rest);
                    }
                }
            }
        }
    }))
}
