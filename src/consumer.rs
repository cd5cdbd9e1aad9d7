//! Turns an HTTP response into text chunks, either from one JSON document
//! or from a `data:` event stream.

use crate::config::PipelineSettings;
use crate::constants::{MAX_ERROR_BODY_CHARS, SSE_DATA_PREFIX, SSE_TERMINATORS};
use crate::content_path::ContentPath;
use crate::str_utils::truncate_with_ellipsis;
use crate::transport::{ByteStream, TransportResponse};
use crate::types::{TextChunk, TextStream, WirecastError};
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    WholeBody,
    EventStream,
}

impl ResponseMode {
    pub fn from_streaming(streaming: bool) -> Self {
        if streaming {
            ResponseMode::EventStream
        } else {
            ResponseMode::WholeBody
        }
    }
}

/// Newline framing for event streams. A trailing partial line stays in the
/// buffer until the next read completes it.
#[derive(Debug, Clone)]
pub struct EventLineCodec {
    max_line_bytes: usize,
    next_index: usize,
}

impl EventLineCodec {
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            max_line_bytes,
            next_index: 0,
        }
    }

    fn too_long(&self) -> WirecastError {
        WirecastError::StreamRead(format!(
            "Event-stream line exceeded {} bytes",
            self.max_line_bytes
        ))
    }
}

fn line_to_string(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

impl Decoder for EventLineCodec {
    type Item = String;
    type Error = WirecastError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, WirecastError> {
        let start = self.next_index.min(buf.len());
        match buf[start..].iter().position(|b| *b == b'\n') {
            Some(offset) => {
                let newline = start + offset;
                self.next_index = 0;
                if newline > self.max_line_bytes {
                    return Err(self.too_long());
                }
                let line = buf.split_to(newline + 1);
                Ok(Some(line_to_string(&line[..newline])))
            }
            None => {
                if buf.len() > self.max_line_bytes {
                    return Err(self.too_long());
                }
                self.next_index = buf.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, WirecastError> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        if buf.is_empty() {
            return Ok(None);
        }
        self.next_index = 0;
        let rest = buf.split_to(buf.len());
        Ok(Some(line_to_string(&rest)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLine<'a> {
    Data(&'a str),
    Done,
    Ignored,
}

pub fn classify_line(line: &str) -> EventLine<'_> {
    let Some(payload) = line.trim_start().strip_prefix(SSE_DATA_PREFIX) else {
        return EventLine::Ignored;
    };
    let payload = payload.trim();
    if payload.is_empty() {
        EventLine::Ignored
    } else if SSE_TERMINATORS.contains(&payload) {
        EventLine::Done
    } else {
        EventLine::Data(payload)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum LineOutcome {
    Emit(TextChunk),
    Skip,
    Overflow(String),
}

/// Per-invocation event decoding state.
pub struct EventStreamState {
    path: ContentPath,
    max_lines: usize,
    lines_seen: usize,
}

impl EventStreamState {
    pub fn new(path: ContentPath, max_lines: usize) -> Self {
        Self {
            path,
            max_lines,
            lines_seen: 0,
        }
    }

    pub fn handle_line(&mut self, line: &str) -> LineOutcome {
        self.lines_seen += 1;
        if self.lines_seen > self.max_lines {
            tracing::error!("Event stream exceeded max line limit ({})", self.max_lines);
            return LineOutcome::Overflow(format!(
                "Stream read error: response exceeded {} lines",
                self.max_lines
            ));
        }
        match classify_line(line) {
            EventLine::Data(payload) => match serde_json::from_str::<serde_json::Value>(payload) {
                Ok(event) => {
                    let delta = self.path.resolve_text(&event);
                    if delta.is_empty() {
                        LineOutcome::Skip
                    } else {
                        LineOutcome::Emit(TextChunk(delta))
                    }
                }
                Err(e) => {
                    // Expected when an event straddles a read boundary
                    tracing::debug!("Skipping malformed event payload: {}", e);
                    LineOutcome::Skip
                }
            },
            EventLine::Done => {
                tracing::debug!("Stream end marker received");
                LineOutcome::Skip
            }
            EventLine::Ignored => LineOutcome::Skip,
        }
    }
}

/// Whole-body extraction: exactly one chunk, possibly empty.
pub fn extract_whole_body(bytes: &[u8], path: &ContentPath) -> TextChunk {
    match serde_json::from_slice::<serde_json::Value>(bytes) {
        Ok(value) => TextChunk(path.resolve_text(&value)),
        Err(e) => {
            tracing::error!("Response body is not valid JSON: {}", e);
            WirecastError::ResponseParse(e.to_string()).to_chunk()
        }
    }
}

enum ReadOutcome {
    Chunk(Bytes),
    Finished,
    Failed(WirecastError),
    Cancelled,
}

async fn read_next(body: &mut ByteStream, cancel: &CancellationToken) -> ReadOutcome {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => ReadOutcome::Cancelled,
        item = body.next() => match item {
            Some(Ok(bytes)) => ReadOutcome::Chunk(bytes),
            Some(Err(e)) => ReadOutcome::Failed(e),
            None => ReadOutcome::Finished,
        },
    }
}

enum ReadAll {
    Complete(Vec<u8>),
    Failed(WirecastError),
    Cancelled,
}

async fn read_to_end(body: &mut ByteStream, cancel: &CancellationToken) -> ReadAll {
    let mut collected = Vec::new();
    loop {
        match read_next(body, cancel).await {
            ReadOutcome::Chunk(bytes) => collected.extend_from_slice(&bytes),
            ReadOutcome::Finished => return ReadAll::Complete(collected),
            ReadOutcome::Failed(e) => return ReadAll::Failed(e),
            ReadOutcome::Cancelled => return ReadAll::Cancelled,
        }
    }
}

fn release(body: ByteStream, stage: &str) {
    tracing::debug!("Cancellation observed during {}; releasing response body", stage);
    drop(body);
}

/// Consumes a response according to `mode`. Checks `cancel` before every
/// body read; on cancellation the body is dropped and nothing more is
/// yielded.
pub fn consume_response(
    response: TransportResponse,
    mode: ResponseMode,
    path: ContentPath,
    settings: PipelineSettings,
    cancel: CancellationToken,
) -> TextStream {
    Box::pin(async_stream::stream! {
        let status = response.status;
        let success = response.is_success();
        let mut body = response.body;

        if !success {
            let text = match read_to_end(&mut body, &cancel).await {
                ReadAll::Complete(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                ReadAll::Failed(e) => {
                    tracing::debug!("Could not read error body: {}", e);
                    String::new()
                }
                ReadAll::Cancelled => {
                    release(body, "error body read");
                    return;
                }
            };
            tracing::error!("Upstream returned status {}", status);
            let text = truncate_with_ellipsis(&text, MAX_ERROR_BODY_CHARS);
            yield WirecastError::http_status(status, &text).to_chunk();
            return;
        }

        match mode {
            ResponseMode::WholeBody => match read_to_end(&mut body, &cancel).await {
                ReadAll::Complete(bytes) => {
                    yield extract_whole_body(&bytes, &path);
                }
                ReadAll::Failed(e) => {
                    if cancel.is_cancelled() {
                        return;
                    }
                    tracing::error!("Failed reading response body: {}", e);
                    yield e.to_chunk();
                }
                ReadAll::Cancelled => release(body, "body read"),
            },
            ResponseMode::EventStream => {
                let mut codec = EventLineCodec::new(settings.max_line_bytes);
                let mut state = EventStreamState::new(path, settings.max_stream_lines);
                let mut buf = BytesMut::new();
                loop {
                    let at_eof = match read_next(&mut body, &cancel).await {
                        ReadOutcome::Chunk(bytes) => {
                            buf.extend_from_slice(&bytes);
                            false
                        }
                        ReadOutcome::Finished => true,
                        ReadOutcome::Failed(e) => {
                            if cancel.is_cancelled() {
                                return;
                            }
                            tracing::error!("Event stream read failed: {}", e);
                            yield e.to_chunk();
                            return;
                        }
                        ReadOutcome::Cancelled => {
                            release(body, "event stream read");
                            return;
                        }
                    };

                    loop {
                        let decoded = if at_eof {
                            codec.decode_eof(&mut buf)
                        } else {
                            codec.decode(&mut buf)
                        };
                        match decoded {
                            Ok(Some(line)) => match state.handle_line(&line) {
                                LineOutcome::Emit(chunk) => {
                                    yield chunk;
                                }
                                LineOutcome::Skip => {}
                                LineOutcome::Overflow(msg) => {
                                    yield TextChunk(msg);
                                    return;
                                }
                            },
                            Ok(None) => break,
                            Err(e) => {
                                tracing::error!("Event stream framing failed: {}", e);
                                yield e.to_chunk();
                                return;
                            }
                        }
                    }

                    if at_eof {
                        break;
                    }
                }
            }
        }
    })
}
