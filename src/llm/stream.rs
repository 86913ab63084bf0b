//! Lazy fragment sequence over an event-stream response body.
//!
//! Each `data:` line is one event. Bytes are buffered across reads and only
//! complete lines are decoded, so a frame or a multi-byte character split
//! between reads comes out whole. A trailing line without a newline is
//! decoded when the body ends. Dropping a [`FragmentStream`] drops the
//! transport body.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use futures_util::stream::{Stream, StreamExt};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, Sleep, sleep_until};

use crate::transport::ByteStream;

use super::backend::{CompletionBackend, FrameError, StreamFrame};
use super::error::CompletionError;

const DATA_FIELD: &str = "data:";

/// What to do with an event whose payload is not valid JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodePolicy {
    /// Log the event and keep streaming.
    #[default]
    Lenient,
    /// Abort the stream with [`CompletionError::Protocol`].
    Strict,
}

/// Splits raw body bytes into `data:` payloads.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
    payloads: VecDeque<String>,
}

impl LineBuffer {
    fn extend(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
        while let Some(end) = self.pending.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=end).collect();
            self.push_line(&line[..end]);
        }
    }

    /// Flush a final line that had no terminating newline.
    fn finish(&mut self) {
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.push_line(&line);
        }
    }

    fn push_line(&mut self, raw: &[u8]) {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        let line = String::from_utf8_lossy(raw);
        if let Some(data) = data_payload(&line) {
            self.payloads.push_back(data.to_string());
        }
    }

    fn next_payload(&mut self) -> Option<String> {
        self.payloads.pop_front()
    }
}

/// Payload of a `data:` line; other fields, comments and blank lines are `None`.
fn data_payload(line: &str) -> Option<&str> {
    let rest = line.strip_prefix(DATA_FIELD)?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

pub struct FragmentStream {
    body: ByteStream,
    lines: LineBuffer,
    body_done: bool,
    backend: Arc<dyn CompletionBackend>,
    policy: DecodePolicy,
    deadline: Pin<Box<Sleep>>,
    timeout_secs: u64,
    skipped_frames: u64,
    finished: bool,
}

impl fmt::Debug for FragmentStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FragmentStream")
            .field("backend", &self.backend)
            .field("policy", &self.policy)
            .field("timeout_secs", &self.timeout_secs)
            .field("skipped_frames", &self.skipped_frames)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl FragmentStream {
    pub(crate) fn new(
        body: ByteStream,
        backend: Arc<dyn CompletionBackend>,
        policy: DecodePolicy,
        deadline: Instant,
        timeout_secs: u64,
    ) -> Self {
        Self {
            body,
            lines: LineBuffer::default(),
            body_done: false,
            backend,
            policy,
            deadline: Box::pin(sleep_until(deadline)),
            timeout_secs,
            skipped_frames: 0,
            finished: false,
        }
    }

    /// Malformed events dropped under [`DecodePolicy::Lenient`].
    pub fn skipped_frames(&self) -> u64 {
        self.skipped_frames
    }

    pub fn policy(&self) -> DecodePolicy {
        self.policy
    }

    fn finish_with(
        &mut self,
        err: CompletionError,
    ) -> Poll<Option<Result<String, CompletionError>>> {
        self.finished = true;
        Poll::Ready(Some(Err(err)))
    }
}

impl Stream for FragmentStream {
    type Item = Result<String, CompletionError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        loop {
            if this.deadline.as_mut().poll(cx).is_ready() {
                let secs = this.timeout_secs;
                return this.finish_with(CompletionError::Timeout { secs });
            }

            let Some(data) = this.lines.next_payload() else {
                if this.body_done {
                    debug!("event stream closed without a terminal sentinel");
                    this.finished = true;
                    return Poll::Ready(None);
                }
                match ready!(this.body.poll_next_unpin(cx)) {
                    Some(Ok(chunk)) => this.lines.extend(&chunk),
                    Some(Err(err)) => return this.finish_with(CompletionError::from(err)),
                    None => {
                        this.lines.finish();
                        this.body_done = true;
                    }
                }
                continue;
            };

            match this.backend.decode_stream_frame(&data) {
                Ok(StreamFrame::Delta(text)) => return Poll::Ready(Some(Ok(text))),
                Ok(StreamFrame::Skip) => continue,
                Ok(StreamFrame::Done) => {
                    this.finished = true;
                    return Poll::Ready(None);
                }
                Err(FrameError::Malformed(message)) => match this.policy {
                    DecodePolicy::Lenient => {
                        warn!("skipping malformed stream event: {message}");
                        this.skipped_frames += 1;
                    }
                    DecodePolicy::Strict => {
                        return this.finish_with(CompletionError::Protocol { message });
                    }
                },
                Err(FrameError::Remote(message)) => {
                    return this.finish_with(CompletionError::Remote { message });
                }
            }
        }
    }
}
