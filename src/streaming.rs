use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::codec::LinesCodecError;

use crate::constants::MAX_STREAM_LINES;
use crate::logging::RelayMetric;
use crate::persistence::PersistencePolicy;
use crate::translator::{classify_line, LineEvent};
use crate::types::StreamFrame;
use crate::upstream::UpstreamLines;

/// Lifecycle of one relay. Every state except `Streaming` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Streaming,
    Completed,
    Cancelled,
    Failed,
}

impl RelayState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayFailure {
    /// Upstream body broke mid-read. The client gets no further frames.
    ReadFault(String),
    /// Upstream sent more lines than a single answer can need.
    LineLimit,
}

#[derive(Debug, Clone)]
pub struct RelayOutcome {
    pub state: RelayState,
    /// In-order concatenation of every emitted delta.
    pub text: String,
    pub deltas: usize,
    pub failure: Option<RelayFailure>,
    pub transcript_id: Option<i64>,
}

#[derive(Default)]
struct RelayAccumulator {
    text: String,
    lines: usize,
    /// Set after an over-long line. The codec yields one `None` while it
    /// discards the rest of that line; that `None` is not end of stream.
    resyncing: bool,
    failure: Option<RelayFailure>,
    metric: RelayMetric,
}

pub struct StreamHandler;

impl StreamHandler {
    /// Drives one upstream line source to a terminal state, forwarding deltas
    /// to `tx`. A closed `tx` means the client went away.
    pub async fn handle_stream(
        mut lines: UpstreamLines,
        tx: mpsc::Sender<StreamFrame>,
        policy: PersistencePolicy,
    ) -> RelayOutcome {
        let mut acc = RelayAccumulator::default();
        let mut state = RelayState::Streaming;

        while state == RelayState::Streaming {
            if tx.is_closed() {
                tracing::debug!("Client disconnected, stopping stream");
                state = RelayState::Cancelled;
                break;
            }

            let next = tokio::select! {
                biased;
                _ = tx.closed() => {
                    tracing::debug!("Client disconnected while awaiting upstream");
                    state = RelayState::Cancelled;
                    break;
                }
                next = lines.next() => next,
            };

            state = Self::process_line(next, &mut acc, &tx).await;
        }

        Self::finish_stream(state, acc, &tx, &policy).await
    }

    async fn process_line(
        next: Option<Result<String, LinesCodecError>>,
        acc: &mut RelayAccumulator,
        tx: &mpsc::Sender<StreamFrame>,
    ) -> RelayState {
        let line = match next {
            None if acc.resyncing => {
                acc.resyncing = false;
                return RelayState::Streaming;
            }
            None => {
                tracing::debug!(lines = acc.lines, "Upstream closed without end marker");
                return RelayState::Completed;
            }
            Some(Ok(line)) => {
                acc.resyncing = false;
                line
            }
            Some(Err(e)) => return Self::handle_line_error(e, acc),
        };

        acc.lines += 1;
        if acc.lines > MAX_STREAM_LINES {
            tracing::error!(limit = MAX_STREAM_LINES, "Stream exceeded max line limit");
            acc.failure = Some(RelayFailure::LineLimit);
            return RelayState::Failed;
        }

        match classify_line(&line) {
            LineEvent::Noise => {
                acc.metric.record_noise();
                RelayState::Streaming
            }
            LineEvent::Terminal => {
                tracing::debug!("Stream end marker received");
                RelayState::Completed
            }
            LineEvent::Delta(content) => {
                acc.text.push_str(&content);
                acc.metric.record_delta(&content);
                if tx.send(StreamFrame::delta(content)).await.is_err() {
                    tracing::debug!("Client disconnected, stopping stream");
                    return RelayState::Cancelled;
                }
                RelayState::Streaming
            }
        }
    }

    fn handle_line_error(err: LinesCodecError, acc: &mut RelayAccumulator) -> RelayState {
        match err {
            LinesCodecError::MaxLineLengthExceeded => {
                tracing::warn!("Dropping over-long upstream line");
                acc.lines += 1;
                acc.resyncing = true;
                acc.metric.record_noise();
                RelayState::Streaming
            }
            LinesCodecError::Io(e) => {
                tracing::error!(error = %e, "Upstream read failed");
                acc.failure = Some(RelayFailure::ReadFault(e.to_string()));
                RelayState::Failed
            }
        }
    }

    async fn finish_stream(
        state: RelayState,
        acc: RelayAccumulator,
        tx: &mpsc::Sender<StreamFrame>,
        policy: &PersistencePolicy,
    ) -> RelayOutcome {
        let mut transcript_id = None;
        match state {
            RelayState::Completed => {
                transcript_id = policy.persist(acc.text.clone()).await;
                if tx.send(StreamFrame::Done).await.is_err() {
                    tracing::debug!("Client left before done frame");
                }
            }
            RelayState::Failed => {
                if acc.failure == Some(RelayFailure::LineLimit) {
                    let _ = tx
                        .send(StreamFrame::error("stream exceeded max line limit"))
                        .await;
                    // Send done after error so clients stop waiting.
                    let _ = tx.send(StreamFrame::Done).await;
                }
            }
            RelayState::Cancelled | RelayState::Streaming => {}
        }

        acc.metric.log_summary(state, policy.origin().kind());

        RelayOutcome {
            state,
            deltas: acc.metric.deltas,
            text: acc.text,
            failure: acc.failure,
            transcript_id,
        }
    }
}
