use crate::constants::{DATA_PREFIX, DONE_SENTINEL};
use crate::specs::openai::ChunkEnvelope;

/// Classification of one upstream line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    /// Non-empty text fragment of the generated output.
    Delta(String),
    /// Provider end-of-stream sentinel.
    Terminal,
    /// Anything that carries nothing for the client: blank lines, comments,
    /// other event fields, malformed payloads, role-only or usage chunks.
    Noise,
}

/// Classifies a raw upstream line. Never fails.
pub fn classify_line(raw: &str) -> LineEvent {
    let line = raw.trim();
    if line.is_empty() {
        return LineEvent::Noise;
    }

    let payload = match line.strip_prefix(DATA_PREFIX) {
        Some(p) => p,
        None => return LineEvent::Noise,
    };

    if payload == DONE_SENTINEL {
        return LineEvent::Terminal;
    }

    match serde_json::from_str::<ChunkEnvelope>(payload) {
        Ok(envelope) => match envelope.first_content() {
            Some(content) => LineEvent::Delta(content),
            None => LineEvent::Noise,
        },
        Err(e) => {
            tracing::debug!(
                error = %e,
                snippet = %snippet(payload, 200),
                "[STREAM] Unparsable data line dropped"
            );
            LineEvent::Noise
        }
    }
}

fn snippet(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
