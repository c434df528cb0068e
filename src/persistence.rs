use std::sync::Arc;

use crate::store::TranscriptStore;
use crate::types::{NewAnalysisTranscript, NewChatTranscript, NewTranscript};

/// What the relay was started for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptOrigin {
    Chat { message: String },
    Analysis { start_date: String, end_date: String },
}

impl TranscriptOrigin {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Chat { .. } => "chat",
            Self::Analysis { .. } => "analysis",
        }
    }
}

/// Writes the transcript of a completed relay. Storage failures are logged
/// and swallowed; the client still gets its `done` frame.
#[derive(Clone)]
pub struct PersistencePolicy {
    store: Arc<dyn TranscriptStore>,
    model_id: i64,
    user_id: i64,
    origin: TranscriptOrigin,
}

impl PersistencePolicy {
    pub fn new(
        store: Arc<dyn TranscriptStore>,
        model_id: i64,
        user_id: i64,
        origin: TranscriptOrigin,
    ) -> Self {
        Self {
            store,
            model_id,
            user_id,
            origin,
        }
    }

    pub fn origin(&self) -> &TranscriptOrigin {
        &self.origin
    }

    pub fn transcript_for(&self, output: String) -> NewTranscript {
        match &self.origin {
            TranscriptOrigin::Chat { message } => NewTranscript::Chat(NewChatTranscript {
                model_id: self.model_id,
                user_id: self.user_id,
                user_text: message.clone(),
                ai_text: output,
            }),
            TranscriptOrigin::Analysis {
                start_date,
                end_date,
            } => NewTranscript::Analysis(NewAnalysisTranscript {
                model_id: self.model_id,
                user_id: self.user_id,
                start_date: start_date.clone(),
                end_date: end_date.clone(),
                result: output,
            }),
        }
    }

    /// Returns the new record id, or `None` if the write failed.
    pub async fn persist(&self, output: String) -> Option<i64> {
        let transcript = self.transcript_for(output);
        let chars = transcript.output().chars().count();
        match self.store.insert(&transcript).await {
            Ok(id) => {
                tracing::info!(
                    transcript_id = id,
                    origin = self.origin.kind(),
                    model_id = self.model_id,
                    user_id = self.user_id,
                    chars,
                    "Transcript saved"
                );
                Some(id)
            }
            Err(e) => {
                tracing::error!(
                    origin = self.origin.kind(),
                    model_id = self.model_id,
                    user_id = self.user_id,
                    error = %e.inner,
                    "Failed to save transcript"
                );
                None
            }
        }
    }
}
