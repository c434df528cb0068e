use async_trait::async_trait;

use crate::db::{now_timestamp, DbPool};
use crate::types::{
    AnalysisTranscript, ChatTranscript, NewAnalysisTranscript, NewChatTranscript, NewTranscript,
    Page, PageRequest, Result,
};

/// Durable record of completed exchanges. Deleted rows are never returned.
#[async_trait]
pub trait TranscriptStore: Send + Sync {
    async fn insert_chat(&self, transcript: &NewChatTranscript) -> Result<i64>;

    async fn insert_analysis(&self, transcript: &NewAnalysisTranscript) -> Result<i64>;

    /// Newest first. `user_id` of `None` lists every user's records.
    async fn list_chat(
        &self,
        model_id: i64,
        user_id: Option<i64>,
        page: PageRequest,
    ) -> Result<Page<ChatTranscript>>;

    async fn list_analysis(
        &self,
        model_id: i64,
        user_id: Option<i64>,
        page: PageRequest,
    ) -> Result<Page<AnalysisTranscript>>;

    async fn find_chat(&self, id: i64) -> Result<Option<ChatTranscript>>;

    async fn find_analysis(&self, id: i64) -> Result<Option<AnalysisTranscript>>;

    /// Returns `false` when nothing live matched.
    async fn soft_delete_chat(&self, id: i64) -> Result<bool>;

    async fn soft_delete_analysis(&self, id: i64) -> Result<bool>;

    async fn insert(&self, transcript: &NewTranscript) -> Result<i64> {
        match transcript {
            NewTranscript::Chat(chat) => self.insert_chat(chat).await,
            NewTranscript::Analysis(analysis) => self.insert_analysis(analysis).await,
        }
    }
}

#[derive(Clone)]
pub struct SqliteTranscriptStore {
    pool: DbPool,
}

impl SqliteTranscriptStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const CHAT_COLUMNS: &str = "id, ai_model_id, user_id, user_text, ai_text, created_at";
const ANALYSIS_COLUMNS: &str =
    "id, ai_model_id, user_id, start_date, end_date, result, created_at";

#[async_trait]
impl TranscriptStore for SqliteTranscriptStore {
    async fn insert_chat(&self, transcript: &NewChatTranscript) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO ai_chat_messages (ai_model_id, user_id, user_text, ai_text, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(transcript.model_id)
        .bind(transcript.user_id)
        .bind(&transcript.user_text)
        .bind(&transcript.ai_text)
        .bind(now_timestamp())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn insert_analysis(&self, transcript: &NewAnalysisTranscript) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO ai_analysis_histories
                (ai_model_id, user_id, start_date, end_date, result, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(transcript.model_id)
        .bind(transcript.user_id)
        .bind(&transcript.start_date)
        .bind(&transcript.end_date)
        .bind(&transcript.result)
        .bind(now_timestamp())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn list_chat(
        &self,
        model_id: i64,
        user_id: Option<i64>,
        page: PageRequest,
    ) -> Result<Page<ChatTranscript>> {
        let filter = SCOPE_FILTER;
        let (total,): (i64,) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FROM ai_chat_messages {}",
            filter
        ))
        .bind(model_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        let list = sqlx::query_as::<_, ChatTranscript>(&format!(
            "SELECT {} FROM ai_chat_messages {} ORDER BY created_at DESC, id DESC LIMIT ?3 OFFSET ?4",
            CHAT_COLUMNS, filter
        ))
        .bind(model_id)
        .bind(user_id)
        .bind(page.page_size)
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok(Page {
            total,
            page: page.page,
            page_size: page.page_size,
            list,
        })
    }

    async fn list_analysis(
        &self,
        model_id: i64,
        user_id: Option<i64>,
        page: PageRequest,
    ) -> Result<Page<AnalysisTranscript>> {
        let filter = SCOPE_FILTER;
        let (total,): (i64,) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FROM ai_analysis_histories {}",
            filter
        ))
        .bind(model_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        let list = sqlx::query_as::<_, AnalysisTranscript>(&format!(
            "SELECT {} FROM ai_analysis_histories {} ORDER BY created_at DESC, id DESC LIMIT ?3 OFFSET ?4",
            ANALYSIS_COLUMNS, filter
        ))
        .bind(model_id)
        .bind(user_id)
        .bind(page.page_size)
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok(Page {
            total,
            page: page.page,
            page_size: page.page_size,
            list,
        })
    }

    async fn find_chat(&self, id: i64) -> Result<Option<ChatTranscript>> {
        let row = sqlx::query_as::<_, ChatTranscript>(&format!(
            "SELECT {} FROM ai_chat_messages WHERE id = ? AND deleted_at IS NULL",
            CHAT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_analysis(&self, id: i64) -> Result<Option<AnalysisTranscript>> {
        let row = sqlx::query_as::<_, AnalysisTranscript>(&format!(
            "SELECT {} FROM ai_analysis_histories WHERE id = ? AND deleted_at IS NULL",
            ANALYSIS_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn soft_delete_chat(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE ai_chat_messages SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(now_timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn soft_delete_analysis(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE ai_analysis_histories SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(now_timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Binds `?1` model id and `?2` user id; a NULL user id disables the user
/// filter. Paging binds continue at `?3`.
const SCOPE_FILTER: &str =
    "WHERE ai_model_id = ?1 AND (?2 IS NULL OR user_id = ?2) AND deleted_at IS NULL";
