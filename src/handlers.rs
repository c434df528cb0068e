use axum::{
    extract::{rejection::JsonRejection, FromRequestParts, Path, Query, State},
    http::{header, request::Parts, HeaderMap, HeaderName},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use chrono::NaiveDate;
use futures_util::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;

use crate::constants::{
    ACTING_USER_HEADER, ANALYSIS_DATE_FORMAT, CHAT_SYSTEM_PROMPT, CHAT_TEMPERATURE,
    RELAY_CHANNEL_CAPACITY, REQUEST_ID_HEADER, SSE_KEEPALIVE_SECS,
};
use crate::persistence::{PersistencePolicy, TranscriptOrigin};
use crate::registry::{ModelUpdate, NewModel};
use crate::specs::openai::{ChatCompletionRequest, ChatMessage};
use crate::streaming::StreamHandler;
use crate::types::{
    AnalysisTranscript, ApiKey, ApiResponse, ChatTranscript, FinanceError, ModelReference, Page,
    PageRequest, Result, StreamFrame,
};
use crate::AppState;

/// Caller identity forwarded by the authentication layer. `0` means no
/// specific user; such callers see and may delete every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActingUser(pub i64);

impl ActingUser {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let id = headers
            .get(ACTING_USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|id| *id > 0);
        match id {
            Some(id) => Self(id),
            None => Self(0),
        }
    }

    pub fn scope(&self) -> Option<i64> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0)
        }
    }

    /// Records owned by user 0 are deletable by anyone.
    pub fn authorize_delete(&self, owner: i64) -> Result<()> {
        if self.0 != 0 && owner != 0 && owner != self.0 {
            return Err(FinanceError::Forbidden("record belongs to another user".into()).into());
        }
        Ok(())
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for ActingUser
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        Ok(Self::from_headers(&parts.headers))
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub model_id: i64,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct AnalysisRequest {
    pub model_id: i64,
    #[serde(default)]
    pub start_date: String,
    #[serde(default)]
    pub end_date: String,
    #[serde(default)]
    pub prompt: String,
}

impl AnalysisRequest {
    fn validate(&self) -> Result<()> {
        let start = parse_date("start_date", &self.start_date)?;
        let end = parse_date("end_date", &self.end_date)?;
        if start > end {
            return Err(FinanceError::InvalidRequest(
                "start_date must not be after end_date".into(),
            )
            .into());
        }
        if self.prompt.trim().is_empty() {
            return Err(FinanceError::InvalidRequest("prompt is required".into()).into());
        }
        Ok(())
    }
}

fn parse_date(field: &str, value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), ANALYSIS_DATE_FORMAT).map_err(|_| {
        FinanceError::InvalidRequest(format!("{} must be formatted as YYYY-MM-DD", field)).into()
    })
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub model_id: Option<String>,
    pub page: Option<String>,
    pub page_size: Option<String>,
}

impl HistoryQuery {
    fn model_id(&self) -> Result<i64> {
        let raw = match self.model_id.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => raw,
            _ => return Err(FinanceError::InvalidRequest("model_id is required".into()).into()),
        };
        match raw.parse::<i64>() {
            Ok(id) => Ok(id),
            Err(_) => Err(FinanceError::InvalidRequest("model_id must be an integer".into()).into()),
        }
    }

    fn page_request(&self) -> PageRequest {
        PageRequest::from_params(self.page.as_deref(), self.page_size.as_deref())
    }
}

#[derive(Deserialize)]
pub struct CreateModelRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
}

/// Blank or missing fields are left unchanged.
#[derive(Deserialize)]
pub struct UpdateModelRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
}

fn reject_body(rejection: JsonRejection) -> FinanceError {
    FinanceError::InvalidRequest(rejection.body_text())
}

pub async fn chat_stream(
    State(state): State<Arc<AppState>>,
    user: ActingUser,
    headers: HeaderMap,
    payload: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response> {
    let Json(body) = payload.map_err(reject_body)?;
    if body.message.trim().is_empty() {
        return Err(FinanceError::InvalidRequest("message is required".into()).into());
    }

    let model = state.registry.find_model(body.model_id).await?;
    let request = ChatCompletionRequest::streaming(
        model.name.clone(),
        vec![
            ChatMessage::system(CHAT_SYSTEM_PROMPT),
            ChatMessage::user(body.message.clone()),
        ],
    )
    .with_temperature(CHAT_TEMPERATURE);
    let origin = TranscriptOrigin::Chat {
        message: body.message,
    };

    start_relay(&state, model, request, user, origin, &headers).await
}

pub async fn analysis_stream(
    State(state): State<Arc<AppState>>,
    user: ActingUser,
    headers: HeaderMap,
    payload: std::result::Result<Json<AnalysisRequest>, JsonRejection>,
) -> Result<Response> {
    let Json(body) = payload.map_err(reject_body)?;
    body.validate()?;

    let model = state.registry.find_model(body.model_id).await?;
    let request =
        ChatCompletionRequest::streaming(model.name.clone(), vec![ChatMessage::user(body.prompt)]);
    let origin = TranscriptOrigin::Analysis {
        start_date: body.start_date.trim().to_string(),
        end_date: body.end_date.trim().to_string(),
    };

    start_relay(&state, model, request, user, origin, &headers).await
}

/// Opens the upstream stream, then hands it to a relay task. Failures before
/// streaming become ordinary JSON errors.
async fn start_relay(
    state: &AppState,
    model: ModelReference,
    request: ChatCompletionRequest,
    user: ActingUser,
    origin: TranscriptOrigin,
    headers: &HeaderMap,
) -> Result<Response> {
    let lines = state.upstream.open_stream(&model, &request).await?;

    let request_id = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();
    let span = tracing::info_span!(
        "relay",
        request_id = %request_id,
        model_id = model.id,
        origin = origin.kind(),
        user_id = user.0
    );

    let policy = PersistencePolicy::new(state.transcripts.clone(), model.id, user.0, origin);
    let (tx, rx) = mpsc::channel(RELAY_CHANNEL_CAPACITY);
    tokio::spawn(
        async move {
            StreamHandler::handle_stream(lines, tx, policy).await;
        }
        .instrument(span),
    );

    Ok(sse_response(rx))
}

fn sse_response(rx: mpsc::Receiver<StreamFrame>) -> Response {
    let events = ReceiverStream::new(rx).map(|frame| Event::default().json_data(frame));
    let sse = Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(SSE_KEEPALIVE_SECS))
            .text("keepalive"),
    );
    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        sse,
    )
        .into_response()
}

pub async fn chat_history(
    State(state): State<Arc<AppState>>,
    user: ActingUser,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<ApiResponse<Page<ChatTranscript>>>> {
    let model_id = query.model_id()?;
    let page = state
        .transcripts
        .list_chat(model_id, user.scope(), query.page_request())
        .await?;
    Ok(Json(ApiResponse::success(page)))
}

pub async fn analysis_history(
    State(state): State<Arc<AppState>>,
    user: ActingUser,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<ApiResponse<Page<AnalysisTranscript>>>> {
    let model_id = query.model_id()?;
    let page = state
        .transcripts
        .list_analysis(model_id, user.scope(), query.page_request())
        .await?;
    Ok(Json(ApiResponse::success(page)))
}

pub async fn delete_chat_history(
    State(state): State<Arc<AppState>>,
    user: ActingUser,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<()>>> {
    let record = match state.transcripts.find_chat(id).await? {
        Some(r) => r,
        None => return Err(FinanceError::NotFound(format!("chat record {} not found", id)).into()),
    };
    user.authorize_delete(record.user_id)?;
    if !state.transcripts.soft_delete_chat(id).await? {
        return Err(FinanceError::NotFound(format!("chat record {} not found", id)).into());
    }
    tracing::info!(record_id = id, user_id = user.0, "Deleted chat record");
    Ok(Json(ApiResponse::message("deleted")))
}

pub async fn delete_analysis_history(
    State(state): State<Arc<AppState>>,
    user: ActingUser,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<()>>> {
    let record = match state.transcripts.find_analysis(id).await? {
        Some(r) => r,
        None => {
            return Err(
                FinanceError::NotFound(format!("analysis record {} not found", id)).into(),
            )
        }
    };
    user.authorize_delete(record.user_id)?;
    if !state.transcripts.soft_delete_analysis(id).await? {
        return Err(FinanceError::NotFound(format!("analysis record {} not found", id)).into());
    }
    tracing::info!(record_id = id, user_id = user.0, "Deleted analysis record");
    Ok(Json(ApiResponse::message("deleted")))
}

pub async fn list_models(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<ModelReference>>>> {
    let models = state.models.list_models().await?;
    Ok(Json(ApiResponse::success(models)))
}

pub async fn get_model(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<ModelReference>>> {
    let model = state.registry.find_model(id).await?;
    Ok(Json(ApiResponse::success(model)))
}

pub async fn create_model(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<CreateModelRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<ModelReference>>> {
    let Json(body) = payload.map_err(reject_body)?;
    let model = state
        .models
        .create_model(&NewModel {
            name: body.name,
            base_url: body.base_url,
            api_key: ApiKey::new(body.api_key),
        })
        .await?;
    Ok(Json(ApiResponse::success(model)))
}

pub async fn update_model(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    payload: std::result::Result<Json<UpdateModelRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<ModelReference>>> {
    let Json(body) = payload.map_err(reject_body)?;
    let update = ModelUpdate::from_fields(&body.name, &body.base_url, &body.api_key);
    let model = state.models.update_model(id, &update).await?;
    Ok(Json(ApiResponse::success(model)))
}

pub async fn check_model(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<()>>> {
    let model = state.registry.find_model(id).await?;
    state.upstream.check_model(&model).await?;
    Ok(Json(ApiResponse::message("model is reachable")))
}

pub async fn delete_model(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<()>>> {
    state.models.delete_model(id).await?;
    Ok(Json(ApiResponse::message("deleted")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_acting_user_from_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(ActingUser::from_headers(&headers), ActingUser(0));

        headers.insert(ACTING_USER_HEADER, HeaderValue::from_static("42"));
        assert_eq!(ActingUser::from_headers(&headers), ActingUser(42));

        headers.insert(ACTING_USER_HEADER, HeaderValue::from_static("-5"));
        assert_eq!(ActingUser::from_headers(&headers), ActingUser(0));

        headers.insert(ACTING_USER_HEADER, HeaderValue::from_static("abc"));
        assert_eq!(ActingUser::from_headers(&headers), ActingUser(0));
    }

    #[test]
    fn test_delete_authorization() {
        assert!(ActingUser(7).authorize_delete(7).is_ok());
        assert!(ActingUser(7).authorize_delete(0).is_ok());
        assert!(ActingUser(0).authorize_delete(9).is_ok());
        match ActingUser(7).authorize_delete(9) {
            Err(e) => assert!(matches!(e.inner, FinanceError::Forbidden(_))),
            Ok(_) => panic!("expected forbidden"),
        }
    }

    #[test]
    fn test_analysis_request_validation() {
        let mut req = AnalysisRequest {
            model_id: 1,
            start_date: "2026-01-01".into(),
            end_date: "2026-01-31".into(),
            prompt: "Summarize my spending".into(),
        };
        assert!(req.validate().is_ok());

        req.end_date = "2025-12-31".into();
        assert!(req.validate().is_err());

        req.end_date = "2026/01/31".into();
        assert!(req.validate().is_err());

        req.end_date = "2026-01-31".into();
        req.prompt = "  ".into();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_history_query_model_id() {
        let query = HistoryQuery {
            model_id: None,
            page: None,
            page_size: None,
        };
        assert!(query.model_id().is_err());

        let query = HistoryQuery {
            model_id: Some("12".into()),
            page: Some("2".into()),
            page_size: Some("1000".into()),
        };
        assert_eq!(query.model_id().ok(), Some(12));
        assert_eq!(query.page_request(), PageRequest { page: 2, page_size: 100 });
    }
}
