use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use chrono::Local;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::{wrappers::UnboundedReceiverStream, StreamExt};
use tokio_util::io::ReaderStream;
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;

use super::artifact::artifact_file_name;
use super::generation::{generate_video, GenerationEvent};
use super::session::SessionSnapshot;
use super::types::{ApiKey, AspectRatio, GenerationRequest, PersonPolicy};
use crate::app_state::AppState;
use crate::consts::DOWNLOAD_FILE_PREFIX;
use crate::error::{ApiError, VideoGenError};

type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

#[derive(Serialize, ToSchema)]
pub struct CreateSessionResponse {
    pub session_id: Uuid,
}

#[derive(Serialize, ToSchema)]
pub struct CancelResponse {
    pub cancelled: bool,
}

/// Form input for one generation. The key is used for this request only.
#[derive(Deserialize, ToSchema)]
pub struct GenerateVideoBody {
    pub api_key: String,
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    #[serde(default)]
    pub aspect_ratio: AspectRatio,
    #[serde(default)]
    pub person_generation: PersonPolicy,
}

impl GenerateVideoBody {
    fn into_parts(self) -> Result<(GenerationRequest, ApiKey), VideoGenError> {
        let request = GenerationRequest::new(self.prompt)?
            .with_negative_prompt(self.negative_prompt)
            .with_aspect_ratio(self.aspect_ratio)
            .with_person_policy(self.person_generation);
        let api_key = ApiKey::new(self.api_key)?;
        Ok((request, api_key))
    }
}

#[utoipa::path(
    post,
    path = "/sessions",
    responses(
        (status = 200, description = "Session created", body = CreateSessionResponse),
    ),
    tag = "VIDEOGEN"
)]
#[instrument(skip(state))]
pub async fn create_session(State(state): State<Arc<AppState>>) -> Json<CreateSessionResponse> {
    let session = state.sessions.create().await;
    let active_sessions = state.sessions.len().await;
    tracing::info!(session = %session.id(), active_sessions, "Session created");
    Json(CreateSessionResponse {
        session_id: session.id(),
    })
}

#[utoipa::path(
    get,
    path = "/sessions/{session_id}",
    params(("session_id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Current session state", body = SessionSnapshot),
        (status = 404, description = "Unknown session", body = ApiError),
    ),
    tag = "VIDEOGEN"
)]
#[instrument(skip(state))]
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<SessionSnapshot>> {
    let session = state.sessions.get(&session_id).await?;
    Ok(Json(session.snapshot()))
}

#[utoipa::path(
    delete,
    path = "/sessions/{session_id}",
    params(("session_id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 204, description = "Session removed, running generation cancelled"),
        (status = 404, description = "Unknown session", body = ApiError),
    ),
    tag = "VIDEOGEN"
)]
#[instrument(skip(state))]
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.sessions.remove(&session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Start a generation and stream its progress as server-sent events.
///
/// Input problems (empty prompt, missing key, busy session) are answered with
/// a plain JSON error before anything is sent to the vendor. Once the stream
/// starts, the job keeps running even if the client goes away; its video is
/// still cached on the session.
#[utoipa::path(
    post,
    path = "/sessions/{session_id}/generate",
    params(("session_id" = Uuid, Path, description = "Session id")),
    request_body = GenerateVideoBody,
    responses(
        (status = 200, description = "Stream of submitted / progress / downloading / completed / error events", body = String, content_type = "text/event-stream"),
        (status = 400, description = "Invalid input", body = ApiError),
        (status = 401, description = "Missing API key", body = ApiError),
        (status = 404, description = "Unknown session", body = ApiError),
        (status = 409, description = "A generation is already running", body = ApiError),
    ),
    tag = "VIDEOGEN"
)]
#[instrument(skip(state, body))]
pub async fn generate_video_stream(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
    Json(body): Json<GenerateVideoBody>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let session = state.sessions.get(&session_id).await?;
    let (request, api_key) = body.into_parts()?;

    // Claimed here, not in the task, so a second request sees the 409
    let guard = session.begin_generation()?;

    let api = state.videogen_api(api_key);
    let settings = state.settings.clone();
    let (tx, rx) = mpsc::unbounded_channel::<GenerationEvent>();

    tokio::spawn(async move {
        // Errors are reported through the event stream and the session
        let _ = generate_video(api.as_ref(), guard, request, &settings, |event| {
            let _ = tx.send(event);
        })
        .await;
    });

    let stream = UnboundedReceiverStream::new(rx).map(|event| Ok(to_sse_event(&event)));

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn to_sse_event(event: &GenerationEvent) -> Event {
    Event::default()
        .event(event.name())
        .json_data(event)
        .unwrap_or_else(|e| {
            log::error!("Failed to encode generation event: {e}");
            Event::default().event("error").data("failed to encode event")
        })
}

#[utoipa::path(
    post,
    path = "/sessions/{session_id}/cancel",
    params(("session_id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Whether a running generation was cancelled", body = CancelResponse),
        (status = 404, description = "Unknown session", body = ApiError),
    ),
    tag = "VIDEOGEN"
)]
#[instrument(skip(state))]
pub async fn cancel_generation(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<CancelResponse>> {
    let session = state.sessions.get(&session_id).await?;
    Ok(Json(CancelResponse {
        cancelled: session.cancel(),
    }))
}

#[utoipa::path(
    get,
    path = "/sessions/{session_id}/video",
    params(("session_id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "The last generated video", body = Vec<u8>, content_type = "video/mp4"),
        (status = 404, description = "Unknown session or no video yet", body = ApiError),
    ),
    tag = "VIDEOGEN"
)]
#[instrument(skip(state))]
pub async fn download_video(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Response> {
    let session = state.sessions.get(&session_id).await?;
    let artifact = session.artifact().ok_or(VideoGenError::ArtifactNotFound)?;

    let file = match tokio::fs::File::open(&artifact.local_path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(VideoGenError::ArtifactNotFound.into());
        }
        Err(e) => return Err(VideoGenError::Io(e).into()),
    };
    let size_bytes = file.metadata().await.map_err(VideoGenError::Io)?.len();

    let file_name = artifact_file_name(DOWNLOAD_FILE_PREFIX, &Local::now());

    Ok((
        [
            (header::CONTENT_TYPE, artifact.mime_type),
            (header::CONTENT_LENGTH, size_bytes.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}
