//! HTTP surface: JSON POST endpoints per unary operation and an SSE
//! endpoint for the sync server-stream.

use crate::service::StreamService;
use axum::error_handling::HandleErrorLayer;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{BoxError, Json, Router};
use serde::{Deserialize, Serialize};
use shared_types::{
    Envelope, Hash, Miniblock, StreamAndCookie, StreamError, StreamId, SyncCookie, SyncError,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tower::timeout::TimeoutLayer;
use tower::ServiceBuilder;

/// Build the node's HTTP router.
pub fn router(service: Arc<StreamService>, request_timeout: Duration) -> Router {
    Router::new()
        .route("/stream/create", post(create_stream))
        .route("/stream/get", post(get_stream))
        .route("/stream/miniblocks", post(get_miniblocks))
        .route("/stream/last_miniblock_hash", post(get_last_miniblock_hash))
        .route("/event/add", post(add_event))
        .route("/sync/start", post(sync_streams))
        .route("/sync/add", post(add_stream_to_sync))
        .route("/sync/remove", post(remove_stream_from_sync))
        .route("/sync/cancel", post(cancel_sync))
        .route("/sync/ping", post(ping_sync))
        .route("/info", post(info))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_middleware_error))
                .layer(TimeoutLayer::new(request_timeout)),
        )
        .with_state(service)
}

async fn handle_middleware_error(err: BoxError) -> (StatusCode, String) {
    if err.is::<tower::timeout::error::Elapsed>() {
        (StatusCode::REQUEST_TIMEOUT, "request timed out".to_string())
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

/// JSON error body.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.0, Json(ErrorBody { error: self.1 })).into_response()
    }
}

impl From<StreamError> for ApiError {
    fn from(err: StreamError) -> Self {
        let status = match &err {
            StreamError::BadSyncCookie(_)
            | StreamError::BadPrevMiniblockHash { .. }
            | StreamError::DuplicateEvent(_)
            | StreamError::InvalidEvent(_)
            | StreamError::InvalidRequest(_)
            | StreamError::MiniblockTooOld { .. }
            | StreamError::NonConsecutiveMiniblock { .. }
            | StreamError::InvalidMiniblock(_) => StatusCode::BAD_REQUEST,
            StreamError::Registry(shared_types::RegistryError::NotFound) => StatusCode::NOT_FOUND,
            StreamError::Storage(shared_types::StorageError::NotFound) => StatusCode::NOT_FOUND,
            StreamError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError(status, err.to_string())
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        let message = err.to_string();
        match err {
            SyncError::Stream(inner) => inner.into(),
            SyncError::UnknownSyncId(_) => ApiError(StatusCode::NOT_FOUND, message),
            SyncError::SessionCancelled => ApiError(StatusCode::CONFLICT, message),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateStreamRequest {
    stream_id: StreamId,
    events: Vec<Envelope>,
}

async fn create_stream(
    State(service): State<Arc<StreamService>>,
    Json(req): Json<CreateStreamRequest>,
) -> Result<Json<StreamAndCookie>, ApiError> {
    let stream = service.create_stream(req.events, req.stream_id).await?;
    Ok(Json(stream))
}

#[derive(Debug, Deserialize)]
struct GetStreamRequest {
    stream_id: StreamId,
    #[serde(default)]
    optional: bool,
}

async fn get_stream(
    State(service): State<Arc<StreamService>>,
    Json(req): Json<GetStreamRequest>,
) -> Result<Json<Option<StreamAndCookie>>, ApiError> {
    let stream = service.get_stream(req.stream_id, req.optional).await?;
    Ok(Json(stream))
}

#[derive(Debug, Deserialize)]
struct GetMiniblocksRequest {
    stream_id: StreamId,
    from_inclusive: u64,
    to_exclusive: u64,
}

#[derive(Debug, Serialize)]
struct GetMiniblocksResponse {
    miniblocks: Vec<Miniblock>,
    terminus: bool,
}

async fn get_miniblocks(
    State(service): State<Arc<StreamService>>,
    Json(req): Json<GetMiniblocksRequest>,
) -> Result<Json<GetMiniblocksResponse>, ApiError> {
    let (miniblocks, terminus) = service
        .get_miniblocks(req.stream_id, req.from_inclusive, req.to_exclusive)
        .await?;
    Ok(Json(GetMiniblocksResponse {
        miniblocks,
        terminus,
    }))
}

#[derive(Debug, Deserialize)]
struct StreamIdRequest {
    stream_id: StreamId,
}

#[derive(Debug, Serialize)]
struct LastMiniblockHashResponse {
    hash: Hash,
    num: u64,
}

async fn get_last_miniblock_hash(
    State(service): State<Arc<StreamService>>,
    Json(req): Json<StreamIdRequest>,
) -> Result<Json<LastMiniblockHashResponse>, ApiError> {
    let (hash, num) = service.get_last_miniblock_hash(req.stream_id).await?;
    Ok(Json(LastMiniblockHashResponse { hash, num }))
}

#[derive(Debug, Deserialize)]
struct AddEventRequest {
    stream_id: StreamId,
    event: Envelope,
    #[serde(default)]
    optional: bool,
}

#[derive(Debug, Serialize)]
struct AddEventResponse {
    error: Option<String>,
}

async fn add_event(
    State(service): State<Arc<StreamService>>,
    Json(req): Json<AddEventRequest>,
) -> Result<Json<AddEventResponse>, ApiError> {
    let error = service
        .add_event(req.stream_id, &req.event, req.optional)
        .await?;
    Ok(Json(AddEventResponse { error }))
}

#[derive(Debug, Deserialize)]
struct SyncStreamsRequest {
    #[serde(default)]
    cookies: Vec<SyncCookie>,
}

async fn sync_streams(
    State(service): State<Arc<StreamService>>,
    Json(req): Json<SyncStreamsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (_sync_id, rx) = service.sync_streams(req.cookies).await?;
    let stream = ReceiverStream::new(rx).map(|response| Event::default().json_data(&response));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[derive(Debug, Deserialize)]
struct AddToSyncRequest {
    sync_id: String,
    cookie: SyncCookie,
}

async fn add_stream_to_sync(
    State(service): State<Arc<StreamService>>,
    Json(req): Json<AddToSyncRequest>,
) -> Result<StatusCode, ApiError> {
    service.add_stream_to_sync(&req.sync_id, req.cookie).await?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
struct RemoveFromSyncRequest {
    sync_id: String,
    stream_id: StreamId,
}

async fn remove_stream_from_sync(
    State(service): State<Arc<StreamService>>,
    Json(req): Json<RemoveFromSyncRequest>,
) -> Result<StatusCode, ApiError> {
    service
        .remove_stream_from_sync(&req.sync_id, req.stream_id)
        .await?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
struct SyncIdRequest {
    sync_id: String,
}

async fn cancel_sync(
    State(service): State<Arc<StreamService>>,
    Json(req): Json<SyncIdRequest>,
) -> Result<StatusCode, ApiError> {
    service.cancel_sync(&req.sync_id).await?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
struct PingSyncRequest {
    sync_id: String,
    nonce: String,
}

async fn ping_sync(
    State(service): State<Arc<StreamService>>,
    Json(req): Json<PingSyncRequest>,
) -> Result<StatusCode, ApiError> {
    service.ping_sync(&req.sync_id, &req.nonce)?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
struct InfoRequest {
    #[serde(default)]
    debug: Vec<String>,
}

#[derive(Debug, Serialize)]
struct InfoResponse {
    graffiti: String,
}

async fn info(
    State(service): State<Arc<StreamService>>,
    Json(req): Json<InfoRequest>,
) -> Result<Json<InfoResponse>, ApiError> {
    let graffiti = service.info(req.debug).await?;
    Ok(Json(InfoResponse { graffiti }))
}
