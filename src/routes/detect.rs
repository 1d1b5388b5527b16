use crate::{
    detection_service::{DetectOutcome, DetectionError, OutputMode},
    model_service::ModelService,
    server::SharedState,
};
use axum::{
    body::Bytes,
    extract::{Multipart, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use std::time::Instant;
use thiserror::Error;
use tracing::instrument;

#[derive(Debug, Deserialize)]
pub struct DetectParams {
    #[serde(default)]
    pub return_json: bool,
}

#[derive(Error, Debug)]
pub enum DetectRequestError {
    #[error("missing `file` part in multipart upload")]
    MissingImage,
    #[error("unreadable multipart upload: {0}")]
    Multipart(String),
    #[error(transparent)]
    Detection(#[from] DetectionError),
    #[error("HTTP builder failed: {0}")]
    HttpBuilder(String),
}

impl DetectRequestError {
    fn status_code(&self) -> StatusCode {
        match self {
            DetectRequestError::MissingImage | DetectRequestError::Multipart(_) => {
                StatusCode::BAD_REQUEST
            }
            DetectRequestError::Detection(DetectionError::InvalidImage(_)) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for DetectRequestError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Detection request failed: {}", self);
        }
        (status, self.to_string()).into_response()
    }
}

#[instrument(skip(state, multipart))]
pub async fn detect<M: ModelService>(
    State(state): State<SharedState<M>>,
    Query(params): Query<DetectParams>,
    mut multipart: Multipart,
) -> Result<Response, DetectRequestError> {
    let image_data = read_image_part(&mut multipart).await?;

    let mode = if params.return_json {
        OutputMode::Json
    } else {
        OutputMode::AnnotatedImage
    };

    state.metrics.record_request("/api/detect");
    let started = Instant::now();
    let outcome = state.detection_service.detect(&image_data, mode).await?;
    state
        .metrics
        .record_detection_duration(started.elapsed().as_millis() as u64, "/api/detect");

    match outcome {
        DetectOutcome::Detections(response) => Ok(Json(response).into_response()),
        DetectOutcome::Jpeg(bytes) => Response::builder()
            .header(header::CONTENT_TYPE, "image/jpeg")
            .body(axum::body::Body::from(bytes))
            .map_err(|e| DetectRequestError::HttpBuilder(e.to_string())),
    }
}

async fn read_image_part(multipart: &mut Multipart) -> Result<Bytes, DetectRequestError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| DetectRequestError::Multipart(e.to_string()))?
    {
        if field.name() == Some("file") {
            return field
                .bytes()
                .await
                .map_err(|e| DetectRequestError::Multipart(e.to_string()));
        }
    }

    Err(DetectRequestError::MissingImage)
}
