use std::path::PathBuf;

use actix_files::Files;
use actix_multipart::Multipart;
use actix_web::http::header::CONTENT_TYPE;
use actix_web::http::StatusCode;
use actix_web::{web, Error, HttpRequest, HttpResponse};
use futures::{StreamExt, TryStreamExt};
use log::{error, info, warn};
use shared::{ErrorResponse, HealthResponse, PredictionResponse};

use crate::inference::error::InferenceError;
use crate::inference::predictor::{Prediction, Predictor};
use crate::middleware::body_limit::PAYLOAD_TOO_LARGE_MESSAGE;
use crate::storage::upload_store::{UploadError, UploadStore};

const INDEX_HTML: &str = include_str!("../static/index.html");

const NO_FILE_MESSAGE: &str = "No file provided. Use form-data key: image.";
const EMPTY_NAME_MESSAGE: &str = "Empty file name.";
const UNSUPPORTED_TYPE_MESSAGE: &str = "Unsupported file type.";
const MALFORMED_MESSAGE: &str = "Malformed multipart request.";
const INTERNAL_MESSAGE: &str = "Prediction failed due to internal error.";

pub fn configure_routes(cfg: &mut web::ServiceConfig, upload_dir: PathBuf) {
    cfg.service(web::resource("/").route(web::get().to(index)))
        .service(web::resource("/health").route(web::get().to(health)))
        .service(web::resource("/predict").route(web::post().to(handle_predict)))
        .service(Files::new("/static/uploads", upload_dir));
}

fn json_error(status: StatusCode, message: &str) -> HttpResponse {
    HttpResponse::build(status).json(ErrorResponse::new(message))
}

async fn index() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(INDEX_HTML)
}

async fn health(predictor: web::Data<Predictor>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".into(),
        weights_loaded: predictor.models().weights_loaded().unwrap_or(false),
    })
}

struct ImageUpload {
    filename: String,
    data: Vec<u8>,
}

enum ReadOutcome {
    Found(ImageUpload),
    Missing,
    TooLarge,
}

/// Pulls the first `image` file part out of the form, draining everything else.
async fn read_image_field(payload: &mut Multipart, max_bytes: usize) -> Result<ReadOutcome, actix_multipart::MultipartError> {
    let mut upload = None;
    let mut total = 0usize;

    while let Some(mut field) = payload.try_next().await? {
        let filename = field
            .content_disposition()
            .filter(|cd| upload.is_none() && cd.get_name() == Some("image"))
            .and_then(|cd| cd.get_filename())
            .map(str::to_owned);

        let mut data = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk?;
            total += chunk.len();
            if total > max_bytes {
                return Ok(ReadOutcome::TooLarge);
            }
            if filename.is_some() {
                data.extend_from_slice(&chunk);
            }
        }

        if let Some(filename) = filename {
            upload = Some(ImageUpload { filename, data });
        }
    }

    Ok(upload.map_or(ReadOutcome::Missing, ReadOutcome::Found))
}

#[derive(Debug, thiserror::Error)]
enum PredictFailure {
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
}

fn failure_response(failure: PredictFailure) -> HttpResponse {
    match failure {
        PredictFailure::Upload(UploadError::FileTooLarge) => {
            json_error(StatusCode::PAYLOAD_TOO_LARGE, PAYLOAD_TOO_LARGE_MESSAGE)
        }
        PredictFailure::Inference(e) if e.is_client_error() => {
            json_error(StatusCode::BAD_REQUEST, &e.to_string())
        }
        e => {
            error!("Prediction failed: {:?}", e);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_MESSAGE)
        }
    }
}

async fn handle_predict(
    req: HttpRequest,
    predictor: web::Data<Predictor>,
    store: web::Data<UploadStore>,
    mut payload: Multipart,
) -> Result<HttpResponse, Error> {
    let is_multipart = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().starts_with("multipart/form-data"));
    if !is_multipart {
        return Ok(json_error(StatusCode::BAD_REQUEST, NO_FILE_MESSAGE));
    }

    let upload = match read_image_field(&mut payload, store.max_bytes()).await {
        Ok(ReadOutcome::Found(upload)) => upload,
        Ok(ReadOutcome::Missing) => return Ok(json_error(StatusCode::BAD_REQUEST, NO_FILE_MESSAGE)),
        Ok(ReadOutcome::TooLarge) => {
            warn!("Upload exceeded {} bytes while streaming", store.max_bytes());
            return Ok(json_error(StatusCode::PAYLOAD_TOO_LARGE, PAYLOAD_TOO_LARGE_MESSAGE));
        }
        Err(e) => {
            warn!("Failed to read multipart payload: {}", e);
            return Ok(json_error(StatusCode::BAD_REQUEST, MALFORMED_MESSAGE));
        }
    };

    if upload.filename.is_empty() {
        return Ok(json_error(StatusCode::BAD_REQUEST, EMPTY_NAME_MESSAGE));
    }
    let Some(extension) = UploadStore::allowed_extension(&upload.filename) else {
        return Ok(json_error(StatusCode::BAD_REQUEST, UNSUPPORTED_TYPE_MESSAGE));
    };

    let store = store.into_inner();
    let predictor = predictor.into_inner();
    let outcome = web::block(move || -> Result<(String, Prediction), PredictFailure> {
        let stored_name = store.save(&upload.filename, &extension, &upload.data)?;
        let prediction = predictor.predict(&store.path_for(&stored_name), None)?;
        Ok((stored_name, prediction))
    })
    .await;

    match outcome {
        Ok(Ok((filename, prediction))) => {
            info!(
                "Predicted {} for {} (confidence {})",
                prediction.label, filename, prediction.confidence
            );
            Ok(HttpResponse::Ok().json(PredictionResponse {
                filename,
                label: prediction.label,
                confidence: prediction.confidence,
            }))
        }
        Ok(Err(e)) => Ok(failure_response(e)),
        Err(e) => {
            error!("Prediction worker failed: {:?}", e);
            Ok(json_error(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_MESSAGE))
        }
    }
}
