use actix_multipart::Multipart;
use actix_web::{HttpResponse, web};
use futures::TryStreamExt;
use log::info;
use serde::Deserialize;
use serde_json::json;
use shared::{ApiResponse, PredictionData};

use crate::archive::PredictionArchive;
use crate::auth::middleware::AuthenticatedUser;
use crate::error::ApiError;
use crate::inference::{PredictionError, PredictionService, ValidationError};

const ALLOWED_MIME_TYPES: [&str; 2] = ["image/jpeg", "image/png"];
const ALLOWED_EXTENSIONS: [&str; 3] = [".jpg", ".jpeg", ".png"];
const DEFAULT_HISTORY_LIMIT: usize = 10;
const MAX_HISTORY_LIMIT: usize = 100;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/").route(web::get().to(root)))
        .service(web::resource("/health").route(web::get().to(health)))
        .service(web::resource("/predict").route(web::post().to(predict)))
        .service(web::resource("/history/predict").route(web::get().to(history)));
}

async fn root() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "message": "BanaMon API is running",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "online"
    }))
}

async fn health(service: web::Data<PredictionService>) -> HttpResponse {
    let state = service.health();
    if state.healthy {
        HttpResponse::Ok().json(state)
    } else {
        HttpResponse::ServiceUnavailable().json(state)
    }
}

struct UploadedImage {
    bytes: Vec<u8>,
    file_name: String,
    mime_type: String,
}

fn multipart_error(err: actix_multipart::MultipartError) -> ApiError {
    ApiError::BadRequest(format!("Invalid multipart payload: {}", err))
}

fn has_allowed_extension(file_name: &str) -> bool {
    let lower = file_name.to_lowercase();
    ALLOWED_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Reads the `file` field, refusing to buffer more than `max_bytes`.
async fn read_image_field(
    payload: &mut Multipart,
    max_bytes: usize,
) -> Result<UploadedImage, ApiError> {
    while let Some(mut field) = payload.try_next().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }

        let mime_type = field
            .content_type()
            .map(|mime| mime.essence_str().to_string())
            .unwrap_or_default();
        if !ALLOWED_MIME_TYPES.contains(&mime_type.as_str()) {
            return Err(ApiError::BadRequest(
                "Invalid file type. Only JPEG and PNG are supported.".to_string(),
            ));
        }

        let file_name = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .and_then(|name| name.rsplit(['/', '\\']).next())
            .unwrap_or_default()
            .to_string();
        if !has_allowed_extension(&file_name) {
            return Err(ApiError::BadRequest(
                "File extension does not match allowed types (JPEG, PNG).".to_string(),
            ));
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = field.try_next().await.map_err(multipart_error)? {
            if bytes.len() + chunk.len() > max_bytes {
                return Err(PredictionError::Validation(ValidationError::TooLarge).into());
            }
            bytes.extend_from_slice(&chunk);
        }

        return Ok(UploadedImage {
            bytes,
            file_name,
            mime_type,
        });
    }

    Err(ApiError::BadRequest("Missing file field".to_string()))
}

async fn predict(
    user: AuthenticatedUser,
    service: web::Data<PredictionService>,
    archive: web::Data<PredictionArchive>,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let upload = read_image_field(&mut payload, service.max_image_bytes()).await?;
    info!("Prediction request received from user {}", user.0);
    info!("File name: {}", upload.file_name);

    let outcome = match service.submit(upload.bytes.clone()).await {
        Ok(outcome) => outcome,
        Err(e) => {
            if let PredictionError::Internal(detail) = &e {
                log::error!("Prediction failed for user {}: {}", user.0, detail);
            }
            return Err(e.into());
        }
    };
    info!(
        "Prediction for user {}: {} ({:.2}%)",
        user.0, outcome.label, outcome.confidence
    );

    let path = PredictionArchive::object_path(&user.0, &upload.file_name, outcome.timestamp);
    let data = PredictionData::from_outcome(&outcome, archive.public_url(&path));

    let archive = archive.get_ref().clone();
    actix_web::rt::spawn(async move {
        archive
            .archive(user.0, upload.bytes, path, upload.mime_type, outcome)
            .await;
    });

    Ok(HttpResponse::Ok().json(ApiResponse::success(data)))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn history(
    user: AuthenticatedUser,
    archive: web::Data<PredictionArchive>,
    query: web::Query<HistoryQuery>,
) -> Result<HttpResponse, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    info!("Fetching predictions for user: {}", user.0);

    let records = archive.history(&user.0, limit).await.map_err(|e| {
        log::error!("Failed to get predictions: {}", e);
        ApiError::from(e)
    })?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(records)))
}
