use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use image::ImageFormat;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::StoreError;
use crate::models::api::{PhotoStatusResponse, PhotoSubmittedResponse, SubmitPhotoRequest};
use crate::models::photo::NewPhoto;

fn internal(e: impl std::fmt::Display) -> StatusCode {
    tracing::error!(error = %e, "Request failed");
    StatusCode::INTERNAL_SERVER_ERROR
}

fn store_error(e: StoreError) -> StatusCode {
    match e {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        other => internal(other),
    }
}

/// POST /api/v1/jobs/{job_id}/photos: Upload a photo and queue it for analysis.
pub async fn submit_photo(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<PhotoSubmittedResponse>), StatusCode> {
    let mut image_data: Option<(Vec<u8>, ImageFormat)> = None;
    let mut request = SubmitPhotoRequest::default();

    while let Some(field) = multipart.next_field().await.map_err(|_| StatusCode::BAD_REQUEST)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("image") => {
                let data = field.bytes().await.map_err(|_| StatusCode::BAD_REQUEST)?;
                let format =
                    image::guess_format(&data).map_err(|_| StatusCode::UNSUPPORTED_MEDIA_TYPE)?;
                image_data = Some((data.to_vec(), format));
            }
            Some("kind") => {
                request.kind = field.text().await.map_err(|_| StatusCode::BAD_REQUEST)?;
            }
            _ => {}
        }
    }

    let (bytes, format) = image_data.ok_or(StatusCode::BAD_REQUEST)?;
    request.validate().map_err(|_| StatusCode::UNPROCESSABLE_ENTITY)?;

    let extension = format.extensions_str().first().copied().unwrap_or("bin");
    let storage_key = format!("photos/{}/{}.{}", job_id, Uuid::new_v4(), extension);

    state
        .storage
        .upload(&storage_key, &bytes, format.to_mime_type())
        .await
        .map_err(internal)?;

    let photo = state
        .photos
        .insert_pending(NewPhoto {
            job_id,
            storage_key,
            kind: request.kind,
        })
        .await
        .map_err(store_error)?;

    metrics::counter!("photos_submitted_total").increment(1);
    tracing::info!(photo_id = %photo.id, %job_id, kind = %photo.kind, "Photo queued for analysis");

    Ok((
        StatusCode::ACCEPTED,
        Json(PhotoSubmittedResponse {
            photo_id: photo.id,
            status: photo.findings_status,
            message: "Photo queued for analysis".to_string(),
        }),
    ))
}

/// GET /api/v1/photos/{photo_id}: Analysis status and combined findings.
pub async fn get_photo(
    State(state): State<AppState>,
    Path(photo_id): Path<Uuid>,
) -> Result<Json<PhotoStatusResponse>, StatusCode> {
    let photo = state
        .photos
        .get(photo_id)
        .await
        .map_err(store_error)?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(PhotoStatusResponse::from_record(&photo)))
}

/// POST /api/v1/photos/{photo_id}/reanalyze: Queue a finished photo again.
pub async fn reanalyze_photo(
    State(state): State<AppState>,
    Path(photo_id): Path<Uuid>,
) -> Result<(StatusCode, Json<PhotoStatusResponse>), StatusCode> {
    match state.photos.request_reanalysis(photo_id).await.map_err(store_error)? {
        Some(photo) => {
            tracing::info!(%photo_id, "Photo re-analysis requested");
            Ok((StatusCode::ACCEPTED, Json(PhotoStatusResponse::from_record(&photo))))
        }
        None => match state.photos.get(photo_id).await.map_err(store_error)? {
            Some(_) => Err(StatusCode::CONFLICT),
            None => Err(StatusCode::NOT_FOUND),
        },
    }
}
