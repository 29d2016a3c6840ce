//! Admission review handler

use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use virt_admission::AdmissionReview;

/// Validate one admission review
///
/// Rejections are answered inside the review; only bodies that are not
/// reviews at all fail the HTTP exchange.
pub async fn validate(
    State(state): State<AppState>,
    payload: Result<Json<AdmissionReview>, JsonRejection>,
) -> ApiResult<Json<AdmissionReview>> {
    let Json(review) = payload.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge(rejection.body_text())
        } else {
            ApiError::BadRequest(rejection.body_text())
        }
    })?;

    Ok(Json(state.dispatcher.review(review).await))
}
