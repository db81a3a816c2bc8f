//! Request extractors whose rejections use the API error body.

use axum::extract::FromRequest;

use crate::error::ApiError;

/// `Json<T>` whose rejections are reported as [`ApiError`] bodies instead
/// of axum's plain-text ones.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);
