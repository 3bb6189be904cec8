use axum::extract::{FromRequest, FromRequestParts, Json, Path, Query};

use crate::error::ServiceError;

/// JSON body whose rejections render as a `ServiceError` (400) instead of
/// axum's plain-text 415/422.
#[derive(Debug, FromRequest)]
#[from_request(via(Json), rejection(ServiceError))]
pub struct ApiJson<T>(pub T);

#[derive(Debug, FromRequestParts)]
#[from_request(via(Path), rejection(ServiceError))]
pub struct ApiPath<T>(pub T);

#[derive(Debug, FromRequestParts)]
#[from_request(via(Query), rejection(ServiceError))]
pub struct ApiQuery<T>(pub T);
