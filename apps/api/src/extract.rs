//! Extractors whose rejections use the API error body.
//!
//! axum's own `Json` answers malformed bodies with 415/422 and plain text;
//! these wrappers answer 400 with `{ "error": ... }`.

use axum::extract::{FromRequest, FromRequestParts};

use crate::error::ApiError;

#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);
