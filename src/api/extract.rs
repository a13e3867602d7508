//! Request extractors whose rejections render as [`ApiError`] envelopes.

use axum::extract::{FromRequest, FromRequestParts};

use super::error::ApiError;

/// JSON body; malformed or mistyped bodies are rejected with a 400
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// Query string; undecodable parameters are rejected with a 400
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);
