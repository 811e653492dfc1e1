use axum::extract::FromRequest;

use crate::core::errors::ApiError;

pub mod completion;
pub mod conversations;
pub mod embeddings;
pub mod health;
pub mod search;
pub mod stream;

/// JSON body extractor whose rejections render as `{error}`.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);
