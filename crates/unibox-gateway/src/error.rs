// SPDX-FileCopyrightText: 2026 Unibox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP error mapping and the JSON body extractor.

use axum::{
    Json,
    extract::{FromRequest, Request, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use unibox_core::UniboxError;

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

/// An error ready to be sent to the client.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Unauthorized")
    }

    /// Maps a pipeline error. Server-side failures are reported as `fallback`
    /// and their detail is only logged.
    pub fn from_error(err: UniboxError, fallback: &str) -> Self {
        match err {
            UniboxError::Auth(message) => Self::new(StatusCode::UNAUTHORIZED, message),
            UniboxError::Validation(message) => Self::bad_request(message),
            UniboxError::Conflict(message) => Self::new(StatusCode::CONFLICT, message),
            UniboxError::NotFound(message) => Self::new(StatusCode::NOT_FOUND, message),
            UniboxError::ImportDisabled { platform_id } => Self::new(
                StatusCode::NOT_FOUND,
                format!("Import disabled for platform {platform_id}"),
            ),
            UniboxError::RateLimited { .. } => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "Upstream rate limit reached, try again later",
            ),
            other => {
                tracing::error!(error = %other, "{fallback}");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, fallback)
            }
        }
    }
}

/// `.map_err(respond("Failed to send message"))`
pub fn respond(fallback: &'static str) -> impl FnOnce(UniboxError) -> ApiError {
    move |err| ApiError::from_error(err, fallback)
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                success: false,
                error: self.message,
            }),
        )
            .into_response()
    }
}

/// `Json` whose rejections are reported as 400 with an error body.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(ApiError::bad_request(format!(
                "Invalid request body: {}",
                rejection.body_text()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_error_taxonomy_to_status() {
        let cases = [
            (UniboxError::Auth("x".into()), StatusCode::UNAUTHORIZED),
            (UniboxError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (UniboxError::Conflict("x".into()), StatusCode::CONFLICT),
            (UniboxError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (
                UniboxError::ImportDisabled { platform_id: "p".into() },
                StatusCode::NOT_FOUND,
            ),
            (
                UniboxError::RateLimited { retry_after: None },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (UniboxError::upstream("x"), StatusCode::INTERNAL_SERVER_ERROR),
            (UniboxError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from_error(err, "failed").status, status);
        }
    }

    #[test]
    fn server_errors_hide_detail() {
        let err = ApiError::from_error(UniboxError::upstream("secret broker detail"), "Failed to send message");
        assert_eq!(err.message, "Failed to send message");
    }
}
