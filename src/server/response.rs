/* src/server/response.rs */

use crate::ingest::{IngestError, Rejection};
use axum::Json;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

impl IngestError {
    pub fn status(&self) -> StatusCode {
        match self {
            IngestError::Rejected(Rejection::TooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            IngestError::Rejected(_) | IngestError::BadRequest(_) => StatusCode::BAD_REQUEST,
            IngestError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            IngestError::NotFound(_) => StatusCode::NOT_FOUND,
            IngestError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("! Request failed: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn bad_multipart(e: MultipartError) -> IngestError {
    IngestError::BadRequest(format!("Malformed multipart body: {}", e.body_text()))
}

pub async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "Resource not found" })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn errors_map_to_documented_status_codes() {
        let cases = [
            (IngestError::Rejected(Rejection::UnsupportedExtension("txt".into())), 400),
            (IngestError::Rejected(Rejection::TooLarge { size: 2, max: 1 }), 413),
            (IngestError::RateLimited("1.1.1.1".into()), 429),
            (IngestError::BadRequest("x".into()), 400),
            (IngestError::NotFound("x".into()), 404),
            (IngestError::Io(io::Error::other("disk full")), 500),
        ];
        for (err, code) in cases {
            assert_eq!(err.status().as_u16(), code, "{}", err);
        }
    }
}
