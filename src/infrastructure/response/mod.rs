//! NDJSON response helpers.

use crate::domain::error::AppError;
use actix_web::http::StatusCode;
use actix_web::web::Bytes;
use actix_web::HttpResponse;
use serde::Serialize;
use serde_json::json;

pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Serialize `value` as one NDJSON line.
pub fn ndjson_line<T: Serialize>(value: &T) -> Bytes {
    let mut buf = match serde_json::to_vec(value) {
        Ok(buf) => buf,
        Err(e) => json!({ "error": format!("Failed to serialize record: {}", e) })
            .to_string()
            .into_bytes(),
    };
    buf.push(b'\n');
    Bytes::from(buf)
}

/// The single line sent when a request fails before any record.
pub fn request_error_line(err: &AppError) -> Bytes {
    ndjson_line(&json!({ "matched": false, "error": err.client_message() }))
}

/// The trailing line appended when a stream fails after it started.
pub fn stream_error_line(err: &AppError) -> Bytes {
    ndjson_line(&json!({ "error": err.client_message() }))
}

pub fn status_for(err: &AppError) -> StatusCode {
    match err {
        AppError::ValidationError(_) | AppError::MissingParameter(_) => StatusCode::BAD_REQUEST,
        AppError::EmbeddingFailure(_) => StatusCode::BAD_GATEWAY,
        AppError::NoCatalog(_) => StatusCode::SERVICE_UNAVAILABLE,
        AppError::ExecutionFailure(_)
        | AppError::ConfigError(_)
        | AppError::DatabaseError(_)
        | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn error_response(err: &AppError) -> HttpResponse {
    HttpResponse::build(status_for(err))
        .content_type(NDJSON_CONTENT_TYPE)
        .body(request_error_line(err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_end_with_newline() {
        let line = ndjson_line(&json!({"a": 1}));
        assert_eq!(&line[..], b"{\"a\":1}\n");
    }

    #[test]
    fn test_request_error_line_shape() {
        let line = request_error_line(&AppError::ValidationError("missing query".to_string()));
        let value: serde_json::Value = serde_json::from_slice(&line).unwrap();
        assert_eq!(value, json!({"matched": false, "error": "missing query"}));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&AppError::MissingParameter("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&AppError::EmbeddingFailure("down".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&AppError::ExecutionFailure("boom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
