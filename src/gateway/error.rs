//! Structured error envelope returned by the cloud API

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Per-field validation detail inside an [`ApiError`]
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct FieldError {
    /// Field the message refers to
    #[serde(default)]
    pub field: String,
    /// Validation message
    #[serde(default)]
    pub message: String,
}

/// Error body the cloud API returns for every 4xx/5xx response
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq, Error)]
#[serde(rename_all = "camelCase")]
#[error(
    "API Error: Type={type_}, Title={title}, Status={status}, Errors=[{}], TraceId={trace_id}, ParentId={parent_id}",
    render_field_errors(.errors)
)]
pub struct ApiError {
    /// Problem type URI
    #[serde(default, rename = "type")]
    pub type_: String,
    /// Short summary
    #[serde(default)]
    pub title: String,
    /// HTTP status; always the status of the response, not the body's claim
    #[serde(default)]
    pub status: u16,
    /// Field-level details
    #[serde(default)]
    pub errors: Vec<FieldError>,
    /// Trace id for provider support
    #[serde(default)]
    pub trace_id: String,
    /// Parent span id for provider support
    #[serde(default)]
    pub parent_id: String,
}

impl ApiError {
    /// Error carrying only a status, used when the body is empty or unreadable
    pub fn minimal(status: u16) -> Self {
        Self {
            status,
            title: "Unknown API error".to_string(),
            ..Default::default()
        }
    }

    /// Parse an error body, falling back to [`ApiError::minimal`]
    pub fn from_body(status: u16, body: &[u8]) -> Self {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Self::minimal(status);
        }
        match serde_json::from_slice::<ApiError>(body) {
            Ok(parsed) => Self { status, ..parsed },
            Err(_) => Self::minimal(status),
        }
    }

    /// The API answers 400 and 404 for resources that are not ready yet
    pub fn is_invalid_status(&self) -> bool {
        self.status == 400 || self.status == 404
    }

    /// 4xx status
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    /// 5xx status
    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }
}

fn render_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::bad_request(400, true)]
    #[case::not_found(404, true)]
    #[case::conflict(409, false)]
    #[case::unprocessable(422, false)]
    #[case::internal(500, false)]
    fn test_invalid_status(#[case] status: u16, #[case] expected: bool) {
        assert_eq!(ApiError::minimal(status).is_invalid_status(), expected);
    }

    #[test]
    fn test_body_status_is_overridden_by_response_status() {
        let body = br#"{
            "type": "https://api.example/problems/validation",
            "title": "Validation failed",
            "status": 400,
            "errors": [{"field": "sizeGb", "message": "must be at most 16384"}],
            "traceId": "t-1",
            "parentId": "p-1"
        }"#;

        let err = ApiError::from_body(422, body);
        assert_eq!(err.status, 422);
        assert_eq!(err.title, "Validation failed");
        assert_eq!(err.errors.len(), 1);
        assert_eq!(err.trace_id, "t-1");
    }

    #[rstest]
    #[case::empty(b"".as_slice())]
    #[case::whitespace(b"  \n".as_slice())]
    #[case::html(b"<html>Bad Gateway</html>".as_slice())]
    fn test_unreadable_bodies_become_minimal(#[case] body: &[u8]) {
        let err = ApiError::from_body(502, body);
        assert_eq!(err, ApiError::minimal(502));
        assert_eq!(err.title, "Unknown API error");
    }

    #[test]
    fn test_display_format() {
        let err = ApiError {
            type_: "about:blank".to_string(),
            title: "Conflict".to_string(),
            status: 409,
            errors: vec![
                FieldError {
                    field: "name".to_string(),
                    message: "already exists".to_string(),
                },
                FieldError {
                    field: "tags".to_string(),
                    message: "too many".to_string(),
                },
            ],
            trace_id: "abc".to_string(),
            parent_id: "def".to_string(),
        };

        assert_eq!(
            err.to_string(),
            "API Error: Type=about:blank, Title=Conflict, Status=409, \
             Errors=[name: already exists; tags: too many], TraceId=abc, ParentId=def"
        );
    }
}
