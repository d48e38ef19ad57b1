//! JSON envelope shared by every endpoint.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use serde_json::Value;

use crate::db::PageRequest;

/// Pagination metadata attached to list responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub total_items: u64,
    pub total_pages: u64,
    pub current_page: u32,
    pub page_size: u32,
    pub has_next_page: bool,
    pub has_previous_page: bool,
}

impl Pagination {
    pub fn new(page: PageRequest, total_items: u64) -> Self {
        let total_pages = total_items.div_ceil(u64::from(page.limit));
        Self {
            total_items,
            total_pages,
            current_page: page.page,
            page_size: page.limit,
            has_next_page: u64::from(page.page) < total_pages,
            has_previous_page: page.page > 1,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Envelope<T = Value> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub timestamp: String,
}

impl<T: Serialize> Envelope<T> {
    fn build(status: StatusCode, message: impl Into<String>, data: Option<T>) -> Self {
        Self {
            success: status.is_success(),
            message: message.into(),
            data,
            errors: None,
            pagination: None,
            status_code: status.as_u16(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self::build(StatusCode::OK, message, Some(data))
    }

    pub fn created(message: impl Into<String>, data: T) -> Self {
        Self::build(StatusCode::CREATED, message, Some(data))
    }

    pub fn paginated(message: impl Into<String>, data: T, pagination: Pagination) -> Self {
        let mut envelope = Self::build(StatusCode::OK, message, Some(data));
        envelope.pagination = Some(pagination);
        envelope
    }
}

impl Envelope<()> {
    /// Success without a payload.
    pub fn message(message: impl Into<String>) -> Self {
        Self::build(StatusCode::OK, message, None)
    }

    pub fn failure(status: StatusCode, message: impl Into<String>, errors: Option<Value>) -> Self {
        let mut envelope = Self::build(status, message, None);
        envelope.errors = errors;
        envelope
    }
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::OK);
        (status, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_metadata() {
        let p = Pagination::new(PageRequest::new(Some(2), Some(10)), 25);
        assert_eq!(p.total_pages, 3);
        assert!(p.has_next_page);
        assert!(p.has_previous_page);

        let last = Pagination::new(PageRequest::new(Some(3), Some(10)), 25);
        assert!(!last.has_next_page);

        let empty = Pagination::new(PageRequest::default(), 0);
        assert_eq!(empty.total_pages, 0);
        assert!(!empty.has_next_page);
        assert!(!empty.has_previous_page);
    }

    #[test]
    fn test_failure_envelope_shape() {
        let envelope = Envelope::failure(StatusCode::CONFLICT, "email already registered", None);
        let json = serde_json::to_value(&envelope).unwrap();

        assert_eq!(json["success"], false);
        assert_eq!(json["statusCode"], 409);
        assert_eq!(json["message"], "email already registered");
        assert!(json.get("data").is_none());
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_created_envelope_status() {
        let response = Envelope::created("done", serde_json::json!({"id": "x"})).into_response();
        assert_eq!(response.status(), StatusCode::CREATED);
    }
}
