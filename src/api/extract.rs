//! Request extractors whose rejections render as the error envelope.
//!
//! axum's own `Json` and `Query` reject with plain-text bodies (and 422 for
//! a body that parses but does not fit the target type). Handlers use these
//! wrappers instead so malformed input is always a 400 envelope.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{FromRequest, FromRequestParts, Request};
use axum::http::request::Parts;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::ApiError;

/// JSON request body.
#[derive(Debug, Clone, Copy, Default)]
pub struct Json<T>(pub T);

impl<T, S> FromRequest<S> for Json<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        axum::Json::<T>::from_request(req, state)
            .await
            .map(|axum::Json(value)| Self(value))
            .map_err(ApiError::from)
    }
}

/// Deserialized query string.
#[derive(Debug, Clone, Copy, Default)]
pub struct Query<T>(pub T);

impl<T, S> FromRequestParts<S> for Query<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        axum::extract::Query::<T>::from_request_parts(parts, state)
            .await
            .map(|axum::extract::Query(value)| Self(value))
            .map_err(ApiError::from)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        debug!(error = %rejection, "rejected request body");
        match rejection {
            JsonRejection::MissingJsonContentType(_) => {
                ApiError::BadRequest("expected a JSON body (content-type: application/json)".into())
            }
            JsonRejection::JsonSyntaxError(_) => {
                ApiError::BadRequest("request body is not valid JSON".into())
            }
            other => ApiError::BadRequest(format!("invalid request body: {}", inner_message(&other))),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        debug!(error = %rejection, "rejected query string");
        ApiError::BadRequest(format!("invalid query string: {}", inner_message(&rejection)))
    }
}

/// The deserializer's own message (e.g. "missing field `secret`"), without
/// axum's generic prefix.
fn inner_message(err: &(dyn std::error::Error + 'static)) -> String {
    let mut current = err;
    while let Some(source) = current.source() {
        current = source;
    }
    current.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{self, Method, StatusCode, header::CONTENT_TYPE};
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Login {
        email: String,
        #[allow(dead_code)]
        secret: String,
    }

    #[derive(Debug, Deserialize)]
    struct Paging {
        page: Option<u32>,
    }

    fn json_request(body: &str, content_type: Option<&str>) -> Request {
        let mut builder = http::Request::builder().method(Method::POST).uri("/");
        if let Some(ct) = content_type {
            builder = builder.header(CONTENT_TYPE, ct);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn extract_json(body: &str, content_type: Option<&str>) -> Result<Json<Login>, ApiError> {
        Json::<Login>::from_request(json_request(body, content_type), &()).await
    }

    #[tokio::test]
    async fn test_valid_body_extracts() {
        let Json(login) = extract_json(r#"{"email":"a@acme.test","secret":"s"}"#, Some("application/json"))
            .await
            .unwrap();
        assert_eq!(login.email, "a@acme.test");
    }

    #[tokio::test]
    async fn test_missing_field_is_bad_request() {
        let err = extract_json(r#"{"email":"a@acme.test"}"#, Some("application/json"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        let message = err.to_string();
        assert!(message.contains("missing field `secret`"), "{message}");
    }

    #[tokio::test]
    async fn test_syntax_and_content_type_errors_are_bad_request() {
        let syntax = extract_json("{not json", Some("application/json")).await.unwrap_err();
        assert_eq!(syntax.status(), StatusCode::BAD_REQUEST);

        let no_type = extract_json(r#"{"email":"a","secret":"b"}"#, None).await.unwrap_err();
        assert_eq!(no_type.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_bad_query_is_bad_request() {
        let req = http::Request::builder().uri("/?page=abc").body(Body::empty()).unwrap();
        let (mut parts, _) = req.into_parts();
        let err = Query::<Paging>::from_request_parts(&mut parts, &()).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let req = http::Request::builder().uri("/?page=2").body(Body::empty()).unwrap();
        let (mut parts, _) = req.into_parts();
        let Query(paging) = Query::<Paging>::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(paging.page, Some(2));
    }
}
