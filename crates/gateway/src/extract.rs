//! Request extractors

use axum::{extract::FromRequestParts, http::request::Parts};
use skincare_common::errors::{AppError, Result};
use uuid::Uuid;

/// Header carrying the caller's user id, set by the upstream auth proxy
pub const USER_ID_HEADER: &str = "x-user-id";

/// Optional owner of the request, from `X-User-Id`
#[derive(Debug, Clone, Copy, Default)]
pub struct OwnerId(pub Option<Uuid>);

impl<S> FromRequestParts<S> for OwnerId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        let Some(raw) = parts.headers.get(USER_ID_HEADER) else {
            return Ok(OwnerId(None));
        };

        let id = raw
            .to_str()
            .ok()
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .ok_or_else(|| AppError::validation("X-User-Id", "X-User-Id must be a UUID"))?;
        Ok(OwnerId(Some(id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(value: Option<&str>) -> Result<OwnerId> {
        let mut builder = Request::builder().uri("/");
        if let Some(v) = value {
            builder = builder.header(USER_ID_HEADER, v);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        OwnerId::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_owner_header() {
        let id = Uuid::new_v4();
        assert_eq!(extract(Some(&id.to_string())).await.unwrap().0, Some(id));
        assert_eq!(extract(None).await.unwrap().0, None);
        assert!(matches!(extract(Some("bob")).await, Err(AppError::Validation { .. })));
    }
}
