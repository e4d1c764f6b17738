// ABOUTME: Extractor resolving the opaque caller session id and optional user id
// ABOUTME: Session comes from the X-Session-Id header or session_id cookie, user from X-User-Id
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum_extra::extract::CookieJar;
use pulse_core::errors::AppError;
use pulse_core::models::ScopeKey;

/// Header carrying the opaque session id
pub const SESSION_HEADER: &str = "x-session-id";
/// Header carrying the optional user id
pub const USER_HEADER: &str = "x-user-id";
/// Cookie consulted when the session header is absent
pub const SESSION_COOKIE: &str = "session_id";

/// Who is calling, as resolved by the host application's session layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    /// Session scope id, always present
    pub session_id: String,
    /// User scope id for signed-in callers
    pub user_id: Option<String>,
}

impl CallerIdentity {
    /// Scopes a stream for this caller subscribes to: its session, then its user
    #[must_use]
    pub fn scopes(&self) -> Vec<ScopeKey> {
        let mut scopes = vec![ScopeKey::session(self.session_id.as_str())];
        if let Some(user_id) = &self.user_id {
            scopes.push(ScopeKey::user(user_id.as_str()));
        }
        scopes
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CallerIdentity {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let session_id = header_value(&parts.headers, SESSION_HEADER)
            .or_else(|| {
                CookieJar::from_headers(&parts.headers)
                    .get(SESSION_COOKIE)
                    .map(|cookie| cookie.value().to_owned())
                    .filter(|value| !value.is_empty())
            })
            .ok_or_else(|| AppError::invalid_input("missing session id"))?;

        Ok(Self {
            session_id,
            user_id: header_value(&parts.headers, USER_HEADER),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(request: Request<()>) -> Result<CallerIdentity, AppError> {
        let (mut parts, ()) = request.into_parts();
        CallerIdentity::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_header_takes_precedence_over_cookie() {
        let request = Request::builder()
            .header(SESSION_HEADER, "from-header")
            .header("cookie", "session_id=from-cookie")
            .header(USER_HEADER, "u1")
            .body(())
            .map_err(|e| e.to_string());
        let identity = match request {
            Ok(request) => extract(request).await.ok(),
            Err(_) => None,
        };
        assert_eq!(
            identity,
            Some(CallerIdentity {
                session_id: "from-header".to_owned(),
                user_id: Some("u1".to_owned()),
            })
        );
    }

    #[tokio::test]
    async fn test_cookie_fallback_and_missing_session() {
        let with_cookie = Request::builder()
            .header("cookie", "theme=dark; session_id=abc")
            .body(());
        let identity = match with_cookie {
            Ok(request) => extract(request).await.ok(),
            Err(_) => None,
        };
        assert_eq!(identity.map(|i| i.scopes()), Some(vec![ScopeKey::session("abc")]));

        let missing = Request::builder().body(());
        let rejected = match missing {
            Ok(request) => extract(request).await.err().map(|e| e.http_status()),
            Err(_) => None,
        };
        assert_eq!(rejected, Some(400));
    }
}
