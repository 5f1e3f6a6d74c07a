//! Bearer-token extraction and scope enforcement, applied in front of the
//! protected HTTP surface.

use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use super::SharedOAuthStore;

/// Token metadata injected into request extensions once a bearer token has
/// validated, so downstream handlers and the scope middleware can read it
/// without a second store lookup.
#[derive(Debug, Clone)]
pub struct TokenInfo {
    pub client_id: String,
    pub scope: String,
}

fn extract_bearer(header_value: &str) -> Option<&str> {
    let mut parts = header_value.splitn(2, ' ');
    let scheme = parts.next()?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(parts.next()?.trim())
}

fn unauthorized(error: &'static str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Bearer realm=\"mcp\"")],
        Json(json!({ "error": error })),
    )
        .into_response()
}

/// Rejects requests with no (or an invalid/expired) bearer token. On
/// success, stashes a [`TokenInfo`] in request extensions.
pub async fn require_bearer(State(store): State<SharedOAuthStore>, mut req: Request, next: Next) -> Response {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(extract_bearer);

    let Some(token) = token else {
        return unauthorized("invalid_request");
    };

    let access = {
        let guard = store.lock().await;
        guard.validate_access_token(token)
    };

    match access {
        Ok(access) => {
            req.extensions_mut().insert(TokenInfo {
                client_id: access.client_id,
                scope: access.scope,
            });
            next.run(req).await
        }
        Err(_) => unauthorized("invalid_token"),
    }
}

/// `mcp` is the parent scope: holding it grants every `mcp:*` sub-scope.
pub fn scope_satisfied(granted: &str, required: &str) -> bool {
    granted.split_whitespace().any(|g| g == required || g == "mcp")
}

/// Builds a scope-checking middleware closure for `required`, to be passed
/// to `axum::middleware::from_fn`.
pub fn require_scope(required: &'static str) -> impl Fn(Request, Next) -> std::pin::Pin<Box<dyn std::future::Future<Output = Response> + Send>> + Clone {
    move |req: Request, next: Next| {
        Box::pin(async move {
            let granted = req.extensions().get::<TokenInfo>().map(|t| t.scope.clone()).unwrap_or_default();
            if scope_satisfied(&granted, required) {
                next.run(req).await
            } else {
                (StatusCode::FORBIDDEN, Json(json!({ "error": "insufficient_scope" }))).into_response()
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_bearer_is_case_insensitive_on_scheme() {
        assert_eq!(extract_bearer("Bearer abc123"), Some("abc123"));
        assert_eq!(extract_bearer("bearer abc123"), Some("abc123"));
        assert_eq!(extract_bearer("Basic abc123"), None);
    }

    #[test]
    fn parent_scope_grants_sub_scopes() {
        assert!(scope_satisfied("mcp", "mcp:write"));
        assert!(scope_satisfied("mcp:read mcp:write", "mcp:write"));
        assert!(!scope_satisfied("mcp:read", "mcp:write"));
    }
}
