//! OAuth 2.1 HTTP surface: discovery metadata, dynamic client registration,
//! the authorize/consent dance, and token issuance.

use axum::extract::{FromRequest, Query, Request, State};
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use super::pkce::{is_valid_code_challenge, is_valid_code_verifier};
use super::store::OAuthError;
use super::SharedOAuthStore;

#[derive(Clone)]
pub struct OAuthState {
    pub store: SharedOAuthStore,
}

pub fn router(state: OAuthState) -> Router {
    Router::new()
        .route("/.well-known/oauth-authorization-server", get(authorization_server_metadata))
        .route("/.well-known/oauth-protected-resource/mcp", get(protected_resource_metadata))
        .route("/register", post(register))
        .route("/authorize", get(authorize_get).post(authorize_post))
        .route("/token", post(token))
        .with_state(state)
}

fn issuer(headers: &header::HeaderMap) -> String {
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    let host = headers.get(header::HOST).and_then(|v| v.to_str().ok()).unwrap_or("localhost");
    format!("{scheme}://{host}")
}

async fn authorization_server_metadata(headers: header::HeaderMap) -> Json<serde_json::Value> {
    let issuer = issuer(&headers);
    Json(json!({
        "issuer": issuer,
        "authorization_endpoint": format!("{issuer}/authorize"),
        "token_endpoint": format!("{issuer}/token"),
        "registration_endpoint": format!("{issuer}/register"),
        "response_types_supported": ["code"],
        "grant_types_supported": ["authorization_code", "refresh_token"],
        "code_challenge_methods_supported": ["S256"],
        "token_endpoint_auth_methods_supported": ["client_secret_post", "client_secret_basic", "none"],
    }))
}

async fn protected_resource_metadata(headers: header::HeaderMap) -> Json<serde_json::Value> {
    let issuer = issuer(&headers);
    Json(json!({
        "resource": format!("{issuer}/mcp"),
        "authorization_servers": [issuer],
        "bearer_methods_supported": ["header"],
        "scopes_supported": ["mcp", "mcp:read", "mcp:write"],
    }))
}

#[derive(Deserialize)]
struct RegisterRequest {
    redirect_uris: Vec<String>,
    #[serde(default)]
    scope: Option<String>,
}

async fn register(State(state): State<OAuthState>, Json(body): Json<RegisterRequest>) -> Response {
    if body.redirect_uris.is_empty() {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid_request", "error_description": "redirect_uris required"}))).into_response();
    }
    let scopes = body.scope.map(|s| s.split_whitespace().map(String::from).collect()).unwrap_or_default();

    let mut guard = state.store.lock().await;
    match guard.register_client(body.redirect_uris, scopes) {
        Ok(client) => (
            StatusCode::CREATED,
            Json(json!({
                "client_id": client.client_id,
                "client_secret": client.client_secret,
                "redirect_uris": client.redirect_uris,
                "grant_types": client.grant_types,
                "response_types": client.response_types,
                "token_endpoint_auth_method": client.token_endpoint_auth_method,
                "scope": client.scopes.join(" "),
            })),
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "routes::register: failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "server_error"}))).into_response()
        }
    }
}

#[derive(Deserialize)]
struct AuthorizeParams {
    response_type: String,
    client_id: String,
    redirect_uri: String,
    code_challenge: String,
    #[serde(default)]
    code_challenge_method: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

fn error_page(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Html(format!("<html><body><h1>Authorization error</h1><p>{message}</p></body></html>")),
    )
        .into_response()
}

fn redirect_with_error(redirect_uri: &str, error: &str, state: Option<&str>) -> Response {
    let mut url = format!("{redirect_uri}?error={error}");
    if let Some(state) = state {
        url.push_str(&format!("&state={state}"));
    }
    Redirect::to(&url).into_response()
}

async fn authorize_get(State(state): State<OAuthState>, Query(params): Query<AuthorizeParams>) -> Response {
    if params.response_type != "code" {
        return error_page("response_type must be \"code\"");
    }

    let client = {
        let guard = state.store.lock().await;
        guard.get_client(&params.client_id)
    };
    let client = match client {
        Ok(c) => c,
        Err(_) => return error_page("unknown client_id"),
    };

    if !client.redirect_uris.iter().any(|u| u == &params.redirect_uri) {
        return error_page("redirect_uri does not match a registered URI for this client");
    }

    if params.code_challenge_method.as_deref() != Some("S256") || !is_valid_code_challenge(&params.code_challenge) {
        return redirect_with_error(&params.redirect_uri, "invalid_request", params.state.as_deref());
    }

    let scope = params.scope.unwrap_or_else(|| "mcp".to_string());
    let state_param = params.state.unwrap_or_default();

    Html(format!(
        r#"<html><body>
<h1>Authorize {client_id}</h1>
<p>This application is requesting access with scope: {scope}</p>
<form method="post" action="/authorize">
  <input type="hidden" name="client_id" value="{client_id}">
  <input type="hidden" name="redirect_uri" value="{redirect_uri}">
  <input type="hidden" name="code_challenge" value="{code_challenge}">
  <input type="hidden" name="scope" value="{scope}">
  <input type="hidden" name="state" value="{state_param}">
  <button type="submit" name="action" value="allow">Allow</button>
  <button type="submit" name="action" value="deny">Deny</button>
</form>
</body></html>"#,
        client_id = client.client_id,
        redirect_uri = params.redirect_uri,
        code_challenge = params.code_challenge,
        scope = scope,
        state_param = state_param,
    ))
    .into_response()
}

#[derive(Deserialize)]
struct AuthorizeDecision {
    action: String,
    client_id: String,
    redirect_uri: String,
    code_challenge: String,
    #[serde(default)]
    scope: String,
    #[serde(default)]
    state: String,
}

async fn authorize_post(State(state): State<OAuthState>, Form(decision): Form<AuthorizeDecision>) -> Response {
    if decision.action != "allow" {
        return redirect_with_error(&decision.redirect_uri, "access_denied", Some(&decision.state));
    }

    let scope = if decision.scope.is_empty() { "mcp".to_string() } else { decision.scope };

    let code = {
        let mut guard = state.store.lock().await;
        guard.create_auth_code(&decision.client_id, &decision.redirect_uri, &decision.code_challenge, &scope)
    };

    match code {
        Ok(code) => Redirect::to(&format!("{}?code={}&state={}", decision.redirect_uri, code, decision.state)).into_response(),
        Err(e) => {
            warn!(error = %e, "routes::authorize_post: failed to issue code");
            redirect_with_error(&decision.redirect_uri, "server_error", Some(&decision.state))
        }
    }
}

#[derive(Deserialize, Default)]
struct TokenRequest {
    grant_type: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    redirect_uri: Option<String>,
    #[serde(default)]
    code_verifier: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    client_secret: Option<String>,
}

/// `POST /token` accepts either JSON or form-encoded bodies; this extractor
/// dispatches on `Content-Type` so the handler itself stays grant-type
/// focused.
struct TokenBody(TokenRequest);

impl<S: Send + Sync> FromRequest<S> for TokenBody {
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.starts_with("application/json") {
            let Json(body) = Json::<TokenRequest>::from_request(req, state).await.map_err(|e| e.into_response())?;
            Ok(TokenBody(body))
        } else {
            let Form(body) = Form::<TokenRequest>::from_request(req, state).await.map_err(|e| e.into_response())?;
            Ok(TokenBody(body))
        }
    }
}

/// Client credentials may ride in the body (`client_id`/`client_secret`) or
/// in an HTTP Basic `Authorization` header.
fn basic_auth_credentials(headers: &header::HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (id, secret) = decoded.split_once(':')?;
    Some((id.to_string(), secret.to_string()))
}

fn oauth_error(status: StatusCode, error: &str, description: &str) -> Response {
    (status, Json(json!({ "error": error, "error_description": description }))).into_response()
}

async fn token(State(state): State<OAuthState>, headers: header::HeaderMap, body: TokenBody) -> Response {
    let body = body.0;
    let basic = basic_auth_credentials(&headers);

    match body.grant_type.as_str() {
        "authorization_code" => {
            let (Some(code), Some(redirect_uri), Some(verifier)) = (body.code.as_deref(), body.redirect_uri.as_deref(), body.code_verifier.as_deref()) else {
                return oauth_error(StatusCode::BAD_REQUEST, "invalid_request", "code, redirect_uri, code_verifier are required");
            };
            if !is_valid_code_verifier(verifier) {
                return oauth_error(StatusCode::BAD_REQUEST, "invalid_request", "code_verifier is malformed");
            }

            let client_id = body.client_id.clone().or_else(|| basic.as_ref().map(|(id, _)| id.clone()));
            let client_secret = body.client_secret.clone().or_else(|| basic.as_ref().map(|(_, s)| s.clone()));
            let Some(client_id) = client_id else {
                return oauth_error(StatusCode::BAD_REQUEST, "invalid_client", "client_id is required");
            };

            let mut guard = state.store.lock().await;
            match guard.exchange_auth_code(code, &client_id, redirect_uri, verifier, client_secret.as_deref()) {
                Ok(pair) => Json(pair).into_response(),
                Err(OAuthError::PkceMismatch) => oauth_error(StatusCode::BAD_REQUEST, "invalid_grant", "code_verifier did not match code_challenge"),
                Err(OAuthError::ClientSecretMismatch) => oauth_error(StatusCode::UNAUTHORIZED, "invalid_client", "client secret mismatch"),
                Err(e) => {
                    warn!(error = %e, "routes::token: authorization_code exchange failed");
                    oauth_error(StatusCode::BAD_REQUEST, "invalid_grant", "code not found, already used, or expired")
                }
            }
        }
        "refresh_token" => {
            let Some(refresh_token) = body.refresh_token.as_deref() else {
                return oauth_error(StatusCode::BAD_REQUEST, "invalid_request", "refresh_token is required");
            };
            let mut guard = state.store.lock().await;
            match guard.rotate_refresh_token(refresh_token) {
                Ok(pair) => Json(pair).into_response(),
                Err(e) => {
                    warn!(error = %e, "routes::token: refresh rotation failed");
                    oauth_error(StatusCode::BAD_REQUEST, "invalid_grant", "refresh_token not found or expired")
                }
            }
        }
        _ => oauth_error(StatusCode::BAD_REQUEST, "unsupported_grant_type", "only authorization_code and refresh_token are supported"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_auth_credentials_decodes_header() {
        let mut headers = header::HeaderMap::new();
        let encoded = base64::engine::general_purpose::STANDARD.encode("client1:secret1");
        headers.insert(header::AUTHORIZATION, format!("Basic {encoded}").parse().unwrap());
        assert_eq!(basic_auth_credentials(&headers), Some(("client1".to_string(), "secret1".to_string())));
    }

    #[test]
    fn basic_auth_credentials_none_without_header() {
        assert_eq!(basic_auth_credentials(&header::HeaderMap::new()), None);
    }
}
