//! OAuth 2.1 Authorization Code + PKCE authorization server guarding the
//! HTTP surface: client registration, the authorize/consent dance, token
//! issuance and rotation, and the bearer/scope middleware that protects
//! everything else.

pub mod middleware;
pub mod model;
pub mod pkce;
pub mod routes;
pub mod store;

use std::sync::Arc;

use tokio::sync::Mutex;

pub use routes::{router, OAuthState};
pub use store::{OAuthError, OAuthStore};

/// The store is mutated on every code/token issuance, so it is shared
/// behind a single lock rather than cloned per request.
pub type SharedOAuthStore = Arc<Mutex<OAuthStore>>;
