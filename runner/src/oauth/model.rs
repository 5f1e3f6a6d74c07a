//! OAuth persisted entities.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use taskstore::{IndexValue, Record};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    pub scopes: Vec<String>,
    pub token_endpoint_auth_method: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Record for OAuthClient {
    fn id(&self) -> &str {
        &self.client_id
    }
    fn updated_at(&self) -> i64 {
        self.updated_at
    }
    fn collection_name() -> &'static str {
        "oauth_clients"
    }
    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        HashMap::new()
    }
}

/// A single-use authorization code bound to the PKCE challenge it was
/// issued against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthCode {
    pub code: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub code_challenge: String,
    pub scope: String,
    pub consumed: bool,
    pub expires_at: i64,
    pub updated_at: i64,
}

impl Record for AuthCode {
    fn id(&self) -> &str {
        &self.code
    }
    fn updated_at(&self) -> i64 {
        self.updated_at
    }
    fn collection_name() -> &'static str {
        "oauth_codes"
    }
    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut m = HashMap::new();
        m.insert("client_id".to_string(), IndexValue::String(self.client_id.clone()));
        m.insert("consumed".to_string(), IndexValue::Bool(self.consumed));
        m
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    pub token: String,
    pub client_id: String,
    pub scope: String,
    pub expires_at: i64,
    pub updated_at: i64,
}

impl Record for AccessToken {
    fn id(&self) -> &str {
        &self.token
    }
    fn updated_at(&self) -> i64 {
        self.updated_at
    }
    fn collection_name() -> &'static str {
        "oauth_access_tokens"
    }
    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut m = HashMap::new();
        m.insert("client_id".to_string(), IndexValue::String(self.client_id.clone()));
        m
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshToken {
    pub token: String,
    pub client_id: String,
    pub scope: String,
    pub expires_at: i64,
    pub updated_at: i64,
}

impl Record for RefreshToken {
    fn id(&self) -> &str {
        &self.token
    }
    fn updated_at(&self) -> i64 {
        self.updated_at
    }
    fn collection_name() -> &'static str {
        "oauth_refresh_tokens"
    }
    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut m = HashMap::new();
        m.insert("client_id".to_string(), IndexValue::String(self.client_id.clone()));
        m
    }
}

/// The outcome of a successful token issuance, handed back to the
/// `/token` route.
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub scope: String,
}
