//! Collaborator interfaces the client consumes.
//!
//! Storage, notification banners, loading overlays and session restarts live
//! outside this crate; the client only talks to them through these traits.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value as JsonValue;

use crate::{FetchError, RequestDescriptor};

/// Persistent home of the authentication token.
pub trait TokenStore: Send + Sync {
    fn get_token(&self) -> Option<String>;
    fn save_token(&self, token: &str);
    /// Wipes all persisted session state.
    fn clear_all(&self);
}

/// Token store kept in process memory.
#[derive(Clone, Debug, Default)]
pub struct MemoryTokenStore {
    token: Arc<RwLock<Option<String>>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Arc::new(RwLock::new(Some(token.into()))),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn get_token(&self) -> Option<String> {
        self.token.read().clone()
    }

    fn save_token(&self, token: &str) {
        *self.token.write() = Some(token.to_owned());
    }

    fn clear_all(&self) {
        *self.token.write() = None;
    }
}

/// Computes per-request headers, typically authentication.
pub trait HeadersProvider: Send + Sync {
    fn headers(&self, request: &RequestDescriptor) -> Vec<(String, String)>;
}

impl<F> HeadersProvider for F
where
    F: Fn(&RequestDescriptor) -> Vec<(String, String)> + Send + Sync,
{
    fn headers(&self, request: &RequestDescriptor) -> Vec<(String, String)> {
        self(request)
    }
}

/// User-facing notification sink (toasts, banners, logs).
pub trait MessageSink: Send + Sync {
    fn success(&self, _message: &str) {}
    fn error(&self, _message: &str) {}
}

/// Busy-indicator callbacks, driven by [`crate::LoadingManager`].
pub trait LoadingSink: Send + Sync {
    fn start(&self) {}
    fn finish(&self) {}
    fn error(&self) {}
}

/// Receives the terminal "session invalid" signal.
///
/// Implementations clear persisted state and route the user back to a login
/// flow. The failing call still returns [`FetchError::SessionInvalid`].
pub trait SessionHook: Send + Sync {
    fn session_invalid(&self, reason: &str);
}

impl<F> SessionHook for F
where
    F: Fn(&str) + Send + Sync,
{
    fn session_invalid(&self, reason: &str) {
        self(reason)
    }
}

/// Default session hook: wipes the token store.
pub struct ClearTokenStore(pub Arc<dyn TokenStore>);

impl SessionHook for ClearTokenStore {
    fn session_invalid(&self, reason: &str) {
        tracing::warn!(%reason, "session invalid, clearing token store");
        self.0.clear_all();
    }
}

/// Extracts the new token from a successful refresh response body.
#[async_trait]
pub trait RefreshHandler: Send + Sync {
    async fn extract_token(&self, body: JsonValue) -> Result<String, FetchError>;
}

/// Reads the new token from a named field or a JSON pointer (`/data/token`).
#[derive(Clone, Debug)]
pub struct TokenField(String);

impl TokenField {
    pub fn new(field: impl Into<String>) -> Self {
        Self(field.into())
    }
}

impl Default for TokenField {
    fn default() -> Self {
        Self::new("token")
    }
}

#[async_trait]
impl RefreshHandler for TokenField {
    async fn extract_token(&self, body: JsonValue) -> Result<String, FetchError> {
        let found = if self.0.starts_with('/') {
            body.pointer(&self.0)
        } else {
            body.get(&self.0)
        };
        match found {
            Some(JsonValue::String(token)) if !token.is_empty() => Ok(token.clone()),
            _ => Err(FetchError::Decode {
                message: format!("refresh response has no string field '{}'", self.0),
            }),
        }
    }
}

#[async_trait]
impl<F> RefreshHandler for F
where
    F: Fn(JsonValue) -> Result<String, FetchError> + Send + Sync,
{
    async fn extract_token(&self, body: JsonValue) -> Result<String, FetchError> {
        self(body)
    }
}
