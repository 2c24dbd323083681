//! Ready-made [`HeadersProvider`]s for common authentication schemes.

use std::sync::Arc;

use base64::Engine;

use crate::{
    hooks::{HeadersProvider, TokenStore},
    RequestDescriptor,
};

/// `Authorization: Bearer <token>` read from a token store on every request.
pub struct BearerAuth {
    store: Arc<dyn TokenStore>,
}

impl BearerAuth {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self { store }
    }
}

impl HeadersProvider for BearerAuth {
    fn headers(&self, _request: &RequestDescriptor) -> Vec<(String, String)> {
        match self.store.get_token() {
            Some(token) if !token.is_empty() => {
                vec![("Authorization".to_owned(), format!("Bearer {token}"))]
            }
            _ => Vec::new(),
        }
    }
}

/// HTTP basic authentication.
pub struct BasicAuth {
    username: String,
    password: String,
}

impl BasicAuth {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl HeadersProvider for BasicAuth {
    fn headers(&self, _request: &RequestDescriptor) -> Vec<(String, String)> {
        let credentials = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", self.username, self.password));
        vec![("Authorization".to_owned(), format!("Basic {credentials}"))]
    }
}

/// Static API key in a configurable header (default `X-API-Key`).
pub struct ApiKeyAuth {
    header: String,
    key: String,
}

impl ApiKeyAuth {
    pub fn new(key: impl Into<String>) -> Self {
        Self::with_header("X-API-Key", key)
    }

    pub fn with_header(header: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            key: key.into(),
        }
    }
}

impl HeadersProvider for ApiKeyAuth {
    fn headers(&self, _request: &RequestDescriptor) -> Vec<(String, String)> {
        vec![(self.header.clone(), self.key.clone())]
    }
}
