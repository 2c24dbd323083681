use bytes::Bytes;
use reqwest::Method;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::{FetchError, Result};

/// One field of a multipart form body.
#[derive(Clone, Debug, PartialEq)]
pub enum Part {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        file_name: String,
        mime: String,
        bytes: Bytes,
    },
}

impl Part {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Text {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn file(
        name: impl Into<String>,
        file_name: impl Into<String>,
        mime: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        Self::File {
            name: name.into(),
            file_name: file_name.into(),
            mime: mime.into(),
            bytes: bytes.into(),
        }
    }
}

/// Request payload. Every variant can be rebuilt, so a request can be replayed
/// after a token refresh.
#[derive(Clone, Debug, PartialEq)]
pub enum RequestBody {
    /// Serialized with `serde_json`.
    Json(serde_json::Value),
    /// Sent as-is.
    Text(String),
    /// `application/x-www-form-urlencoded` pairs.
    Form(Vec<(String, String)>),
    /// `multipart/form-data`; the transport picks the boundary.
    Multipart(Vec<Part>),
    /// Opaque binary payload.
    Bytes(Bytes),
    /// Binary payload with an explicit MIME type.
    Blob { bytes: Bytes, mime: String },
}

impl RequestBody {
    /// Content type implied by the body shape, if this layer should set one.
    pub(crate) fn inferred_content_type(&self) -> Result<Option<&str>> {
        Ok(match self {
            Self::Json(_) => Some("application/json"),
            Self::Text(_) => Some("text/plain;charset=UTF-8"),
            Self::Form(_) => Some("application/x-www-form-urlencoded"),
            Self::Multipart(_) => None,
            Self::Bytes(_) => Some("application/octet-stream"),
            Self::Blob { mime, .. } => {
                if mime.trim().is_empty() {
                    return Err(FetchError::Config(
                        "blob body requires a non-empty MIME type".to_owned(),
                    ));
                }
                Some(mime.as_str())
            }
        })
    }
}

/// Everything that identifies one call. The client never mutates it.
#[derive(Clone, Debug)]
pub struct RequestDescriptor {
    pub url: String,
    pub method: Method,
    pub data: Option<RequestBody>,
    pub params: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub cancel: Option<CancellationToken>,
}

impl RequestDescriptor {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method,
            data: None,
            params: Vec::new(),
            headers: Vec::new(),
            cancel: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(Method::PATCH, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    /// Adds a query parameter.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.params
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets a JSON body.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self> {
        let value = serde_json::to_value(body).map_err(|err| {
            FetchError::Config(format!("request body is not serializable: {err}"))
        })?;
        self.data = Some(RequestBody::Json(value));
        Ok(self)
    }

    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.data = Some(RequestBody::Text(body.into()));
        self
    }

    pub fn form<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let pairs = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.data = Some(RequestBody::Form(pairs));
        self
    }

    pub fn multipart(mut self, parts: impl Into<Vec<Part>>) -> Self {
        self.data = Some(RequestBody::Multipart(parts.into()));
        self
    }

    pub fn bytes(mut self, body: impl Into<Bytes>) -> Self {
        self.data = Some(RequestBody::Bytes(body.into()));
        self
    }

    pub fn blob(mut self, body: impl Into<Bytes>, mime: impl Into<String>) -> Self {
        self.data = Some(RequestBody::Blob {
            bytes: body.into(),
            mime: mime.into(),
        });
        self
    }

    /// Lets the caller abort this request. Races the client timeout.
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Canonical identity used for cache lookups: method, url and the params
    /// sorted by key.
    pub fn signature(&self) -> String {
        let mut sorted: Vec<(&str, &str)> = self
            .params
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        sorted.sort();
        let query = serde_urlencoded::to_string(&sorted).unwrap_or_default();
        if query.is_empty() {
            format!("{}:{}", self.method, self.url)
        } else {
            format!("{}:{}?{}", self.method, self.url, query)
        }
    }
}
