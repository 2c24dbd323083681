//! `refresh-http` is an async HTTP request client for token-authenticated APIs.
//!
//! [`HttpClient`] wraps `reqwest` with:
//! - layered header injection (body content type, auth, static, per-call)
//! - single-flight token refresh on 401 with replay of queued requests
//! - a bounded TTL cache for GET JSON responses
//! - per-request timeout and caller cancellation
//! - an edge-triggered loading indicator and message reporting

mod cache;
mod client;
mod coordinator;
mod error;
mod hooks;
mod loading;
mod options;
mod request;

pub mod auth;

pub use cache::{RequestCache, DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL};
pub use client::{
    FetchOutcome, HttpClient, HttpClientBuilder, RefreshConfig, ResponseKind,
    DEFAULT_MAX_REFRESH_RETRIES, DEFAULT_TIMEOUT,
};
pub use coordinator::{RefreshCoordinator, RefreshRole, Settled};
pub use error::{AbortReason, FetchError, RefreshFailure};
pub use hooks::{
    ClearTokenStore, HeadersProvider, LoadingSink, MemoryTokenStore, MessageSink,
    RefreshHandler, SessionHook, TokenField, TokenStore,
};
pub use loading::LoadingManager;
pub use options::RequestOptions;
pub use request::{Part, RequestBody, RequestDescriptor};

pub use tokio_util::sync::CancellationToken;

pub type Result<T> = std::result::Result<T, FetchError>;
