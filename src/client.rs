use std::{fmt, future::Future, sync::Arc, time::Duration};

use parking_lot::{Mutex, RwLock};
use reqwest::{
    header::{self, HeaderMap, HeaderName, HeaderValue},
    Method, StatusCode,
};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    cache::{RequestCache, DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL},
    coordinator::{RefreshCoordinator, RefreshRole},
    hooks::{
        ClearTokenStore, HeadersProvider, LoadingSink, MessageSink, RefreshHandler, SessionHook,
        TokenStore,
    },
    loading::{LoadingGuard, LoadingManager},
    options::ResolvedOptions,
    request::{Part, RequestBody},
    AbortReason, FetchError, RefreshFailure, RequestDescriptor, RequestOptions, Result,
};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(60_000);
pub const DEFAULT_MAX_REFRESH_RETRIES: u32 = 1;

const ERROR_MESSAGE_FIELDS: [&str; 4] = ["errorMessage", "message", "msg", "error"];
const SESSION_EXPIRED_MESSAGE: &str = "session expired, please sign in again";

/// How the caller wants a success response handed back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseKind {
    /// Parse the body as JSON.
    Json,
    /// Return the transport response untouched.
    Raw,
}

/// Result of [`HttpClient::fetch`].
#[derive(Debug)]
pub enum FetchOutcome {
    Json(JsonValue),
    Raw(reqwest::Response),
}

/// The request that renews an expired token.
#[derive(Clone)]
pub struct RefreshConfig {
    pub request: RequestDescriptor,
    pub options: RequestOptions,
    pub handler: Arc<dyn RefreshHandler>,
}

impl RefreshConfig {
    pub fn new(request: RequestDescriptor, handler: impl RefreshHandler + 'static) -> Self {
        Self {
            request,
            options: RequestOptions::default(),
            handler: Arc::new(handler),
        }
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }
}

impl fmt::Debug for RefreshConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshConfig")
            .field("method", &self.request.method)
            .field("url", &self.request.url)
            .finish_non_exhaustive()
    }
}

/// Builder for [`HttpClient`].
pub struct HttpClientBuilder {
    base_url: String,
    timeout: Duration,
    headers: Vec<(String, String)>,
    defaults: RequestOptions,
    cache_capacity: usize,
    cache_ttl: Duration,
    http: Option<reqwest::Client>,
    tokens: Option<Arc<dyn TokenStore>>,
    headers_provider: Option<Arc<dyn HeadersProvider>>,
    refresh: Option<RefreshConfig>,
    max_refresh_retries: u32,
    message_sink: Option<Arc<dyn MessageSink>>,
    loading_sink: Option<Arc<dyn LoadingSink>>,
    session_hook: Option<Arc<dyn SessionHook>>,
}

impl HttpClientBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: DEFAULT_TIMEOUT,
            headers: Vec::new(),
            defaults: RequestOptions::default(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            cache_ttl: DEFAULT_CACHE_TTL,
            http: None,
            tokens: None,
            headers_provider: None,
            refresh: None,
            max_refresh_retries: DEFAULT_MAX_REFRESH_RETRIES,
            message_sink: None,
            loading_sink: None,
            session_hook: None,
        }
    }

    /// Creates a builder from environment variables.
    ///
    /// Reads:
    /// - `HTTP_CLIENT_BASE_URL`: absolute base URL (required)
    /// - `HTTP_CLIENT_TIMEOUT_MS`: request timeout in milliseconds (optional)
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("HTTP_CLIENT_BASE_URL").map_err(|_| {
            FetchError::Config("missing HTTP_CLIENT_BASE_URL environment variable".to_owned())
        })?;
        let mut builder = Self::new(base_url);
        if let Ok(raw) = std::env::var("HTTP_CLIENT_TIMEOUT_MS") {
            let millis = raw.trim().parse::<u64>().map_err(|_| {
                FetchError::Config(format!("HTTP_CLIENT_TIMEOUT_MS is not a number: '{raw}'"))
            })?;
            builder = builder.timeout(Duration::from_millis(millis));
        }
        Ok(builder)
    }

    /// Sets the per-request timeout. Default 60 s.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Adds a static header sent with every request.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Client-wide option defaults; per-call options override them.
    pub fn default_options(mut self, options: RequestOptions) -> Self {
        self.defaults = options;
        self
    }

    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// TTL used by the cache when a request does not set `cache_ttl`.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Uses a preconfigured transport.
    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    pub fn token_store(mut self, store: impl TokenStore + 'static) -> Self {
        self.tokens = Some(Arc::new(store));
        self
    }

    /// Replaces the default `Authorization: Bearer <token>` injection.
    pub fn headers_provider(mut self, provider: impl HeadersProvider + 'static) -> Self {
        self.headers_provider = Some(Arc::new(provider));
        self
    }

    pub fn refresh(mut self, refresh: RefreshConfig) -> Self {
        self.refresh = Some(refresh);
        self
    }

    /// Token refreshes one request may trigger before the session is given up.
    pub fn max_refresh_retries(mut self, retries: u32) -> Self {
        self.max_refresh_retries = retries;
        self
    }

    pub fn message_sink(mut self, sink: impl MessageSink + 'static) -> Self {
        self.message_sink = Some(Arc::new(sink));
        self
    }

    pub fn loading_sink(mut self, sink: impl LoadingSink + 'static) -> Self {
        self.loading_sink = Some(Arc::new(sink));
        self
    }

    /// Called once per unrecoverable authentication failure. Defaults to
    /// clearing the token store.
    pub fn session_hook(mut self, hook: impl SessionHook + 'static) -> Self {
        self.session_hook = Some(Arc::new(hook));
        self
    }

    /// Validates the configuration and builds the client.
    pub fn build(self) -> Result<HttpClient> {
        let raw = self.base_url.trim();
        if raw.is_empty() {
            return Err(FetchError::Config("base_url must not be empty".to_owned()));
        }
        let base_url = Url::parse(raw).map_err(|err| {
            FetchError::Config(format!("base_url '{raw}' is not an absolute URL: {err}"))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(FetchError::Config(format!(
                "base_url '{raw}' cannot be used as a base URL"
            )));
        }

        let mut static_headers = HeaderMap::new();
        insert_all(&mut static_headers, &self.headers)?;

        let session_hook = self.session_hook.or_else(|| {
            self.tokens
                .clone()
                .map(|store| Arc::new(ClearTokenStore(store)) as Arc<dyn SessionHook>)
        });

        Ok(HttpClient {
            inner: Arc::new(Inner {
                http: self.http.unwrap_or_default(),
                base_url,
                timeout: self.timeout,
                static_headers,
                defaults: self.defaults,
                cache: RequestCache::new(self.cache_capacity, self.cache_ttl),
                loading: LoadingManager::new(self.loading_sink),
                messages: RwLock::new(self.message_sink),
                tokens: self.tokens,
                headers_provider: self.headers_provider,
                refresh: self.refresh,
                coordinator: RefreshCoordinator::new(),
                max_refresh_retries: self.max_refresh_retries,
                session_hook,
                ended_token: Mutex::new(None),
            }),
        })
    }
}

/// Request client with auth injection, 401 recovery, caching and timeouts.
#[derive(Clone)]
pub struct HttpClient {
    inner: Arc<Inner>,
}

struct Inner {
    http: reqwest::Client,
    base_url: Url,
    timeout: Duration,
    static_headers: HeaderMap,
    defaults: RequestOptions,
    cache: RequestCache<JsonValue>,
    loading: LoadingManager,
    messages: RwLock<Option<Arc<dyn MessageSink>>>,
    tokens: Option<Arc<dyn TokenStore>>,
    headers_provider: Option<Arc<dyn HeadersProvider>>,
    refresh: Option<RefreshConfig>,
    coordinator: RefreshCoordinator,
    max_refresh_retries: u32,
    session_hook: Option<Arc<dyn SessionHook>>,
    ended_token: Mutex<Option<String>>,
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.inner.base_url.as_str())
            .field("timeout", &self.inner.timeout)
            .field("refresh", &self.inner.refresh)
            .field("max_refresh_retries", &self.inner.max_refresh_retries)
            .finish_non_exhaustive()
    }
}

struct Dispatched {
    outcome: FetchOutcome,
    cache_allowed: bool,
}

impl HttpClient {
    pub fn builder(base_url: impl Into<String>) -> HttpClientBuilder {
        HttpClientBuilder::new(base_url)
    }

    /// Sends the request and deserializes the JSON body into `T`.
    pub async fn fetch_json<T: DeserializeOwned>(
        &self,
        request: &RequestDescriptor,
        options: RequestOptions,
    ) -> Result<T> {
        match self.inner.execute(request, options, ResponseKind::Json).await? {
            FetchOutcome::Json(value) => {
                serde_json::from_value(value).map_err(|err| FetchError::Decode {
                    message: format!("response JSON does not match the expected type: {err}"),
                })
            }
            FetchOutcome::Raw(_) => Err(FetchError::Decode {
                message: "expected a JSON response".to_owned(),
            }),
        }
    }

    /// Sends the request and returns the untouched transport response.
    ///
    /// Non-2xx statuses are still classified; caching never applies.
    pub async fn fetch_raw(
        &self,
        request: &RequestDescriptor,
        options: RequestOptions,
    ) -> Result<reqwest::Response> {
        match self.inner.execute(request, options, ResponseKind::Raw).await? {
            FetchOutcome::Raw(response) => Ok(response),
            FetchOutcome::Json(_) => Err(FetchError::Decode {
                message: "expected a raw response".to_owned(),
            }),
        }
    }

    pub async fn fetch(
        &self,
        request: &RequestDescriptor,
        options: RequestOptions,
        kind: ResponseKind,
    ) -> Result<FetchOutcome> {
        self.inner.execute(request, options, kind).await
    }

    pub fn set_message_sink(&self, sink: Option<Arc<dyn MessageSink>>) {
        *self.inner.messages.write() = sink;
    }

    pub fn set_loading_sink(&self, sink: Option<Arc<dyn LoadingSink>>) {
        self.inner.loading.set_sink(sink);
    }

    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    /// Whether any loading-tracked request is in flight.
    pub fn is_loading(&self) -> bool {
        self.inner.loading.is_active()
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }
}

impl Inner {
    async fn execute(
        &self,
        request: &RequestDescriptor,
        options: RequestOptions,
        kind: ResponseKind,
    ) -> Result<FetchOutcome> {
        let options = options.or(&self.defaults).resolve();
        let cacheable = kind == ResponseKind::Json && options.cache && request.method == Method::GET;
        let key = request.signature();

        if cacheable {
            if let Some(hit) = self.cache.get(&key) {
                tracing::debug!(%key, "cache hit");
                return Ok(FetchOutcome::Json(hit));
            }
        }

        let mut refreshes = 0u32;
        loop {
            let token = self.current_token();
            let result = self.dispatch(request, &options, kind, token.as_deref()).await;
            match result {
                Ok(dispatched) => {
                    if cacheable && dispatched.cache_allowed {
                        if let FetchOutcome::Json(value) = &dispatched.outcome {
                            self.cache.set(key, value.clone(), Some(options.cache_ttl));
                        }
                    }
                    return Ok(dispatched.outcome);
                }
                Err(FetchError::Token { message, .. }) => {
                    tracing::debug!(
                        method = %request.method,
                        url = %request.url,
                        %message,
                        "received 401, attempting recovery"
                    );
                    self.recover_unauthorized(token, &mut refreshes).await?;
                }
                Err(err) => {
                    self.report(&err, &options);
                    return Err(err);
                }
            }
        }
    }

    /// Decides whether a request that got a 401 may be retried.
    async fn recover_unauthorized(&self, sent_token: Option<String>, refreshes: &mut u32) -> Result<()> {
        let Some(stale) = sent_token else {
            return Err(self.end_session("not logged in"));
        };
        let Some(refresh) = &self.refresh else {
            return Err(self.end_session_once(&stale, "unauthorized and no token refresh is configured"));
        };
        let Some(current) = self.current_token() else {
            // The store was cleared while this request was in flight, so the
            // session has already been ended elsewhere.
            tracing::debug!("token store cleared while request was in flight");
            return Err(FetchError::session_invalid("session already ended"));
        };
        if *refreshes >= self.max_refresh_retries {
            tracing::warn!(
                max_refresh_retries = self.max_refresh_retries,
                "still unauthorized after refreshing the token"
            );
            return Err(self.end_session_once(&stale, "refresh retry limit reached"));
        }
        *refreshes += 1;

        if current != stale {
            tracing::debug!("token already refreshed elsewhere, retrying");
            return Ok(());
        }

        let settled = self
            .coordinator
            .coordinate(&stale, || self.refresh_token(refresh, &stale))
            .await;
        match (settled.result, settled.role) {
            (Ok(()), _) => Ok(()),
            (Err(failure), RefreshRole::Leader) => {
                tracing::warn!(error = %failure, "token refresh failed");
                Err(self.end_session_once(&stale, failure.to_string()))
            }
            (Err(failure), RefreshRole::Follower) => {
                Err(FetchError::session_invalid(failure.to_string()))
            }
        }
    }

    async fn refresh_token(
        &self,
        refresh: &RefreshConfig,
        stale: &str,
    ) -> std::result::Result<(), RefreshFailure> {
        let mut options = refresh.options.clone().or(&self.defaults).resolve();
        options.without_auth = true;
        options.cache = false;
        options
            .extra_headers
            .push((header::AUTHORIZATION.to_string(), format!("Bearer {stale}")));

        let dispatched = self
            .dispatch(&refresh.request, &options, ResponseKind::Json, None)
            .await?;
        let FetchOutcome::Json(body) = dispatched.outcome else {
            return Err(RefreshFailure::new("refresh response was not JSON"));
        };
        let token = refresh.handler.extract_token(body).await?;

        if let Some(store) = &self.tokens {
            store.save_token(&token);
        }
        tracing::debug!("token refreshed");
        Ok(())
    }

    /// One network round trip, bounded by the timeout and the caller's token.
    async fn dispatch(
        &self,
        request: &RequestDescriptor,
        options: &ResolvedOptions,
        kind: ResponseKind,
        token: Option<&str>,
    ) -> Result<Dispatched> {
        let url = self.build_url(request)?;
        let headers = self.build_headers(request, options, token)?;
        let builder = self.http.request(request.method.clone(), url.clone());
        let builder = attach_body(builder, request.data.as_ref())?.headers(headers);

        tracing::debug!(method = %request.method, %url, "sending request");
        let _loading = LoadingGuard::start(&self.loading, options.loading);

        self.abortable(request.cancel.as_ref(), async {
            let response = builder.send().await.map_err(FetchError::network)?;
            let status = response.status();
            tracing::debug!(status = status.as_u16(), %url, "received response");

            if !status.is_success() {
                return Err(error_from_response(response, options.use_api_error_info).await);
            }

            match kind {
                ResponseKind::Raw => Ok(Dispatched {
                    outcome: FetchOutcome::Raw(response),
                    cache_allowed: false,
                }),
                ResponseKind::Json => {
                    let cache_allowed = cache_allowed(response.headers());
                    let body = response.bytes().await.map_err(FetchError::network)?;
                    let value = serde_json::from_slice(&body).map_err(|err| FetchError::Decode {
                        message: format!("response is not valid JSON: {err}"),
                    })?;
                    Ok(Dispatched {
                        outcome: FetchOutcome::Json(value),
                        cache_allowed,
                    })
                }
            }
        })
        .await
    }

    async fn abortable<T>(
        &self,
        cancel: Option<&CancellationToken>,
        work: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let cancelled = async {
            match cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            result = work => result,
            _ = tokio::time::sleep(self.timeout) => {
                Err(FetchError::Aborted(AbortReason::Timeout(self.timeout)))
            }
            _ = cancelled => Err(FetchError::Aborted(AbortReason::Cancelled)),
        }
    }

    fn build_url(&self, request: &RequestDescriptor) -> Result<Url> {
        let mut url = self.base_url.join(&request.url).map_err(|err| {
            FetchError::Config(format!("invalid request url '{}': {err}", request.url))
        })?;
        if !request.params.is_empty() {
            url.query_pairs_mut().extend_pairs(request.params.iter());
        }
        Ok(url)
    }

    /// Later layers override earlier ones: inferred content type, dynamic
    /// headers, static headers, per-call headers, then option overrides.
    fn build_headers(
        &self,
        request: &RequestDescriptor,
        options: &ResolvedOptions,
        token: Option<&str>,
    ) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        if let Some(body) = &request.data {
            if let Some(content_type) = body.inferred_content_type()? {
                headers.insert(header::CONTENT_TYPE, header_value(content_type)?);
            }
        }

        if !options.clear_all_headers {
            if !options.without_auth {
                match (&self.headers_provider, token) {
                    (Some(provider), _) => insert_all(&mut headers, &provider.headers(request))?,
                    (None, Some(token)) => {
                        headers.insert(header::AUTHORIZATION, header_value(&format!("Bearer {token}"))?);
                    }
                    (None, None) => {}
                }
            }
            for (name, value) in &self.static_headers {
                headers.insert(name.clone(), value.clone());
            }
        }
        for name in &options.clear_headers {
            headers.remove(name.as_str());
        }

        insert_all(&mut headers, &request.headers)?;

        if let Some(content_type) = &options.content_type {
            headers.insert(header::CONTENT_TYPE, header_value(content_type)?);
        }
        insert_all(&mut headers, &options.extra_headers)?;

        Ok(headers)
    }

    fn current_token(&self) -> Option<String> {
        self.tokens
            .as_ref()
            .and_then(|store| store.get_token())
            .filter(|token| !token.is_empty())
    }

    fn message_sink(&self) -> Option<Arc<dyn MessageSink>> {
        self.messages.read().clone()
    }

    /// Ends the session at most once per rejected token, so concurrent
    /// requests failing on the same token trigger one hook call and banner.
    fn end_session_once(&self, token: &str, reason: impl Into<String>) -> FetchError {
        let first = {
            let mut ended = self.ended_token.lock();
            if ended.as_deref() == Some(token) {
                false
            } else {
                *ended = Some(token.to_owned());
                true
            }
        };
        if first {
            self.end_session(reason)
        } else {
            let reason = reason.into();
            tracing::debug!(%reason, "session already ended for this token");
            FetchError::session_invalid(reason)
        }
    }

    fn end_session(&self, reason: impl Into<String>) -> FetchError {
        let reason = reason.into();
        tracing::warn!(%reason, "authentication is unrecoverable");
        if let Some(sink) = self.message_sink() {
            sink.error(SESSION_EXPIRED_MESSAGE);
        }
        if let Some(hook) = &self.session_hook {
            hook.session_invalid(&reason);
        }
        FetchError::session_invalid(reason)
    }

    fn report(&self, err: &FetchError, options: &ResolvedOptions) {
        tracing::debug!(error = %err, "request failed");
        if options.loading {
            self.loading.error();
        }
        if !options.error_message_show {
            return;
        }
        let text = match err {
            FetchError::Http {
                status, message, ..
            } => format!("【{status}】{message}"),
            FetchError::Aborted(reason) => reason.to_string(),
            FetchError::Network { message, .. }
            | FetchError::Decode { message }
            | FetchError::Config(message) => message.clone(),
            FetchError::Token { .. } | FetchError::SessionInvalid { .. } => return,
        };
        if let Some(sink) = self.message_sink() {
            sink.error(&text);
        }
    }
}

fn attach_body(
    builder: reqwest::RequestBuilder,
    body: Option<&RequestBody>,
) -> Result<reqwest::RequestBuilder> {
    let Some(body) = body else {
        return Ok(builder);
    };
    Ok(match body {
        RequestBody::Json(value) => builder.body(serde_json::to_vec(value).map_err(|err| {
            FetchError::Config(format!("request body is not serializable: {err}"))
        })?),
        RequestBody::Text(text) => builder.body(text.clone()),
        RequestBody::Form(pairs) => {
            builder.body(serde_urlencoded::to_string(pairs).map_err(|err| {
                FetchError::Config(format!("form body is not encodable: {err}"))
            })?)
        }
        RequestBody::Multipart(parts) => builder.multipart(multipart_form(parts)?),
        RequestBody::Bytes(bytes) | RequestBody::Blob { bytes, .. } => builder.body(bytes.clone()),
    })
}

fn multipart_form(parts: &[Part]) -> Result<reqwest::multipart::Form> {
    let mut form = reqwest::multipart::Form::new();
    for part in parts {
        form = match part {
            Part::Text { name, value } => form.text(name.clone(), value.clone()),
            Part::File {
                name,
                file_name,
                mime,
                bytes,
            } => {
                let file = reqwest::multipart::Part::bytes(bytes.to_vec())
                    .file_name(file_name.clone())
                    .mime_str(mime)
                    .map_err(|err| {
                        FetchError::Config(format!("invalid MIME type '{mime}': {err}"))
                    })?;
                form.part(name.clone(), file)
            }
        };
    }
    Ok(form)
}

async fn error_from_response(response: reqwest::Response, use_api_error_info: bool) -> FetchError {
    let status = response.status();
    let raw = match response.text().await {
        Ok(raw) => raw,
        Err(err) => {
            tracing::debug!(status = status.as_u16(), error = %err, "failed to read error response body");
            String::new()
        }
    };
    let body = serde_json::from_str::<JsonValue>(&raw).ok();
    let message = error_message(status, &raw, body.as_ref(), use_api_error_info);

    if status == StatusCode::UNAUTHORIZED {
        FetchError::Token { message, body }
    } else {
        FetchError::Http {
            status: status.as_u16(),
            message,
            body,
        }
    }
}

/// Best-effort human message for a failed response.
fn error_message(
    status: StatusCode,
    raw: &str,
    body: Option<&JsonValue>,
    use_api_error_info: bool,
) -> String {
    if use_api_error_info {
        if let Some(JsonValue::Object(fields)) = body {
            let found = ERROR_MESSAGE_FIELDS
                .iter()
                .filter_map(|field| fields.get(*field))
                .find(|value| is_truthy(value));
            match found {
                Some(JsonValue::String(text)) => return text.clone(),
                Some(other) => return other.to_string(),
                None => {}
            }
        }
        match body {
            Some(JsonValue::String(text)) if !text.is_empty() => return text.clone(),
            Some(JsonValue::Null) | Some(JsonValue::String(_)) => {}
            _ => {
                let raw = raw.trim();
                if !raw.is_empty() {
                    return raw.to_owned();
                }
            }
        }
    }
    status
        .canonical_reason()
        .unwrap_or("request failed")
        .to_owned()
}

fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(flag) => *flag,
        JsonValue::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        JsonValue::String(text) => !text.is_empty(),
        JsonValue::Array(_) | JsonValue::Object(_) => true,
    }
}

fn cache_allowed(headers: &HeaderMap) -> bool {
    !headers
        .get_all(header::CACHE_CONTROL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|directive| directive.trim().to_ascii_lowercase())
        .any(|directive| directive == "no-cache" || directive == "no-store")
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| FetchError::Config(format!("invalid header value '{value}'")))
}

fn insert_all(headers: &mut HeaderMap, pairs: &[(String, String)]) -> Result<()> {
    for (name, value) in pairs {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| FetchError::Config(format!("invalid header name '{name}'")))?;
        headers.insert(name, header_value(value)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use reqwest::{
        header::{self, HeaderMap, HeaderValue},
        StatusCode,
    };
    use serde_json::json;

    use super::{cache_allowed, error_message, HttpClient};
    use crate::{
        hooks::MemoryTokenStore, options::RequestOptions, FetchError, RequestDescriptor,
    };

    fn client() -> HttpClient {
        HttpClient::builder("https://api.example.com/v1/")
            .header("X-App", "demo")
            .token_store(MemoryTokenStore::with_token("secret-token"))
            .build()
            .expect("client must build")
    }

    #[test]
    fn build_rejects_missing_or_relative_base_url() {
        for base in ["", "   ", "/api", "api.example.com"] {
            let err = HttpClient::builder(base).build().expect_err("must reject");
            assert!(matches!(err, FetchError::Config(_)), "{base:?} gave {err:?}");
        }
    }

    #[test]
    fn build_rejects_invalid_static_header() {
        let err = HttpClient::builder("https://api.example.com")
            .header("bad header", "x")
            .build()
            .expect_err("must reject");
        assert!(matches!(err, FetchError::Config(_)));
    }

    #[test]
    fn relative_urls_resolve_against_base_with_params() {
        let client = client();
        let request = RequestDescriptor::get("users/all").param("page", "1");
        let url = client.inner.build_url(&request).expect("url must build");
        assert_eq!(url.as_str(), "https://api.example.com/v1/users/all?page=1");

        let absolute_path = RequestDescriptor::get("/health");
        let url = client.inner.build_url(&absolute_path).expect("url must build");
        assert_eq!(url.as_str(), "https://api.example.com/health");
    }

    #[test]
    fn header_layers_override_in_order() {
        let client = client();
        let request = RequestDescriptor::post("/users")
            .json(&json!({ "name": "Kit" }))
            .expect("json body")
            .header("X-App", "per-call");
        let options = RequestOptions::new()
            .content_type("application/vnd.api+json")
            .extra_header("X-Trace", "1")
            .resolve();

        let headers = client
            .inner
            .build_headers(&request, &options, Some("secret-token"))
            .expect("headers must build");

        assert_eq!(headers[header::AUTHORIZATION], "Bearer secret-token");
        assert_eq!(headers["x-app"], "per-call");
        assert_eq!(headers[header::CONTENT_TYPE], "application/vnd.api+json");
        assert_eq!(headers["x-trace"], "1");
    }

    #[test]
    fn without_auth_and_clear_headers_drop_global_headers() {
        let client = client();
        let request = RequestDescriptor::get("/public");

        let options = RequestOptions::new().without_auth(true).resolve();
        let headers = client
            .inner
            .build_headers(&request, &options, Some("secret-token"))
            .expect("headers must build");
        assert!(!headers.contains_key(header::AUTHORIZATION));
        assert_eq!(headers["x-app"], "demo");

        let options = RequestOptions::new().clear_header("X-App").resolve();
        let headers = client
            .inner
            .build_headers(&request, &options, Some("secret-token"))
            .expect("headers must build");
        assert!(headers.contains_key(header::AUTHORIZATION));
        assert!(!headers.contains_key("x-app"));

        let options = RequestOptions::new().clear_all_headers(true).resolve();
        let headers = client
            .inner
            .build_headers(&request, &options, Some("secret-token"))
            .expect("headers must build");
        assert!(headers.is_empty());
    }

    #[test]
    fn error_message_prefers_api_fields_in_order() {
        let body = json!({ "error": "e", "msg": "m", "message": "", "errorMessage": null });
        let message = error_message(StatusCode::BAD_REQUEST, &body.to_string(), Some(&body), true);
        assert_eq!(message, "m");

        let body = json!({ "message": { "code": 7 } });
        let message = error_message(StatusCode::BAD_REQUEST, &body.to_string(), Some(&body), true);
        assert_eq!(message, r#"{"code":7}"#);
    }

    #[test]
    fn error_message_falls_back_to_raw_body_then_reason() {
        let message = error_message(StatusCode::BAD_GATEWAY, "upstream down", None, true);
        assert_eq!(message, "upstream down");

        let body = json!("plain json string");
        let message = error_message(StatusCode::CONFLICT, "\"plain json string\"", Some(&body), true);
        assert_eq!(message, "plain json string");

        let message = error_message(StatusCode::NOT_FOUND, "", None, true);
        assert_eq!(message, "Not Found");

        let body = json!({ "message": "hidden" });
        let message = error_message(StatusCode::FORBIDDEN, &body.to_string(), Some(&body), false);
        assert_eq!(message, "Forbidden");

        let message = error_message(StatusCode::from_u16(599).expect("valid"), "", None, true);
        assert_eq!(message, "request failed");
    }

    #[test]
    fn no_cache_directives_disable_caching() {
        let mut headers = HeaderMap::new();
        assert!(cache_allowed(&headers));

        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=60"));
        assert!(cache_allowed(&headers));

        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("private, No-Store"));
        assert!(!cache_allowed(&headers));

        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        assert!(!cache_allowed(&headers));
    }

    #[test]
    fn debug_output_omits_sinks_and_tokens() {
        let debug = format!("{:?}", client());
        assert!(debug.contains("api.example.com"));
        assert!(!debug.contains("secret-token"));
    }
}
