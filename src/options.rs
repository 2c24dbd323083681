use std::time::Duration;

use crate::cache::DEFAULT_CACHE_TTL;

/// Per-call behavior switches.
///
/// Every field is optional: unset fields fall back to the client-wide defaults
/// given to [`crate::HttpClientBuilder::default_options`], then to the built-in
/// defaults.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Drive the loading indicator. Default `true`.
    pub loading: Option<bool>,
    /// Report failures to the message sink. Default `true`.
    pub error_message_show: Option<bool>,
    /// Prefer the server's error text over generic messages. Default `true`.
    pub use_api_error_info: Option<bool>,
    /// Overrides the inferred `Content-Type`.
    pub content_type: Option<String>,
    /// Extra headers applied last; win over everything else.
    pub extra_headers: Option<Vec<(String, String)>>,
    /// Global header names to drop for this call.
    pub clear_headers: Option<Vec<String>>,
    /// Drop every global (dynamic and static) header for this call.
    pub clear_all_headers: Option<bool>,
    /// Skip dynamic auth headers. Default `false`.
    pub without_auth: Option<bool>,
    /// Cache GET JSON responses. Default `false`.
    pub cache: Option<bool>,
    /// Lifetime of a cached response. Default 5 minutes.
    pub cache_ttl: Option<Duration>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn loading(mut self, on: bool) -> Self {
        self.loading = Some(on);
        self
    }

    pub fn error_message_show(mut self, on: bool) -> Self {
        self.error_message_show = Some(on);
        self
    }

    pub fn use_api_error_info(mut self, on: bool) -> Self {
        self.use_api_error_info = Some(on);
        self
    }

    pub fn content_type(mut self, value: impl Into<String>) -> Self {
        self.content_type = Some(value.into());
        self
    }

    pub fn extra_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers
            .get_or_insert_with(Vec::new)
            .push((name.into(), value.into()));
        self
    }

    pub fn clear_header(mut self, name: impl Into<String>) -> Self {
        self.clear_headers
            .get_or_insert_with(Vec::new)
            .push(name.into());
        self
    }

    pub fn clear_all_headers(mut self, on: bool) -> Self {
        self.clear_all_headers = Some(on);
        self
    }

    pub fn without_auth(mut self, on: bool) -> Self {
        self.without_auth = Some(on);
        self
    }

    pub fn cache(mut self, on: bool) -> Self {
        self.cache = Some(on);
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Fills unset fields of `self` from `defaults`.
    pub(crate) fn or(self, defaults: &RequestOptions) -> RequestOptions {
        RequestOptions {
            loading: self.loading.or(defaults.loading),
            error_message_show: self.error_message_show.or(defaults.error_message_show),
            use_api_error_info: self.use_api_error_info.or(defaults.use_api_error_info),
            content_type: self.content_type.or_else(|| defaults.content_type.clone()),
            extra_headers: self
                .extra_headers
                .or_else(|| defaults.extra_headers.clone()),
            clear_headers: self
                .clear_headers
                .or_else(|| defaults.clear_headers.clone()),
            clear_all_headers: self.clear_all_headers.or(defaults.clear_all_headers),
            without_auth: self.without_auth.or(defaults.without_auth),
            cache: self.cache.or(defaults.cache),
            cache_ttl: self.cache_ttl.or(defaults.cache_ttl),
        }
    }

    pub(crate) fn resolve(self) -> ResolvedOptions {
        ResolvedOptions {
            loading: self.loading.unwrap_or(true),
            error_message_show: self.error_message_show.unwrap_or(true),
            use_api_error_info: self.use_api_error_info.unwrap_or(true),
            content_type: self.content_type.filter(|value| !value.is_empty()),
            extra_headers: self.extra_headers.unwrap_or_default(),
            clear_headers: self.clear_headers.unwrap_or_default(),
            clear_all_headers: self.clear_all_headers.unwrap_or(false),
            without_auth: self.without_auth.unwrap_or(false),
            cache: self.cache.unwrap_or(false),
            cache_ttl: self.cache_ttl.unwrap_or(DEFAULT_CACHE_TTL),
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct ResolvedOptions {
    pub loading: bool,
    pub error_message_show: bool,
    pub use_api_error_info: bool,
    pub content_type: Option<String>,
    pub extra_headers: Vec<(String, String)>,
    pub clear_headers: Vec<String>,
    pub clear_all_headers: bool,
    pub without_auth: bool,
    pub cache: bool,
    pub cache_ttl: Duration,
}
