use std::{env, fmt, sync::Arc, time::Duration};

use reqwest::Url;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::{
    AfterResponseHook, BeforeErrorHook, BeforeRequestHook, BeforeRetryHook, Body, FetchError,
    HeaderSource, Headers, Hooks, Method, Result, Retry, RetryPolicy,
};
use crate::fetch::Fetch;

/// Default per-attempt timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const ENV_PREFIX_URL: &str = "FETCHKIT_PREFIX_URL";
const ENV_TIMEOUT_MS: &str = "FETCHKIT_TIMEOUT_MS";
const ENV_RETRY_LIMIT: &str = "FETCHKIT_RETRY_LIMIT";

/// Per-attempt timeout setting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Timeout {
    After(Duration),
    Disabled,
}

impl Default for Timeout {
    fn default() -> Self {
        Self::After(DEFAULT_TIMEOUT)
    }
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        Self::After(duration)
    }
}

/// Credentials mode carried on the request for transports that honor it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Credentials {
    Omit,
    #[default]
    SameOrigin,
    Include,
}

/// One configuration layer. Every field is optional.
///
/// Layers are applied left to right: instance layers first, the per-call
/// layer last.
#[derive(Clone, Default)]
pub struct Options {
    method: Option<Method>,
    prefix_url: Option<String>,
    headers: Option<HeaderSource>,
    body: Option<Body>,
    search_params: Option<Vec<(String, String)>>,
    retry: Option<Retry>,
    timeout: Option<Timeout>,
    hooks: Hooks,
    replace_hooks: bool,
    throw_http_errors: Option<bool>,
    signal: Option<CancellationToken>,
    credentials: Option<Credentials>,
    fetch: Option<Arc<dyn Fetch>>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a layer from `FETCHKIT_*` environment variables.
    ///
    /// Reads:
    /// - `FETCHKIT_PREFIX_URL`: base URL for relative inputs
    /// - `FETCHKIT_TIMEOUT_MS`: per-attempt timeout; `0` or `off` disables it
    /// - `FETCHKIT_RETRY_LIMIT`: retry limit
    ///
    /// Unset variables are skipped. Empty or unparsable ones are an error.
    pub fn from_env() -> Result<Self> {
        let mut options = Self::new();
        if let Some(prefix) = read_env(ENV_PREFIX_URL)? {
            options = options.prefix_url(prefix);
        }
        if let Some(raw) = read_env(ENV_TIMEOUT_MS)? {
            options.timeout = Some(parse_timeout_ms(&raw)?);
        }
        if let Some(raw) = read_env(ENV_RETRY_LIMIT)? {
            let limit = raw.parse::<u32>().map_err(|_| {
                FetchError::Config(format!(
                    "{ENV_RETRY_LIMIT} must be a non-negative integer, got `{raw}`"
                ))
            })?;
            options = options.retry(limit);
        }
        Ok(options)
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn prefix_url(mut self, prefix_url: impl Into<String>) -> Self {
        self.prefix_url = Some(prefix_url.into());
        self
    }

    /// Replaces this layer's header source.
    pub fn headers(mut self, headers: impl Into<HeaderSource>) -> Self {
        self.headers = Some(headers.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.header_entry(name.into(), Some(value.into()));
        self
    }

    /// Removes `name` from the headers inherited from earlier layers.
    pub fn remove_header(mut self, name: impl Into<String>) -> Self {
        self.header_entry(name.into(), None);
        self
    }

    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serializes `value` as the JSON body.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self> {
        self.body = Some(Body::json(value)?);
        Ok(self)
    }

    pub fn search_params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.search_params = Some(
            params
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        );
        self
    }

    /// Sets search params from a query string such as `a=1&b=2`.
    pub fn search_query(self, query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        self.search_params(form_urlencoded::parse(query.as_bytes()))
    }

    /// Sets the retry limit (`u32`) or structured retry options.
    pub fn retry(mut self, retry: impl Into<Retry>) -> Self {
        self.retry = Some(retry.into());
        self
    }

    pub fn timeout(mut self, timeout: impl Into<Timeout>) -> Self {
        self.timeout = Some(timeout.into());
        self
    }

    pub fn no_timeout(mut self) -> Self {
        self.timeout = Some(Timeout::Disabled);
        self
    }

    /// Appends every hook of `hooks` to this layer.
    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks.extend(&hooks);
        self
    }

    pub fn before_request(mut self, hook: impl BeforeRequestHook + 'static) -> Self {
        self.hooks = self.hooks.before_request(hook);
        self
    }

    pub fn before_retry(mut self, hook: impl BeforeRetryHook + 'static) -> Self {
        self.hooks = self.hooks.before_retry(hook);
        self
    }

    pub fn before_error(mut self, hook: impl BeforeErrorHook + 'static) -> Self {
        self.hooks = self.hooks.before_error(hook);
        self
    }

    pub fn after_response(mut self, hook: impl AfterResponseHook + 'static) -> Self {
        self.hooks = self.hooks.after_response(hook);
        self
    }

    /// Makes this layer's hooks replace those of earlier layers.
    pub fn replace_hooks(mut self) -> Self {
        self.replace_hooks = true;
        self
    }

    pub fn throw_http_errors(mut self, throw: bool) -> Self {
        self.throw_http_errors = Some(throw);
        self
    }

    pub fn signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Overrides the transport for requests built from this layer.
    pub fn fetch(mut self, fetch: Arc<dyn Fetch>) -> Self {
        self.fetch = Some(fetch);
        self
    }

    fn header_entry(&mut self, name: String, value: Option<String>) {
        self.headers
            .get_or_insert_with(|| HeaderSource::Map(Vec::new()))
            .insert(name, value);
    }
}

impl From<()> for Options {
    fn from(_: ()) -> Self {
        Self::default()
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("method", &self.method)
            .field("prefix_url", &self.prefix_url)
            .field("headers", &self.headers.as_ref().map(merge_source))
            .field("body", &self.body)
            .field("search_params", &self.search_params)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .field("hooks", &self.hooks)
            .field("replace_hooks", &self.replace_hooks)
            .field("throw_http_errors", &self.throw_http_errors)
            .field("credentials", &self.credentials)
            .field("custom_fetch", &self.fetch.is_some())
            .finish()
    }
}

/// Configuration after all layers were merged.
#[derive(Clone)]
pub struct NormalizedOptions {
    pub method: Method,
    pub url: Url,
    pub prefix_url: Option<String>,
    pub headers: Headers,
    pub body: Option<Body>,
    pub retry: RetryPolicy,
    pub timeout: Timeout,
    pub hooks: Hooks,
    pub throw_http_errors: bool,
    pub signal: CancellationToken,
    pub credentials: Credentials,
    pub(crate) fetch: Option<Arc<dyn Fetch>>,
}

impl fmt::Debug for NormalizedOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NormalizedOptions")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("prefix_url", &self.prefix_url)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .field("hooks", &self.hooks)
            .field("throw_http_errors", &self.throw_http_errors)
            .field("cancelled", &self.signal.is_cancelled())
            .field("credentials", &self.credentials)
            .finish()
    }
}

/// Merges `layers` in order and resolves `input` into an absolute URL.
pub fn resolve<'a, I>(input: &str, layers: I) -> Result<NormalizedOptions>
where
    I: IntoIterator<Item = &'a Options>,
{
    let mut method = Method::default();
    let mut prefix_url: Option<String> = None;
    let mut headers = Headers::new();
    let mut body = None;
    let mut search_params: Option<Vec<(String, String)>> = None;
    let mut retry = RetryPolicy::default();
    let mut timeout = Timeout::default();
    let mut hooks = Hooks::default();
    let mut throw_http_errors = true;
    let mut signal = None;
    let mut credentials = Credentials::default();
    let mut fetch = None;

    for layer in layers {
        if let Some(value) = layer.method {
            method = value;
        }
        if let Some(value) = &layer.prefix_url {
            prefix_url = Some(join_prefix(prefix_url.as_deref(), value));
        }
        if let Some(source) = &layer.headers {
            headers = crate::merge_headers(Some(&HeaderSource::Headers(headers)), Some(source));
        }
        if let Some(value) = &layer.body {
            body = Some(value.clone());
        }
        if let Some(params) = &layer.search_params {
            merge_search_params(search_params.get_or_insert_with(Vec::new), params);
        }
        if let Some(value) = &layer.retry {
            retry.apply(value);
        }
        if let Some(value) = layer.timeout {
            timeout = value;
        }
        if layer.replace_hooks {
            hooks = layer.hooks.clone();
        } else {
            hooks.extend(&layer.hooks);
        }
        if let Some(value) = layer.throw_http_errors {
            throw_http_errors = value;
        }
        if let Some(value) = &layer.signal {
            signal = Some(value.clone());
        }
        if let Some(value) = layer.credentials {
            credentials = value;
        }
        if let Some(value) = &layer.fetch {
            fetch = Some(value.clone());
        }
    }

    let url = resolve_url(input, prefix_url.as_deref(), search_params.as_deref())?;
    Ok(NormalizedOptions {
        method,
        url,
        prefix_url,
        headers,
        body,
        retry,
        timeout,
        hooks,
        throw_http_errors,
        signal: signal.unwrap_or_else(CancellationToken::new),
        credentials,
        fetch,
    })
}

fn merge_source(source: &HeaderSource) -> Headers {
    crate::merge_headers(None, Some(source))
}

fn merge_search_params(merged: &mut Vec<(String, String)>, params: &[(String, String)]) {
    merged.retain(|(name, _)| !params.iter().any(|(key, _)| key == name));
    merged.extend(params.iter().cloned());
}

fn join_prefix(base: Option<&str>, next: &str) -> String {
    match base {
        Some(base) if !is_absolute(next) => format!(
            "{}/{}",
            base.trim_end_matches('/'),
            next.trim_start_matches('/')
        ),
        _ => next.to_owned(),
    }
}

fn resolve_url(
    input: &str,
    prefix_url: Option<&str>,
    search_params: Option<&[(String, String)]>,
) -> Result<Url> {
    let joined = if is_absolute(input) {
        input.to_owned()
    } else if let Some(prefix) = prefix_url {
        if input.starts_with('/') {
            return Err(FetchError::InvalidUrl(format!(
                "`{input}` must not begin with a slash when using prefix_url"
            )));
        }
        if input.is_empty() || prefix.ends_with('/') {
            format!("{prefix}{input}")
        } else {
            format!("{prefix}/{input}")
        }
    } else {
        return Err(FetchError::InvalidUrl(format!(
            "`{input}` is relative and no prefix_url is set"
        )));
    };

    let mut url =
        Url::parse(&joined).map_err(|err| FetchError::InvalidUrl(format!("{joined}: {err}")))?;
    if let Some(params) = search_params {
        url.set_query(None);
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params);
        }
    }
    Ok(url)
}

fn is_absolute(url: &str) -> bool {
    url.split_once("://").is_some_and(|(scheme, _)| {
        scheme.starts_with(|c: char| c.is_ascii_alphabetic())
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
    })
}

fn read_env(name: &str) -> Result<Option<String>> {
    match env::var(name) {
        Ok(value) if value.trim().is_empty() => {
            Err(FetchError::Config(format!("{name} is set but empty")))
        }
        Ok(value) => Ok(Some(value.trim().to_owned())),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => {
            Err(FetchError::Config(format!("{name} is not valid unicode")))
        }
    }
}

fn parse_timeout_ms(raw: &str) -> Result<Timeout> {
    if raw.eq_ignore_ascii_case("off") {
        return Ok(Timeout::Disabled);
    }
    match raw.parse::<u64>() {
        Ok(0) => Ok(Timeout::Disabled),
        Ok(ms) => Ok(Timeout::After(Duration::from_millis(ms))),
        Err(_) => Err(FetchError::Config(format!(
            "{ENV_TIMEOUT_MS} must be milliseconds or `off`, got `{raw}`"
        ))),
    }
}
