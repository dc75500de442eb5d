use std::{
    collections::BTreeSet,
    fmt,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use crate::{FetchError, Headers, Method};

const RETRY_AFTER: &str = "retry-after";
const RATE_LIMIT_RESET_HEADERS: [&str; 3] =
    ["ratelimit-reset", "x-ratelimit-reset", "x-rate-limit-reset"];
const PAYLOAD_TOO_LARGE: u16 = 413;

/// Custom backoff curve, called with the 1-based retry number.
pub type DelayFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// Partial retry configuration supplied by one options layer.
///
/// Unset fields inherit from the earlier layers.
#[derive(Clone, Default)]
pub struct RetryOptions {
    pub(crate) limit: Option<u32>,
    pub(crate) methods: Option<BTreeSet<Method>>,
    pub(crate) status_codes: Option<BTreeSet<u16>>,
    pub(crate) after_status_codes: Option<BTreeSet<u16>>,
    pub(crate) max_retry_after: Option<Duration>,
    pub(crate) backoff_limit: Option<Duration>,
    pub(crate) delay: Option<DelayFn>,
}

impl RetryOptions {
    /// Creates an empty layer that inherits every field.
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum number of retries after the first attempt.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Methods allowed to retry.
    pub fn methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods = Some(methods.into_iter().collect());
        self
    }

    /// Response statuses that trigger a retry.
    pub fn status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.status_codes = Some(codes.into_iter().collect());
        self
    }

    /// Statuses for which a server-provided `retry-after` is honored.
    pub fn after_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.after_status_codes = Some(codes.into_iter().collect());
        self
    }

    /// Longest server-requested delay accepted; longer ones give up.
    pub fn max_retry_after(mut self, max: Duration) -> Self {
        self.max_retry_after = Some(max);
        self
    }

    /// Upper bound on any computed backoff delay.
    pub fn backoff_limit(mut self, limit: Duration) -> Self {
        self.backoff_limit = Some(limit);
        self
    }

    /// Replaces the default exponential curve.
    pub fn delay<F>(mut self, delay: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        self.delay = Some(Arc::new(delay));
        self
    }
}

impl fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("limit", &self.limit)
            .field("methods", &self.methods)
            .field("status_codes", &self.status_codes)
            .field("after_status_codes", &self.after_status_codes)
            .field("max_retry_after", &self.max_retry_after)
            .field("backoff_limit", &self.backoff_limit)
            .field("custom_delay", &self.delay.is_some())
            .finish()
    }
}

/// Retry value of an options layer.
///
/// A bare number only sets the limit; a structure overrides field by field.
#[derive(Clone, Debug)]
pub enum Retry {
    /// Retry limit only.
    Limit(u32),
    /// Field-by-field override.
    Options(RetryOptions),
}

impl From<u32> for Retry {
    fn from(limit: u32) -> Self {
        Self::Limit(limit)
    }
}

impl From<RetryOptions> for Retry {
    fn from(options: RetryOptions) -> Self {
        Self::Options(options)
    }
}

/// Fully resolved retry configuration.
#[derive(Clone)]
pub struct RetryPolicy {
    limit: u32,
    methods: BTreeSet<Method>,
    status_codes: BTreeSet<u16>,
    after_status_codes: BTreeSet<u16>,
    max_retry_after: Option<Duration>,
    backoff_limit: Option<Duration>,
    delay: Option<DelayFn>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            limit: 2,
            methods: [
                Method::Get,
                Method::Put,
                Method::Head,
                Method::Delete,
                Method::Options,
                Method::Trace,
            ]
            .into_iter()
            .collect(),
            status_codes: [408, 413, 429, 500, 502, 503, 504].into_iter().collect(),
            after_status_codes: [413, 429, 503].into_iter().collect(),
            max_retry_after: None,
            backoff_limit: None,
            delay: None,
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("limit", &self.limit)
            .field("methods", &self.methods)
            .field("status_codes", &self.status_codes)
            .field("after_status_codes", &self.after_status_codes)
            .field("max_retry_after", &self.max_retry_after)
            .field("backoff_limit", &self.backoff_limit)
            .field("custom_delay", &self.delay.is_some())
            .finish()
    }
}

/// Per-call retry bookkeeping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RetryState {
    /// Retries performed so far.
    pub retry_count: u32,
    /// Sum of all delays waited so far.
    pub total_delay: Duration,
}

/// Outcome of [`RetryPolicy::decide`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after waiting `delay`.
    Retry { delay: Duration },
    /// Surface the error.
    GiveUp(GiveUpReason),
}

/// Why a failed attempt is not retried.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GiveUpReason {
    /// Every allowed retry was used.
    LimitReached,
    /// The request method is not in the retry set.
    MethodNotAllowed,
    /// The error or status is not retryable.
    NotRetryable,
    /// The server asked for a longer wait than `max_retry_after` allows.
    RetryAfterTooLong,
}

impl fmt::Display for GiveUpReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::LimitReached => "retry limit reached",
            Self::MethodNotAllowed => "method not retryable",
            Self::NotRetryable => "error not retryable",
            Self::RetryAfterTooLong => "retry-after exceeds maximum",
        };
        f.write_str(text)
    }
}

impl RetryPolicy {
    /// Maximum number of retries.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn methods(&self) -> &BTreeSet<Method> {
        &self.methods
    }

    pub fn status_codes(&self) -> &BTreeSet<u16> {
        &self.status_codes
    }

    pub fn after_status_codes(&self) -> &BTreeSet<u16> {
        &self.after_status_codes
    }

    pub fn max_retry_after(&self) -> Option<Duration> {
        self.max_retry_after
    }

    pub fn backoff_limit(&self) -> Option<Duration> {
        self.backoff_limit
    }

    pub(crate) fn apply(&mut self, retry: &Retry) {
        let options = match retry {
            Retry::Limit(limit) => {
                self.limit = *limit;
                return;
            }
            Retry::Options(options) => options,
        };
        if let Some(limit) = options.limit {
            self.limit = limit;
        }
        if let Some(methods) = &options.methods {
            self.methods = methods.clone();
        }
        if let Some(codes) = &options.status_codes {
            self.status_codes = codes.clone();
        }
        if let Some(codes) = &options.after_status_codes {
            self.after_status_codes = codes.clone();
        }
        if let Some(max) = options.max_retry_after {
            self.max_retry_after = Some(max);
        }
        if let Some(limit) = options.backoff_limit {
            self.backoff_limit = Some(limit);
        }
        if let Some(delay) = &options.delay {
            self.delay = Some(delay.clone());
        }
    }

    /// Decides whether the failed attempt described by `error` is retried.
    pub fn decide(
        &self,
        state: &RetryState,
        method: Method,
        error: &FetchError,
        now: SystemTime,
    ) -> RetryDecision {
        let retry_number = state.retry_count.saturating_add(1);
        if retry_number > self.limit {
            return RetryDecision::GiveUp(GiveUpReason::LimitReached);
        }
        if !self.methods.contains(&method) {
            return RetryDecision::GiveUp(GiveUpReason::MethodNotAllowed);
        }

        match error {
            FetchError::Network { .. } | FetchError::Timeout { .. } => RetryDecision::Retry {
                delay: self.backoff(retry_number),
            },
            FetchError::Http(http) => {
                let status = http.status().as_u16();
                if !self.status_codes.contains(&status) {
                    return RetryDecision::GiveUp(GiveUpReason::NotRetryable);
                }
                if self.after_status_codes.contains(&status) {
                    if let Some(after) = parse_retry_after(http.response().headers(), now) {
                        if self.max_retry_after.is_some_and(|max| after > max) {
                            return RetryDecision::GiveUp(GiveUpReason::RetryAfterTooLong);
                        }
                        return RetryDecision::Retry { delay: after };
                    }
                }
                if status == PAYLOAD_TOO_LARGE {
                    return RetryDecision::GiveUp(GiveUpReason::NotRetryable);
                }
                RetryDecision::Retry {
                    delay: self.backoff(retry_number),
                }
            }
            _ => RetryDecision::GiveUp(GiveUpReason::NotRetryable),
        }
    }

    /// Delay before the given 1-based retry, capped by `backoff_limit`.
    pub fn backoff(&self, retry_number: u32) -> Duration {
        let delay = match &self.delay {
            Some(delay) => delay(retry_number),
            None => default_backoff(retry_number),
        };
        match self.backoff_limit {
            Some(limit) => delay.min(limit),
            None => delay,
        }
    }
}

/// `300ms * 2^(retry_number - 1)`.
fn default_backoff(retry_number: u32) -> Duration {
    let exponent = retry_number.saturating_sub(1).min(40);
    Duration::from_millis(300_u64.saturating_mul(1_u64 << exponent))
}

/// Reads the server-requested delay from `retry-after` or rate-limit headers.
///
/// `retry-after` accepts delta-seconds or an HTTP-date. The rate-limit reset
/// headers accept seconds, or a Unix timestamp when the value lies in the
/// future.
pub fn parse_retry_after(headers: &Headers, now: SystemTime) -> Option<Duration> {
    if let Some(value) = headers.get(RETRY_AFTER) {
        let value = value.trim();
        if let Some(delay) = parse_seconds(value) {
            return Some(delay);
        }
        let date = httpdate::parse_http_date(value).ok()?;
        return Some(date.duration_since(now).unwrap_or(Duration::ZERO));
    }

    let value = RATE_LIMIT_RESET_HEADERS
        .iter()
        .find_map(|name| headers.get(name))?
        .trim();
    let seconds: f64 = value.parse().ok().filter(|s: &f64| s.is_finite() && *s >= 0.0)?;
    let now_secs = now.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64();
    if seconds > now_secs {
        return Duration::try_from_secs_f64(seconds - now_secs).ok();
    }
    Duration::try_from_secs_f64(seconds).ok()
}

/// Values too large for a `Duration` are treated as unparsable.
fn parse_seconds(value: &str) -> Option<Duration> {
    let seconds: f64 = value.parse().ok()?;
    Duration::try_from_secs_f64(seconds).ok()
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::Arc,
        time::{Duration, SystemTime, UNIX_EPOCH},
    };

    use super::{
        parse_retry_after, GiveUpReason, Retry, RetryDecision, RetryOptions, RetryPolicy,
        RetryState,
    };
    use crate::{
        error::HttpError, options::resolve, FetchError, Headers, Method, Options, Request,
        Response, StatusCode,
    };

    fn http_error(status: u16, headers: &[(&str, &str)]) -> FetchError {
        let mut response = Response::new(StatusCode::from_u16(status).unwrap(), "");
        for (name, value) in headers {
            response = response.with_header(*name, *value);
        }
        let options = resolve("https://example.com/", [&Options::new()]).unwrap();
        let request = Request::from_options(&options);
        FetchError::Http(Box::new(HttpError::new(response, request, Arc::new(options))))
    }

    fn network_error() -> FetchError {
        FetchError::network(Method::Get, "https://example.com/", io::Error::other("reset"))
    }

    fn state(retry_count: u32) -> RetryState {
        RetryState {
            retry_count,
            ..RetryState::default()
        }
    }

    #[test]
    fn default_backoff_doubles_from_300ms() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(300));
        assert_eq!(policy.backoff(2), Duration::from_millis(600));
        assert_eq!(policy.backoff(3), Duration::from_millis(1200));
        assert_eq!(policy.backoff(10), Duration::from_millis(153_600));
    }

    #[test]
    fn backoff_limit_caps_every_delay() {
        let mut policy = RetryPolicy::default();
        policy.apply(&Retry::Options(
            RetryOptions::new().backoff_limit(Duration::from_millis(1000)),
        ));
        for retry in 1..=12 {
            let expected = Duration::from_millis((300_u64 << (retry - 1)).min(1000));
            assert_eq!(policy.backoff(retry), expected);
        }
    }

    #[test]
    fn custom_delay_is_still_capped() {
        let mut policy = RetryPolicy::default();
        policy.apply(&Retry::Options(
            RetryOptions::new()
                .delay(|n| Duration::from_secs(u64::from(n) * 10))
                .backoff_limit(Duration::from_secs(15)),
        ));
        assert_eq!(policy.backoff(1), Duration::from_secs(10));
        assert_eq!(policy.backoff(2), Duration::from_secs(15));
    }

    #[test]
    fn numeric_retry_only_sets_limit() {
        let mut policy = RetryPolicy::default();
        policy.apply(&Retry::Options(RetryOptions::new().status_codes([500])));
        policy.apply(&Retry::Limit(7));
        assert_eq!(policy.limit(), 7);
        assert_eq!(policy.status_codes().len(), 1);
    }

    #[test]
    fn structured_retry_overrides_per_field() {
        let mut policy = RetryPolicy::default();
        policy.apply(&Retry::Options(RetryOptions::new().limit(5)));
        assert_eq!(policy.limit(), 5);
        assert!(policy.methods().contains(&Method::Get));
        assert!(policy.status_codes().contains(&503));
    }

    #[test]
    fn network_errors_retry_until_limit() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(&state(0), Method::Get, &network_error(), SystemTime::now()),
            RetryDecision::Retry {
                delay: Duration::from_millis(300)
            }
        );
        assert_eq!(
            policy.decide(&state(2), Method::Get, &network_error(), SystemTime::now()),
            RetryDecision::GiveUp(GiveUpReason::LimitReached)
        );
    }

    #[test]
    fn post_is_not_retried_by_default() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(&state(0), Method::Post, &network_error(), SystemTime::now()),
            RetryDecision::GiveUp(GiveUpReason::MethodNotAllowed)
        );
    }

    #[test]
    fn unlisted_status_is_not_retried() {
        let policy = RetryPolicy::default();
        let decision = policy.decide(&state(0), Method::Get, &http_error(404, &[]), SystemTime::now());
        assert_eq!(decision, RetryDecision::GiveUp(GiveUpReason::NotRetryable));
    }

    #[test]
    fn retry_after_seconds_is_used_as_delay() {
        let policy = RetryPolicy::default();
        let error = http_error(503, &[("Retry-After", "2")]);
        assert_eq!(
            policy.decide(&state(0), Method::Get, &error, SystemTime::now()),
            RetryDecision::Retry {
                delay: Duration::from_secs(2)
            }
        );
    }

    #[test]
    fn retry_after_is_ignored_for_statuses_outside_after_set() {
        let policy = RetryPolicy::default();
        let error = http_error(500, &[("retry-after", "30")]);
        assert_eq!(
            policy.decide(&state(0), Method::Get, &error, SystemTime::now()),
            RetryDecision::Retry {
                delay: Duration::from_millis(300)
            }
        );
    }

    #[test]
    fn retry_after_beyond_max_gives_up_instead_of_clamping() {
        let mut policy = RetryPolicy::default();
        policy.apply(&Retry::Options(
            RetryOptions::new().max_retry_after(Duration::from_secs(60)),
        ));
        let error = http_error(429, &[("retry-after", "120")]);
        assert_eq!(
            policy.decide(&state(0), Method::Get, &error, SystemTime::now()),
            RetryDecision::GiveUp(GiveUpReason::RetryAfterTooLong)
        );
    }

    #[test]
    fn payload_too_large_needs_retry_after() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(&state(0), Method::Put, &http_error(413, &[]), SystemTime::now()),
            RetryDecision::GiveUp(GiveUpReason::NotRetryable)
        );
        assert_eq!(
            policy.decide(
                &state(0),
                Method::Put,
                &http_error(413, &[("retry-after", "1")]),
                SystemTime::now()
            ),
            RetryDecision::Retry {
                delay: Duration::from_secs(1)
            }
        );
    }

    #[test]
    fn cancellation_is_never_retried() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(&state(0), Method::Get, &FetchError::Cancelled, SystemTime::now()),
            RetryDecision::GiveUp(GiveUpReason::NotRetryable)
        );
    }

    #[test]
    fn parses_http_date_relative_to_now() {
        let now = UNIX_EPOCH + Duration::from_secs(1_000_000_000);
        let later = httpdate::fmt_http_date(now + Duration::from_secs(90));
        let headers: Headers = [("retry-after", later.as_str())].into_iter().collect();
        assert_eq!(parse_retry_after(&headers, now), Some(Duration::from_secs(90)));

        let past = httpdate::fmt_http_date(now - Duration::from_secs(90));
        let headers: Headers = [("retry-after", past.as_str())].into_iter().collect();
        assert_eq!(parse_retry_after(&headers, now), Some(Duration::ZERO));
    }

    #[test]
    fn rate_limit_reset_accepts_seconds_or_timestamp() {
        let now = UNIX_EPOCH + Duration::from_secs(1_000_000_000);
        let headers: Headers = [("RateLimit-Reset", "5")].into_iter().collect();
        assert_eq!(parse_retry_after(&headers, now), Some(Duration::from_secs(5)));

        let headers: Headers = [("x-ratelimit-reset", "1000000012")].into_iter().collect();
        assert_eq!(parse_retry_after(&headers, now), Some(Duration::from_secs(12)));
    }

    #[test]
    fn out_of_range_retry_after_is_ignored() {
        let now = UNIX_EPOCH + Duration::from_secs(1_000_000_000);
        for value in ["99999999999999999999", "1e20", "inf", "-5"] {
            let headers: Headers = [("retry-after", value)].into_iter().collect();
            assert_eq!(parse_retry_after(&headers, now), None, "retry-after {value}");
        }
        let headers: Headers = [("ratelimit-reset", "1e25")].into_iter().collect();
        assert_eq!(parse_retry_after(&headers, now), None);
    }

    #[test]
    fn huge_retry_after_falls_back_to_backoff() {
        let policy = RetryPolicy::default();
        let error = http_error(503, &[("retry-after", "1e20")]);
        assert_eq!(
            policy.decide(&state(0), Method::Get, &error, SystemTime::now()),
            RetryDecision::Retry {
                delay: Duration::from_millis(300)
            }
        );
    }

    #[test]
    fn garbage_retry_after_is_ignored() {
        let headers: Headers = [("retry-after", "soon")].into_iter().collect();
        assert_eq!(parse_retry_after(&headers, SystemTime::now()), None);
    }
}
