use std::{fmt, sync::Arc};

use serde::de::DeserializeOwned;

use crate::{Method, NormalizedOptions, Request, Response, StatusCode};

/// Shared, cloneable cause of a transport failure.
pub type TransportCause = Arc<dyn std::error::Error + Send + Sync>;

/// Error type returned by this crate.
#[derive(Clone, Debug, thiserror::Error)]
pub enum FetchError {
    /// The transport failed before a response arrived.
    #[error("network error for {method} {url}: {cause}")]
    Network {
        /// Method of the failed attempt.
        method: Method,
        /// Target URL of the failed attempt.
        url: String,
        /// Underlying transport error.
        cause: TransportCause,
    },
    /// A single attempt exceeded the configured timeout.
    #[error("request timed out after {timeout_ms}ms")]
    Timeout {
        /// The request of the attempt that timed out.
        request: Box<Request>,
        /// Configured per-attempt timeout in milliseconds.
        timeout_ms: u128,
    },
    /// Non-success HTTP status with `throw_http_errors` enabled.
    #[error("{0}")]
    Http(Box<HttpError>),
    /// The caller's cancellation token fired.
    #[error("request was cancelled")]
    Cancelled,
    /// A one-shot body stream was already sent by an earlier attempt.
    #[error("request body stream was already consumed and cannot be replayed")]
    BodyNotReplayable,
    /// A different body accessor already consumed the response body.
    #[error("response body already used by `{0}()`")]
    BodyAlreadyUsed(&'static str),
    /// Response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
    /// Input or prefix URL could not be resolved.
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    /// Header name or value rejected by the transport.
    #[error("invalid header `{name}`")]
    InvalidHeader {
        /// Offending header name.
        name: String,
    },
    /// Method string not recognized.
    #[error("invalid method: {0}")]
    InvalidMethod(String),
    /// JSON request body could not be serialized.
    #[error("failed to serialize request json: {0}")]
    Serialize(String),
    /// Invalid option value, from code or the environment.
    #[error("configuration error: {0}")]
    Config(String),
    /// Raised by a user hook; replaces whatever outcome was in flight.
    #[error("hook error: {0}")]
    Hook(String),
}

/// Coarse classification of [`FetchError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Transport failure.
    Network,
    /// Attempt timeout.
    Timeout,
    /// Failed HTTP status.
    Http,
    /// Cancellation token fired.
    Cancelled,
    /// Request or response body misuse.
    Body,
    /// Response decoding.
    Decode,
    /// Invalid request construction input.
    Request,
    /// Invalid configuration.
    Config,
    /// Error raised by a hook.
    Hook,
}

impl FetchError {
    /// Builds a [`FetchError::Network`] from any transport error.
    pub fn network(
        method: Method,
        url: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Network {
            method,
            url: url.into(),
            cause: Arc::new(cause),
        }
    }

    /// Builds a [`FetchError::Hook`] for returning from user hooks.
    pub fn hook(message: impl Into<String>) -> Self {
        Self::Hook(message.into())
    }

    /// Returns the coarse category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network { .. } => ErrorKind::Network,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Http(_) => ErrorKind::Http,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::BodyNotReplayable | Self::BodyAlreadyUsed(_) => ErrorKind::Body,
            Self::Decode(_) => ErrorKind::Decode,
            Self::InvalidUrl(_)
            | Self::InvalidHeader { .. }
            | Self::InvalidMethod(_)
            | Self::Serialize(_) => ErrorKind::Request,
            Self::Config(_) => ErrorKind::Config,
            Self::Hook(_) => ErrorKind::Hook,
        }
    }

    /// Returns the response carried by an [`FetchError::Http`] error.
    pub fn response(&self) -> Option<&Response> {
        match self {
            Self::Http(err) => Some(err.response()),
            _ => None,
        }
    }

    /// Status of the failed response, for [`FetchError::Http`] only.
    pub fn status(&self) -> Option<StatusCode> {
        self.response().map(Response::status)
    }

    /// Whether give-up of this error goes through the before-error hooks.
    pub(crate) fn is_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Network | ErrorKind::Timeout | ErrorKind::Http
        )
    }
}

/// Failed HTTP status surfaced as an error.
#[derive(Clone, Debug)]
pub struct HttpError {
    response: Response,
    request: Request,
    options: Arc<NormalizedOptions>,
}

impl HttpError {
    pub(crate) fn new(response: Response, request: Request, options: Arc<NormalizedOptions>) -> Self {
        Self {
            response,
            request,
            options,
        }
    }

    /// The buffered response that failed the status check.
    pub fn response(&self) -> &Response {
        &self.response
    }

    /// The request of the final attempt.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Resolved options the request was built from.
    pub fn options(&self) -> &NormalizedOptions {
        &self.options
    }

    /// Failed response status.
    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    /// Decodes the error response body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> crate::Result<T> {
        self.response.json()
    }

    /// Error response body as lossy UTF-8.
    pub fn text(&self) -> String {
        self.response.text()
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = self.response.status();
        let reason = status.canonical_reason().unwrap_or("Unknown");
        write!(
            f,
            "request failed with status code {} {reason}: {} {}",
            status.as_u16(),
            self.request.method,
            self.request.url
        )
    }
}

impl std::error::Error for HttpError {}

#[cfg(test)]
mod tests {
    use std::io;

    use super::{ErrorKind, FetchError};
    use crate::Method;

    #[test]
    fn network_error_message_includes_target() {
        let err = FetchError::network(
            Method::Get,
            "https://example.com/a",
            io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        );
        assert_eq!(err.kind(), ErrorKind::Network);
        assert_eq!(
            err.to_string(),
            "network error for GET https://example.com/a: refused"
        );
    }

    #[test]
    fn only_transport_and_status_errors_are_recoverable() {
        assert!(FetchError::network(Method::Get, "u", io::Error::other("x")).is_recoverable());
        assert!(!FetchError::Cancelled.is_recoverable());
        assert!(!FetchError::hook("boom").is_recoverable());
        assert!(!FetchError::BodyNotReplayable.is_recoverable());
    }
}
