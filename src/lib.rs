//! `fetchkit` builds requests on top of a pluggable fetch transport and
//! orchestrates retries around them.
//!
//! The crate covers:
//! - layered [`Options`] merged by [`options::resolve`]
//! - header merging ([`merge_headers`]) and body normalization ([`normalize_body`])
//! - a [`RetryPolicy`] with exponential backoff and `retry-after` support
//! - lifecycle [`Hooks`] (before-request, before-retry, before-error, after-response)
//! - extendable [`Client`] instances returning a deferred [`LazyResponse`]
//!
//! ```no_run
//! use fetchkit::{Client, Options, RetryOptions};
//!
//! # async fn run() -> fetchkit::Result<()> {
//! let client = Client::create(
//!     Options::new()
//!         .prefix_url("https://api.example.com")
//!         .retry(RetryOptions::new().limit(3).status_codes([503])),
//! );
//! let text = client.get("health", ()).text().await?;
//! # let _ = text;
//! # Ok(())
//! # }
//! ```

mod body;
mod client;
mod error;
mod executor;
mod fetch;
mod form;
mod headers;
mod hooks;
mod lazy;
mod method;
pub mod options;
mod request;
mod response;
mod retry;

pub use body::{normalize_body, Body, ByteStream, RequestBody, StreamBody};
pub use client::Client;
pub use error::{ErrorKind, FetchError, HttpError, TransportCause};
pub use fetch::{Fetch, ReqwestFetch};
pub use form::{FormData, Part};
pub use headers::{merge_headers, HeaderSource, Headers};
pub use hooks::{
    AfterResponseHook, BeforeErrorHook, BeforeRequestAction, BeforeRequestHook,
    BeforeRetryAction, BeforeRetryHook, HookContext, Hooks,
};
pub use lazy::LazyResponse;
pub use method::Method;
pub use options::{Credentials, NormalizedOptions, Options, Timeout};
pub use request::Request;
pub use response::{Blob, Response};
pub use retry::{
    parse_retry_after, DelayFn, GiveUpReason, Retry, RetryDecision, RetryOptions, RetryPolicy,
    RetryState,
};

pub use reqwest::{StatusCode, Url};
pub use tokio_util::sync::CancellationToken;

pub type Result<T> = std::result::Result<T, FetchError>;
