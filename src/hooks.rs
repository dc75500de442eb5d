//! Lifecycle hooks invoked by the request executor.
//!
//! Every hook is an async trait object. Closures of the matching shape
//! implement the traits directly:
//!
//! ```no_run
//! use fetchkit::{BeforeRequestAction, FetchError, HookContext, Options, Request};
//!
//! let options = Options::new().before_request(|mut request: Request, _: HookContext| async move {
//!     request.headers.set("x-trace", "1");
//!     Ok::<_, FetchError>(BeforeRequestAction::Send(request))
//! });
//! ```

use std::{fmt, future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::{FetchError, NormalizedOptions, Request, Response, Result};

/// What a hook sees besides the request or response it is handed.
#[derive(Clone, Debug)]
pub struct HookContext {
    pub options: Arc<NormalizedOptions>,
    /// Retries performed so far. Inside `before_retry` this is the number
    /// of the retry about to happen.
    pub retry_count: u32,
}

/// Outcome of a `before_request` hook.
#[derive(Debug)]
pub enum BeforeRequestAction {
    /// Continue with this (possibly rewritten) request.
    Send(Request),
    /// Skip the transport and use this response for the attempt.
    Respond(Response),
}

/// Outcome of a `before_retry` hook.
#[derive(Debug)]
pub enum BeforeRetryAction {
    /// Retry with this request after the computed delay.
    Retry(Request),
    /// Retry with this request after a custom delay.
    RetryAfter(Request, Duration),
    /// Give up and surface the triggering error.
    Stop,
}

#[async_trait]
pub trait BeforeRequestHook: Send + Sync {
    async fn before_request(
        &self,
        request: Request,
        context: HookContext,
    ) -> Result<BeforeRequestAction>;
}

#[async_trait]
pub trait BeforeRetryHook: Send + Sync {
    async fn before_retry(
        &self,
        request: Request,
        error: FetchError,
        context: HookContext,
    ) -> Result<BeforeRetryAction>;
}

/// Transforms a terminal error. Returning `Ok` recovers with that response.
#[async_trait]
pub trait BeforeErrorHook: Send + Sync {
    async fn before_error(&self, error: FetchError, context: HookContext) -> Result<Response>;
}

#[async_trait]
pub trait AfterResponseHook: Send + Sync {
    async fn after_response(
        &self,
        request: Request,
        response: Response,
        context: HookContext,
    ) -> Result<Response>;
}

#[async_trait]
impl<F, Fut> BeforeRequestHook for F
where
    F: Fn(Request, HookContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<BeforeRequestAction>> + Send,
{
    async fn before_request(
        &self,
        request: Request,
        context: HookContext,
    ) -> Result<BeforeRequestAction> {
        self(request, context).await
    }
}

#[async_trait]
impl<F, Fut> BeforeRetryHook for F
where
    F: Fn(Request, FetchError, HookContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<BeforeRetryAction>> + Send,
{
    async fn before_retry(
        &self,
        request: Request,
        error: FetchError,
        context: HookContext,
    ) -> Result<BeforeRetryAction> {
        self(request, error, context).await
    }
}

#[async_trait]
impl<F, Fut> BeforeErrorHook for F
where
    F: Fn(FetchError, HookContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response>> + Send,
{
    async fn before_error(&self, error: FetchError, context: HookContext) -> Result<Response> {
        self(error, context).await
    }
}

#[async_trait]
impl<F, Fut> AfterResponseHook for F
where
    F: Fn(Request, Response, HookContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response>> + Send,
{
    async fn after_response(
        &self,
        request: Request,
        response: Response,
        context: HookContext,
    ) -> Result<Response> {
        self(request, response, context).await
    }
}

/// Ordered hook lists, one per lifecycle phase.
#[derive(Clone, Default)]
pub struct Hooks {
    pub(crate) before_request: Vec<Arc<dyn BeforeRequestHook>>,
    pub(crate) before_retry: Vec<Arc<dyn BeforeRetryHook>>,
    pub(crate) before_error: Vec<Arc<dyn BeforeErrorHook>>,
    pub(crate) after_response: Vec<Arc<dyn AfterResponseHook>>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn before_request(mut self, hook: impl BeforeRequestHook + 'static) -> Self {
        self.before_request.push(Arc::new(hook));
        self
    }

    pub fn before_retry(mut self, hook: impl BeforeRetryHook + 'static) -> Self {
        self.before_retry.push(Arc::new(hook));
        self
    }

    pub fn before_error(mut self, hook: impl BeforeErrorHook + 'static) -> Self {
        self.before_error.push(Arc::new(hook));
        self
    }

    pub fn after_response(mut self, hook: impl AfterResponseHook + 'static) -> Self {
        self.after_response.push(Arc::new(hook));
        self
    }

    /// Appends every hook of `other` after the hooks already present.
    pub fn extend(&mut self, other: &Hooks) {
        self.before_request.extend(other.before_request.iter().cloned());
        self.before_retry.extend(other.before_retry.iter().cloned());
        self.before_error.extend(other.before_error.iter().cloned());
        self.after_response.extend(other.after_response.iter().cloned());
    }

    pub fn is_empty(&self) -> bool {
        self.before_request.is_empty()
            && self.before_retry.is_empty()
            && self.before_error.is_empty()
            && self.after_response.is_empty()
    }

    pub fn before_request_count(&self) -> usize {
        self.before_request.len()
    }

    pub fn before_retry_count(&self) -> usize {
        self.before_retry.len()
    }

    pub fn before_error_count(&self) -> usize {
        self.before_error.len()
    }

    pub fn after_response_count(&self) -> usize {
        self.after_response.len()
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("before_request", &self.before_request.len())
            .field("before_retry", &self.before_retry.len())
            .field("before_error", &self.before_error.len())
            .field("after_response", &self.after_response.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{BeforeErrorHook, HookContext, Hooks};
    use crate::{options::resolve, FetchError, Request, Response, StatusCode};
    use std::sync::Arc;

    fn context() -> HookContext {
        HookContext {
            options: Arc::new(resolve("https://example.com/", []).unwrap()),
            retry_count: 0,
        }
    }

    #[test]
    fn extend_appends_after_existing_hooks() {
        let mut parent = Hooks::new().before_error(|err: FetchError, _: HookContext| async move {
            Err::<Response, _>(err)
        });
        let child = Hooks::new()
            .before_error(|err: FetchError, _: HookContext| async move { Err::<Response, _>(err) })
            .after_response(|_: Request, response: Response, _: HookContext| async move {
                Ok::<_, FetchError>(response)
            });
        parent.extend(&child);
        assert_eq!(parent.before_error_count(), 2);
        assert_eq!(parent.after_response_count(), 1);
        assert_eq!(child.before_error_count(), 1);
        assert_eq!(
            format!("{parent:?}"),
            "Hooks { before_request: 0, before_retry: 0, before_error: 2, after_response: 1 }"
        );
    }

    #[tokio::test]
    async fn closures_act_as_hooks() {
        let hook = |_: FetchError, _: HookContext| async move {
            Ok::<_, FetchError>(Response::new(StatusCode::OK, "recovered"))
        };
        let response = hook
            .before_error(FetchError::Cancelled, context())
            .await
            .unwrap();
        assert_eq!(response.text(), "recovered");
    }
}
