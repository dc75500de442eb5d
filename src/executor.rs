//! Attempt loop: hooks, transport, timeout, retry scheduling and cancellation.

use std::{sync::Arc, time::Duration, time::SystemTime};

use tokio::time::{sleep, timeout};

use crate::{
    error::HttpError,
    fetch::Fetch,
    hooks::{BeforeRequestAction, BeforeRetryAction, HookContext},
    options::Timeout,
    retry::{RetryDecision, RetryState},
    FetchError, NormalizedOptions, Request, Response, Result,
};

/// Runs the request described by `options` to completion.
pub(crate) async fn execute(options: NormalizedOptions, fetch: Arc<dyn Fetch>) -> Result<Response> {
    let request = Request::from_options(&options);
    Executor {
        options: Arc::new(options),
        fetch,
        request,
        state: RetryState::default(),
    }
    .run()
    .await
}

struct Executor {
    options: Arc<NormalizedOptions>,
    fetch: Arc<dyn Fetch>,
    request: Request,
    state: RetryState,
}

impl Executor {
    async fn run(mut self) -> Result<Response> {
        if self.options.signal.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        loop {
            if self.state.retry_count > 0 {
                self.request.ensure_replayable()?;
            }

            let outcome = match self.before_request().await? {
                Some(response) => Ok(response),
                None => self.send().await,
            };

            let error = match outcome {
                Ok(response)
                    if self.options.throw_http_errors && response.status().as_u16() >= 400 =>
                {
                    FetchError::Http(Box::new(HttpError::new(
                        response,
                        self.request.clone(),
                        self.options.clone(),
                    )))
                }
                Ok(response) => return self.after_response(response).await,
                Err(FetchError::Cancelled) => return Err(FetchError::Cancelled),
                Err(error) => error,
            };

            let delay = match self.options.retry.decide(
                &self.state,
                self.request.method,
                &error,
                SystemTime::now(),
            ) {
                RetryDecision::Retry { delay } => {
                    self.request.ensure_replayable()?;
                    delay
                }
                RetryDecision::GiveUp(_reason) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        reason = %_reason,
                        retry_count = self.state.retry_count,
                        "giving up on {} {}: {}",
                        self.request.method,
                        self.request.url,
                        error
                    );
                    return self.give_up(error).await;
                }
            };

            let Some(delay) = self.before_retry(&error, delay).await? else {
                #[cfg(feature = "tracing")]
                tracing::debug!("before_retry hook stopped retrying");
                return self.give_up(error).await;
            };

            #[cfg(feature = "tracing")]
            tracing::debug!(
                retry = self.state.retry_count + 1,
                "retrying {} {} after {} ms: {}",
                self.request.method,
                self.request.url,
                delay.as_millis(),
                error
            );

            self.wait(delay).await?;
            self.state.retry_count += 1;
            self.state.total_delay += delay;
        }
    }

    fn context(&self) -> HookContext {
        HookContext {
            options: self.options.clone(),
            retry_count: self.state.retry_count,
        }
    }

    /// Runs the before-request hooks. `Some` short-circuits the transport.
    async fn before_request(&mut self) -> Result<Option<Response>> {
        let options = self.options.clone();
        for hook in &options.hooks.before_request {
            match hook.before_request(self.request.clone(), self.context()).await? {
                BeforeRequestAction::Send(request) => self.request = request,
                BeforeRequestAction::Respond(response) => return Ok(Some(response)),
            }
        }
        Ok(None)
    }

    async fn send(&self) -> Result<Response> {
        #[cfg(feature = "tracing")]
        tracing::debug!(
            retry_count = self.state.retry_count,
            "sending {} {}",
            self.request.method,
            self.request.url
        );

        let attempt = self.fetch.fetch(self.request.clone());
        let attempt = async {
            match self.options.timeout {
                Timeout::After(limit) => match timeout(limit, attempt).await {
                    Ok(result) => result,
                    Err(_) => Err(FetchError::Timeout {
                        request: Box::new(self.request.clone()),
                        timeout_ms: limit.as_millis(),
                    }),
                },
                Timeout::Disabled => attempt.await,
            }
        };

        tokio::select! {
            biased;
            _ = self.options.signal.cancelled() => Err(FetchError::Cancelled),
            result = attempt => result,
        }
    }

    /// Runs the before-retry hooks. `None` means a hook asked to stop.
    async fn before_retry(&mut self, error: &FetchError, delay: Duration) -> Result<Option<Duration>> {
        let options = self.options.clone();
        let context = HookContext {
            options: options.clone(),
            retry_count: self.state.retry_count + 1,
        };
        let mut delay = delay;
        for hook in &options.hooks.before_retry {
            match hook
                .before_retry(self.request.clone(), error.clone(), context.clone())
                .await?
            {
                BeforeRetryAction::Retry(request) => self.request = request,
                BeforeRetryAction::RetryAfter(request, custom) => {
                    self.request = request;
                    delay = custom;
                }
                BeforeRetryAction::Stop => return Ok(None),
            }
        }
        Ok(Some(delay))
    }

    async fn wait(&self, delay: Duration) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.options.signal.cancelled() => Err(FetchError::Cancelled),
            _ = sleep(delay) => Ok(()),
        }
    }

    /// Passes a terminal error through the before-error hooks.
    async fn give_up(&self, error: FetchError) -> Result<Response> {
        if !error.is_recoverable() {
            return Err(error);
        }
        let mut error = error;
        for hook in &self.options.hooks.before_error {
            match hook.before_error(error, self.context()).await {
                Ok(response) => return Ok(response),
                Err(next) => error = next,
            }
        }
        Err(error)
    }

    async fn after_response(&self, response: Response) -> Result<Response> {
        let mut response = response;
        for hook in &self.options.hooks.after_response {
            response = hook
                .after_response(self.request.clone(), response, self.context())
                .await?;
        }
        Ok(response)
    }
}
