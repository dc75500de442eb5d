use std::{
    fmt,
    future::IntoFuture,
    sync::{Arc, Mutex},
};

use bytes::Bytes;
use futures::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use serde::de::DeserializeOwned;

use crate::{
    body::lock, executor::execute, fetch::Fetch, Blob, FetchError, FormData, NormalizedOptions,
    Response, Result,
};

type SharedResponse = Shared<BoxFuture<'static, Result<Response>>>;

/// Handle to a request that has not been sent yet.
///
/// Nothing goes over the wire until it is awaited or one of the body
/// accessors is called. The request runs once; every later await or
/// accessor call observes the same outcome.
pub struct LazyResponse {
    phase: Mutex<Phase>,
    consumer: Mutex<Option<&'static str>>,
}

enum Phase {
    Idle(Result<Ready>),
    Started(SharedResponse),
}

#[derive(Clone)]
struct Ready {
    options: NormalizedOptions,
    fetch: Arc<dyn Fetch>,
}

impl LazyResponse {
    pub(crate) fn new(options: Result<NormalizedOptions>, fetch: Arc<dyn Fetch>) -> Self {
        let ready = options.map(|options| Ready {
            fetch: options.fetch.clone().unwrap_or(fetch),
            options,
        });
        Self {
            phase: Mutex::new(Phase::Idle(ready)),
            consumer: Mutex::new(None),
        }
    }

    /// Awaits the response without claiming the body.
    pub async fn response(&self) -> Result<Response> {
        self.start(None).await
    }

    /// Sets `accept: application/json` if absent and decodes the body.
    pub async fn json<T: DeserializeOwned>(&self) -> Result<T> {
        self.read("json", "application/json").await?.json()
    }

    pub async fn text(&self) -> Result<String> {
        Ok(self.read("text", "text/*").await?.text())
    }

    pub async fn bytes(&self) -> Result<Bytes> {
        Ok(self.read("bytes", "*/*").await?.into_body())
    }

    pub async fn blob(&self) -> Result<Blob> {
        Ok(self.read("blob", "*/*").await?.blob())
    }

    pub async fn form_data(&self) -> Result<FormData> {
        self.read("form_data", "multipart/form-data")
            .await?
            .form_data()
    }

    /// Whether the request was already triggered.
    pub fn is_started(&self) -> bool {
        matches!(*lock(&self.phase), Phase::Started(_))
    }

    async fn read(&self, accessor: &'static str, accept: &str) -> Result<Response> {
        self.claim_body(accessor)?;
        self.start(Some(accept)).await
    }

    /// Binds the body to one accessor kind. Repeating the same kind replays.
    fn claim_body(&self, accessor: &'static str) -> Result<()> {
        let mut consumer = lock(&self.consumer);
        match *consumer {
            Some(previous) if previous != accessor => Err(FetchError::BodyAlreadyUsed(previous)),
            _ => {
                *consumer = Some(accessor);
                Ok(())
            }
        }
    }

    fn start(&self, accept: Option<&str>) -> SharedResponse {
        let mut phase = lock(&self.phase);
        let shared = match &*phase {
            Phase::Started(shared) => return shared.clone(),
            Phase::Idle(Err(err)) => {
                let err = err.clone();
                async move { Err(err) }.boxed().shared()
            }
            Phase::Idle(Ok(ready)) => {
                let Ready { mut options, fetch } = ready.clone();
                if let Some(accept) = accept {
                    if !options.headers.contains("accept") {
                        options.headers.set("accept", accept);
                    }
                }
                execute(options, fetch).boxed().shared()
            }
        };
        *phase = Phase::Started(shared.clone());
        shared
    }
}

impl IntoFuture for LazyResponse {
    type Output = Result<Response>;
    type IntoFuture = BoxFuture<'static, Result<Response>>;

    fn into_future(self) -> Self::IntoFuture {
        self.start(None).boxed()
    }
}

impl fmt::Debug for LazyResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyResponse")
            .field("started", &self.is_started())
            .field("consumer", &*lock(&self.consumer))
            .finish()
    }
}
