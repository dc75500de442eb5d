use reqwest::Url;

use crate::{
    body::normalize_body, Credentials, FetchError, Headers, Method, NormalizedOptions,
    RequestBody, Result,
};

/// Request as handed to hooks and to the transport.
#[derive(Clone, Debug)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: Headers,
    pub body: Option<RequestBody>,
    pub credentials: Credentials,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Headers::new(),
            body: None,
            credentials: Credentials::default(),
        }
    }

    /// Builds the first attempt's request from resolved options.
    pub fn from_options(options: &NormalizedOptions) -> Self {
        let (body, headers) =
            normalize_body(options.method, options.body.as_ref(), options.headers.clone());
        Self {
            method: options.method,
            url: options.url.clone(),
            headers,
            body,
            credentials: options.credentials,
        }
    }

    /// Fails when the body is a single-use stream that was already sent.
    pub(crate) fn ensure_replayable(&self) -> Result<()> {
        match &self.body {
            Some(RequestBody::Stream(stream)) if stream.is_consumed() => {
                Err(FetchError::BodyNotReplayable)
            }
            _ => Ok(()),
        }
    }
}
