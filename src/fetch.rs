//! Pluggable transport.

use std::future::Future;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::{FetchError, Headers, Request, RequestBody, Response, Result};

/// Performs a single HTTP exchange. Retries, timeouts and hooks are layered
/// on top by the executor, so an implementation only sends one request.
///
/// Any `Fn(Request) -> impl Future<Output = Result<Response>>` closure is a
/// transport too.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, request: Request) -> Result<Response>;
}

#[async_trait]
impl<F, Fut> Fetch for F
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response>> + Send,
{
    async fn fetch(&self, request: Request) -> Result<Response> {
        self(request).await
    }
}

/// Default transport backed by [`reqwest::Client`].
#[derive(Clone, Debug, Default)]
pub struct ReqwestFetch {
    http: reqwest::Client,
}

impl ReqwestFetch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a preconfigured client, e.g. one with a proxy or custom TLS.
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Fetch for ReqwestFetch {
    async fn fetch(&self, request: Request) -> Result<Response> {
        let Request {
            method,
            url,
            headers,
            body,
            ..
        } = request;

        let mut builder = self
            .http
            .request(method.into(), url.clone())
            .headers(header_map(&headers)?);
        if let Some(body) = body {
            builder = builder.body(match body {
                RequestBody::Bytes(bytes) => reqwest::Body::from(bytes),
                RequestBody::Stream(stream) => reqwest::Body::wrap_stream(stream.take()?),
            });
        }

        let response = builder
            .send()
            .await
            .map_err(|err| FetchError::network(method, url.as_str(), err))?;
        let status = response.status();
        let final_url = response.url().clone();
        let mut response_headers = Headers::new();
        for (name, value) in response.headers() {
            response_headers.append(name.as_str(), String::from_utf8_lossy(value.as_bytes()));
        }
        let body = response
            .bytes()
            .await
            .map_err(|err| FetchError::network(method, url.as_str(), err))?;

        Ok(Response::new(status, body)
            .with_headers(response_headers)
            .with_url(final_url))
    }
}

fn header_map(headers: &Headers) -> Result<HeaderMap> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers.iter() {
        let invalid = || FetchError::InvalidHeader {
            name: name.to_owned(),
        };
        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
        let header_value = HeaderValue::from_str(value).map_err(|_| invalid())?;
        map.append(header_name, header_value);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::header_map;
    use crate::{FetchError, Headers};

    #[test]
    fn header_map_keeps_every_entry() {
        let headers = Headers::from_iter([("accept", "application/json"), ("x-a", "1")]);
        let map = header_map(&headers).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["accept"], "application/json");
    }

    #[test]
    fn header_map_rejects_control_characters() {
        let mut headers = Headers::new();
        headers.set("x-bad", "line\nbreak");
        assert!(matches!(
            header_map(&headers),
            Err(FetchError::InvalidHeader { name }) if name == "x-bad"
        ));
    }
}
