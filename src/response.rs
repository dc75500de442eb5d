use bytes::Bytes;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;

use crate::{body::CONTENT_TYPE, FetchError, FormData, Headers, Result};

const MAX_BODY_PREVIEW: usize = 256;

/// Fully buffered response.
#[derive(Clone, Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    url: Option<Url>,
    body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Headers::new(),
            url: None,
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// `true` for 2xx statuses.
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Final URL after redirects, when the transport reports one.
    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decodes the body as JSON.
    ///
    /// An empty body or a `204 No Content` decodes as JSON `null`, so
    /// `Option<T>` yields `None` there.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        if self.body.is_empty() || self.status == StatusCode::NO_CONTENT {
            return serde_json::from_str("null").map_err(|err| {
                FetchError::Decode(format!("empty response cannot be decoded: {err}"))
            });
        }
        serde_json::from_slice(&self.body).map_err(|err| {
            let text = self.text();
            let preview: String = text.chars().take(MAX_BODY_PREVIEW).collect();
            FetchError::Decode(format!("invalid JSON response: {err}; body: {preview}"))
        })
    }

    /// Parses the body as multipart or URL-encoded form data.
    pub fn form_data(&self) -> Result<FormData> {
        FormData::parse(self.headers.get(CONTENT_TYPE), &self.body)
    }

    pub fn blob(&self) -> Blob {
        Blob {
            content_type: self.headers.get(CONTENT_TYPE).map(str::to_owned),
            data: self.body.clone(),
        }
    }
}

/// Raw body bytes tagged with their content type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Blob {
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl Blob {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::Response;
    use crate::{FetchError, StatusCode};

    #[derive(Debug, Deserialize, PartialEq)]
    struct Unicorn {
        name: String,
    }

    #[test]
    fn json_decodes_body() {
        let response = Response::new(StatusCode::OK, r#"{"name":"sparkle"}"#);
        let unicorn: Unicorn = response.json().unwrap();
        assert_eq!(unicorn.name, "sparkle");
    }

    #[test]
    fn empty_and_no_content_decode_as_null() {
        let empty = Response::new(StatusCode::OK, "");
        assert_eq!(empty.json::<Option<Unicorn>>().unwrap(), None);
        let no_content = Response::new(StatusCode::NO_CONTENT, "ignored");
        assert_eq!(no_content.json::<serde_json::Value>().unwrap(), serde_json::Value::Null);
        assert!(matches!(
            empty.json::<Unicorn>(),
            Err(FetchError::Decode(_))
        ));
    }

    #[test]
    fn invalid_json_error_includes_body_preview() {
        let err = Response::new(StatusCode::OK, "<html>oops</html>")
            .json::<Unicorn>()
            .unwrap_err();
        assert!(err.to_string().contains("<html>oops</html>"));
    }

    #[test]
    fn blob_carries_content_type() {
        let blob = Response::new(StatusCode::OK, vec![1_u8, 2])
            .with_header("Content-Type", "application/octet-stream")
            .blob();
        assert_eq!(blob.content_type.as_deref(), Some("application/octet-stream"));
        assert_eq!(blob.len(), 2);
    }

    #[test]
    fn form_data_reads_url_encoded_body() {
        let form = Response::new(StatusCode::OK, "a=1&b=2")
            .with_header("content-type", "application/x-www-form-urlencoded")
            .form_data()
            .unwrap();
        assert_eq!(form.get("b").unwrap().as_text(), Some("2"));
    }
}
