//! Request body kinds and the header rules they imply.

use std::{
    fmt,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use bytes::Bytes;
use futures::{Stream, TryStreamExt};

use crate::{FetchError, FormData, Headers, Method, Result};

pub(crate) const CONTENT_TYPE: &str = "content-type";
pub(crate) const CONTENT_LENGTH: &str = "content-length";

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Boxed stream of body chunks.
pub type ByteStream =
    Pin<Box<dyn Stream<Item = std::result::Result<Bytes, BoxError>> + Send + Sync>>;

type StreamFactory = Arc<dyn Fn() -> ByteStream + Send + Sync>;

/// Request body as supplied by the caller.
#[derive(Clone, Debug)]
pub enum Body {
    Text(String),
    Bytes(Bytes),
    Form(FormData),
    /// `application/x-www-form-urlencoded` pairs.
    UrlEncoded(Vec<(String, String)>),
    /// Pre-serialized JSON text.
    Json(String),
    Stream(StreamBody),
}

impl Body {
    pub fn url_encoded<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::UrlEncoded(
            pairs
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        )
    }

    pub fn json<T: serde::Serialize + ?Sized>(value: &T) -> Result<Self> {
        serde_json::to_string(value)
            .map(Self::Json)
            .map_err(|err| FetchError::Serialize(err.to_string()))
    }
}

impl From<String> for Body {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for Body {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<Bytes> for Body {
    fn from(value: Bytes) -> Self {
        Self::Bytes(value)
    }
}

impl From<Vec<u8>> for Body {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value.into())
    }
}

impl From<FormData> for Body {
    fn from(value: FormData) -> Self {
        Self::Form(value)
    }
}

impl From<StreamBody> for Body {
    fn from(value: StreamBody) -> Self {
        Self::Stream(value)
    }
}

#[derive(Clone)]
enum StreamSource {
    Once(Arc<Mutex<Option<ByteStream>>>),
    Replayable(StreamFactory),
}

/// Streaming body, either single-use or re-creatable per attempt.
#[derive(Clone)]
pub struct StreamBody {
    source: StreamSource,
}

impl StreamBody {
    /// Wraps a stream that can be sent exactly once.
    pub fn once<S, E>(stream: S) -> Self
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Send + Sync + 'static,
        E: Into<BoxError> + 'static,
    {
        let stream: ByteStream = Box::pin(stream.map_err(|err| -> BoxError { err.into() }));
        Self {
            source: StreamSource::Once(Arc::new(Mutex::new(Some(stream)))),
        }
    }

    /// Wraps a factory invoked once per attempt.
    pub fn replayable<F, S, E>(factory: F) -> Self
    where
        F: Fn() -> S + Send + Sync + 'static,
        S: Stream<Item = std::result::Result<Bytes, E>> + Send + Sync + 'static,
        E: Into<BoxError> + 'static,
    {
        let factory: StreamFactory = Arc::new(move || -> ByteStream {
            Box::pin(factory().map_err(|err| -> BoxError { err.into() }))
        });
        Self {
            source: StreamSource::Replayable(factory),
        }
    }

    pub fn is_replayable(&self) -> bool {
        matches!(self.source, StreamSource::Replayable(_))
    }

    /// Whether a single-use stream was already handed to a transport.
    pub fn is_consumed(&self) -> bool {
        match &self.source {
            StreamSource::Once(slot) => lock(slot).is_none(),
            StreamSource::Replayable(_) => false,
        }
    }

    /// Takes the stream for sending.
    pub fn take(&self) -> Result<ByteStream> {
        match &self.source {
            StreamSource::Once(slot) => lock(slot).take().ok_or(FetchError::BodyNotReplayable),
            StreamSource::Replayable(factory) => Ok(factory()),
        }
    }
}

impl fmt::Debug for StreamBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamBody")
            .field("replayable", &self.is_replayable())
            .field("consumed", &self.is_consumed())
            .finish()
    }
}

/// Body in the form handed to the transport.
#[derive(Clone, Debug)]
pub enum RequestBody {
    Bytes(Bytes),
    Stream(StreamBody),
}

impl RequestBody {
    /// Byte length, when known up front.
    pub fn len(&self) -> Option<usize> {
        match self {
            Self::Bytes(bytes) => Some(bytes.len()),
            Self::Stream(_) => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            Self::Stream(_) => None,
        }
    }
}

/// Derives the transport body and the implied content headers.
///
/// Headers the caller set explicitly are kept, with one exception: an
/// explicit `content-length: 0` is replaced when the body is non-empty.
pub fn normalize_body(
    method: Method,
    body: Option<&Body>,
    mut headers: Headers,
) -> (Option<RequestBody>, Headers) {
    let Some(body) = body else {
        if method.expects_body() && !headers.contains(CONTENT_LENGTH) {
            headers.set(CONTENT_LENGTH, "0");
        }
        return (None, headers);
    };

    let bytes = match body {
        Body::Stream(stream) => return (Some(RequestBody::Stream(stream.clone())), headers),
        Body::Json(text) => {
            set_default(&mut headers, CONTENT_TYPE, "application/json");
            let bytes = Bytes::from(text.clone());
            correct_zero_length(&mut headers, bytes.len());
            bytes
        }
        Body::Form(form) => {
            set_default(&mut headers, CONTENT_TYPE, &form.content_type());
            let bytes = form.encode();
            correct_zero_length(&mut headers, bytes.len());
            bytes
        }
        Body::Text(text) => {
            set_default(&mut headers, CONTENT_TYPE, "text/plain;charset=UTF-8");
            let bytes = Bytes::from(text.clone());
            set_length(&mut headers, bytes.len());
            bytes
        }
        Body::UrlEncoded(pairs) => {
            set_default(
                &mut headers,
                CONTENT_TYPE,
                "application/x-www-form-urlencoded;charset=UTF-8",
            );
            let encoded = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(pairs)
                .finish();
            let bytes = Bytes::from(encoded);
            set_length(&mut headers, bytes.len());
            bytes
        }
        Body::Bytes(bytes) => {
            set_length(&mut headers, bytes.len());
            bytes.clone()
        }
    };
    (Some(RequestBody::Bytes(bytes)), headers)
}

fn set_default(headers: &mut Headers, name: &str, value: &str) {
    if !headers.contains(name) {
        headers.set(name, value);
    }
}

fn set_length(headers: &mut Headers, len: usize) {
    if headers.contains(CONTENT_LENGTH) {
        correct_zero_length(headers, len);
    } else {
        headers.set(CONTENT_LENGTH, len.to_string());
    }
}

fn correct_zero_length(headers: &mut Headers, len: usize) {
    let explicit_zero = headers
        .get(CONTENT_LENGTH)
        .is_some_and(|value| value.trim() == "0");
    if explicit_zero && len > 0 {
        headers.set(CONTENT_LENGTH, len.to_string());
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
