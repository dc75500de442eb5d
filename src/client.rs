use std::{fmt, sync::Arc};

use crate::{
    fetch::{Fetch, ReqwestFetch},
    options::resolve,
    LazyResponse, Method, Options, Result,
};

/// Request entry point holding an ordered chain of option layers.
///
/// Cloning is cheap: the layer chain is shared and only copied on
/// [`Client::extend`].
///
/// # Example
///
/// ```no_run
/// use fetchkit::{Client, Options};
///
/// # async fn run() -> fetchkit::Result<()> {
/// let api = Client::create(Options::new().prefix_url("https://api.example.com/v1"));
/// let admin = api.extend(Options::new().header("x-role", "admin"));
/// let users: serde_json::Value = admin.get("users", ()).json().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    layers: Arc<Vec<Options>>,
    fetch: Arc<dyn Fetch>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("layers", &self.layers)
            .finish_non_exhaustive()
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    /// Creates a client over the default reqwest transport.
    pub fn new() -> Self {
        Self::with_fetch(ReqwestFetch::new())
    }

    /// Creates a client over a custom transport.
    pub fn with_fetch(fetch: impl Fetch + 'static) -> Self {
        Self {
            layers: Arc::new(Vec::new()),
            fetch: Arc::new(fetch),
        }
    }

    /// Creates a fresh instance whose only layer is `options`.
    pub fn create(options: impl Into<Options>) -> Self {
        Self::new().extend(options)
    }

    /// Creates a client configured from `FETCHKIT_*` environment variables.
    ///
    /// See [`Options::from_env`] for the variables read.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use fetchkit::Client;
    ///
    /// let client = Client::from_env().expect("invalid FETCHKIT_* env vars");
    /// ```
    pub fn from_env() -> Result<Self> {
        Ok(Self::create(Options::from_env()?))
    }

    /// Returns a child client with `options` appended to this client's layers.
    ///
    /// The parent is left untouched.
    pub fn extend(&self, options: impl Into<Options>) -> Self {
        let mut layers = Vec::with_capacity(self.layers.len() + 1);
        layers.extend(self.layers.iter().cloned());
        layers.push(options.into());
        Self {
            layers: Arc::new(layers),
            fetch: self.fetch.clone(),
        }
    }

    pub fn layers(&self) -> &[Options] {
        &self.layers
    }

    /// Prepares a request. Nothing is sent until the result is awaited or
    /// a body accessor is called.
    ///
    /// Option errors such as an invalid URL surface at that point too.
    pub fn request(&self, input: &str, options: impl Into<Options>) -> LazyResponse {
        let options = options.into();
        let resolved = resolve(input, self.layers.iter().chain(std::iter::once(&options)));
        LazyResponse::new(resolved, self.fetch.clone())
    }

    pub fn get(&self, input: &str, options: impl Into<Options>) -> LazyResponse {
        self.request_with_method(Method::Get, input, options)
    }

    pub fn post(&self, input: &str, options: impl Into<Options>) -> LazyResponse {
        self.request_with_method(Method::Post, input, options)
    }

    pub fn put(&self, input: &str, options: impl Into<Options>) -> LazyResponse {
        self.request_with_method(Method::Put, input, options)
    }

    pub fn patch(&self, input: &str, options: impl Into<Options>) -> LazyResponse {
        self.request_with_method(Method::Patch, input, options)
    }

    pub fn delete(&self, input: &str, options: impl Into<Options>) -> LazyResponse {
        self.request_with_method(Method::Delete, input, options)
    }

    pub fn head(&self, input: &str, options: impl Into<Options>) -> LazyResponse {
        self.request_with_method(Method::Head, input, options)
    }

    fn request_with_method(
        &self,
        method: Method,
        input: &str,
        options: impl Into<Options>,
    ) -> LazyResponse {
        self.request(input, options.into().method(method))
    }
}

#[cfg(test)]
mod tests {
    use super::Client;
    use crate::{FetchError, Options, Request, Response, StatusCode};

    fn echo_client() -> Client {
        Client::with_fetch(|request: Request| async move {
            let body = format!("{} {}", request.method, request.url);
            Ok::<_, FetchError>(Response::new(StatusCode::OK, body))
        })
    }

    #[test]
    fn extend_copies_parent_layers() {
        let parent = echo_client().extend(Options::new().header("x-a", "1"));
        let child = parent.extend(Options::new().remove_header("x-a"));
        assert_eq!(parent.layers().len(), 1);
        assert_eq!(child.layers().len(), 2);
    }

    #[tokio::test]
    async fn shorthand_fixes_method() {
        let client = echo_client().extend(Options::new().prefix_url("https://example.com"));
        let text = client
            .delete("items/1", Options::new().method(crate::Method::Post))
            .text()
            .await
            .unwrap();
        assert_eq!(text, "DELETE https://example.com/items/1");
    }

    #[tokio::test]
    async fn per_call_fetch_overrides_instance_transport() {
        let client = echo_client();
        let custom = std::sync::Arc::new(|_: Request| async move {
            Ok::<_, FetchError>(Response::new(StatusCode::ACCEPTED, "custom"))
        });
        let response = client
            .get("https://example.com/", Options::new().fetch(custom))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(response.text(), "custom");
    }
}
