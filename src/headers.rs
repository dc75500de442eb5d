//! Case-insensitive ordered header collection and header merging.

use std::fmt;

const REDACTED_HEADERS: [&str; 3] = ["authorization", "proxy-authorization", "cookie"];

/// Ordered header collection with case-insensitive names.
///
/// Names are stored lower-cased. Iteration follows the insertion order of
/// the first occurrence of each name.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a header value by case-insensitive name.
    pub fn get(&self, name: &str) -> Option<&str> {
        let name = normalize_name(name);
        self.entries
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Whether a value is stored under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Sets a header, replacing any value stored under the same name.
    pub fn set(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        let name = normalize_name(name.as_ref());
        let value = value.into();
        match self.entries.iter_mut().find(|(key, _)| *key == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Appends a value, comma-joining it to an existing one.
    pub fn append(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        let name = normalize_name(name.as_ref());
        let value = value.into();
        match self.entries.iter_mut().find(|(key, _)| *key == name) {
            Some(entry) => {
                entry.1.push_str(", ");
                entry.1.push_str(&value);
            }
            None => self.entries.push((name, value)),
        }
    }

    /// Removes a header, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let name = normalize_name(name);
        let index = self.entries.iter().position(|(key, _)| *key == name)?;
        Some(self.entries.remove(index).1)
    }

    /// Applies a header source on top of this collection.
    ///
    /// Present values replace, removal markers delete.
    pub fn apply(&mut self, source: &HeaderSource) {
        for (name, value) in source.entries() {
            match value {
                Some(value) => self.set(name, value),
                None => {
                    self.remove(&name);
                }
            }
        }
    }

    /// Number of distinct header names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no headers are stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates `(name, value)` pairs with lower-cased names.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }
}

impl fmt::Debug for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (name, value) in self.iter() {
            if REDACTED_HEADERS.contains(&name) {
                map.entry(&name, &"<redacted>");
            } else {
                map.entry(&name, &value);
            }
        }
        map.finish()
    }
}

impl<K, V> FromIterator<(K, V)> for Headers
where
    K: AsRef<str>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}

/// Any of the shapes a caller may supply headers in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HeaderSource {
    /// An existing header collection.
    Headers(Headers),
    /// Plain name/value mapping; `None` removes the name.
    Map(Vec<(String, Option<String>)>),
    /// Ordered name/value pairs; duplicate names are comma-joined.
    Pairs(Vec<(String, String)>),
}

impl HeaderSource {
    /// Builds a mapping source where `None` marks a name for removal.
    pub fn map<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Option<V>)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::Map(
            entries
                .into_iter()
                .map(|(name, value)| (name.into(), value.map(Into::into)))
                .collect(),
        )
    }

    /// Builds an ordered pair source.
    pub fn pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::Pairs(
            pairs
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        )
    }

    /// Records a value or removal marker, converting the source to a mapping.
    pub(crate) fn insert(&mut self, name: String, value: Option<String>) {
        if !matches!(self, Self::Map(_)) {
            *self = Self::Map(self.entries());
        }
        if let Self::Map(entries) = self {
            entries.push((name, value));
        }
    }

    /// Normalizes the source into name/value-or-removal entries.
    pub(crate) fn entries(&self) -> Vec<(String, Option<String>)> {
        let collect = |headers: &Headers| -> Vec<(String, Option<String>)> {
            headers
                .iter()
                .map(|(name, value)| (name.to_owned(), Some(value.to_owned())))
                .collect()
        };
        match self {
            Self::Headers(headers) => collect(headers),
            Self::Map(entries) => entries.clone(),
            Self::Pairs(pairs) => {
                let folded: Headers = pairs.iter().map(|(name, value)| (name, value.clone())).collect();
                collect(&folded)
            }
        }
    }
}

impl From<Headers> for HeaderSource {
    fn from(headers: Headers) -> Self {
        Self::Headers(headers)
    }
}

impl<K, V> From<Vec<(K, V)>> for HeaderSource
where
    K: Into<String>,
    V: Into<String>,
{
    fn from(pairs: Vec<(K, V)>) -> Self {
        Self::pairs(pairs)
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for HeaderSource
where
    K: Into<String>,
    V: Into<String>,
{
    fn from(pairs: [(K, V); N]) -> Self {
        Self::pairs(pairs)
    }
}

/// Merges `overrides` on top of `base` into a fresh collection.
///
/// Absent sources count as empty. Neither input is modified.
pub fn merge_headers(base: Option<&HeaderSource>, overrides: Option<&HeaderSource>) -> Headers {
    let mut merged = Headers::new();
    for source in [base, overrides].into_iter().flatten() {
        merged.apply(source);
    }
    merged
}

fn normalize_name(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}
