//! Multipart and URL-encoded form payloads.

use bytes::Bytes;

use crate::{FetchError, Result};

/// Single field of a [`FormData`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Part {
    name: String,
    file_name: Option<String>,
    content_type: Option<String>,
    data: Bytes,
}

impl Part {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Returns the value as UTF-8 text, if it is valid UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }
}

/// Structured multipart form with its own boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FormData {
    boundary: String,
    parts: Vec<Part>,
}

impl Default for FormData {
    fn default() -> Self {
        Self::new()
    }
}

impl FormData {
    /// Creates an empty form with a random boundary.
    pub fn new() -> Self {
        let boundary = format!(
            "fetchkit-boundary-{:016x}{:016x}",
            rand::random::<u64>(),
            rand::random::<u64>()
        );
        Self::with_boundary(boundary)
    }

    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            parts: Vec::new(),
        }
    }

    /// Adds a text field.
    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push(Part {
            name: name.into(),
            file_name: None,
            content_type: None,
            data: Bytes::from(value.into()),
        });
        self
    }

    /// Adds a file field.
    pub fn file(
        mut self,
        name: impl Into<String>,
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        self.parts.push(Part {
            name: name.into(),
            file_name: Some(file_name.into()),
            content_type: Some(content_type.into()),
            data: data.into(),
        });
        self
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    /// Returns the first part registered under `name`.
    pub fn get(&self, name: &str) -> Option<&Part> {
        self.parts.iter().find(|part| part.name == name)
    }

    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    pub fn content_length(&self) -> usize {
        self.encode().len()
    }

    /// Serializes the form as a `multipart/form-data` body.
    pub fn encode(&self) -> Bytes {
        let mut out = Vec::new();
        for part in &self.parts {
            out.extend_from_slice(format!("--{}\r\n", self.boundary).as_bytes());
            let mut disposition = format!(
                "Content-Disposition: form-data; name=\"{}\"",
                escape_quoted(&part.name)
            );
            if let Some(file_name) = &part.file_name {
                disposition.push_str(&format!("; filename=\"{}\"", escape_quoted(file_name)));
            }
            out.extend_from_slice(disposition.as_bytes());
            out.extend_from_slice(b"\r\n");
            if let Some(content_type) = &part.content_type {
                out.extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
            }
            out.extend_from_slice(b"\r\n");
            out.extend_from_slice(&part.data);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        Bytes::from(out)
    }

    /// Parses a `multipart/form-data` or URL-encoded payload.
    pub fn parse(content_type: Option<&str>, body: &[u8]) -> Result<Self> {
        let content_type = content_type.unwrap_or_default();
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match mime.as_str() {
            "application/x-www-form-urlencoded" => {
                let mut form = Self::new();
                for (name, value) in form_urlencoded::parse(body) {
                    form = form.text(name, value);
                }
                Ok(form)
            }
            "multipart/form-data" => {
                let boundary = header_param(content_type, "boundary").ok_or_else(|| {
                    FetchError::Decode("multipart content-type without boundary".to_owned())
                })?;
                parse_multipart(&boundary, body)
            }
            other => Err(FetchError::Decode(format!(
                "cannot parse `{other}` body as form data"
            ))),
        }
    }
}

fn parse_multipart(boundary: &str, body: &[u8]) -> Result<FormData> {
    let malformed = |what: &str| FetchError::Decode(format!("malformed multipart body: {what}"));
    let delimiter = format!("--{boundary}").into_bytes();
    let separator = [b"\r\n".as_slice(), &delimiter].concat();

    let mut form = FormData::with_boundary(boundary);
    let mut cursor =
        find(body, &delimiter, 0).ok_or_else(|| malformed("missing boundary"))? + delimiter.len();

    loop {
        let rest = &body[cursor..];
        if rest.starts_with(b"--") {
            return Ok(form);
        }
        if !rest.starts_with(b"\r\n") {
            return Err(malformed("expected line break after boundary"));
        }
        cursor += 2;

        let head_end =
            find(body, b"\r\n\r\n", cursor).ok_or_else(|| malformed("unterminated part headers"))?;
        let head = String::from_utf8_lossy(&body[cursor..head_end]).into_owned();
        let data_start = head_end + 4;
        let data_end =
            find(body, &separator, data_start).ok_or_else(|| malformed("unterminated part"))?;

        let mut name = None;
        let mut file_name = None;
        let mut content_type = None;
        for line in head.split("\r\n") {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            if key.trim().eq_ignore_ascii_case("content-disposition") {
                name = header_param(value, "name");
                file_name = header_param(value, "filename");
            } else if key.trim().eq_ignore_ascii_case("content-type") {
                content_type = Some(value.trim().to_owned());
            }
        }

        form.parts.push(Part {
            name: name.ok_or_else(|| malformed("part without name"))?,
            file_name,
            content_type,
            data: Bytes::copy_from_slice(&body[data_start..data_end]),
        });
        cursor = data_end + separator.len();
    }
}

fn header_param(value: &str, key: &str) -> Option<String> {
    split_params(value).into_iter().skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case(key)
            .then(|| unquote(value.trim()))
    })
}

/// Splits a header value on `;` outside quoted strings.
fn split_params(value: &str) -> Vec<&str> {
    let mut params = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;
    for (index, ch) in value.char_indices() {
        match ch {
            _ if escaped => escaped = false,
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            ';' if !quoted => {
                params.push(&value[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }
    params.push(&value[start..]);
    params
}

fn unquote(value: &str) -> String {
    let Some(inner) = value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) else {
        return value.to_owned();
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => out.extend(chars.next()),
            ch => out.push(ch),
        }
    }
    out
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|position| position + from)
}

fn escape_quoted(value: &str) -> String {
    value
        .replace('"', "%22")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

#[cfg(test)]
mod tests {
    use super::FormData;

    #[test]
    fn encodes_text_and_file_parts() {
        let form = FormData::with_boundary("XyZ")
            .text("name", "kit")
            .file("avatar", "a.png", "image/png", vec![1_u8, 2, 3]);
        let encoded = form.encode();
        let expected = [
            b"--XyZ\r\nContent-Disposition: form-data; name=\"name\"\r\n\r\nkit\r\n".as_slice(),
            b"--XyZ\r\nContent-Disposition: form-data; name=\"avatar\"; filename=\"a.png\"\r\n",
            b"Content-Type: image/png\r\n\r\n\x01\x02\x03\r\n--XyZ--\r\n",
        ]
        .concat();
        assert_eq!(encoded.as_ref(), expected.as_slice());
        assert_eq!(form.content_type(), "multipart/form-data; boundary=XyZ");
    }

    #[test]
    fn parses_its_own_multipart_encoding() {
        let form = FormData::with_boundary("b0undary")
            .text("greeting", "hello")
            .file("doc", "notes.txt", "text/plain", "line one\r\nline two");
        let parsed = FormData::parse(Some(&form.content_type()), &form.encode()).unwrap();

        assert_eq!(parsed.parts().len(), 2);
        assert_eq!(parsed.get("greeting").unwrap().as_text(), Some("hello"));
        let doc = parsed.get("doc").unwrap();
        assert_eq!(doc.file_name(), Some("notes.txt"));
        assert_eq!(doc.content_type(), Some("text/plain"));
        assert_eq!(doc.as_text(), Some("line one\r\nline two"));
    }

    #[test]
    fn quoted_parameters_may_contain_semicolons() {
        let form = FormData::with_boundary("b0undary").file("a;b", "x; y.txt", "text/plain", "z");
        let parsed = FormData::parse(Some(&form.content_type()), &form.encode()).unwrap();

        let part = parsed.get("a;b").unwrap();
        assert_eq!(part.file_name(), Some("x; y.txt"));
        assert_eq!(part.as_text(), Some("z"));
    }

    #[test]
    fn header_param_unescapes_quoted_values() {
        let value = r#"form-data; name="say \"hi\""; filename=plain.txt"#;
        assert_eq!(super::header_param(value, "name").as_deref(), Some(r#"say "hi""#));
        assert_eq!(super::header_param(value, "filename").as_deref(), Some("plain.txt"));
    }

    #[test]
    fn parses_url_encoded_payload() {
        let parsed = FormData::parse(
            Some("application/x-www-form-urlencoded;charset=UTF-8"),
            b"a=1&b=two+words",
        )
        .unwrap();
        assert_eq!(parsed.get("a").unwrap().as_text(), Some("1"));
        assert_eq!(parsed.get("b").unwrap().as_text(), Some("two words"));
    }

    #[test]
    fn rejects_non_form_content_type() {
        assert!(FormData::parse(Some("application/json"), b"{}").is_err());
    }

    #[test]
    fn random_boundaries_differ() {
        assert_ne!(FormData::new().boundary(), FormData::new().boundary());
    }
}
