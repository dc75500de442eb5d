use std::{fmt, str::FromStr};

use crate::FetchError;

/// HTTP request method.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Method {
    /// `GET`, the default.
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
    Trace,
}

impl Method {
    /// Upper-case wire name of the method.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Trace => "TRACE",
        }
    }

    /// Methods that send `content-length: 0` when no body is supplied.
    pub(crate) const fn expects_body(self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = FetchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let method = match value.trim().to_ascii_uppercase().as_str() {
            "GET" => Self::Get,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "PATCH" => Self::Patch,
            "DELETE" => Self::Delete,
            "HEAD" => Self::Head,
            "OPTIONS" => Self::Options,
            "TRACE" => Self::Trace,
            _ => return Err(FetchError::InvalidMethod(value.to_owned())),
        };
        Ok(method)
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
            Method::Head => reqwest::Method::HEAD,
            Method::Options => reqwest::Method::OPTIONS,
            Method::Trace => reqwest::Method::TRACE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Method;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("patch".parse::<Method>().unwrap(), Method::Patch);
        assert_eq!(" Delete ".parse::<Method>().unwrap(), Method::Delete);
        assert!("FETCH".parse::<Method>().is_err());
    }

    #[test]
    fn only_mutating_methods_expect_a_body() {
        assert!(Method::Put.expects_body());
        assert!(!Method::Get.expects_body());
        assert!(!Method::Delete.expects_body());
    }
}
