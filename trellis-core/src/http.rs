// HTTP request and response types seen by the mapping core

use crate::extensions::Extensions;
use crate::handler_method::HandlerMethod;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// HTTP methods
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HttpMethod {
    GET,
    POST,
    PUT,
    DELETE,
    PATCH,
    HEAD,
    OPTIONS,
}

impl HttpMethod {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "GET" => Some(HttpMethod::GET),
            "POST" => Some(HttpMethod::POST),
            "PUT" => Some(HttpMethod::PUT),
            "DELETE" => Some(HttpMethod::DELETE),
            "PATCH" => Some(HttpMethod::PATCH),
            "HEAD" => Some(HttpMethod::HEAD),
            "OPTIONS" => Some(HttpMethod::OPTIONS),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::GET => "GET",
            HttpMethod::POST => "POST",
            HttpMethod::PUT => "PUT",
            HttpMethod::DELETE => "DELETE",
            HttpMethod::PATCH => "PATCH",
            HttpMethod::HEAD => "HEAD",
            HttpMethod::OPTIONS => "OPTIONS",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP request wrapper
///
/// `path` is the raw request URI (including any query string). Header names
/// are stored lower-cased.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub attributes: Extensions,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            headers: HashMap::new(),
            attributes: Extensions::new(),
        }
    }

    /// Builder-style header insertion.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    pub fn http_method(&self) -> Option<HttpMethod> {
        HttpMethod::parse(&self.method)
    }

    /// The request URI without its query string.
    pub fn request_uri(&self) -> &str {
        self.path
            .split_once('?')
            .map(|(uri, _)| uri)
            .unwrap_or(&self.path)
    }

    /// A cross-origin preflight probe: `OPTIONS` carrying both an `Origin`
    /// and an `Access-Control-Request-Method` header.
    pub fn is_preflight(&self) -> bool {
        self.method.eq_ignore_ascii_case("OPTIONS")
            && self.headers.contains_key("origin")
            && self.headers.contains_key("access-control-request-method")
    }

    /// Any request carrying an `Origin` header.
    pub fn is_cors_request(&self) -> bool {
        self.headers.contains_key("origin")
    }

    /// Normalized path used for handler lookup.
    ///
    /// Drops the query string and `;` path parameters, collapses repeated
    /// slashes and, when `url_decode` is set, percent-decodes the result.
    pub fn lookup_path(&self, url_decode: bool) -> String {
        let mut normalized = String::with_capacity(self.request_uri().len() + 1);
        for segment in self.request_uri().split('/') {
            let segment = segment
                .split_once(';')
                .map(|(s, _)| s)
                .unwrap_or(segment);
            if segment.is_empty() {
                continue;
            }
            normalized.push('/');
            normalized.push_str(segment);
        }
        if normalized.is_empty() {
            normalized.push('/');
        } else if self.request_uri().ends_with('/') {
            normalized.push('/');
        }

        if url_decode {
            if let Ok(decoded) = urlencoding::decode(&normalized) {
                return decoded.into_owned();
            }
        }
        normalized
    }
}

/// HTTP response wrapper
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    pub fn ok() -> Self {
        Self::new(200)
    }

    pub fn forbidden() -> Self {
        Self::new(403)
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name.into(), value.into());
    }
}

impl Default for HttpResponse {
    fn default() -> Self {
        Self::ok()
    }
}

/// View and model produced by a handler, visible to interceptors' post phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelAndView {
    pub view: Option<String>,
    pub model: serde_json::Map<String, serde_json::Value>,
}

impl ModelAndView {
    pub fn new(view: impl Into<String>) -> Self {
        Self {
            view: Some(view.into()),
            model: serde_json::Map::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.model.insert(key.into(), value);
        self
    }
}

/// Request attribute: the normalized path used for lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupPath(pub String);

/// Request attribute: the handler method chosen by lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BestMatchingHandler(pub HandlerMethod);

/// Request attribute: the (possibly narrowed) descriptor chosen by lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BestMatchingMapping<T>(pub T);

/// Request attribute: the part of the lookup path the handler mapping matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathWithinHandlerMapping(pub String);
