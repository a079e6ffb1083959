//! CORS metadata for handler methods.
//!
//! A [`CorsConfig`] can be attached to a handler method at registration time
//! or configured globally per path pattern. When a request is dispatched, the
//! applicable configs are combined and enforced by a [`CorsInterceptor`]
//! placed at the front of the execution chain.
//!
//! ```
//! use trellis_core::cors::CorsConfig;
//!
//! let cors = CorsConfig::new()
//!     .allow_origin("https://app.example.com")
//!     .allow_methods(vec!["GET", "POST", "PUT"])
//!     .allow_headers(vec!["Content-Type", "Authorization"])
//!     .allow_credentials(true)
//!     .max_age(3600);
//!
//! assert!(cors.validate_allow_credentials().is_ok());
//! ```

use crate::handler_method::HandlerMethod;
use crate::http::{HttpRequest, HttpResponse};
use crate::interceptor::HandlerInterceptor;
use crate::logging::{debug, trace};
use crate::{Error, Result};
use regex::Regex;
use std::sync::Arc;

/// Matches any origin, method or header.
pub const ALL: &str = "*";

#[derive(Debug, Clone)]
enum OriginPattern {
    /// `*` matches any run of characters, e.g. `https://*.example.com`.
    Wildcard(String),
    Regex(Regex),
}

impl OriginPattern {
    fn matches(&self, origin: &str) -> bool {
        match self {
            OriginPattern::Wildcard(pattern) => wildcard_match(pattern, origin),
            OriginPattern::Regex(regex) => regex.is_match(origin),
        }
    }

    fn as_str(&self) -> &str {
        match self {
            OriginPattern::Wildcard(pattern) => pattern,
            OriginPattern::Regex(regex) => regex.as_str(),
        }
    }
}

fn wildcard_match(pattern: &str, value: &str) -> bool {
    let mut parts = pattern.split('*');
    let Some(first) = parts.next() else {
        return value.is_empty();
    };
    let Some(mut rest) = value.strip_prefix(first) else {
        return false;
    };

    let parts: Vec<&str> = parts.collect();
    let Some((last, middle)) = parts.split_last() else {
        // No wildcard at all
        return rest.is_empty();
    };
    for part in middle {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    rest.len() >= last.len() && rest.ends_with(last)
}

/// CORS configuration
#[derive(Debug, Clone)]
pub struct CorsConfig {
    allowed_origins: Vec<String>,
    origin_patterns: Vec<OriginPattern>,
    allowed_methods: Vec<String>,
    allowed_headers: Vec<String>,
    exposed_headers: Vec<String>,
    allow_credentials: bool,
    max_age: Option<u64>,
}

impl CorsConfig {
    /// Strict defaults: no origins, `GET`, `HEAD` and `POST`, no headers.
    pub fn new() -> Self {
        Self {
            allowed_origins: Vec::new(),
            origin_patterns: Vec::new(),
            allowed_methods: vec!["GET".to_string(), "HEAD".to_string(), "POST".to_string()],
            allowed_headers: Vec::new(),
            exposed_headers: Vec::new(),
            allow_credentials: false,
            max_age: Some(1800),
        }
    }

    /// Any origin, method and header, without credentials.
    pub fn permissive() -> Self {
        Self {
            allowed_origins: vec![ALL.to_string()],
            allowed_methods: vec![ALL.to_string()],
            allowed_headers: vec![ALL.to_string()],
            ..Self::new()
        }
    }

    /// Any origin (as a pattern), method and header, with credentials.
    ///
    /// Used for preflight requests that matched several handlers.
    pub fn permissive_with_credentials() -> Self {
        Self {
            allowed_origins: Vec::new(),
            origin_patterns: vec![OriginPattern::Wildcard(ALL.to_string())],
            allowed_methods: vec![ALL.to_string()],
            allowed_headers: vec![ALL.to_string()],
            allow_credentials: true,
            ..Self::new()
        }
    }

    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        push_unique(&mut self.allowed_origins, trim_trailing_slash(origin.into()));
        self
    }

    /// Allow origins matching a wildcard pattern such as
    /// `https://*.example.com`.
    pub fn allow_origin_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.origin_patterns
            .push(OriginPattern::Wildcard(trim_trailing_slash(pattern.into())));
        self
    }

    /// Allow origins matching a regular expression
    pub fn allow_origin_regex(mut self, pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| Error::InvalidCorsConfig(format!("bad origin pattern '{}': {}", pattern, e)))?;
        self.origin_patterns.push(OriginPattern::Regex(regex));
        Ok(self)
    }

    pub fn allow_any_origin(self) -> Self {
        self.allow_origin(ALL)
    }

    pub fn allow_methods(mut self, methods: Vec<impl Into<String>>) -> Self {
        self.allowed_methods.clear();
        for method in methods {
            push_unique(&mut self.allowed_methods, method.into().to_uppercase());
        }
        self
    }

    pub fn allow_method(mut self, method: impl Into<String>) -> Self {
        push_unique(&mut self.allowed_methods, method.into().to_uppercase());
        self
    }

    pub fn allow_headers(mut self, headers: Vec<impl Into<String>>) -> Self {
        self.allowed_headers.clear();
        for header in headers {
            push_unique(&mut self.allowed_headers, header.into().to_lowercase());
        }
        self
    }

    pub fn allow_header(mut self, header: impl Into<String>) -> Self {
        push_unique(&mut self.allowed_headers, header.into().to_lowercase());
        self
    }

    pub fn allow_any_header(self) -> Self {
        self.allow_header(ALL)
    }

    pub fn expose_headers(mut self, headers: Vec<impl Into<String>>) -> Self {
        for header in headers {
            push_unique(&mut self.exposed_headers, header.into());
        }
        self
    }

    pub fn allow_credentials(mut self, allow: bool) -> Self {
        self.allow_credentials = allow;
        self
    }

    /// Max age for the preflight cache, in seconds
    pub fn max_age(mut self, seconds: u64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    pub fn allowed_origins(&self) -> &[String] {
        &self.allowed_origins
    }

    pub fn allowed_origin_patterns(&self) -> Vec<&str> {
        self.origin_patterns.iter().map(OriginPattern::as_str).collect()
    }

    pub fn allowed_methods(&self) -> &[String] {
        &self.allowed_methods
    }

    pub fn allowed_headers(&self) -> &[String] {
        &self.allowed_headers
    }

    pub fn exposed_headers(&self) -> &[String] {
        &self.exposed_headers
    }

    pub fn allows_credentials(&self) -> bool {
        self.allow_credentials
    }

    pub fn max_age_secs(&self) -> Option<u64> {
        self.max_age
    }

    /// Credentials cannot be combined with the literal `*` origin; use
    /// `allow_origin_pattern("*")` instead.
    pub fn validate_allow_credentials(&self) -> Result<()> {
        if self.allow_credentials && self.allowed_origins.iter().any(|o| o == ALL) {
            return Err(Error::InvalidCorsConfig(
                "when credentials are allowed, allowed origins cannot contain \"*\" \
                 since that value cannot be set on the Access-Control-Allow-Origin header; \
                 list the origins explicitly or use an origin pattern"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Merge `other` into a copy of this config.
    ///
    /// List values are unioned, credentials are allowed if either allows
    /// them, and `other`'s max age wins when set.
    pub fn combine(&self, other: &CorsConfig) -> CorsConfig {
        let mut combined = self.clone();
        for origin in &other.allowed_origins {
            push_unique(&mut combined.allowed_origins, origin.clone());
        }
        for pattern in &other.origin_patterns {
            if !combined
                .origin_patterns
                .iter()
                .any(|p| p.as_str() == pattern.as_str())
            {
                combined.origin_patterns.push(pattern.clone());
            }
        }
        for method in &other.allowed_methods {
            push_unique(&mut combined.allowed_methods, method.clone());
        }
        for header in &other.allowed_headers {
            push_unique(&mut combined.allowed_headers, header.clone());
        }
        for header in &other.exposed_headers {
            push_unique(&mut combined.exposed_headers, header.clone());
        }
        combined.allow_credentials |= other.allow_credentials;
        if other.max_age.is_some() {
            combined.max_age = other.max_age;
        }
        combined
    }

    /// Value for `Access-Control-Allow-Origin`, or `None` if the origin is
    /// not allowed.
    pub fn check_origin(&self, origin: &str) -> Option<String> {
        let origin = origin.trim_end_matches('/');
        if origin.is_empty() {
            return None;
        }
        if self.allowed_origins.iter().any(|o| o == ALL) {
            return Some(if self.allow_credentials {
                origin.to_string()
            } else {
                ALL.to_string()
            });
        }
        if self
            .allowed_origins
            .iter()
            .any(|o| o.eq_ignore_ascii_case(origin))
            || self.origin_patterns.iter().any(|p| p.matches(origin))
        {
            return Some(origin.to_string());
        }
        None
    }

    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        self.check_origin(origin).is_some()
    }

    pub fn is_method_allowed(&self, method: &str) -> bool {
        self.allowed_methods
            .iter()
            .any(|m| m == ALL || m.eq_ignore_ascii_case(method))
    }

    pub fn is_header_allowed(&self, header: &str) -> bool {
        self.allowed_headers
            .iter()
            .any(|h| h == ALL || h.eq_ignore_ascii_case(header))
    }

    /// Write the response headers for a preflight request.
    ///
    /// Fails with [`Error::CorsRejected`] if the origin, the requested
    /// method or any requested header is not allowed.
    pub fn handle_preflight(&self, request: &HttpRequest, response: &mut HttpResponse) -> Result<()> {
        let origin = request
            .header("origin")
            .ok_or_else(|| Error::CorsRejected("missing Origin header".to_string()))?;
        let allow_origin = self
            .check_origin(origin)
            .ok_or_else(|| Error::CorsRejected(format!("origin '{}' not allowed", origin)))?;

        let method = request
            .header("access-control-request-method")
            .unwrap_or_default();
        if !self.is_method_allowed(method) {
            return Err(Error::CorsRejected(format!("method '{}' not allowed", method)));
        }

        let requested_headers: Vec<&str> = request
            .header("access-control-request-headers")
            .map(|h| h.split(',').map(str::trim).filter(|h| !h.is_empty()).collect())
            .unwrap_or_default();
        if let Some(header) = requested_headers.iter().find(|h| !self.is_header_allowed(h)) {
            return Err(Error::CorsRejected(format!("header '{}' not allowed", header)));
        }

        response.set_header("Access-Control-Allow-Origin", allow_origin);
        response.set_header("Vary", "Origin, Access-Control-Request-Method, Access-Control-Request-Headers");
        let allowed_methods = if self.allowed_methods.iter().any(|m| m == ALL) {
            method.to_uppercase()
        } else {
            self.allowed_methods.join(", ")
        };
        response.set_header("Access-Control-Allow-Methods", allowed_methods);
        if !requested_headers.is_empty() {
            response.set_header("Access-Control-Allow-Headers", requested_headers.join(", "));
        }
        if self.allow_credentials {
            response.set_header("Access-Control-Allow-Credentials", "true");
        }
        if let Some(max_age) = self.max_age {
            response.set_header("Access-Control-Max-Age", max_age.to_string());
        }
        Ok(())
    }

    /// Add CORS headers for an actual request. Returns `false` if the
    /// origin is not allowed, in which case nothing is written.
    pub fn add_cors_headers(&self, response: &mut HttpResponse, origin: &str) -> bool {
        let Some(allow_origin) = self.check_origin(origin) else {
            return false;
        };
        if allow_origin != ALL {
            response.set_header("Vary", "Origin");
        }
        response.set_header("Access-Control-Allow-Origin", allow_origin);
        if self.allow_credentials {
            response.set_header("Access-Control-Allow-Credentials", "true");
        }
        if !self.exposed_headers.is_empty() {
            response.set_header("Access-Control-Expose-Headers", self.exposed_headers.join(", "));
        }
        true
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn push_unique(values: &mut Vec<String>, value: String) {
    if !values.contains(&value) {
        values.push(value);
    }
}

fn trim_trailing_slash(mut origin: String) -> String {
    while origin.ends_with('/') {
        origin.pop();
    }
    origin
}

/// Enforces a [`CorsConfig`] as the first interceptor of a chain.
///
/// Preflight requests are answered here and never reach the handler.
#[derive(Debug, Clone)]
pub struct CorsInterceptor {
    config: Arc<CorsConfig>,
}

impl CorsInterceptor {
    pub fn new(config: CorsConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &CorsConfig {
        &self.config
    }

    fn reject(response: &mut HttpResponse, reason: &str) {
        debug!(reason = %reason, "Rejecting CORS request");
        response.status = 403;
        response.body = b"Invalid CORS request".to_vec();
    }
}

impl HandlerInterceptor for CorsInterceptor {
    fn pre_handle(
        &self,
        request: &mut HttpRequest,
        response: &mut HttpResponse,
        _handler: &HandlerMethod,
    ) -> Result<bool> {
        let Some(origin) = request.header("origin").map(str::to_string) else {
            return Ok(true);
        };

        if request.is_preflight() {
            if let Err(e) = self.config.handle_preflight(request, response) {
                Self::reject(response, &e.to_string());
            } else {
                trace!(origin = %origin, "Answered CORS preflight");
                response.status = 200;
            }
            return Ok(false);
        }

        let method = request.method.clone();
        if !self.config.is_method_allowed(&method) {
            Self::reject(response, &format!("method '{}' not allowed", method));
            return Ok(false);
        }
        if !self.config.add_cors_headers(response, &origin) {
            Self::reject(response, &format!("origin '{}' not allowed", origin));
            return Ok(false);
        }
        Ok(true)
    }

    fn name(&self) -> &str {
        "CorsInterceptor"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler_method::MethodSignature;

    fn handler() -> HandlerMethod {
        HandlerMethod::from_bean_name("api", MethodSignature::new("Api", "update"))
    }

    fn preflight(origin: &str, method: &str) -> HttpRequest {
        HttpRequest::new("OPTIONS", "/api/items/1")
            .with_header("Origin", origin)
            .with_header("Access-Control-Request-Method", method)
    }

    #[test]
    fn test_cors_new_is_strict() {
        let cors = CorsConfig::new();
        assert!(!cors.is_origin_allowed("https://example.com"));
        assert!(cors.is_method_allowed("get"));
        assert!(!cors.is_method_allowed("DELETE"));
        assert!(!cors.allows_credentials());
    }

    #[test]
    fn test_allow_origin() {
        let cors = CorsConfig::new().allow_origin("https://example.com/");

        assert_eq!(
            cors.check_origin("https://example.com"),
            Some("https://example.com".to_string())
        );
        assert!(!cors.is_origin_allowed("https://evil.com"));
    }

    #[test]
    fn test_any_origin_without_credentials_echoes_star() {
        let cors = CorsConfig::permissive();
        assert_eq!(cors.check_origin("https://a.test"), Some("*".to_string()));
        assert!(cors.is_header_allowed("X-Anything"));
        assert!(cors.is_method_allowed("PATCH"));
    }

    #[test]
    fn test_origin_patterns() {
        let cors = CorsConfig::new().allow_origin_pattern("https://*.example.com");
        assert!(cors.is_origin_allowed("https://app.example.com"));
        assert!(!cors.is_origin_allowed("https://example.org"));

        let cors = CorsConfig::new()
            .allow_origin_regex(r"^https://(api|app)\.example\.com$")
            .unwrap();
        assert!(cors.is_origin_allowed("https://api.example.com"));
        assert!(!cors.is_origin_allowed("https://www.example.com"));

        assert!(CorsConfig::new().allow_origin_regex("(").is_err());
    }

    #[test]
    fn test_wildcard_match() {
        assert!(wildcard_match("*", "https://anything"));
        assert!(wildcard_match("https://*.test:*", "https://a.test:8080"));
        assert!(!wildcard_match("https://*.test", "http://a.test"));
        assert!(wildcard_match("https://exact.test", "https://exact.test"));
        assert!(!wildcard_match("https://exact.test", "https://exact.test.evil"));
    }

    #[test]
    fn test_permissive_with_credentials_echoes_origin() {
        let cors = CorsConfig::permissive_with_credentials();
        assert!(cors.allows_credentials());
        assert_eq!(cors.allowed_origin_patterns(), vec!["*"]);
        assert_eq!(
            cors.check_origin("https://a.test"),
            Some("https://a.test".to_string())
        );
        assert!(cors.validate_allow_credentials().is_ok());
    }

    #[test]
    fn test_validate_allow_credentials_rejects_star_origin() {
        let cors = CorsConfig::new().allow_any_origin().allow_credentials(true);
        assert!(matches!(
            cors.validate_allow_credentials(),
            Err(Error::InvalidCorsConfig(_))
        ));
    }

    #[test]
    fn test_combine() {
        let global = CorsConfig::new()
            .allow_origin("https://a.test")
            .allow_header("Content-Type");
        let local = CorsConfig::new()
            .allow_origin("https://b.test")
            .allow_method("PUT")
            .allow_credentials(true)
            .max_age(60);

        let combined = global.combine(&local);
        assert_eq!(combined.allowed_origins(), ["https://a.test", "https://b.test"]);
        assert_eq!(combined.allowed_methods(), ["GET", "HEAD", "POST", "PUT"]);
        assert_eq!(combined.allowed_headers(), ["content-type"]);
        assert!(combined.allows_credentials());
        assert_eq!(combined.max_age_secs(), Some(60));
    }

    #[test]
    fn test_handle_preflight() {
        let cors = CorsConfig::new()
            .allow_origin("https://app.test")
            .allow_methods(vec!["GET", "PUT"])
            .allow_header("X-Token");

        let request = preflight("https://app.test", "PUT")
            .with_header("Access-Control-Request-Headers", "x-token");
        let mut response = HttpResponse::ok();
        cors.handle_preflight(&request, &mut response).unwrap();

        assert_eq!(
            response.headers.get("Access-Control-Allow-Origin"),
            Some(&"https://app.test".to_string())
        );
        assert_eq!(
            response.headers.get("Access-Control-Allow-Methods"),
            Some(&"GET, PUT".to_string())
        );
        assert_eq!(
            response.headers.get("Access-Control-Allow-Headers"),
            Some(&"x-token".to_string())
        );

        let bad_method = preflight("https://app.test", "DELETE");
        assert!(cors.handle_preflight(&bad_method, &mut HttpResponse::ok()).is_err());

        let bad_header = preflight("https://app.test", "GET")
            .with_header("Access-Control-Request-Headers", "X-Other");
        assert!(cors.handle_preflight(&bad_header, &mut HttpResponse::ok()).is_err());
    }

    #[test]
    fn test_add_cors_headers() {
        let cors = CorsConfig::new()
            .allow_origin("https://example.com")
            .allow_credentials(true)
            .expose_headers(vec!["X-Total-Count"]);

        let mut response = HttpResponse::ok();
        assert!(cors.add_cors_headers(&mut response, "https://example.com"));
        assert_eq!(
            response.headers.get("Access-Control-Allow-Credentials"),
            Some(&"true".to_string())
        );
        assert_eq!(
            response.headers.get("Access-Control-Expose-Headers"),
            Some(&"X-Total-Count".to_string())
        );

        let mut denied = HttpResponse::ok();
        assert!(!cors.add_cors_headers(&mut denied, "https://evil.com"));
        assert!(denied.headers.is_empty());
    }

    #[test]
    fn test_interceptor_answers_preflight() {
        let interceptor = CorsInterceptor::new(CorsConfig::permissive());
        let mut request = preflight("https://a.test", "PUT");
        let mut response = HttpResponse::ok();

        let proceed = interceptor
            .pre_handle(&mut request, &mut response, &handler())
            .unwrap();
        assert!(!proceed);
        assert_eq!(response.status, 200);
        assert!(response.headers.contains_key("Access-Control-Allow-Origin"));
    }

    #[test]
    fn test_interceptor_rejects_disallowed_origin() {
        let interceptor = CorsInterceptor::new(CorsConfig::new().allow_origin("https://good.test"));
        let mut request = HttpRequest::new("GET", "/api").with_header("Origin", "https://bad.test");
        let mut response = HttpResponse::ok();

        let proceed = interceptor
            .pre_handle(&mut request, &mut response, &handler())
            .unwrap();
        assert!(!proceed);
        assert_eq!(response.status, 403);
    }

    #[test]
    fn test_interceptor_passes_same_origin_and_allowed_requests() {
        let interceptor = CorsInterceptor::new(CorsConfig::new().allow_origin("https://good.test"));

        let mut plain = HttpRequest::new("GET", "/api");
        assert!(
            interceptor
                .pre_handle(&mut plain, &mut HttpResponse::ok(), &handler())
                .unwrap()
        );

        let mut cross = HttpRequest::new("GET", "/api").with_header("Origin", "https://good.test");
        let mut response = HttpResponse::ok();
        assert!(
            interceptor
                .pre_handle(&mut cross, &mut response, &handler())
                .unwrap()
        );
        assert_eq!(
            response.headers.get("Access-Control-Allow-Origin"),
            Some(&"https://good.test".to_string())
        );
    }
}
