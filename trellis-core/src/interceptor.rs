// Interceptors wrapped around a handler invocation

use crate::handler_method::HandlerMethod;
use crate::http::{HttpRequest, HttpResponse, ModelAndView};
use crate::logging::{debug, info};
use crate::path_matcher::{AntPathMatcher, PathMatcher};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Instant;

/// Hooks run before, after and around a handler invocation.
///
/// All phases default to doing nothing and proceeding.
pub trait HandlerInterceptor: Send + Sync {
    /// Return `Ok(false)` to stop the chain; the interceptor is then expected
    /// to have written the response itself.
    fn pre_handle(
        &self,
        _request: &mut HttpRequest,
        _response: &mut HttpResponse,
        _handler: &HandlerMethod,
    ) -> Result<bool> {
        Ok(true)
    }

    /// Runs after a successful handler invocation, in reverse order.
    fn post_handle(
        &self,
        _request: &mut HttpRequest,
        _response: &mut HttpResponse,
        _handler: &HandlerMethod,
        _model_and_view: Option<&mut ModelAndView>,
    ) -> Result<()> {
        Ok(())
    }

    /// Runs once request processing is complete, for every interceptor
    /// whose `pre_handle` returned `true`.
    fn after_completion(
        &self,
        _request: &mut HttpRequest,
        _response: &mut HttpResponse,
        _handler: &HandlerMethod,
        _error: Option<&Error>,
    ) -> Result<()> {
        Ok(())
    }

    /// Async capability, if this interceptor has one.
    fn as_async(&self) -> Option<&dyn AsyncHandlerInterceptor> {
        None
    }

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Interceptors that want to know when handling continues asynchronously.
///
/// When handling goes async, `post_handle` and `after_completion` are not
/// called on this thread; this hook is called instead.
pub trait AsyncHandlerInterceptor: HandlerInterceptor {
    fn after_concurrent_handling_started(
        &self,
        _request: &mut HttpRequest,
        _response: &mut HttpResponse,
        _handler: &HandlerMethod,
    ) -> Result<()> {
        Ok(())
    }
}

/// An interceptor applied only to lookup paths matching its patterns.
///
/// An exclude match always wins. With no include patterns every path that is
/// not excluded matches.
pub struct MappedInterceptor {
    include_patterns: Vec<String>,
    exclude_patterns: Vec<String>,
    interceptor: Arc<dyn HandlerInterceptor>,
    matcher: Arc<dyn PathMatcher>,
}

impl MappedInterceptor {
    pub fn new(interceptor: Arc<dyn HandlerInterceptor>) -> Self {
        Self {
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            interceptor,
            matcher: Arc::new(AntPathMatcher::new()),
        }
    }

    pub fn include(mut self, pattern: impl Into<String>) -> Self {
        self.include_patterns.push(pattern.into());
        self
    }

    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude_patterns.push(pattern.into());
        self
    }

    pub fn with_path_matcher(mut self, matcher: Arc<dyn PathMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn include_patterns(&self) -> &[String] {
        &self.include_patterns
    }

    pub fn exclude_patterns(&self) -> &[String] {
        &self.exclude_patterns
    }

    pub fn interceptor(&self) -> &Arc<dyn HandlerInterceptor> {
        &self.interceptor
    }

    pub fn matches(&self, lookup_path: &str) -> bool {
        if self
            .exclude_patterns
            .iter()
            .any(|p| self.matcher.matches(p, lookup_path))
        {
            return false;
        }
        self.include_patterns.is_empty()
            || self
                .include_patterns
                .iter()
                .any(|p| self.matcher.matches(p, lookup_path))
    }
}

impl std::fmt::Debug for MappedInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedInterceptor")
            .field("include", &self.include_patterns)
            .field("exclude", &self.exclude_patterns)
            .field("interceptor", &self.interceptor.name())
            .finish()
    }
}

/// An interceptor as configured on a handler mapping.
#[derive(Clone)]
pub enum ConfiguredInterceptor {
    /// Added to every chain.
    Global(Arc<dyn HandlerInterceptor>),
    /// Added when its patterns match the lookup path.
    Mapped(Arc<MappedInterceptor>),
}

impl ConfiguredInterceptor {
    /// The interceptor to add to a chain for `lookup_path`, if any.
    pub fn for_path(&self, lookup_path: &str) -> Option<Arc<dyn HandlerInterceptor>> {
        match self {
            ConfiguredInterceptor::Global(interceptor) => Some(Arc::clone(interceptor)),
            ConfiguredInterceptor::Mapped(mapped) if mapped.matches(lookup_path) => {
                Some(Arc::clone(mapped.interceptor()))
            }
            ConfiguredInterceptor::Mapped(_) => None,
        }
    }
}

impl From<MappedInterceptor> for ConfiguredInterceptor {
    fn from(mapped: MappedInterceptor) -> Self {
        ConfiguredInterceptor::Mapped(Arc::new(mapped))
    }
}

impl From<Arc<dyn HandlerInterceptor>> for ConfiguredInterceptor {
    fn from(interceptor: Arc<dyn HandlerInterceptor>) -> Self {
        ConfiguredInterceptor::Global(interceptor)
    }
}

#[derive(Clone, Copy)]
struct RequestStart(Instant);

/// Logs each dispatched request and how long it took.
#[derive(Debug, Default)]
pub struct LoggingInterceptor;

impl HandlerInterceptor for LoggingInterceptor {
    fn pre_handle(
        &self,
        request: &mut HttpRequest,
        _response: &mut HttpResponse,
        handler: &HandlerMethod,
    ) -> Result<bool> {
        debug!(method = %request.method, path = %request.path, handler = %handler, "Dispatching request");
        request.attributes.insert(RequestStart(Instant::now()));
        Ok(true)
    }

    fn after_completion(
        &self,
        request: &mut HttpRequest,
        response: &mut HttpResponse,
        _handler: &HandlerMethod,
        error: Option<&Error>,
    ) -> Result<()> {
        let elapsed = request
            .attributes
            .get::<RequestStart>()
            .map(|start| start.0.elapsed())
            .unwrap_or_default();
        match error {
            Some(e) => info!(
                method = %request.method,
                path = %request.path,
                error = %e,
                duration_us = elapsed.as_micros() as u64,
                "Request failed"
            ),
            None => info!(
                method = %request.method,
                path = %request.path,
                status = response.status,
                duration_us = elapsed.as_micros() as u64,
                "Request completed"
            ),
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "LoggingInterceptor"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler_method::MethodSignature;

    struct Noop;
    impl HandlerInterceptor for Noop {}

    fn noop() -> Arc<dyn HandlerInterceptor> {
        Arc::new(Noop)
    }

    #[test]
    fn test_mapped_interceptor_include_and_exclude() {
        let mapped = MappedInterceptor::new(noop())
            .include("/api/**")
            .exclude("/api/health");

        assert!(mapped.matches("/api/users"));
        assert!(mapped.matches("/api/users/1"));
        assert!(!mapped.matches("/api/health"));
        assert!(!mapped.matches("/admin"));
    }

    #[test]
    fn test_mapped_interceptor_without_includes_matches_all() {
        let mapped = MappedInterceptor::new(noop()).exclude("/static/**");

        assert!(mapped.matches("/anything"));
        assert!(!mapped.matches("/static/app.js"));
    }

    #[test]
    fn test_configured_interceptor_for_path() {
        let global = ConfiguredInterceptor::from(noop());
        let mapped = ConfiguredInterceptor::from(MappedInterceptor::new(noop()).include("/api/**"));

        assert!(global.for_path("/x").is_some());
        assert!(mapped.for_path("/api/x").is_some());
        assert!(mapped.for_path("/x").is_none());
    }

    #[test]
    fn test_default_phases_proceed() {
        let handler = HandlerMethod::from_bean_name("c", MethodSignature::new("C", "m"));
        let mut req = HttpRequest::new("GET", "/");
        let mut resp = HttpResponse::ok();

        assert!(Noop.pre_handle(&mut req, &mut resp, &handler).unwrap());
        assert!(Noop.post_handle(&mut req, &mut resp, &handler, None).is_ok());
        assert!(Noop.after_completion(&mut req, &mut resp, &handler, None).is_ok());
        assert!(Noop.as_async().is_none());
    }

    #[test]
    fn test_logging_interceptor_records_start() {
        let handler = HandlerMethod::from_bean_name("c", MethodSignature::new("C", "m"));
        let mut req = HttpRequest::new("GET", "/users");
        let mut resp = HttpResponse::ok();

        assert!(LoggingInterceptor.pre_handle(&mut req, &mut resp, &handler).unwrap());
        assert!(req.attributes.contains::<RequestStart>());
        assert!(
            LoggingInterceptor
                .after_completion(&mut req, &mut resp, &handler, None)
                .is_ok()
        );
    }
}
