//! URL-path handler mapping for whole-bean handlers.
//!
//! [`UrlHandlerMapping`] registers beans whose names are URL paths
//! (`"/status"`, `"/files/**"`) as handlers. Each bean handles every request
//! to its URL through [`URL_HANDLER_METHOD`]. Lookup, ranking, interceptors
//! and CORS are those of the wrapped [`HandlerMethodMapping`].

use crate::chain::HandlerExecutionChain;
use crate::container::{BeanContainer, BeanType};
use crate::handler_method::{HandlerSource, MethodSignature};
use crate::http::{HttpRequest, LookupPath};
use crate::logging::{debug, trace};
use crate::mapping::{HandlerMethodMapping, MappingStrategy};
use crate::path_matcher::{AntPathMatcher, PathMatcher};
use crate::Result;
use std::cmp::Ordering;
use std::sync::Arc;

/// Method through which a URL-mapped bean handles its requests.
pub const URL_HANDLER_METHOD: &str = "handle";

/// Determines the URLs a bean is mapped to.
pub trait HandlerUrlResolver: Send + Sync {
    /// URLs for the bean; an empty list means the bean is not a handler.
    fn urls_for_handler(&self, bean_name: &str) -> Vec<String>;
}

/// Maps a bean to its own name when the name starts with `/`.
#[derive(Debug, Default, Clone, Copy)]
pub struct BeanNameUrls;

impl HandlerUrlResolver for BeanNameUrls {
    fn urls_for_handler(&self, bean_name: &str) -> Vec<String> {
        if bean_name.starts_with('/') {
            vec![bean_name.to_string()]
        } else {
            Vec::new()
        }
    }
}

/// URL patterns as mapping descriptors.
#[derive(Debug, Default)]
pub struct UrlPatterns {
    matcher: AntPathMatcher,
}

impl UrlPatterns {
    pub fn new() -> Self {
        Self::default()
    }

    fn lookup_path(request: &HttpRequest) -> String {
        request
            .attributes
            .get::<LookupPath>()
            .map(|p| p.0.clone())
            .unwrap_or_else(|| request.lookup_path(true))
    }
}

impl MappingStrategy<String> for UrlPatterns {
    fn is_handler(&self, _bean_type: &BeanType) -> bool {
        false
    }

    fn mapping_for_method(
        &self,
        _method: &MethodSignature,
        _handler_type: &BeanType,
    ) -> Result<Option<String>> {
        Ok(None)
    }

    fn direct_paths(&self, mapping: &String) -> Vec<String> {
        if self.matcher.is_pattern(mapping) {
            Vec::new()
        } else {
            vec![mapping.clone()]
        }
    }

    fn matching_mapping(&self, mapping: &String, request: &HttpRequest) -> Option<String> {
        let path = Self::lookup_path(request);
        self.matcher.matches(mapping, &path).then(|| mapping.clone())
    }

    fn compare(&self, a: &String, b: &String, request: &HttpRequest) -> Ordering {
        self.matcher
            .compare_patterns(a, b, &Self::lookup_path(request))
    }
}

/// Handler mapping that detects URL-named beans in the container.
pub struct UrlHandlerMapping<R: HandlerUrlResolver = BeanNameUrls> {
    resolver: R,
    mapping: HandlerMethodMapping<String, UrlPatterns>,
}

impl UrlHandlerMapping<BeanNameUrls> {
    pub fn new(container: Arc<dyn BeanContainer>) -> Self {
        Self::with_resolver(
            BeanNameUrls,
            HandlerMethodMapping::new(UrlPatterns::new(), container),
        )
    }
}

impl<R: HandlerUrlResolver> UrlHandlerMapping<R> {
    /// Wrap a configured, not yet initialized mapping.
    pub fn with_resolver(resolver: R, mapping: HandlerMethodMapping<String, UrlPatterns>) -> Self {
        Self { resolver, mapping }
    }

    pub fn mapping(&self) -> &HandlerMethodMapping<String, UrlPatterns> {
        &self.mapping
    }

    /// Initialize the wrapped mapping and register every bean the resolver
    /// finds URLs for.
    ///
    /// A URL already mapped to a different bean fails the whole detection.
    pub fn initialize(&self) -> Result<()> {
        self.mapping.initialize()?;
        self.detect_handlers()
    }

    fn detect_handlers(&self) -> Result<()> {
        let container = self.mapping.container();
        let names = container.bean_names(self.mapping.options().detect_in_ancestor_contexts);
        for name in names {
            let urls = self.resolver.urls_for_handler(&name);
            if urls.is_empty() {
                continue;
            }
            let declaring_type = match container.bean_type(&name) {
                Ok(bean_type) => bean_type.name.clone(),
                Err(e) => {
                    trace!(bean = %name, error = %e, "Using bean name as handler type");
                    name.clone()
                }
            };
            for url in urls {
                self.mapping.register_mapping(
                    url,
                    HandlerSource::BeanName(name.clone()),
                    MethodSignature::new(declaring_type.clone(), URL_HANDLER_METHOD),
                )?;
            }
        }
        debug!(urls = self.mapping.handler_methods().len(), "Detected URL handlers");
        Ok(())
    }

    /// Mapped URLs in registration order.
    pub fn handler_urls(&self) -> Vec<String> {
        self.mapping.handler_methods().into_keys().collect()
    }

    pub fn get_handler(&self, request: &mut HttpRequest) -> Result<Option<HandlerExecutionChain>> {
        self.mapping.get_handler(request)
    }
}
