//! Route-based mapping descriptors.
//!
//! [`RouteMapping`] is a descriptor made of path patterns and HTTP methods.
//! [`RouteTable`] declares which controller methods handle which routes and
//! plugs into a [`HandlerMethodMapping`] as its [`MappingStrategy`].
//!
//! ```
//! use std::sync::Arc;
//! use trellis_core::container::{BeanType, Container};
//! use trellis_core::http::HttpRequest;
//! use trellis_core::mapping::HandlerMethodMapping;
//! use trellis_core::route_mapping::{RouteEntry, RouteTable};
//!
//! struct UserController;
//!
//! let container = Container::new();
//! container.register_instance(
//!     "userController",
//!     BeanType::new("UserController").with_method("show"),
//!     UserController,
//! );
//!
//! let routes = RouteTable::new().route(RouteEntry::get("UserController", "show", "/users/{id}"));
//! let mapping = HandlerMethodMapping::new(routes, Arc::new(container));
//! mapping.initialize().unwrap();
//!
//! let mut request = HttpRequest::new("GET", "/users/42");
//! let chain = mapping.get_handler(&mut request).unwrap().unwrap();
//! assert_eq!(chain.handler().method().name, "show");
//! ```
//!
//! [`HandlerMethodMapping`]: crate::mapping::HandlerMethodMapping

use crate::container::BeanType;
use crate::cors::CorsConfig;
use crate::handler_method::{HandlerMethod, HandlerSource, MethodSignature};
use crate::http::{HttpMethod, HttpRequest, LookupPath};
use crate::mapping::{MappingStrategy, NamingStrategy};
use crate::path_matcher::{AntPathMatcher, PathMatcher};
use crate::{Error, Result};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Path patterns plus HTTP methods. No methods means any method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteMapping {
    name: Option<String>,
    patterns: Vec<String>,
    methods: Vec<HttpMethod>,
}

impl RouteMapping {
    pub fn new<I, S>(patterns: I, methods: Vec<HttpMethod>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut methods = methods;
        methods.sort();
        methods.dedup();
        Self {
            name: None,
            patterns: patterns.into_iter().map(Into::into).collect(),
            methods,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new([path.into()], vec![HttpMethod::GET])
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new([path.into()], vec![HttpMethod::POST])
    }

    pub fn any(path: impl Into<String>) -> Self {
        Self::new([path.into()], Vec::new())
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn methods(&self) -> &[HttpMethod] {
        &self.methods
    }

    /// This mapping narrowed to the patterns and method that match the
    /// request, or `None`.
    ///
    /// Matching patterns are ordered best first. Preflight requests are
    /// matched on the method they ask for.
    pub fn matching(&self, request: &HttpRequest, lookup_path: &str, matcher: &AntPathMatcher) -> Option<RouteMapping> {
        let methods = self.matching_methods(request)?;

        let mut patterns: Vec<String> = self
            .patterns
            .iter()
            .filter(|p| matcher.matches(p, lookup_path))
            .cloned()
            .collect();
        if patterns.is_empty() {
            return None;
        }
        patterns.sort_by(|a, b| matcher.compare_patterns(a, b, lookup_path));

        Some(RouteMapping {
            name: self.name.clone(),
            patterns,
            methods,
        })
    }

    fn matching_methods(&self, request: &HttpRequest) -> Option<Vec<HttpMethod>> {
        if self.methods.is_empty() {
            return Some(Vec::new());
        }
        let requested = if request.is_preflight() {
            request.header("access-control-request-method")?
        } else {
            request.method.as_str()
        };
        let method = HttpMethod::parse(requested)?;
        if self.methods.contains(&method) {
            Some(vec![method])
        } else if method == HttpMethod::HEAD && self.methods.contains(&HttpMethod::GET) {
            Some(vec![HttpMethod::GET])
        } else {
            None
        }
    }

    /// Rank two mappings already narrowed for the same request.
    ///
    /// Patterns are compared pairwise by specificity; a mapping with a
    /// method condition beats one that accepts any method.
    pub fn compare_to(&self, other: &RouteMapping, lookup_path: &str, matcher: &AntPathMatcher) -> Ordering {
        for (a, b) in self.patterns.iter().zip(&other.patterns) {
            let result = matcher.compare_patterns(a, b, lookup_path);
            if result != Ordering::Equal {
                return result;
            }
        }
        other
            .patterns
            .len()
            .cmp(&self.patterns.len())
            .then(other.methods.len().cmp(&self.methods.len()))
    }
}

impl fmt::Display for RouteMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for method in &self.methods {
            write!(f, "{} ", method)?;
        }
        match self.patterns.as_slice() {
            [single] => f.write_str(single)?,
            patterns => write!(f, "[{}]", patterns.join(", "))?,
        }
        f.write_str("}")
    }
}

/// A declared route: which controller method handles which paths.
#[derive(Debug, Clone)]
pub struct RouteEntry {
    /// Declaring type of the handler method
    pub controller_type_name: String,
    pub handler_name: String,
    pub methods: Vec<HttpMethod>,
    pub paths: Vec<String>,
    pub name: Option<String>,
    pub cors: Option<CorsConfig>,
}

impl RouteEntry {
    pub fn new(
        controller_type_name: impl Into<String>,
        handler_name: impl Into<String>,
        methods: Vec<HttpMethod>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            controller_type_name: controller_type_name.into(),
            handler_name: handler_name.into(),
            methods,
            paths: vec![path.into()],
            name: None,
            cors: None,
        }
    }

    pub fn get(controller: impl Into<String>, handler: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(controller, handler, vec![HttpMethod::GET], path)
    }

    pub fn post(controller: impl Into<String>, handler: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(controller, handler, vec![HttpMethod::POST], path)
    }

    pub fn put(controller: impl Into<String>, handler: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(controller, handler, vec![HttpMethod::PUT], path)
    }

    pub fn delete(controller: impl Into<String>, handler: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(controller, handler, vec![HttpMethod::DELETE], path)
    }

    /// Any HTTP method.
    pub fn any(controller: impl Into<String>, handler: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(controller, handler, Vec::new(), path)
    }

    pub fn also_path(mut self, path: impl Into<String>) -> Self {
        self.paths.push(path.into());
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_cors(mut self, cors: CorsConfig) -> Self {
        self.cors = Some(cors);
        self
    }

    fn to_mapping(&self) -> Result<RouteMapping> {
        if let Some(path) = self.paths.iter().find(|p| !p.starts_with('/')) {
            return Err(Error::Configuration(format!(
                "route path '{}' must start with '/'",
                path
            )));
        }
        let mut mapping = RouteMapping::new(self.paths.iter().cloned(), self.methods.clone());
        mapping.name = self.name.clone();
        Ok(mapping)
    }
}

/// Route declarations keyed by (controller type, handler method name).
#[derive(Debug, Default)]
pub struct RouteTable {
    entries: HashMap<(String, String), RouteEntry>,
    matcher: Arc<AntPathMatcher>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route; a later entry for the same method replaces an earlier one.
    pub fn route(mut self, entry: RouteEntry) -> Self {
        self.entries.insert(
            (entry.controller_type_name.clone(), entry.handler_name.clone()),
            entry,
        );
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn path_matcher(&self) -> &Arc<AntPathMatcher> {
        &self.matcher
    }

    fn entry(&self, method: &MethodSignature) -> Option<&RouteEntry> {
        self.entries
            .get(&(method.declaring_type.clone(), method.name.clone()))
    }

    fn lookup_path(request: &HttpRequest) -> String {
        request
            .attributes
            .get::<LookupPath>()
            .map(|p| p.0.clone())
            .unwrap_or_else(|| request.lookup_path(true))
    }
}

impl MappingStrategy<RouteMapping> for RouteTable {
    fn is_handler(&self, bean_type: &BeanType) -> bool {
        bean_type.methods.iter().any(|m| self.entry(m).is_some())
    }

    fn mapping_for_method(
        &self,
        method: &MethodSignature,
        _handler_type: &BeanType,
    ) -> Result<Option<RouteMapping>> {
        self.entry(method).map(RouteEntry::to_mapping).transpose()
    }

    fn direct_paths(&self, mapping: &RouteMapping) -> Vec<String> {
        mapping
            .patterns
            .iter()
            .filter(|p| !self.matcher.is_pattern(p))
            .cloned()
            .collect()
    }

    fn matching_mapping(&self, mapping: &RouteMapping, request: &HttpRequest) -> Option<RouteMapping> {
        mapping.matching(request, &Self::lookup_path(request), &self.matcher)
    }

    fn compare(&self, a: &RouteMapping, b: &RouteMapping, request: &HttpRequest) -> Ordering {
        a.compare_to(b, &Self::lookup_path(request), &self.matcher)
    }

    fn cors_config(
        &self,
        _source: &HandlerSource,
        method: &MethodSignature,
        _mapping: &RouteMapping,
    ) -> Option<CorsConfig> {
        self.entry(method).and_then(|entry| entry.cors.clone())
    }
}

/// Names a registration by its explicit name, or else by the capital
/// letters of the controller's type name, `#`, and the method name
/// (`UserController::show` becomes `UC#show`).
#[derive(Debug, Default, Clone, Copy)]
pub struct InitialsNamingStrategy;

impl NamingStrategy<RouteMapping> for InitialsNamingStrategy {
    fn mapping_name(&self, handler_method: &HandlerMethod, mapping: &RouteMapping) -> Option<String> {
        if let Some(name) = mapping.name() {
            return Some(name.to_string());
        }
        let method = handler_method.method();
        let initials: String = method
            .simple_type_name()
            .chars()
            .filter(char::is_ascii_uppercase)
            .collect();
        Some(format!("{}#{}", initials, method.name))
    }
}
