//! Handler method mapping: discovery, lookup and runtime registration.
//!
//! [`HandlerMethodMapping`] scans a [`BeanContainer`] for handler types,
//! asks a [`MappingStrategy`] to turn their methods into mapping
//! descriptors, and stores the results in a [`MappingRegistry`]. At request
//! time it finds the best matching descriptor and wraps its handler method in
//! a [`HandlerExecutionChain`].
//!
//! The descriptor type is opaque to the mapping; everything it needs to know
//! about descriptors (which paths they cover, whether they match a request,
//! how two of them rank) comes from the strategy.

use crate::chain::HandlerExecutionChain;
use crate::container::{BeanContainer, BeanType};
use crate::cors::{CorsConfig, CorsInterceptor};
use crate::handler_method::{
    preflight_ambiguous_match, HandlerMethod, HandlerSource, MethodSignature,
    SCOPED_TARGET_NAME_PREFIX,
};
use crate::http::{
    BestMatchingHandler, BestMatchingMapping, HttpRequest, LookupPath, PathWithinHandlerMapping,
};
use crate::interceptor::{ConfiguredInterceptor, HandlerInterceptor, MappedInterceptor};
use crate::logging::{debug, info, trace};
use crate::path_matcher::{AntPathMatcher, PathMatcher};
use crate::registry::{Mapping, MappingRegistration, MappingRegistry, RegistryReadGuard};
use crate::{Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering as AtomicOrdering};
use std::sync::Arc;

/// Descriptor-specific behaviour plugged into a [`HandlerMethodMapping`].
pub trait MappingStrategy<T: Mapping>: Send + Sync {
    /// Whether beans of this type contain handler methods.
    fn is_handler(&self, bean_type: &BeanType) -> bool;

    /// Build the descriptor for a method, or `None` if it is not a handler
    /// method. An error aborts discovery for the handler type.
    fn mapping_for_method(
        &self,
        method: &MethodSignature,
        handler_type: &BeanType,
    ) -> Result<Option<T>>;

    /// Literal (non-pattern) paths the descriptor covers.
    fn direct_paths(&self, mapping: &T) -> Vec<String>;

    /// The descriptor narrowed to what matched the request, or `None`.
    fn matching_mapping(&self, mapping: &T, request: &HttpRequest) -> Option<T>;

    /// Rank two matching descriptors; `Less` means `a` is the better match.
    fn compare(&self, a: &T, b: &T, request: &HttpRequest) -> Ordering;

    fn cors_config(
        &self,
        _source: &HandlerSource,
        _method: &MethodSignature,
        _mapping: &T,
    ) -> Option<CorsConfig> {
        None
    }

    /// Called with the winning descriptor before the lock is released.
    fn handle_match(&self, _mapping: &T, lookup_path: &str, request: &mut HttpRequest) {
        request
            .attributes
            .insert(PathWithinHandlerMapping(lookup_path.to_string()));
    }

    /// Called when nothing matched; may supply a fallback handler.
    fn handle_no_match(
        &self,
        _registry: &RegistryReadGuard<'_, T>,
        _lookup_path: &str,
        _request: &HttpRequest,
    ) -> Result<Option<HandlerMethod>> {
        Ok(None)
    }

    /// Called once after discovery with every registered binding.
    fn handler_methods_initialized(&self, _handler_methods: &IndexMap<T, HandlerMethod>) {}
}

/// Derives the logical name of a registration.
pub trait NamingStrategy<T>: Send + Sync {
    fn mapping_name(&self, handler_method: &HandlerMethod, mapping: &T) -> Option<String>;
}

/// Lifecycle of a [`HandlerMethodMapping`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MappingState {
    Uninitialized = 0,
    Initializing = 1,
    Ready = 2,
}

impl MappingState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => MappingState::Initializing,
            2 => MappingState::Ready,
            _ => MappingState::Uninitialized,
        }
    }
}

/// Tunables of a [`HandlerMethodMapping`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingOptions {
    /// Also scan beans of ancestor containers
    pub detect_in_ancestor_contexts: bool,
    /// Percent-decode the lookup path
    pub url_decode: bool,
}

impl Default for MappingOptions {
    fn default() -> Self {
        Self {
            detect_in_ancestor_contexts: false,
            url_decode: true,
        }
    }
}

struct Match<T> {
    mapping: T,
    registration: Arc<MappingRegistration<T>>,
}

/// Maps requests to handler methods.
///
/// Configure with the `with_*` methods, then call [`initialize`] once.
/// Lookups may run concurrently with runtime registration.
///
/// [`initialize`]: HandlerMethodMapping::initialize
pub struct HandlerMethodMapping<T: Mapping, S: MappingStrategy<T>> {
    strategy: S,
    container: Arc<dyn BeanContainer>,
    registry: MappingRegistry<T>,
    naming: Option<Arc<dyn NamingStrategy<T>>>,
    options: MappingOptions,
    interceptors: Vec<ConfiguredInterceptor>,
    global_cors: Vec<(String, CorsConfig)>,
    path_matcher: Arc<dyn PathMatcher>,
    default_handler: Option<HandlerMethod>,
    state: AtomicU8,
}

impl<T: Mapping, S: MappingStrategy<T>> HandlerMethodMapping<T, S> {
    pub fn new(strategy: S, container: Arc<dyn BeanContainer>) -> Self {
        Self {
            strategy,
            container,
            registry: MappingRegistry::new(),
            naming: None,
            options: MappingOptions::default(),
            interceptors: Vec::new(),
            global_cors: Vec::new(),
            path_matcher: Arc::new(AntPathMatcher::new()),
            default_handler: None,
            state: AtomicU8::new(MappingState::Uninitialized as u8),
        }
    }

    pub fn with_naming_strategy(mut self, naming: Arc<dyn NamingStrategy<T>>) -> Self {
        self.naming = Some(naming);
        self
    }

    pub fn with_options(mut self, options: MappingOptions) -> Self {
        self.options = options;
        self
    }

    pub fn detect_in_ancestor_contexts(mut self, enable: bool) -> Self {
        self.options.detect_in_ancestor_contexts = enable;
        self
    }

    pub fn url_decode(mut self, enable: bool) -> Self {
        self.options.url_decode = enable;
        self
    }

    /// Add an interceptor applied to every chain.
    pub fn with_interceptor(mut self, interceptor: Arc<dyn HandlerInterceptor>) -> Self {
        self.interceptors.push(ConfiguredInterceptor::Global(interceptor));
        self
    }

    /// Add an interceptor applied to chains whose lookup path matches.
    pub fn with_mapped_interceptor(mut self, interceptor: MappedInterceptor) -> Self {
        self.interceptors.push(interceptor.into());
        self
    }

    /// Add a global CORS config for lookup paths matching `pattern`.
    /// The first matching pattern applies.
    pub fn with_cors_mapping(mut self, pattern: impl Into<String>, config: CorsConfig) -> Self {
        self.global_cors.push((pattern.into(), config));
        self
    }

    pub fn with_path_matcher(mut self, matcher: Arc<dyn PathMatcher>) -> Self {
        self.path_matcher = matcher;
        self
    }

    /// Handler used when no mapping matches.
    pub fn with_default_handler(mut self, handler: HandlerMethod) -> Self {
        self.default_handler = Some(handler);
        self
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    pub fn container(&self) -> &Arc<dyn BeanContainer> {
        &self.container
    }

    pub fn registry(&self) -> &MappingRegistry<T> {
        &self.registry
    }

    pub fn options(&self) -> MappingOptions {
        self.options
    }

    pub fn state(&self) -> MappingState {
        MappingState::from_u8(self.state.load(AtomicOrdering::Acquire))
    }

    /// Discover and register handler methods, then become ready.
    ///
    /// Can run once. On failure the mapping is cleared and returns to
    /// [`MappingState::Uninitialized`].
    pub fn initialize(&self) -> Result<()> {
        self.state
            .compare_exchange(
                MappingState::Uninitialized as u8,
                MappingState::Initializing as u8,
                AtomicOrdering::AcqRel,
                AtomicOrdering::Acquire,
            )
            .map_err(|current| {
                Error::IllegalState(format!(
                    "handler method mapping cannot be initialized in state {:?}",
                    MappingState::from_u8(current)
                ))
            })?;

        if let Err(e) = self.init_handler_methods() {
            self.registry.clear();
            self.state
                .store(MappingState::Uninitialized as u8, AtomicOrdering::Release);
            return Err(e);
        }

        let handler_methods = self.registry.snapshot();
        self.strategy.handler_methods_initialized(&handler_methods);
        self.state
            .store(MappingState::Ready as u8, AtomicOrdering::Release);
        info!(handler_methods = handler_methods.len(), "Handler method mapping ready");
        Ok(())
    }

    fn init_handler_methods(&self) -> Result<()> {
        for name in self
            .container
            .bean_names(self.options.detect_in_ancestor_contexts)
        {
            if name.starts_with(SCOPED_TARGET_NAME_PREFIX) {
                trace!(bean = %name, "Skipping scoped proxy target");
                continue;
            }
            self.process_candidate_bean(&name)?;
        }
        Ok(())
    }

    fn process_candidate_bean(&self, name: &str) -> Result<()> {
        let bean_type = match self.container.bean_type(name) {
            Ok(bean_type) => bean_type,
            Err(e) => {
                trace!(bean = %name, error = %e, "Could not resolve type for bean");
                return Ok(());
            }
        };
        if self.strategy.is_handler(&bean_type) {
            self.detect_handler_methods(HandlerSource::BeanName(name.to_string()), &bean_type)?;
        }
        Ok(())
    }

    /// Register every handler method of `handler_type` found by the strategy.
    ///
    /// Descriptors are built for all methods before any is registered, so a
    /// build failure leaves the handler type unregistered.
    pub fn detect_handler_methods(&self, source: HandlerSource, handler_type: &BeanType) -> Result<()> {
        let mut methods = Vec::new();
        for method in &handler_type.methods {
            match self.strategy.mapping_for_method(method, handler_type) {
                Ok(Some(mapping)) => methods.push((method, mapping)),
                Ok(None) => {}
                Err(e) => {
                    return Err(Error::invalid_mapping(
                        &handler_type.name,
                        method.to_string(),
                        e,
                    ));
                }
            }
        }

        debug!(
            handler_type = %handler_type.name,
            mappings = methods.len(),
            "Detected handler methods"
        );
        for (method, mapping) in methods {
            trace!(mapping = ?mapping, method = %method, "Registering detected mapping");
            self.register_handler_method(mapping, source.clone(), method.clone())?;
        }
        Ok(())
    }

    fn register_handler_method(
        &self,
        mapping: T,
        source: HandlerSource,
        method: MethodSignature,
    ) -> Result<()> {
        self.registry
            .register(mapping, source, method, &self.strategy, self.naming.as_deref())
    }

    fn ensure_ready(&self, operation: &str) -> Result<()> {
        match self.state() {
            MappingState::Ready => Ok(()),
            state => Err(Error::IllegalState(format!(
                "cannot {} while handler method mapping is {:?}",
                operation, state
            ))),
        }
    }

    /// Register a mapping at runtime.
    pub fn register_mapping(
        &self,
        mapping: T,
        source: impl Into<HandlerSource>,
        method: MethodSignature,
    ) -> Result<()> {
        self.ensure_ready("register a mapping")?;
        self.register_handler_method(mapping, source.into(), method)
    }

    /// Unregister a mapping at runtime. Unknown mappings are ignored.
    pub fn unregister_mapping(&self, mapping: &T) -> Result<()> {
        self.ensure_ready("unregister a mapping")?;
        self.registry.unregister(mapping);
        Ok(())
    }

    /// Read-only copy of all bindings, in registration order.
    pub fn handler_methods(&self) -> IndexMap<T, HandlerMethod> {
        self.registry.snapshot()
    }

    pub fn handler_methods_for_mapping_name(&self, name: &str) -> Option<Arc<Vec<HandlerMethod>>> {
        self.registry.get_by_name(name)
    }

    /// Look up the handler for a request and build its execution chain.
    ///
    /// Falls back to the default handler when nothing matches. Returns
    /// `Ok(None)` when there is no handler at all.
    pub fn get_handler(&self, request: &mut HttpRequest) -> Result<Option<HandlerExecutionChain>> {
        let handler = match self.get_handler_internal(request)? {
            Some(handler) => handler,
            None => match &self.default_handler {
                Some(handler) => handler.clone(),
                None => return Ok(None),
            },
        };

        let lookup_path = self.lookup_path(request);
        let interceptors = self
            .interceptors
            .iter()
            .filter_map(|i| i.for_path(&lookup_path))
            .collect();
        let mut chain = HandlerExecutionChain::with_interceptors(handler, interceptors);

        if self.has_cors_configuration_source(chain.handler()) || request.is_preflight() {
            if let Some(config) = self.cors_configuration(chain.handler(), request) {
                config.validate_allow_credentials()?;
                chain.add_interceptor_at(0, Arc::new(CorsInterceptor::new(config)));
            }
        }

        debug!(path = %lookup_path, handler = %chain.handler(), "Mapped request");
        Ok(Some(chain))
    }

    /// Find the handler method for a request, with its bean resolved.
    pub fn get_handler_internal(&self, request: &mut HttpRequest) -> Result<Option<HandlerMethod>> {
        let lookup_path = request.lookup_path(self.options.url_decode);
        request.attributes.insert(LookupPath(lookup_path.clone()));

        match self.lookup_handler_method(&lookup_path, request)? {
            Some(handler) => Ok(Some(
                handler.create_with_resolved_bean(self.container.as_ref())?,
            )),
            None => Ok(None),
        }
    }

    /// Find the best matching handler method for `lookup_path`.
    ///
    /// Descriptors indexed under the literal path are tried first; only if
    /// none of them match is every descriptor tried. Among several matches
    /// the strategy's ranking decides. A tie between the top two is an
    /// error, except for preflight requests: those get the shared preflight
    /// handler if any candidate has CORS metadata, otherwise the first
    /// ranked match.
    pub fn lookup_handler_method(
        &self,
        lookup_path: &str,
        request: &mut HttpRequest,
    ) -> Result<Option<HandlerMethod>> {
        let registry = self.registry.read();
        let mut matches = Vec::new();
        self.add_matching_mappings(
            registry.mappings_by_direct_path(lookup_path).iter(),
            &registry,
            request,
            &mut matches,
        );
        if matches.is_empty() {
            trace!(path = %lookup_path, "No direct path match, scanning all mappings");
            self.add_matching_mappings(registry.mappings(), &registry, request, &mut matches);
        }

        if matches.is_empty() {
            return self.strategy.handle_no_match(&registry, lookup_path, request);
        }

        if matches.len() > 1 {
            let req: &HttpRequest = request;
            matches.sort_by(|a, b| self.strategy.compare(&a.mapping, &b.mapping, req));
            trace!(path = %lookup_path, candidates = matches.len(), "Ranked matching mappings");

            if req.is_preflight() {
                if matches.iter().any(|m| m.registration.has_cors_config()) {
                    return Ok(Some(preflight_ambiguous_match()));
                }
            } else {
                let (best, second) = (&matches[0], &matches[1]);
                if self.strategy.compare(&best.mapping, &second.mapping, req) == Ordering::Equal {
                    return Err(Error::AmbiguousHandlerMethods {
                        uri: req.request_uri().to_string(),
                        first: best.registration.handler_method().method().to_string(),
                        second: second.registration.handler_method().method().to_string(),
                    });
                }
            }
        }

        let best = &matches[0];
        let handler_method = best.registration.handler_method().clone();
        request
            .attributes
            .insert(BestMatchingHandler(handler_method.clone()));
        request
            .attributes
            .insert(BestMatchingMapping(best.mapping.clone()));
        self.strategy.handle_match(&best.mapping, lookup_path, request);
        Ok(Some(handler_method))
    }

    fn add_matching_mappings<'a, I>(
        &self,
        mappings: I,
        registry: &RegistryReadGuard<'_, T>,
        request: &HttpRequest,
        matches: &mut Vec<Match<T>>,
    ) where
        I: Iterator<Item = &'a T>,
    {
        for mapping in mappings {
            let Some(narrowed) = self.strategy.matching_mapping(mapping, request) else {
                continue;
            };
            if let Some(registration) = registry.registration(mapping) {
                matches.push(Match {
                    mapping: narrowed,
                    registration: Arc::clone(registration),
                });
            }
        }
    }

    /// Whether CORS processing applies to this handler at all.
    pub fn has_cors_configuration_source(&self, handler: &HandlerMethod) -> bool {
        !self.global_cors.is_empty()
            || handler.is_preflight_ambiguous_match()
            || self.registry.cors_config(handler).is_some()
    }

    /// Effective CORS config for a handler: the global config for the lookup
    /// path combined with the handler's own.
    pub fn cors_configuration(&self, handler: &HandlerMethod, request: &HttpRequest) -> Option<CorsConfig> {
        let handler_config = if handler.is_preflight_ambiguous_match() {
            Some(CorsConfig::permissive_with_credentials())
        } else {
            self.registry.cors_config(handler).map(|c| c.as_ref().clone())
        };

        let lookup_path = self.lookup_path(request);
        let global_config = self
            .global_cors
            .iter()
            .find(|(pattern, _)| self.path_matcher.matches(pattern, &lookup_path))
            .map(|(_, config)| config);

        match (global_config, handler_config) {
            (Some(global), Some(local)) => Some(global.combine(&local)),
            (Some(global), None) => Some(global.clone()),
            (None, local) => local,
        }
    }

    fn lookup_path(&self, request: &HttpRequest) -> String {
        request
            .attributes
            .get::<LookupPath>()
            .map(|p| p.0.clone())
            .unwrap_or_else(|| request.lookup_path(self.options.url_decode))
    }
}

impl<T: Mapping, S: MappingStrategy<T>> fmt::Debug for HandlerMethodMapping<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerMethodMapping")
            .field("state", &self.state())
            .field("options", &self.options)
            .field("registry", &self.registry)
            .field("interceptors", &self.interceptors.len())
            .field("global_cors", &self.global_cors.len())
            .finish()
    }
}
