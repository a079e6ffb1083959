// Trellis - handler-method mapping and dispatch for Rust web applications
//
// Maps incoming requests to controller methods through a concurrent mapping
// registry, resolves ambiguity between matching routes, carries CORS metadata
// and runs interceptor chains around each handler invocation.

// Re-export core functionality
pub use trellis_core::*;

// Re-export optional crates
#[cfg(feature = "config")]
pub use trellis_config;

// Prelude for common imports
pub mod prelude {
    pub use crate::{
        AsyncHandlerInterceptor,
        BeanContainer,
        BeanType,
        ChainOutcome,
        Container,
        CorsConfig,
        Error,
        HandlerExecutionChain,
        HandlerInterceptor,
        HandlerMethod,
        HandlerMethodMapping,
        HandlerSource,
        HttpMethod,
        HttpRequest,
        HttpResponse,
        InitialsNamingStrategy,
        MappedInterceptor,
        MappingOptions,
        MappingStrategy,
        MethodSignature,
        ModelAndView,
        NamingStrategy,
        Result,
        RouteEntry,
        RouteMapping,
        RouteTable,
    };

    #[cfg(feature = "config")]
    pub use trellis_config::{ConfigManager, MappingSettings};
}
