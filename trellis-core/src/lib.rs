// Core library for trellis
// Handler method discovery, the mapping registry, request lookup, interceptor
// chains and CORS metadata

pub mod chain;
pub mod container;
pub mod cors;
pub mod error;
pub mod extensions;
pub mod handler_method;
pub mod http;
pub mod interceptor;
pub mod logging;
pub mod mapping;
pub mod path_matcher;
pub mod registry;
pub mod route_mapping;
pub mod url_mapping;

// Re-export commonly used types
pub use chain::*;
pub use container::*;
pub use cors::{CorsConfig, CorsInterceptor};
pub use error::*;
pub use extensions::Extensions;
pub use handler_method::*;
pub use http::*;
pub use interceptor::*;
pub use mapping::*;
pub use path_matcher::*;
pub use registry::*;
pub use route_mapping::*;
pub use url_mapping::{BeanNameUrls, HandlerUrlResolver, UrlHandlerMapping, UrlPatterns};
