// Error types for the trellis handler mapping core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Two distinct handler methods claim the same mapping descriptor.
    #[error(
        "Ambiguous mapping. Cannot map '{bean}' method {method} to {mapping}: \
         There is already '{existing_bean}' bean method {existing_method} mapped."
    )]
    AmbiguousMapping {
        bean: String,
        method: String,
        mapping: String,
        existing_bean: String,
        existing_method: String,
    },

    /// Two or more descriptors match a request and rank equally.
    #[error("Ambiguous handler methods mapped for '{uri}': {{{first}, {second}}}")]
    AmbiguousHandlerMethods {
        uri: String,
        first: String,
        second: String,
    },

    /// A qualifying handler method could not be turned into a descriptor.
    #[error("Invalid mapping on handler class [{handler_type}]: {method}")]
    InvalidMapping {
        handler_type: String,
        method: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Could not resolve type for bean '{0}'")]
    UnresolvableType(String),

    #[error("No bean named '{0}' available")]
    BeanNotFound(String),

    #[error("Bean creation failed for '{name}': {message}")]
    BeanCreation { name: String, message: String },

    #[error("Invalid CORS configuration: {0}")]
    InvalidCorsConfig(String),

    #[error("CORS request rejected: {0}")]
    CorsRejected(String),

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Interceptor error: {0}")]
    Interceptor(String),

    #[error("Handler error: {0}")]
    Handler(String),
}

impl Error {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::CorsRejected(_) => 403,
            Error::BeanNotFound(_) => 404,
            // Ambiguous lookups and configuration faults are server-side problems
            _ => 500,
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }

    /// Wrap a descriptor build failure for a specific handler method.
    pub(crate) fn invalid_mapping(
        handler_type: impl Into<String>,
        method: impl Into<String>,
        source: Error,
    ) -> Self {
        Error::InvalidMapping {
            handler_type: handler_type.into(),
            method: method.into(),
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
