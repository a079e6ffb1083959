//! Handler methods: the callable unit a request is dispatched to.
//!
//! A [`HandlerMethod`] pairs a bean with one of its methods. The bean is
//! either held directly or named, in which case the container resolves it
//! once, when a lookup settles on this method as the winner.

use crate::container::BeanContainer;
use crate::error::Result;
use once_cell::sync::Lazy;
use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Shared reference to a bean instance.
pub type BeanInstance = Arc<dyn Any + Send + Sync>;

/// Bean names with this prefix are scoped-proxy targets and are skipped
/// during handler discovery; the proxy bean itself is scanned instead.
pub const SCOPED_TARGET_NAME_PREFIX: &str = "scopedTarget.";

/// Identifies a method on a handler type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodSignature {
    pub declaring_type: String,
    pub name: String,
    pub parameter_types: Vec<String>,
}

impl MethodSignature {
    pub fn new(declaring_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            declaring_type: declaring_type.into(),
            name: name.into(),
            parameter_types: Vec::new(),
        }
    }

    pub fn with_params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parameter_types = params.into_iter().map(Into::into).collect();
        self
    }

    /// Declaring type without its module path.
    pub fn simple_type_name(&self) -> &str {
        self.declaring_type
            .rsplit("::")
            .next()
            .unwrap_or(&self.declaring_type)
    }

    /// Same name and parameters, regardless of declaring type.
    pub fn overrides(&self, other: &MethodSignature) -> bool {
        self.name == other.name && self.parameter_types == other.parameter_types
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}::{}({})",
            self.declaring_type,
            self.name,
            self.parameter_types.join(", ")
        )
    }
}

/// Where a registration's handler comes from.
#[derive(Clone)]
pub enum HandlerSource {
    /// Resolved through the container when the method wins a lookup.
    BeanName(String),
    Instance(BeanInstance),
}

impl HandlerSource {
    pub fn instance<T: Any + Send + Sync>(bean: T) -> Self {
        HandlerSource::Instance(Arc::new(bean))
    }
}

impl From<&str> for HandlerSource {
    fn from(name: &str) -> Self {
        HandlerSource::BeanName(name.to_string())
    }
}

impl From<String> for HandlerSource {
    fn from(name: String) -> Self {
        HandlerSource::BeanName(name)
    }
}

impl fmt::Debug for HandlerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerSource::BeanName(name) => f.debug_tuple("BeanName").field(name).finish(),
            HandlerSource::Instance(bean) => f
                .debug_tuple("Instance")
                .field(&Arc::as_ptr(bean).cast::<()>())
                .finish(),
        }
    }
}

#[derive(Clone)]
pub enum HandlerBean {
    Direct(BeanInstance),
    Deferred(Arc<str>),
}

#[derive(PartialEq, Eq, Hash)]
enum BeanIdentity<'a> {
    Instance(usize),
    Name(&'a str),
}

impl HandlerBean {
    fn identity(&self) -> BeanIdentity<'_> {
        match self {
            HandlerBean::Direct(bean) => {
                BeanIdentity::Instance(Arc::as_ptr(bean).cast::<()>() as usize)
            }
            HandlerBean::Deferred(name) => BeanIdentity::Name(&**name),
        }
    }
}

impl PartialEq for HandlerBean {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for HandlerBean {}

impl Hash for HandlerBean {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

/// A bean plus the method that handles a request.
///
/// Equality covers the bean (instance identity, or name when deferred) and
/// the method. `resolved_from` does not take part.
#[derive(Clone)]
pub struct HandlerMethod {
    bean: HandlerBean,
    method: Arc<MethodSignature>,
    resolved_from: Option<Arc<HandlerMethod>>,
}

impl HandlerMethod {
    pub fn new(source: HandlerSource, method: MethodSignature) -> Self {
        let bean = match source {
            HandlerSource::BeanName(name) => HandlerBean::Deferred(Arc::from(name)),
            HandlerSource::Instance(bean) => HandlerBean::Direct(bean),
        };
        Self {
            bean,
            method: Arc::new(method),
            resolved_from: None,
        }
    }

    pub fn from_instance(bean: BeanInstance, method: MethodSignature) -> Self {
        Self::new(HandlerSource::Instance(bean), method)
    }

    pub fn from_bean_name(name: impl Into<String>, method: MethodSignature) -> Self {
        Self::new(HandlerSource::BeanName(name.into()), method)
    }

    pub fn bean(&self) -> &HandlerBean {
        &self.bean
    }

    pub fn method(&self) -> &MethodSignature {
        &self.method
    }

    pub fn bean_name(&self) -> Option<&str> {
        match &self.bean {
            HandlerBean::Deferred(name) => Some(&**name),
            HandlerBean::Direct(_) => None,
        }
    }

    pub fn bean_instance(&self) -> Option<&BeanInstance> {
        match &self.bean {
            HandlerBean::Direct(bean) => Some(bean),
            HandlerBean::Deferred(_) => None,
        }
    }

    /// Typed access to a direct bean.
    pub fn downcast_bean<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.bean_instance()
            .and_then(|bean| bean.clone().downcast::<T>().ok())
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self.bean, HandlerBean::Deferred(_))
    }

    /// The deferred handler method this one was resolved from.
    pub fn resolved_from(&self) -> Option<&HandlerMethod> {
        self.resolved_from.as_deref()
    }

    /// Bean name, or the declaring type for direct beans.
    pub fn bean_description(&self) -> &str {
        match &self.bean {
            HandlerBean::Deferred(name) => &**name,
            HandlerBean::Direct(_) => self.method.declaring_type.as_str(),
        }
    }

    /// Resolve a deferred bean through the container.
    ///
    /// Direct handler methods are returned as they are.
    pub fn create_with_resolved_bean(
        &self,
        container: &dyn BeanContainer,
    ) -> Result<HandlerMethod> {
        match &self.bean {
            HandlerBean::Direct(_) => Ok(self.clone()),
            HandlerBean::Deferred(name) => {
                let instance = container.bean(name)?;
                Ok(HandlerMethod {
                    bean: HandlerBean::Direct(instance),
                    method: Arc::clone(&self.method),
                    resolved_from: Some(Arc::new(self.clone())),
                })
            }
        }
    }

    pub fn is_preflight_ambiguous_match(&self) -> bool {
        *self == *PREFLIGHT_AMBIGUOUS_MATCH
    }
}

impl PartialEq for HandlerMethod {
    fn eq(&self, other: &Self) -> bool {
        self.bean == other.bean && self.method == other.method
    }
}

impl Eq for HandlerMethod {}

impl Hash for HandlerMethod {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bean.hash(state);
        self.method.hash(state);
    }
}

impl fmt::Display for HandlerMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.method, f)
    }
}

impl fmt::Debug for HandlerMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerMethod")
            .field("bean", &self.bean_description())
            .field("deferred", &self.is_deferred())
            .field("method", &self.method.to_string())
            .finish()
    }
}

struct PreflightHandler;

static PREFLIGHT_AMBIGUOUS_MATCH: Lazy<HandlerMethod> = Lazy::new(|| {
    HandlerMethod::from_instance(
        Arc::new(PreflightHandler),
        MethodSignature::new("PreflightHandler", "handle"),
    )
});

/// Handler returned for a preflight request that matched several mappings
/// when at least one of them carries CORS metadata.
pub fn preflight_ambiguous_match() -> HandlerMethod {
    PREFLIGHT_AMBIGUOUS_MATCH.clone()
}
