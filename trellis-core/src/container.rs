// Bean container consulted during handler discovery and lookup

use crate::handler_method::{BeanInstance, MethodSignature};
use crate::logging::{debug, trace};
use crate::{Error, Result};
use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::any::Any;
use std::sync::Arc;

/// Read access to named beans and their types.
pub trait BeanContainer: Send + Sync {
    /// Bean names in registration order, optionally followed by those of
    /// ancestor containers.
    fn bean_names(&self, include_ancestors: bool) -> Vec<String>;

    /// Fails with [`Error::UnresolvableType`] when the type is not known
    /// without creating the bean.
    fn bean_type(&self, name: &str) -> Result<Arc<BeanType>>;

    fn bean(&self, name: &str) -> Result<BeanInstance>;
}

/// Type metadata of a bean.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeanType {
    pub name: String,
    /// Declared and inherited methods.
    pub methods: Vec<MethodSignature>,
}

impl BeanType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    pub fn with_method(mut self, name: impl Into<String>) -> Self {
        self.methods.push(MethodSignature::new(self.name.clone(), name));
        self
    }

    pub fn with_method_params<I, S>(mut self, name: impl Into<String>, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.methods
            .push(MethodSignature::new(self.name.clone(), name).with_params(params));
        self
    }

    /// Inherit the methods of `parent` that this type does not override.
    pub fn extends(mut self, parent: &BeanType) -> Self {
        let inherited: Vec<_> = parent
            .methods
            .iter()
            .filter(|m| !self.methods.iter().any(|own| own.overrides(m)))
            .cloned()
            .collect();
        self.methods.extend(inherited);
        self
    }

    /// Type name without its module path.
    pub fn simple_name(&self) -> &str {
        self.name.rsplit("::").next().unwrap_or(&self.name)
    }
}

type BeanFactory = Box<dyn Fn() -> Result<BeanInstance> + Send + Sync>;

enum BeanSlot {
    Ready(BeanInstance),
    Lazy {
        factory: BeanFactory,
        instance: OnceCell<BeanInstance>,
    },
}

struct BeanDefinition {
    bean_type: Option<Arc<BeanType>>,
    slot: BeanSlot,
}

/// In-memory bean container with an optional parent.
#[derive(Clone)]
pub struct Container {
    beans: Arc<RwLock<IndexMap<String, Arc<BeanDefinition>>>>,
    parent: Option<Arc<dyn BeanContainer>>,
}

impl Container {
    pub fn new() -> Self {
        debug!("Creating new bean container");
        Self {
            beans: Arc::new(RwLock::new(IndexMap::new())),
            parent: None,
        }
    }

    /// Create a child container; lookups that miss locally go to `parent`.
    pub fn with_parent(parent: Arc<dyn BeanContainer>) -> Self {
        Self {
            parent: Some(parent),
            ..Self::new()
        }
    }

    /// Register an already created bean.
    pub fn register_instance<T: Any + Send + Sync>(
        &self,
        name: impl Into<String>,
        bean_type: BeanType,
        instance: T,
    ) {
        let name = name.into();
        trace!(bean = %name, bean_type = %bean_type.name, "Registering bean instance");
        self.insert(
            name,
            BeanDefinition {
                bean_type: Some(Arc::new(bean_type)),
                slot: BeanSlot::Ready(Arc::new(instance)),
            },
        );
    }

    /// Register a bean created on first access.
    ///
    /// Without a declared type the bean's type cannot be resolved, which
    /// handler discovery treats as a skipped candidate.
    pub fn register_lazy<T, F>(&self, name: impl Into<String>, bean_type: Option<BeanType>, factory: F)
    where
        T: Any + Send + Sync,
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        let name = name.into();
        trace!(bean = %name, "Registering lazy bean");
        let factory: BeanFactory = Box::new(move || {
            let instance: BeanInstance = Arc::new(factory()?);
            Ok(instance)
        });
        self.insert(
            name,
            BeanDefinition {
                bean_type: bean_type.map(Arc::new),
                slot: BeanSlot::Lazy {
                    factory,
                    instance: OnceCell::new(),
                },
            },
        );
    }

    fn insert(&self, name: String, definition: BeanDefinition) {
        let mut beans = self.beans.write();
        beans.insert(name.clone(), Arc::new(definition));
        debug!(bean = %name, bean_count = beans.len(), "Bean registered in container");
    }

    pub fn contains(&self, name: &str) -> bool {
        self.beans.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.beans.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.beans.read().is_empty()
    }

    /// Remove a bean, returning whether it was present.
    pub fn remove(&self, name: &str) -> bool {
        self.beans.write().shift_remove(name).is_some()
    }

    fn definition(&self, name: &str) -> Option<Arc<BeanDefinition>> {
        self.beans.read().get(name).cloned()
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl BeanContainer for Container {
    fn bean_names(&self, include_ancestors: bool) -> Vec<String> {
        let mut names: Vec<String> = self.beans.read().keys().cloned().collect();
        if include_ancestors {
            if let Some(parent) = &self.parent {
                for name in parent.bean_names(true) {
                    if !names.contains(&name) {
                        names.push(name);
                    }
                }
            }
        }
        names
    }

    fn bean_type(&self, name: &str) -> Result<Arc<BeanType>> {
        match self.definition(name) {
            Some(definition) => definition
                .bean_type
                .clone()
                .ok_or_else(|| Error::UnresolvableType(name.to_string())),
            None => match &self.parent {
                Some(parent) => parent.bean_type(name),
                None => Err(Error::BeanNotFound(name.to_string())),
            },
        }
    }

    fn bean(&self, name: &str) -> Result<BeanInstance> {
        let Some(definition) = self.definition(name) else {
            return match &self.parent {
                Some(parent) => parent.bean(name),
                None => Err(Error::BeanNotFound(name.to_string())),
            };
        };

        match &definition.slot {
            BeanSlot::Ready(instance) => Ok(Arc::clone(instance)),
            BeanSlot::Lazy { factory, instance } => instance
                .get_or_try_init(|| {
                    debug!(bean = %name, "Creating lazy bean");
                    factory().map_err(|e| Error::BeanCreation {
                        name: name.to_string(),
                        message: e.to_string(),
                    })
                })
                .cloned(),
        }
    }
}
