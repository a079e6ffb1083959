//! Registry of mapping descriptor to handler method bindings.
//!
//! Registrations and the direct path index are guarded together by one
//! read/write lock, so a lookup sees either all or none of a registration.
//! The name and CORS indexes live in concurrent maps of their own and are
//! updated by replacing whole entries; they can be read without the lock.

use crate::cors::CorsConfig;
use crate::handler_method::{HandlerMethod, HandlerSource, MethodSignature};
use crate::logging::{debug, trace};
use crate::mapping::{MappingStrategy, NamingStrategy};
use crate::{Error, Result};
use dashmap::DashMap;
use indexmap::{IndexMap, IndexSet};
use parking_lot::{RwLock, RwLockReadGuard};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

/// Capabilities a mapping descriptor needs to be stored in the registry.
///
/// Matching and ranking are supplied by a [`MappingStrategy`].
pub trait Mapping: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static {}

impl<T> Mapping for T where T: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static {}

/// One descriptor bound to one handler method, plus what was derived from it.
#[derive(Debug, Clone)]
pub struct MappingRegistration<T> {
    mapping: T,
    handler_method: HandlerMethod,
    direct_paths: Vec<String>,
    mapping_name: Option<String>,
    cors_config: Option<Arc<CorsConfig>>,
}

impl<T> MappingRegistration<T> {
    pub fn mapping(&self) -> &T {
        &self.mapping
    }

    pub fn handler_method(&self) -> &HandlerMethod {
        &self.handler_method
    }

    pub fn direct_paths(&self) -> &[String] {
        &self.direct_paths
    }

    pub fn mapping_name(&self) -> Option<&str> {
        self.mapping_name.as_deref()
    }

    pub fn has_cors_config(&self) -> bool {
        self.cors_config.is_some()
    }

    /// CORS config derived from this descriptor.
    pub fn cors_config(&self) -> Option<&Arc<CorsConfig>> {
        self.cors_config.as_ref()
    }
}

struct RegistryState<T> {
    registrations: IndexMap<T, Arc<MappingRegistration<T>>>,
    path_lookup: HashMap<String, Vec<T>>,
}

/// Thread-safe store of registrations and their indexes.
pub struct MappingRegistry<T: Mapping> {
    state: RwLock<RegistryState<T>>,
    name_lookup: DashMap<String, Arc<Vec<HandlerMethod>>>,
    cors_lookup: DashMap<HandlerMethod, Arc<CorsConfig>>,
}

/// Shared access to registrations and the direct path index.
///
/// Lookups hold this guard for their whole match; registration waits until
/// it is dropped.
pub struct RegistryReadGuard<'a, T: Mapping> {
    state: RwLockReadGuard<'a, RegistryState<T>>,
}

impl<T: Mapping> RegistryReadGuard<'_, T> {
    /// Descriptors bound to the literal path, in registration order.
    pub fn mappings_by_direct_path(&self, path: &str) -> &[T] {
        self.state
            .path_lookup
            .get(path)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// All descriptors in registration order.
    pub fn mappings(&self) -> impl Iterator<Item = &T> {
        self.state.registrations.keys()
    }

    pub fn registrations(&self) -> impl Iterator<Item = &Arc<MappingRegistration<T>>> {
        self.state.registrations.values()
    }

    pub fn registration(&self, mapping: &T) -> Option<&Arc<MappingRegistration<T>>> {
        self.state.registrations.get(mapping)
    }

    /// Literal paths currently indexed.
    pub fn direct_paths(&self) -> impl Iterator<Item = &str> {
        self.state.path_lookup.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.state.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.registrations.is_empty()
    }
}

impl<T: Mapping> MappingRegistry<T> {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState {
                registrations: IndexMap::new(),
                path_lookup: HashMap::new(),
            }),
            name_lookup: DashMap::new(),
            cors_lookup: DashMap::new(),
        }
    }

    /// Acquire the shared lock.
    pub fn read(&self) -> RegistryReadGuard<'_, T> {
        RegistryReadGuard {
            state: self.state.read(),
        }
    }

    /// Bind `mapping` to the handler method built from `source` and `method`.
    ///
    /// Fails without touching the registry if the mapping is already bound
    /// to a different handler method or its CORS config is invalid.
    /// Registering the same binding again replaces it.
    pub fn register<S>(
        &self,
        mapping: T,
        source: HandlerSource,
        method: MethodSignature,
        strategy: &S,
        naming: Option<&dyn NamingStrategy<T>>,
    ) -> Result<()>
    where
        S: MappingStrategy<T> + ?Sized,
    {
        let mut state = self.state.write();

        let handler_method = HandlerMethod::new(source.clone(), method.clone());
        let previous = state.registrations.get(&mapping).cloned();
        if let Some(existing) = &previous {
            if existing.handler_method != handler_method {
                return Err(Error::AmbiguousMapping {
                    bean: handler_method.bean_description().to_string(),
                    method: handler_method.method().to_string(),
                    mapping: format!("{:?}", mapping),
                    existing_bean: existing.handler_method.bean_description().to_string(),
                    existing_method: existing.handler_method.method().to_string(),
                });
            }
        }

        let cors_config = strategy.cors_config(&source, &method, &mapping);
        if let Some(config) = &cors_config {
            config.validate_allow_credentials()?;
        }
        let cors_config = cors_config.map(Arc::new);

        let direct_paths: Vec<String> = strategy
            .direct_paths(&mapping)
            .into_iter()
            .collect::<IndexSet<_>>()
            .into_iter()
            .collect();
        let mapping_name = naming.and_then(|n| n.mapping_name(&handler_method, &mapping));

        if let Some(existing) = &previous {
            trace!(mapping = ?mapping, "Replacing existing registration");
            self.release_shadows(&mut state, existing);
        }

        for path in &direct_paths {
            state
                .path_lookup
                .entry(path.clone())
                .or_default()
                .push(mapping.clone());
        }
        if let Some(name) = &mapping_name {
            self.add_mapping_name(name, &handler_method);
        }
        if let Some(config) = &cors_config {
            self.cors_lookup
                .insert(handler_method.clone(), Arc::clone(config));
        }

        trace!(mapping = ?mapping, handler = %handler_method, "Mapped handler method");
        state.registrations.insert(
            mapping.clone(),
            Arc::new(MappingRegistration {
                mapping,
                handler_method,
                direct_paths,
                mapping_name,
                cors_config,
            }),
        );
        Ok(())
    }

    /// Remove the binding for `mapping` along with its index entries.
    ///
    /// Returns the removed registration, or `None` if there was none.
    pub fn unregister(&self, mapping: &T) -> Option<Arc<MappingRegistration<T>>> {
        let mut state = self.state.write();
        let registration = state.registrations.shift_remove(mapping)?;
        self.release_shadows(&mut state, &registration);
        debug!(mapping = ?mapping, handler = %registration.handler_method, "Unregistered mapping");
        Some(registration)
    }

    /// Reverse the index entries made for `registration`.
    ///
    /// Name and CORS entries are kept while another registration for the
    /// same handler method still accounts for them. The CORS entry then
    /// reverts to the config of the latest such registration.
    fn release_shadows(&self, state: &mut RegistryState<T>, registration: &MappingRegistration<T>) {
        for path in &registration.direct_paths {
            let now_empty = match state.path_lookup.get_mut(path) {
                Some(mappings) => {
                    mappings.retain(|m| *m != registration.mapping);
                    mappings.is_empty()
                }
                None => false,
            };
            if now_empty {
                state.path_lookup.remove(path);
            }
        }

        let others: Vec<&Arc<MappingRegistration<T>>> = state
            .registrations
            .values()
            .filter(|r| {
                r.mapping != registration.mapping && r.handler_method == registration.handler_method
            })
            .collect();

        if let Some(name) = &registration.mapping_name {
            if !others
                .iter()
                .any(|r| r.mapping_name.as_ref() == Some(name))
            {
                self.remove_mapping_name(name, &registration.handler_method);
            }
        }
        if registration.cors_config.is_some() {
            match others.iter().rev().find_map(|r| r.cors_config.as_ref()) {
                Some(config) => {
                    self.cors_lookup
                        .insert(registration.handler_method.clone(), Arc::clone(config));
                }
                None => {
                    self.cors_lookup.remove(&registration.handler_method);
                }
            }
        }
    }

    fn add_mapping_name(&self, name: &str, handler_method: &HandlerMethod) {
        let current = self.name_lookup.get(name).map(|e| Arc::clone(e.value()));
        if let Some(current) = &current {
            if current.contains(handler_method) {
                return;
            }
        }

        let mut updated = Vec::with_capacity(current.as_ref().map_or(0, |c| c.len()) + 1);
        if let Some(current) = &current {
            updated.extend(current.iter().cloned());
        }
        updated.push(handler_method.clone());
        self.name_lookup.insert(name.to_string(), Arc::new(updated));
    }

    fn remove_mapping_name(&self, name: &str, handler_method: &HandlerMethod) {
        let Some(current) = self.name_lookup.get(name).map(|e| Arc::clone(e.value())) else {
            return;
        };
        if !current.contains(handler_method) {
            return;
        }
        if current.len() == 1 {
            self.name_lookup.remove(name);
            return;
        }

        let mut updated = Vec::with_capacity(current.len() - 1);
        updated.extend(current.iter().filter(|h| *h != handler_method).cloned());
        self.name_lookup.insert(name.to_string(), Arc::new(updated));
    }

    /// Handler methods registered under a logical name.
    pub fn get_by_name(&self, name: &str) -> Option<Arc<Vec<HandlerMethod>>> {
        self.name_lookup.get(name).map(|e| Arc::clone(e.value()))
    }

    /// CORS config registered for a handler method, or for the deferred
    /// handler method it was resolved from.
    pub fn cors_config(&self, handler_method: &HandlerMethod) -> Option<Arc<CorsConfig>> {
        let key = handler_method.resolved_from().unwrap_or(handler_method);
        self.cors_lookup
            .get(key)
            .or_else(|| self.cors_lookup.get(handler_method))
            .map(|e| Arc::clone(e.value()))
    }

    /// Copy of all bindings in registration order.
    pub fn snapshot(&self) -> IndexMap<T, HandlerMethod> {
        self.state
            .read()
            .registrations
            .iter()
            .map(|(mapping, registration)| (mapping.clone(), registration.handler_method.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().registrations.is_empty()
    }

    pub fn name_count(&self) -> usize {
        self.name_lookup.len()
    }

    pub fn cors_count(&self) -> usize {
        self.cors_lookup.len()
    }

    /// Drop every registration and index entry.
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.registrations.clear();
        state.path_lookup.clear();
        self.name_lookup.clear();
        self.cors_lookup.clear();
    }
}

impl<T: Mapping> Default for MappingRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Mapping> fmt::Debug for MappingRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("MappingRegistry")
            .field("registrations", &state.registrations.len())
            .field("direct_paths", &state.path_lookup.len())
            .field("names", &self.name_lookup.len())
            .field("cors", &self.cors_lookup.len())
            .finish()
    }
}
