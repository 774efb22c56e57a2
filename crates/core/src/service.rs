//! Service locator: a small dependency-injection container.
//!
//! Services are registered under a name together with a [`ServiceFactory`]
//! that declares which other services it needs. Resolution is lazy:
//! singletons are built on first [`ServiceLocator::resolve`] and cached,
//! transients are built on every call.
//!
//! ```text
//! locator.register("event_dispatcher", ServiceFactory::new(|_| Ok(EventDispatcher::default())), Lifetime::Singleton);
//! locator.register(
//!     "plugin_manager",
//!     ServiceFactory::new(|deps| Ok(PluginManager::new(deps.get("event_dispatcher")?)))
//!         .depends_on("event_dispatcher"),
//!     Lifetime::Singleton,
//! );
//! let manager: Arc<PluginManager> = locator.resolve("plugin_manager")?;
//! ```
//!
//! Declared dependencies are checked for cycles before anything is built.
//! Each singleton owns a slot mutex, so concurrent first resolution from
//! several threads still produces exactly one instance.

use std::any::{Any, type_name};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::error::ServiceError;

/// A type-erased service instance.
pub type Instance = Arc<dyn Any + Send + Sync>;

type Constructor = dyn Fn(&Dependencies) -> Result<Instance, ServiceError> + Send + Sync;

/// How long a resolved instance lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifetime {
    /// Built once on first resolve, then shared.
    Singleton,
    /// Built fresh on every resolve; owned by the caller.
    Transient,
}

/// A named dependency declared by a factory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub name: String,
    /// Required dependencies fail construction when unregistered; optional
    /// ones are simply absent and the constructor applies its own default.
    pub required: bool,
}

impl Dependency {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
        }
    }
}

/// Builds instances of one service from its resolved dependencies.
#[derive(Clone)]
pub struct ServiceFactory {
    dependencies: Vec<Dependency>,
    construct: Arc<Constructor>,
}

impl ServiceFactory {
    /// A factory producing owned values; the locator wraps them in an `Arc`.
    pub fn new<T, F>(construct: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&Dependencies) -> Result<T, ServiceError> + Send + Sync + 'static,
    {
        Self {
            dependencies: Vec::new(),
            construct: Arc::new(move |deps| construct(deps).map(|value| Arc::new(value) as Instance)),
        }
    }

    /// A factory that already hands out `Arc<T>`; resolves as `T`.
    pub fn shared<T, F>(construct: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&Dependencies) -> Result<Arc<T>, ServiceError> + Send + Sync + 'static,
    {
        Self {
            dependencies: Vec::new(),
            construct: Arc::new(move |deps| construct(deps).map(|value| value as Instance)),
        }
    }

    /// Register an existing instance.
    pub fn instance<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self::shared(move |_| Ok(Arc::clone(&value)))
    }

    /// Declare a required dependency.
    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(Dependency::required(name));
        self
    }

    /// Declare an optional dependency.
    pub fn optionally_depends_on(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(Dependency::optional(name));
        self
    }

    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }
}

impl std::fmt::Debug for ServiceFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceFactory")
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

/// The resolved dependencies handed to a constructor.
pub struct Dependencies {
    service: String,
    resolved: HashMap<String, Instance>,
}

impl Dependencies {
    /// Name of the service being constructed.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// A resolved dependency of type `T`.
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>, ServiceError> {
        self.optional(name)?
            .ok_or_else(|| ServiceError::MissingDependency {
                dependency: name.to_string(),
                service: self.service.clone(),
            })
    }

    /// An optional dependency; `None` when it was not registered.
    pub fn optional<T: Any + Send + Sync>(&self, name: &str) -> Result<Option<Arc<T>>, ServiceError> {
        let Some(instance) = self.resolved.get(name) else {
            return Ok(None);
        };
        Arc::clone(instance)
            .downcast::<T>()
            .map(Some)
            .map_err(|_| ServiceError::TypeMismatch {
                service: name.to_string(),
                expected: type_name::<T>(),
            })
    }
}

struct Registration {
    factory: ServiceFactory,
    lifetime: Lifetime,
    /// Cached singleton. Replaced wholesale on re-registration.
    slot: Arc<Mutex<Option<Instance>>>,
}

/// Named-service registry with lazy singleton/transient instantiation.
#[derive(Default)]
pub struct ServiceLocator {
    registry: Mutex<HashMap<String, Registration>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ServiceLocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a service. Replacing drops any cached singleton.
    pub fn register(&self, name: impl Into<String>, factory: ServiceFactory, lifetime: Lifetime) {
        let name = name.into();
        let mut registry = lock(&self.registry);
        if registry.contains_key(&name) {
            warn!(service = %name, "Service is being re-registered");
        }
        debug!(service = %name, ?lifetime, deps = factory.dependencies.len(), "Service registered");
        registry.insert(
            name,
            Registration {
                factory,
                lifetime,
                slot: Arc::new(Mutex::new(None)),
            },
        );
    }

    /// Resolve a service as `T`.
    pub fn resolve<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>, ServiceError> {
        self.resolve_any(name)?
            .downcast::<T>()
            .map_err(|_| ServiceError::TypeMismatch {
                service: name.to_string(),
                expected: type_name::<T>(),
            })
    }

    /// Resolve a service without committing to its type.
    pub fn resolve_any(&self, name: &str) -> Result<Instance, ServiceError> {
        self.check_cycles(name)?;
        self.resolve_inner(name)
    }

    /// Whether a service is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        lock(&self.registry).contains_key(name)
    }

    pub fn lifetime_of(&self, name: &str) -> Option<Lifetime> {
        lock(&self.registry).get(name).map(|r| r.lifetime)
    }

    /// Registered service names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.registry).keys().cloned().collect();
        names.sort();
        names
    }

    fn resolve_inner(&self, name: &str) -> Result<Instance, ServiceError> {
        let (factory, lifetime, slot) = {
            let registry = lock(&self.registry);
            let registration = registry
                .get(name)
                .ok_or_else(|| ServiceError::NotFound(name.to_string()))?;
            (
                registration.factory.clone(),
                registration.lifetime,
                Arc::clone(&registration.slot),
            )
        };

        match lifetime {
            Lifetime::Transient => self.create_instance(name, &factory),
            Lifetime::Singleton => {
                // Holding the slot while building is the single-flight guard.
                // Acyclic dependencies keep the lock order deadlock-free.
                let mut cached = lock(&slot);
                if let Some(instance) = cached.as_ref() {
                    return Ok(Arc::clone(instance));
                }
                let instance = self.create_instance(name, &factory)?;
                *cached = Some(Arc::clone(&instance));
                debug!(service = %name, "Singleton created");
                Ok(instance)
            }
        }
    }

    fn create_instance(&self, name: &str, factory: &ServiceFactory) -> Result<Instance, ServiceError> {
        let mut resolved = HashMap::new();
        for dependency in &factory.dependencies {
            match self.resolve_inner(&dependency.name) {
                Ok(instance) => {
                    resolved.insert(dependency.name.clone(), instance);
                }
                Err(ServiceError::NotFound(missing)) if missing == dependency.name => {
                    if dependency.required {
                        return Err(ServiceError::MissingDependency {
                            dependency: dependency.name.clone(),
                            service: name.to_string(),
                        });
                    }
                    debug!(service = %name, dependency = %dependency.name, "Optional dependency absent, using default");
                }
                Err(e) => return Err(e),
            }
        }

        (factory.construct)(&Dependencies {
            service: name.to_string(),
            resolved,
        })
    }

    fn check_cycles(&self, root: &str) -> Result<(), ServiceError> {
        let registry = lock(&self.registry);
        let mut path = Vec::new();
        let mut done = HashSet::new();
        visit(&registry, root, &mut path, &mut done)
    }
}

fn visit(
    registry: &HashMap<String, Registration>,
    name: &str,
    path: &mut Vec<String>,
    done: &mut HashSet<String>,
) -> Result<(), ServiceError> {
    if done.contains(name) {
        return Ok(());
    }
    if let Some(start) = path.iter().position(|n| n == name) {
        let mut chain = path[start..].to_vec();
        chain.push(name.to_string());
        return Err(ServiceError::CyclicDependency { chain });
    }
    // Unregistered names are reported by resolution itself.
    let Some(registration) = registry.get(name) else {
        return Ok(());
    };

    path.push(name.to_string());
    for dependency in &registration.factory.dependencies {
        visit(registry, &dependency.name, path, done)?;
    }
    path.pop();
    done.insert(name.to_string());
    Ok(())
}
