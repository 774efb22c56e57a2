//! Plugin catalog: the compile-time list of plugins the manager can find.

use std::any::type_name;
use std::sync::Arc;

use traymind_core::error::PluginError;
use traymind_core::plugin::{Plugin, PluginContext, PluginFactory, PluginMetadata};

type CreateFn = dyn Fn(&PluginContext) -> Result<Arc<dyn Plugin>, PluginError> + Send + Sync;

/// A factory for a plugin type whose metadata is known up front.
pub struct StaticFactory {
    metadata: PluginMetadata,
    source: &'static str,
    type_name: &'static str,
    create: Box<CreateFn>,
}

impl StaticFactory {
    pub fn new<P, F>(metadata: PluginMetadata, source: &'static str, create: F) -> Self
    where
        P: Plugin + 'static,
        F: Fn(&PluginContext) -> Result<P, PluginError> + Send + Sync + 'static,
    {
        Self {
            metadata,
            source,
            type_name: type_name::<P>(),
            create: Box::new(move |ctx: &PluginContext| create(ctx).map(|p| Arc::new(p) as Arc<dyn Plugin>)),
        }
    }
}

impl PluginFactory for StaticFactory {
    fn metadata(&self) -> Result<PluginMetadata, PluginError> {
        Ok(self.metadata.clone())
    }

    fn source(&self) -> &str {
        self.source
    }

    fn type_name(&self) -> &str {
        self.type_name
    }

    fn create(&self, ctx: &PluginContext) -> Result<Arc<dyn Plugin>, PluginError> {
        (self.create)(ctx)
    }
}

/// Ordered set of plugin factories. Earlier entries win on id clashes.
#[derive(Clone, Default)]
pub struct PluginCatalog {
    factories: Vec<Arc<dyn PluginFactory>>,
}

impl PluginCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, factory: Arc<dyn PluginFactory>) {
        self.factories.push(factory);
    }

    pub fn with(mut self, factory: impl PluginFactory + 'static) -> Self {
        self.register(Arc::new(factory));
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn PluginFactory>> {
        self.factories.iter()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl std::fmt::Debug for PluginCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.factories.iter().map(|factory| factory.source()))
            .finish()
    }
}
