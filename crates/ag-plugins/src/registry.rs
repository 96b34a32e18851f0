//! Name → factory map for pipeline stages.

use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

use ag_optimizer::{Configuration, SearchSpace};
use ag_types::{AgResult, PluginError};

use crate::plugin::{Plugin, PluginCategory};
use crate::{classifiers, preprocessing, regression, survival};

/// Builds a plugin from its (unprefixed) hyperparameter configuration.
pub type PluginFactory = fn(&Configuration) -> AgResult<Box<dyn Plugin>>;

/// Rebuilds a fitted plugin from the bytes its `save` produced.
pub type PluginLoader = fn(&[u8]) -> AgResult<Box<dyn Plugin>>;

/// Everything the registry knows about one plugin.
#[derive(Clone)]
pub struct PluginEntry {
    pub space: SearchSpace,
    pub factory: PluginFactory,
    pub loader: PluginLoader,
}

impl fmt::Debug for PluginEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginEntry").field("space", &self.space).finish_non_exhaustive()
    }
}

/// Plugin lookup by category and name.
#[derive(Debug, Clone, Default)]
pub struct PluginRegistry {
    entries: BTreeMap<(PluginCategory, String), PluginEntry>,
}

impl PluginRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in plugin.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        preprocessing::register(&mut registry);
        classifiers::register(&mut registry);
        regression::register(&mut registry);
        survival::register(&mut registry);
        registry
    }

    /// Add or replace a plugin.
    pub fn register(
        &mut self,
        category: PluginCategory,
        name: impl Into<String>,
        space: SearchSpace,
        factory: PluginFactory,
        loader: PluginLoader,
    ) -> &mut Self {
        let name = name.into();
        debug!(%category, %name, "registering plugin");
        self.entries.insert(
            (category, name),
            PluginEntry {
                space,
                factory,
                loader,
            },
        );
        self
    }

    pub fn contains(&self, category: PluginCategory, name: &str) -> bool {
        self.entries.contains_key(&(category, name.to_string()))
    }

    pub fn get(&self, category: PluginCategory, name: &str) -> AgResult<&PluginEntry> {
        self.entries
            .get(&(category, name.to_string()))
            .ok_or_else(|| {
                PluginError::NotFound {
                    category: category.to_string(),
                    name: name.to_string(),
                }
                .into()
            })
    }

    /// Names registered under `category`, sorted.
    pub fn list(&self, category: PluginCategory) -> Vec<&str> {
        self.entries
            .keys()
            .filter(|(c, _)| *c == category)
            .map(|(_, name)| name.as_str())
            .collect()
    }

    pub fn hyperparameter_space(&self, category: PluginCategory, name: &str) -> AgResult<SearchSpace> {
        Ok(self.get(category, name)?.space.clone())
    }

    /// Construct an unfitted plugin.
    pub fn create(
        &self,
        category: PluginCategory,
        name: &str,
        config: &Configuration,
    ) -> AgResult<Box<dyn Plugin>> {
        (self.get(category, name)?.factory)(config)
    }

    /// Restore a fitted plugin from saved bytes.
    pub fn load(&self, category: PluginCategory, name: &str, bytes: &[u8]) -> AgResult<Box<dyn Plugin>> {
        (self.get(category, name)?.loader)(bytes)
    }
}
