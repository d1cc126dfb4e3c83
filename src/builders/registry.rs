//! Named factories for pluggable job components.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::JobConfig;
use crate::core::error::{AppResult, JobError};
use crate::core::executor::{BatchHook, UnitExecutor};
use crate::core::source::IdentifierSource;

/// Creates a component from the resolved job configuration.
pub type Factory<T> = Box<dyn Fn(&JobConfig) -> AppResult<T> + Send + Sync>;

/// Registry of identifier source factories.
pub type SourceRegistry = Registry<Box<dyn IdentifierSource>>;
/// Registry of unit executor factories.
pub type ExecutorRegistry = Registry<Arc<dyn UnitExecutor>>;
/// Registry of batch hook factories.
pub type HookRegistry = Registry<Arc<dyn BatchHook>>;

/// Factories of one component kind, looked up by case-insensitive name.
pub struct Registry<T> {
    kind: &'static str,
    factories: BTreeMap<String, Factory<T>>,
}

impl<T> std::fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("kind", &self.kind)
            .field("names", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<T> Registry<T> {
    /// Empty registry; `kind` names the component in error messages.
    #[must_use]
    pub const fn new(kind: &'static str) -> Self {
        Self {
            kind,
            factories: BTreeMap::new(),
        }
    }

    /// Register `factory` under `name`.
    ///
    /// # Errors
    ///
    /// `JobError::Configuration` for a blank or already registered name.
    pub fn register<F>(&mut self, name: &str, factory: F) -> Result<(), JobError>
    where
        F: Fn(&JobConfig) -> AppResult<T> + Send + Sync + 'static,
    {
        let key = name.trim().to_ascii_lowercase();
        if key.is_empty() {
            return Err(JobError::Configuration(format!("{} name must not be blank", self.kind)));
        }
        if self.factories.contains_key(&key) {
            return Err(JobError::Configuration(format!(
                "{} `{key}` is already registered",
                self.kind
            )));
        }
        self.factories.insert(key, Box::new(factory));
        Ok(())
    }

    /// Create the component registered under `name`.
    ///
    /// # Errors
    ///
    /// `JobError::Configuration` for an unknown name or a failing factory.
    pub fn create(&self, name: &str, config: &JobConfig) -> Result<T, JobError> {
        let key = name.trim().to_ascii_lowercase();
        let factory = self.factories.get(&key).ok_or_else(|| {
            JobError::Configuration(format!(
                "unknown {} `{key}` (registered: {})",
                self.kind,
                self.names().join(", ")
            ))
        })?;
        factory(config)
            .map_err(|e| JobError::Configuration(format!("cannot create {} `{key}`: {e:#}", self.kind)))
    }

    /// Whether `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(&name.trim().to_ascii_lowercase())
    }

    /// Registered names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_unique_and_case_insensitive() {
        let mut registry: Registry<usize> = Registry::new("widget");
        registry.register("Threads", |cfg| Ok(cfg.thread_count)).unwrap();

        assert!(registry.contains("THREADS"));
        assert!(matches!(
            registry.register("threads", |_| Ok(0)),
            Err(JobError::Configuration(_))
        ));
        assert!(matches!(registry.register("  ", |_| Ok(0)), Err(JobError::Configuration(_))));

        let config = JobConfig {
            thread_count: 7,
            ..JobConfig::default()
        };
        assert_eq!(registry.create("threads", &config).unwrap(), 7);
    }

    #[test]
    fn unknown_and_failing_factories_are_configuration_errors() {
        let mut registry: Registry<usize> = Registry::new("widget");
        registry
            .register("broken", |_| Err(anyhow::anyhow!("no backend")))
            .unwrap();

        let config = JobConfig::default();
        let err = registry.create("missing", &config).unwrap_err();
        assert!(err.to_string().contains("registered: broken"));
        let err = registry.create("broken", &config).unwrap_err();
        assert!(err.to_string().contains("no backend"));
    }
}
