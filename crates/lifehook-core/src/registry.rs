//! Explicit plugin registration and config-file loading.
//!
//! A config file is a TOML table whose top-level keys are plugin names. Each
//! value is one declaration table or an array of them:
//!
//! ```toml
//! [[http]]
//! url = "https://hooks.example.com/{{ label }}"
//! services = ["web"]
//!
//! [[http]]
//! url = "https://hooks.example.com/{{ label }}"
//! services = ["worker"]
//! ```
//!
//! All declarations of one plugin, across every loaded file, are merged in
//! load order and then prepared into a single hook. Each declaration repeats
//! the singular settings (`url`, `method`, `timeout`) of the first.

use std::any::Any;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::{ConfigError, HttpHookConfig};
use crate::hook::{HookSet, LifecycleHook};

/// A parsed but not yet prepared plugin declaration.
pub trait Declaration: Send {
    fn merge_from(&mut self, other: Box<dyn Declaration>) -> Result<(), ConfigError>;

    fn prepare(self: Box<Self>) -> Result<Arc<dyn LifecycleHook>, ConfigError>;

    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl Declaration for HttpHookConfig {
    fn merge_from(&mut self, other: Box<dyn Declaration>) -> Result<(), ConfigError> {
        let other = other
            .into_any()
            .downcast::<HttpHookConfig>()
            .map_err(|_| ConfigError::PluginMismatch(HTTP_PLUGIN.to_string()))?;
        HttpHookConfig::merge_from(self, *other)
    }

    fn prepare(self: Box<Self>) -> Result<Arc<dyn LifecycleHook>, ConfigError> {
        Ok(Arc::new(HttpHookConfig::prepare(*self)?))
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// Builds a declaration from the raw table found in `file`.
pub type DeclarationFactory = fn(file: &Path, raw: toml::Value) -> Result<Box<dyn Declaration>, ConfigError>;

pub const HTTP_PLUGIN: &str = "http";

fn http_declaration(file: &Path, raw: toml::Value) -> Result<Box<dyn Declaration>, ConfigError> {
    Ok(Box::new(HttpHookConfig::from_declaration(file, raw)?))
}

#[derive(Debug, Clone, Default)]
pub struct PluginRegistry {
    factories: BTreeMap<String, DeclarationFactory>,
}

impl PluginRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the plugins shipped in this crate.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(HTTP_PLUGIN, http_declaration);
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, factory: DeclarationFactory) -> &mut Self {
        self.factories.insert(name.into(), factory);
        self
    }

    pub fn plugins(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Parses every declaration in one file's contents.
    pub fn parse_file(
        &self,
        file: &Path,
        content: &str,
    ) -> Result<Vec<(String, Box<dyn Declaration>)>, ConfigError> {
        let table: toml::Table = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: file.to_path_buf(),
            message: e.to_string(),
        })?;

        let mut declarations = Vec::new();
        for (name, value) in table {
            let factory = self
                .factories
                .get(&name)
                .ok_or_else(|| ConfigError::UnknownPlugin(name.clone()))?;
            let raws = match value {
                toml::Value::Array(items) => items,
                single => vec![single],
            };
            for raw in raws {
                declarations.push((name.clone(), factory(file, raw)?));
            }
        }
        Ok(declarations)
    }

    /// Reads `files` in order, merges declarations per plugin and prepares them.
    pub fn load<P: AsRef<Path>>(&self, files: &[P]) -> Result<HookSet, ConfigError> {
        let mut merged: Vec<(String, Box<dyn Declaration>)> = Vec::new();

        for file in files {
            let file = file.as_ref();
            let content = std::fs::read_to_string(file).map_err(|source| ConfigError::Read {
                path: file.to_path_buf(),
                source,
            })?;

            for (name, declaration) in self.parse_file(file, &content)? {
                debug!(plugin = %name, file = %file.display(), "Found declaration");
                match merged.iter_mut().find(|(existing, _)| *existing == name) {
                    Some((_, existing)) => existing.merge_from(declaration)?,
                    None => merged.push((name, declaration)),
                }
            }
        }

        let mut hooks = HookSet::new();
        for (name, declaration) in merged {
            let hook = declaration.prepare()?;
            info!(plugin = %name, "Hook prepared");
            hooks.push(name, hook);
        }
        Ok(hooks)
    }
}
