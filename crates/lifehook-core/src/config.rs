//! Declarations of the `http` hook and the rules for merging them.
//!
//! Example declaration (a TOML table under the `http` key):
//!
//! ```toml
//! [http]
//! url = "https://hooks.example.com/{{ label }}/{{ event }}"
//! method = "PUT"
//! services = ["web", "worker"]
//! timeout = "5s"
//! template_file = "templates/body.j2"
//!
//! [http.headers]
//! Authorization = "Bearer abc"
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dispatch::Dispatcher;
use crate::hook::HttpHook;
use crate::params::ParamBuilder;
use crate::template::TemplateConfig;

pub const DEFAULT_METHOD: &str = "POST";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("conflicting values for `{field}` across declarations")]
    Conflicting { field: &'static str },
    #[error("`url` is required")]
    MissingUrl,
    #[error("unknown plugin `{0}`")]
    UnknownPlugin(String),
    #[error("declarations of `{0}` have different types")]
    PluginMismatch(String),
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },
    #[error("failed to read template file {}: {source}", path.display())]
    TemplateFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("`template` and `template_file` are mutually exclusive")]
    AmbiguousTemplate,
    #[error("invalid template delimiters: {0}")]
    InvalidDelimiters(String),
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// Adopts `source` when `target` is unset, then requires both to agree.
///
/// A value set on the target and left unset on the source is a conflict:
/// every declaration after the first must repeat the singular fields.
pub(crate) fn merge_singular<T>(
    field: &'static str,
    target: &mut T,
    source: T,
) -> Result<(), ConfigError>
where
    T: Default + PartialEq,
{
    if *target == T::default() {
        *target = source;
        return Ok(());
    }
    if *target != source {
        return Err(ConfigError::Conflicting { field });
    }
    Ok(())
}

/// One declaration of the `http` hook.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpHookConfig {
    /// Destination URL template.
    #[serde(default)]
    pub url: String,

    /// HTTP method (default: POST).
    #[serde(default)]
    pub method: String,

    /// Static headers, sent as-is.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Labels of the services to notify about. Empty matches nothing.
    #[serde(default)]
    pub services: Vec<String>,

    /// Bound on one send, e.g. `"5s"` (default: 20s).
    #[serde(default, with = "humantime_serde")]
    pub timeout: Duration,

    #[serde(flatten)]
    pub templating: TemplateConfig,

    /// Directory of the declaring file; anchors relative template paths.
    #[serde(skip)]
    pub work_dir: PathBuf,
}

impl HttpHookConfig {
    /// Parses one declaration found in `file`.
    pub fn from_declaration(file: &Path, raw: toml::Value) -> Result<Self, ConfigError> {
        let mut config: HttpHookConfig =
            raw.try_into().map_err(|e: toml::de::Error| ConfigError::Parse {
                path: file.to_path_buf(),
                message: e.to_string(),
            })?;
        config.work_dir = file.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(config)
    }

    /// Absorbs a sibling declaration.
    ///
    /// `url`, `method` and `timeout` are adopted from `other` when unset here
    /// and must otherwise be identical on both sides. Headers are overwritten by `other` on key collision, and services are
    /// appended.
    pub fn merge_from(&mut self, mut other: HttpHookConfig) -> Result<(), ConfigError> {
        merge_singular("url", &mut self.url, other.url)?;
        merge_singular("method", &mut self.method, other.method)?;
        merge_singular("timeout", &mut self.timeout, other.timeout)?;

        self.templating.resolve_path(&self.work_dir);
        other.templating.resolve_path(&other.work_dir);
        self.templating.merge_from(other.templating)?;

        self.headers.extend(other.headers);
        self.services.append(&mut other.services);
        Ok(())
    }

    /// Applies defaults and builds the immutable hook.
    pub fn prepare(mut self) -> Result<HttpHook, ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::MissingUrl);
        }
        if self.method.is_empty() {
            self.method = DEFAULT_METHOD.to_string();
        }
        if self.timeout.is_zero() {
            self.timeout = DEFAULT_TIMEOUT;
        }
        self.templating.resolve_path(&self.work_dir);

        let services: HashSet<String> = self.services.into_iter().collect();
        let engine = Arc::new(self.templating.build_engine()?);
        let body_template = self.templating.body_source()?;

        let dispatcher = Dispatcher::new(
            Arc::clone(&engine),
            self.url,
            self.method,
            self.headers,
            self.timeout,
        )?;

        Ok(HttpHook::new(
            services,
            ParamBuilder::new(engine, body_template),
            dispatcher,
        ))
    }
}
