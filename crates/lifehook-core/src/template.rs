//! Template settings and the rendering engine shared by body and URL templates.
//!
//! Templates use Jinja syntax (`http://hooks.local/{{ label }}`) backed by
//! `minijinja`, with its builtin filters plus a couple of helpers for dates and
//! the process environment. References to undefined values are errors.

use std::path::{Component, Path, PathBuf};

use minijinja::syntax::SyntaxConfig;
use minijinja::{Environment, ErrorKind, UndefinedBehavior};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{merge_singular, ConfigError};
use crate::params::Params;

/// Body template used when neither `template` nor `template_file` is set.
pub const DEFAULT_BODY_TEMPLATE: &str =
    "{{ label }} ({{ id }}) {{ event }}{% if error %}: {{ error }}{% endif %}";

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("failed to parse template: {0}")]
    Parse(#[source] minijinja::Error),
    #[error("failed to execute template: {0}")]
    Exec(#[source] minijinja::Error),
}

impl TemplateError {
    pub fn phase(&self) -> &'static str {
        match self {
            Self::Parse(_) => "parse",
            Self::Exec(_) => "exec",
        }
    }
}

/// Custom delimiters. Unset pairs keep the Jinja defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delimiters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block: Option<[String; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable: Option<[String; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<[String; 2]>,
}

impl Delimiters {
    fn syntax(&self) -> Result<SyntaxConfig, minijinja::Error> {
        let [block_start, block_end] = self
            .block
            .clone()
            .unwrap_or_else(|| ["{%".into(), "%}".into()]);
        let [variable_start, variable_end] = self
            .variable
            .clone()
            .unwrap_or_else(|| ["{{".into(), "}}".into()]);
        let [comment_start, comment_end] = self
            .comment
            .clone()
            .unwrap_or_else(|| ["{#".into(), "#}".into()]);

        SyntaxConfig::builder()
            .block_delimiters(block_start, block_end)
            .variable_delimiters(variable_start, variable_end)
            .comment_delimiters(comment_start, comment_end)
            .build()
    }
}

/// Template settings of a hook declaration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateConfig {
    /// Inline body template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,

    /// Body template file, relative to the declaring config file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_file: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delimiters: Option<Delimiters>,
}

impl TemplateConfig {
    /// Anchors a relative `template_file` to `work_dir`. Idempotent.
    pub fn resolve_path(&mut self, work_dir: &Path) {
        if let Some(file) = &self.template_file {
            let anchored = if file.is_relative() {
                work_dir.join(file)
            } else {
                file.clone()
            };
            self.template_file = Some(normalize(&anchored));
        }
    }

    /// Absorbs `other`. Paths must already be resolved on both sides.
    pub fn merge_from(&mut self, other: TemplateConfig) -> Result<(), ConfigError> {
        merge_singular("template", &mut self.template, other.template)?;
        merge_singular("template_file", &mut self.template_file, other.template_file)?;
        merge_singular("delimiters", &mut self.delimiters, other.delimiters)?;
        Ok(())
    }

    pub fn build_engine(&self) -> Result<TemplateEngine, ConfigError> {
        let mut env = base_environment();
        if let Some(delimiters) = &self.delimiters {
            let syntax = delimiters
                .syntax()
                .map_err(|e| ConfigError::InvalidDelimiters(e.to_string()))?;
            env.set_syntax(syntax);
        }
        Ok(TemplateEngine { env })
    }

    /// Returns the body template source, reading `template_file` if configured.
    pub fn body_source(&self) -> Result<String, ConfigError> {
        match (&self.template, &self.template_file) {
            (Some(_), Some(_)) => Err(ConfigError::AmbiguousTemplate),
            (Some(inline), None) => Ok(inline.clone()),
            (None, Some(path)) => {
                std::fs::read_to_string(path).map_err(|source| ConfigError::TemplateFile {
                    path: path.clone(),
                    source,
                })
            }
            (None, None) => Ok(DEFAULT_BODY_TEMPLATE.to_string()),
        }
    }
}

/// Compiled template environment. Read-only once built.
#[derive(Debug)]
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self {
            env: base_environment(),
        }
    }
}

impl TemplateEngine {
    pub fn render(&self, source: &str, params: &Params) -> Result<String, TemplateError> {
        let tmpl = self
            .env
            .template_from_str(source)
            .map_err(TemplateError::Parse)?;
        tmpl.render(params).map_err(TemplateError::Exec)
    }
}

/// Lexically removes `.` and `..` so equal files compare equal across dirs.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn base_environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.add_function("now", now);
    env.add_function("env", env_var);
    env
}

/// `now()` or `now("%Y-%m-%d")`: current UTC time, RFC 3339 by default.
fn now(format: Option<String>) -> String {
    let now = chrono::Utc::now();
    match format {
        Some(format) => now.format(&format).to_string(),
        None => now.to_rfc3339(),
    }
}

/// `env("NAME")` or `env("NAME", "fallback")`.
fn env_var(name: String, default: Option<String>) -> Result<String, minijinja::Error> {
    match std::env::var(&name) {
        Ok(value) => Ok(value),
        Err(_) => default.ok_or_else(|| {
            minijinja::Error::new(
                ErrorKind::InvalidOperation,
                format!("environment variable {name} is not set"),
            )
        }),
    }
}
