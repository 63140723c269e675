//! Turns a lifecycle event into template parameters and a rendered body.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::event::LifecycleEvent;
use crate::template::{TemplateEngine, TemplateError};

/// Values visible to body and URL templates.
pub type Params = Map<String, Value>;

/// Rendered body plus the parameters it was rendered from.
#[derive(Debug, Clone)]
pub struct Notification {
    pub body: String,
    pub params: Params,
}

#[derive(Debug)]
pub struct ParamBuilder {
    engine: Arc<TemplateEngine>,
    body_template: String,
}

impl ParamBuilder {
    pub fn new(engine: Arc<TemplateEngine>, body_template: impl Into<String>) -> Self {
        Self {
            engine,
            body_template: body_template.into(),
        }
    }

    /// Parameters exposed to templates:
    ///
    /// | key         | value                                          |
    /// |-------------|------------------------------------------------|
    /// | `event`     | `"spawned"` or `"stopped"`                     |
    /// | `id`        | instance identifier                            |
    /// | `label`     | service label                                  |
    /// | `error`     | failure message, `none` unless a stop failed   |
    /// | `timestamp` | event time, RFC 3339 UTC                       |
    pub fn params(event: &LifecycleEvent) -> Params {
        let mut params = Params::new();
        params.insert("event".into(), Value::from(event.kind.as_str()));
        params.insert("id".into(), Value::from(event.instance.as_str()));
        params.insert("label".into(), Value::from(event.label.as_str()));
        params.insert(
            "error".into(),
            event
                .failure
                .as_deref()
                .map(Value::from)
                .unwrap_or(Value::Null),
        );
        params.insert("timestamp".into(), Value::from(event.timestamp.to_rfc3339()));
        params
    }

    pub fn build(&self, event: &LifecycleEvent) -> Result<Notification, TemplateError> {
        let params = Self::params(event);
        let body = self.engine.render(&self.body_template, &params)?;
        Ok(Notification { body, params })
    }
}
