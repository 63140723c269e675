#![forbid(unsafe_code)]

pub mod config;
pub mod dispatch;
pub mod event;
pub mod hook;
pub mod params;
pub mod registry;
pub mod template;

pub use config::{ConfigError, HttpHookConfig, DEFAULT_METHOD, DEFAULT_TIMEOUT};
pub use dispatch::{Delivery, DispatchError, Dispatcher};
pub use event::{EventKind, InstanceId, LifecycleEvent};
pub use hook::{HookSet, HttpHook, LifecycleHook, NotifyError};
pub use params::{Notification, ParamBuilder, Params};
pub use registry::{Declaration, DeclarationFactory, PluginRegistry, HTTP_PLUGIN};
pub use template::{Delimiters, TemplateConfig, TemplateEngine, TemplateError};
