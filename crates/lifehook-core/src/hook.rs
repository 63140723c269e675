//! The boundary the supervisor calls into.

use std::collections::HashSet;
use std::error::Error as StdError;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use thiserror::Error;
use tracing::{debug, info_span, warn, Instrument, Span};

use crate::dispatch::{Delivery, DispatchError, Dispatcher};
use crate::event::{InstanceId, LifecycleEvent};
use crate::params::ParamBuilder;
use crate::template::TemplateError;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to render body: {0}")]
    Body(#[from] TemplateError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl NotifyError {
    pub fn phase(&self) -> &'static str {
        match self {
            Self::Body(_) => "render_body",
            Self::Dispatch(e) => e.phase(),
        }
    }
}

/// Listener for service lifecycle transitions.
///
/// Implementations must never fail the caller: a broken hook only logs.
#[async_trait]
pub trait LifecycleHook: Send + Sync {
    /// One-line, human-readable summary of what the hook does.
    fn describe(&self) -> String;

    async fn spawned(&self, instance: &InstanceId, label: &str);

    async fn stopped(
        &self,
        instance: &InstanceId,
        label: &str,
        failure: Option<&(dyn StdError + Send + Sync)>,
    );
}

/// Webhook hook built from a merged [`HttpHookConfig`](crate::HttpHookConfig).
#[derive(Debug)]
pub struct HttpHook {
    services: HashSet<String>,
    params: ParamBuilder,
    dispatcher: Dispatcher,
    span: Span,
}

impl HttpHook {
    pub(crate) fn new(
        services: HashSet<String>,
        params: ParamBuilder,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            services,
            params,
            dispatcher,
            span: info_span!("hook", plugin = "http"),
        }
    }

    pub fn listens_to(&self, label: &str) -> bool {
        self.services.contains(label)
    }

    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.services.iter().map(String::as_str)
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Returns `Ok(None)` when the event's label is not subscribed.
    pub async fn notify(&self, event: &LifecycleEvent) -> Result<Option<Delivery>, NotifyError> {
        if !self.listens_to(&event.label) {
            return Ok(None);
        }
        let notification = self.params.build(event)?;
        debug!(body = %notification.body, "Rendered notification");
        let delivery = self
            .dispatcher
            .dispatch(&notification.body, &notification.params)
            .await?;
        Ok(Some(delivery))
    }

    async fn handle(&self, event: LifecycleEvent) {
        let span = self.span.clone();
        async {
            match self.notify(&event).await {
                Ok(Some(delivery)) => debug!(
                    event = %event.kind,
                    label = %event.label,
                    status = delivery.status.as_u16(),
                    "Webhook delivered"
                ),
                Ok(None) => {}
                Err(e) => warn!(
                    event = %event.kind,
                    label = %event.label,
                    instance = %event.instance,
                    phase = e.phase(),
                    error = %e,
                    "Webhook notification dropped"
                ),
            }
        }
        .instrument(span)
        .await
    }
}

#[async_trait]
impl LifecycleHook for HttpHook {
    fn describe(&self) -> String {
        let mut services: Vec<&str> = self.services().collect();
        services.sort_unstable();
        format!(
            "{} {} for [{}], timeout {}ms",
            self.dispatcher.method(),
            self.dispatcher.url_template(),
            services.join(", "),
            self.dispatcher.timeout().as_millis()
        )
    }

    async fn spawned(&self, instance: &InstanceId, label: &str) {
        self.handle(LifecycleEvent::spawned(instance.clone(), label))
            .await
    }

    async fn stopped(
        &self,
        instance: &InstanceId,
        label: &str,
        failure: Option<&(dyn StdError + Send + Sync)>,
    ) {
        self.handle(LifecycleEvent::stopped(instance.clone(), label, failure))
            .await
    }
}

/// Every hook loaded from configuration, keyed by plugin name.
#[derive(Default, Clone)]
pub struct HookSet {
    hooks: Vec<(String, Arc<dyn LifecycleHook>)>,
}

impl HookSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, hook: Arc<dyn LifecycleHook>) {
        self.hooks.push((name.into(), hook));
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.hooks.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn LifecycleHook>)> {
        self.hooks.iter().map(|(name, hook)| (name.as_str(), hook))
    }

    /// Notifies every hook concurrently and waits for all of them.
    pub async fn spawned(&self, instance: &InstanceId, label: &str) {
        join_all(
            self.hooks
                .iter()
                .map(|(_, hook)| hook.spawned(instance, label)),
        )
        .await;
    }

    pub async fn stopped(
        &self,
        instance: &InstanceId,
        label: &str,
        failure: Option<&(dyn StdError + Send + Sync)>,
    ) {
        join_all(
            self.hooks
                .iter()
                .map(|(_, hook)| hook.stopped(instance, label, failure)),
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpHookConfig;
    use std::time::Duration;
    use wiremock::matchers::{any, body_string, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, thiserror::Error)]
    #[error("killed by signal 9")]
    struct Killed;

    fn hook(url: String, services: &[&str]) -> HttpHook {
        HttpHookConfig {
            url,
            services: services.iter().map(|s| s.to_string()).collect(),
            timeout: Duration::from_secs(5),
            ..Default::default()
        }
        .prepare()
        .unwrap()
    }

    #[tokio::test]
    async fn subscribed_label_sends_exactly_one_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/web"))
            .respond_with(ResponseTemplate::new(200))
            .with_priority(1)
            .expect(1)
            .mount(&server)
            .await;
        // Anything else, `/db` included, must not arrive.
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let hook = hook(format!("{}/{{{{ label }}}}", server.uri()), &["web"]);
        hook.spawned(&InstanceId::new("web-1"), "web").await;
        hook.spawned(&InstanceId::new("db-1"), "db").await;
    }

    #[tokio::test]
    async fn unsubscribed_label_is_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let hook = hook(server.uri(), &["web"]);
        assert_eq!(
            hook.describe(),
            format!("POST {} for [web], timeout 5000ms", server.uri())
        );
        let event = LifecycleEvent::spawned(InstanceId::new("db-1"), "db");
        assert!(hook.notify(&event).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_services_listens_to_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let hook = hook(server.uri(), &[]);
        hook.spawned(&InstanceId::new("web-1"), "web").await;
        hook.stopped(&InstanceId::new("web-1"), "web", None).await;
    }

    #[tokio::test]
    async fn failed_stop_body_includes_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string("web (web-1) stopped: killed by signal 9"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let hook = hook(server.uri(), &["web"]);
        hook.stopped(&InstanceId::new("web-1"), "web", Some(&Killed))
            .await;
    }

    #[tokio::test]
    async fn body_render_failure_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let mut config = HttpHookConfig {
            url: server.uri(),
            services: vec!["web".into()],
            ..Default::default()
        };
        config.templating.template = Some("{{ nonexistent }}".into());
        let hook = config.prepare().unwrap();

        let event = LifecycleEvent::spawned(InstanceId::new("web-1"), "web");
        let err = hook.notify(&event).await.unwrap_err();
        assert!(matches!(err, NotifyError::Body(_)), "{err}");
        assert_eq!(err.phase(), "render_body");
    }

    #[tokio::test]
    async fn timeout_is_contained() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let hook = HttpHookConfig {
            url: server.uri(),
            services: vec!["web".into()],
            timeout: Duration::from_millis(150),
            ..Default::default()
        }
        .prepare()
        .unwrap();

        let event = LifecycleEvent::spawned(InstanceId::new("web-1"), "web");
        let err = hook.notify(&event).await.unwrap_err();
        assert!(
            matches!(err, NotifyError::Dispatch(DispatchError::Timeout { .. })),
            "{err}"
        );

        // Through the supervisor-facing method it only logs.
        hook.spawned(&InstanceId::new("web-1"), "web").await;
    }

    #[tokio::test]
    async fn hook_set_fans_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&server)
            .await;

        let mut set = HookSet::new();
        set.push("http", Arc::new(hook(format!("{}/a", server.uri()), &["web"])));
        set.push("http", Arc::new(hook(format!("{}/b", server.uri()), &["web", "db"])));
        assert_eq!(set.len(), 2);

        set.spawned(&InstanceId::new("web-1"), "web").await;
    }
}
