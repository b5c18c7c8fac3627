//! NamespaceClass controllers.
//!
//! Two independent kube-runtime controllers:
//! - Namespaces, also triggered by NamespaceClass changes through the fan-out
//!   mapper over the namespace cache;
//! - NamespaceClasses, for finalizer and deletion-policy handling.
//!
//! The reconcile functions take a name and re-read state from the [`Backend`],
//! so they can be driven directly in tests.

#![forbid(unsafe_code)]

pub mod backoff;
pub mod class;
mod error;
pub mod fanout;
pub mod metrics;
pub mod namespace;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Namespace;
use kube::{
    api::Api,
    runtime::{controller::{Action, Config as ControllerConfig}, watcher, Controller},
    Client, ResourceExt,
};
use nsclass_core::NamespaceClass;
use nsclass_kubehub::{Backend, EventKind, KubeBackend};
use tracing::{debug, info, warn};

pub use backoff::Backoff;
pub use class::{reconcile_class, ClassOutcome, ClassPhase};
pub use error::ReconcileError;
pub use namespace::{reconcile_namespace, NsOutcome};

/// Shared state for every reconcile call.
pub struct Context {
    pub backend: Arc<dyn Backend>,
    pub backoff: Backoff,
}

impl Context {
    pub fn new(backend: Arc<dyn Backend>, backoff: Backoff) -> Self {
        Self { backend, backoff }
    }

    /// Publish an event on a namespace. Failures are logged, never propagated.
    pub(crate) async fn event(&self, ns: &Namespace, kind: EventKind, reason: &str, note: String) {
        if let Err(e) = self.backend.publish_event(ns, kind, reason, note).await {
            warn!(error = %e, reason, "failed to publish event");
        }
    }
}

/// Runtime knobs for [`run`].
#[derive(Debug, Clone)]
pub struct Settings {
    pub namespace_concurrency: u16,
    pub class_concurrency: u16,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            namespace_concurrency: 10,
            class_concurrency: 2,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(300),
        }
    }
}

fn ns_key(name: &str) -> String { format!("ns/{}", name) }
fn class_key(name: &str) -> String { format!("class/{}", name) }

async fn on_namespace(ns: Arc<Namespace>, ctx: Arc<Context>) -> Result<Action, ReconcileError> {
    let name = ns.name_any();
    let outcome = reconcile_namespace(&ctx, &name).await?;
    ctx.backoff.reset(&ns_key(&name));
    debug!(namespace = %name, ?outcome, "namespace pass done");
    Ok(Action::await_change())
}

fn on_namespace_error(ns: Arc<Namespace>, err: &ReconcileError, ctx: Arc<Context>) -> Action {
    let name = ns.name_any();
    let delay = ctx.backoff.next(&ns_key(&name));
    warn!(namespace = %name, error = %err, phase = err.phase(), retryable = err.is_retryable(), ?delay, "namespace reconcile failed");
    Action::requeue(delay)
}

async fn on_class(class: Arc<NamespaceClass>, ctx: Arc<Context>) -> Result<Action, ReconcileError> {
    let name = class.name_any();
    let outcome = reconcile_class(&ctx, &name).await?;
    ctx.backoff.reset(&class_key(&name));
    debug!(class = %name, ?outcome, "class pass done");
    Ok(Action::await_change())
}

fn on_class_error(class: Arc<NamespaceClass>, err: &ReconcileError, ctx: Arc<Context>) -> Action {
    let name = class.name_any();
    let delay = ctx.backoff.next(&class_key(&name));
    warn!(class = %name, error = %err, phase = err.phase(), ?delay, "class reconcile failed");
    Action::requeue(delay)
}

/// Run both controllers until a shutdown signal arrives.
pub async fn run(client: Client, settings: Settings) {
    metrics::describe();
    let backend: Arc<dyn Backend> = Arc::new(KubeBackend::new(client.clone()));
    let ctx = Arc::new(Context::new(backend, Backoff::new(settings.backoff_base, settings.backoff_max)));

    let namespaces: Api<Namespace> = Api::all(client.clone());
    let classes: Api<NamespaceClass> = Api::all(client);

    let ns_controller = Controller::new(namespaces, watcher::Config::default());
    let cache = ns_controller.store();
    let ns_run = ns_controller
        .with_config(ControllerConfig::default().concurrency(settings.namespace_concurrency))
        .watches(classes.clone(), watcher::Config::default(), move |class: NamespaceClass| {
            fanout::namespaces_for_class(&class.name_any(), cache.state().iter().map(|ns| ns.as_ref()))
        })
        .shutdown_on_signal()
        .run(on_namespace, on_namespace_error, ctx.clone())
        .for_each(|res| async move {
            if let Err(e) = res {
                debug!(error = %e, "namespace controller event");
            }
        });

    let class_run = Controller::new(classes, watcher::Config::default())
        .with_config(ControllerConfig::default().concurrency(settings.class_concurrency))
        .shutdown_on_signal()
        .run(on_class, on_class_error, ctx)
        .for_each(|res| async move {
            if let Err(e) = res {
                debug!(error = %e, "class controller event");
            }
        });

    info!(
        namespace_concurrency = settings.namespace_concurrency,
        class_concurrency = settings.class_concurrency,
        "starting NamespaceClass controllers"
    );
    futures::join!(ns_run, class_run);
    info!("controllers stopped");
}
