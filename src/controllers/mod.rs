use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::ObjectReference;
use kube::client::Client;
use kube::runtime::controller::Action;
use kube::runtime::events::{Event, EventType, Recorder};
use kube::{Resource, ResourceExt};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::*;

use crate::cloud::credentials::CloudSettings;
use crate::cloud::ClusterServiceClients;
use crate::metrics::Metrics;
use crate::{Error, Result, RetryPolicy};

pub mod crdbdbaasconnection;
pub mod crdbdbaasinventory;

/// Delay before retrying a reconcile that is waiting on something outside of our control
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Field manager and `managed-by` label value
pub const OPERATOR_NAME: &str = "crdb-dbaas-operator";

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
        }
    }
}

/// State shared between the controllers and the web server
#[derive(Clone)]
pub struct State {
    /// Diagnostics populated by the reconcilers
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Metrics registry
    pub registry: prometheus::Registry,
    /// CockroachDB Cloud clients, shared by both controllers
    clusters: Arc<ClusterServiceClients>,
    /// How often a synced inventory is refreshed from the cloud
    inventory_resync: Duration,
}

/// State wrapper around the controller outputs for the web server
impl State {
    pub fn new(settings: CloudSettings, inventory_resync: Duration) -> Self {
        Self {
            diagnostics: Arc::new(RwLock::new(Diagnostics::default())),
            registry: prometheus::Registry::default(),
            clusters: Arc::new(ClusterServiceClients::new(settings)),
            inventory_resync,
        }
    }

    /// Metrics getter
    pub fn metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }
}

/// Labels put on every object created on behalf of `owner`
pub fn owner_labels<K: Resource<DynamicType = ()>>(owner: &K) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("managed-by".into(), OPERATOR_NAME.into()),
        ("owner".into(), owner.name_any()),
        ("owner.kind".into(), K::kind(&()).into_owned()),
        ("owner.namespace".into(), owner.namespace().unwrap_or_default()),
    ])
}

/// Turns a failed reconcile into the action the retry table asks for
pub(crate) fn requeue_for(err: Error) -> Result<Action> {
    match err.retry_policy() {
        RetryPolicy::RequeueAfter(delay) => Ok(Action::requeue(delay)),
        RetryPolicy::RequeueNow => Ok(Action::requeue(Duration::ZERO)),
        RetryPolicy::Surface => Err(err),
    }
}

/// Backoff for errors surfaced to the controller
pub(crate) fn error_policy<K, C>(_obj: Arc<K>, _: &Error, _ctx: C) -> Action {
    Action::requeue(Duration::from_secs(30))
}

/// Publishes a Warning event about a failed reconcile. Best effort.
pub(crate) async fn publish_failure(recorder: &Recorder, reference: &ObjectReference, err: &Error) {
    let event = Event {
        type_: EventType::Warning,
        reason: "FailedReconcile".into(),
        note: Some(err.to_string()),
        action: "Reconcile".into(),
        secondary: None,
    };
    if let Err(e) = recorder.publish(&event, reference).await {
        warn!("Failed to publish event: {e}");
    }
}

/// Initialize both controllers and run them until shutdown (given the crds are installed)
pub async fn run(state: State) {
    let client = match Client::try_default().await {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to create kube Client: {e:?}");
            std::process::exit(1);
        }
    };

    let metrics = match Metrics::new().and_then(|m| m.register(&state.registry)) {
        Ok(metrics) => metrics,
        Err(e) => {
            error!("Failed to register metrics: {e:?}");
            std::process::exit(1);
        }
    };

    tokio::join!(
        crdbdbaasinventory::run(client.clone(), metrics.clone(), state.clone()),
        crdbdbaasconnection::run(client, metrics, state),
    );
}
