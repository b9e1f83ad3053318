use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;

use k8s_openapi::api::core::v1::{ConfigMap, Secret};

use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::client::Client;
use kube::runtime::controller::{self, Action};
use kube::runtime::events::Recorder;
use kube::runtime::watcher::Config;
use kube::{Resource, ResourceExt};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::*;

use crate::cloud::ClusterServiceClients;
use crate::controllers::{
    error_policy, publish_failure, requeue_for, Diagnostics, State, OPERATOR_NAME,
};
use crate::metrics::Metrics;
use crate::resources::conditions::{self, ConnectionState, NotReadyReason, NOT_READY};
use crate::resources::crdbdbaasconnections::CrdbDBaaSConnection;
use crate::resources::crdbdbaasinventories::CrdbDBaaSInventory;
use crate::telemetry;
use crate::{Error, Result};

use super::reconcilers::compensation::Compensation;
use super::reconcilers::{connection_info, credentials};

pub(super) struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Kubernetes event recorder
    pub recorder: Recorder,
    /// CockroachDB Cloud clients, one per credentials Secret
    pub clusters: Arc<ClusterServiceClients>,
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Prometheus metrics
    pub metrics: Metrics,
}

impl Context {
    pub fn new(client: Client, metrics: Metrics, state: State) -> Arc<Context> {
        Arc::new(Context {
            client: client.clone(),
            recorder: Recorder::new(client, OPERATOR_NAME.into()),
            clusters: state.clusters,
            diagnostics: state.diagnostics,
            metrics,
        })
    }
}

/// Which NotReady reason a failed attempt is reported under
fn not_ready_reason(err: &Error) -> NotReadyReason {
    match err {
        Error::InventoryNotFound(_)
        | Error::InventoryNotSynced(_)
        | Error::InstanceNotFound { .. } => NotReadyReason::InventoryNotReady,
        Error::SecretNotFound(_) | Error::IncompleteCredential(_) => {
            NotReadyReason::CredentialsUnavailable
        }
        Error::Cloud(_) => NotReadyReason::ProvisioningFailed,
        Error::KubeError(_)
        | Error::StatusUpdate(_)
        | Error::SerializationError(_)
        | Error::InvalidResource(_) => NotReadyReason::PersistenceFailed,
    }
}

#[instrument(skip(ctx, conn), fields(trace_id))]
async fn reconcile(conn: Arc<CrdbDBaaSConnection>, ctx: Arc<Context>) -> Result<Action> {
    if let Some(trace_id) = telemetry::get_trace_id() {
        Span::current().record("trace_id", field::display(&trace_id));
    }
    let _timer = ctx.metrics.count_and_measure::<CrdbDBaaSConnection>();
    ctx.diagnostics.write().await.last_event = Utc::now();

    let namespace = conn.namespace().ok_or_else(|| {
        Error::InvalidResource(format!("CrdbDBaaSConnection {} has no namespace", conn.name_any()))
    })?;
    let conn_api: Api<CrdbDBaaSConnection> = Api::namespaced(ctx.client.clone(), &namespace);

    // the watch cache can lag behind our own status writes
    let Some(conn) = conn_api.get_opt(&conn.name_any()).await? else {
        debug!("CrdbDBaaSConnection {} not found, may have been deleted", conn.name_any());
        return Ok(Action::await_change());
    };

    if conn.state().is_some_and(|s| s.is_terminal()) {
        debug!("CrdbDBaaSConnection {} is ready for binding", conn.name_any());
        return Ok(Action::await_change());
    }

    info!("Reconciling CrdbDBaaSConnection {}", conn.name_any());
    match conn.provision(&ctx, &namespace, &conn_api).await {
        Ok(()) => Ok(Action::await_change()),
        Err(err) => {
            warn!("reconcile failed: {:?}", err);

            // a failed status write will most likely fail again
            if !matches!(err, Error::StatusUpdate(_)) {
                if let Err(e) = conn.mark_not_ready(&conn_api, &err).await {
                    warn!("Failed to record NotReady condition: {e}");
                }
            }
            publish_failure(&ctx.recorder, &conn.object_ref(&()), &err).await;
            ctx.metrics.reconcile_failure(&conn, &err);

            requeue_for(err)
        }
    }
}

impl CrdbDBaaSConnection {
    async fn provision(
        &self,
        ctx: &Context,
        namespace: &str,
        conn_api: &Api<CrdbDBaaSConnection>,
    ) -> Result<()> {
        let (inv_namespace, inv_name) = self.inventory_key();
        let inventory_api: Api<CrdbDBaaSInventory> =
            Api::namespaced(ctx.client.clone(), &inv_namespace);
        let inventory = inventory_api
            .get_opt(&inv_name)
            .await?
            .ok_or_else(|| Error::InventoryNotFound(format!("{inv_namespace}/{inv_name}")))?;

        let instance = inventory.instance(&self.spec.instance_id)?;
        let cloud = ctx
            .clusters
            .resolve(&ctx.client, &inventory.credentials_key())
            .await?;

        let mut compensation = Compensation::new(namespace);
        let secret_name = credentials::reconcile_credentials(
            ctx,
            namespace,
            self,
            conn_api,
            &cloud,
            &mut compensation,
        )
        .await?;

        let cm_name =
            match connection_info::reconcile_connection_info(ctx, namespace, self, instance).await
            {
                Ok(name) => name,
                Err(err) => {
                    compensation.unwind(&ctx.client, &cloud).await;
                    return Err(err);
                }
            };

        self.finalize(conn_api, &secret_name, &cm_name).await
    }

    /// Commits the references and the ready condition in one write, and drops the cursor
    async fn finalize(
        &self,
        conn_api: &Api<CrdbDBaaSConnection>,
        secret_name: &str,
        cm_name: &str,
    ) -> Result<()> {
        let mut conditions = self
            .status
            .as_ref()
            .map(|s| s.conditions.clone())
            .unwrap_or_default();
        conditions::set(
            &mut conditions,
            ConnectionState::Ready.to_condition(),
            Utc::now(),
        );
        conditions::remove(&mut conditions, NOT_READY);

        let patch = json!({
            "status": {
                "conditions": conditions,
                "credentialsRef": { "name": secret_name },
                "connectionInfoRef": { "name": cm_name },
                "provisioning": null,
            }
        });
        conn_api
            .patch_status(&self.name_any(), &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(Error::StatusUpdate)?;

        info!("CrdbDBaaSConnection {} is ready for binding", self.name_any());
        Ok(())
    }

    async fn mark_not_ready(
        &self,
        conn_api: &Api<CrdbDBaaSConnection>,
        err: &Error,
    ) -> Result<(), kube::Error> {
        let state = ConnectionState::NotReady {
            reason: not_ready_reason(err),
            message: err.to_string(),
        };
        let mut conditions = self
            .status
            .as_ref()
            .map(|s| s.conditions.clone())
            .unwrap_or_default();
        conditions::set(&mut conditions, state.to_condition(), Utc::now());

        conn_api
            .patch_status(
                &self.name_any(),
                &PatchParams::default(),
                &Patch::Merge(json!({ "status": { "conditions": conditions } })),
            )
            .await?;
        Ok(())
    }
}

/// Run the CrdbDBaaSConnection controller
pub async fn run(client: Client, metrics: Metrics, state: State) {
    let connections: Api<CrdbDBaaSConnection> = Api::all(client.clone());
    let secrets: Api<Secret> = Api::all(client.clone());
    let config_maps: Api<ConfigMap> = Api::all(client.clone());

    if let Err(e) = connections.list(&ListParams::default().limit(1)).await {
        error!("CrdbDBaaSConnection is not queryable; {e:?}. Is the CRD installed?");
        std::process::exit(1);
    }

    // all resources we create have this label
    let cfg = Config::default().labels(&format!("managed-by={OPERATOR_NAME}"));

    controller::Controller::new(connections, Config::default())
        .shutdown_on_signal()
        .owns(secrets, cfg.clone())
        .owns(config_maps, cfg)
        .run(
            reconcile,
            error_policy,
            Context::new(client, metrics, state),
        )
        .filter_map(|x| async move { Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
}
