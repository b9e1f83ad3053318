use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;

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
use crate::resources::conditions::{self, Condition, CONDITION_TRUE, SPEC_SYNCED};
use crate::resources::crdbdbaasinventories::{CrdbDBaaSInventory, CrdbDBaaSInventoryStatus};
use crate::telemetry;
use crate::{Error, Result};

use super::discovery;

pub(super) struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Kubernetes event recorder
    pub recorder: Recorder,
    /// CockroachDB Cloud clients, one per credentials Secret
    pub clusters: Arc<ClusterServiceClients>,
    /// Delay between two syncs of the same inventory
    pub resync: Duration,
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
            resync: state.inventory_resync,
            diagnostics: state.diagnostics,
            metrics,
        })
    }
}

#[instrument(skip(ctx, inv), fields(trace_id))]
async fn reconcile(inv: Arc<CrdbDBaaSInventory>, ctx: Arc<Context>) -> Result<Action> {
    if let Some(trace_id) = telemetry::get_trace_id() {
        Span::current().record("trace_id", field::display(&trace_id));
    }
    let _timer = ctx.metrics.count_and_measure::<CrdbDBaaSInventory>();
    ctx.diagnostics.write().await.last_event = Utc::now();

    let namespace = inv.namespace().ok_or_else(|| {
        Error::InvalidResource(format!("CrdbDBaaSInventory {} has no namespace", inv.name_any()))
    })?;
    let inv_api: Api<CrdbDBaaSInventory> = Api::namespaced(ctx.client.clone(), &namespace);

    let Some(inv) = inv_api.get_opt(&inv.name_any()).await? else {
        // deleted since the request was queued
        debug!("CrdbDBaaSInventory {} not found, may have been deleted", inv.name_any());
        return Ok(Action::await_change());
    };

    info!("Reconciling CrdbDBaaSInventory {}", inv.name_any());
    match inv.sync(&ctx, &inv_api).await {
        Ok(action) => Ok(action),
        Err(err) => {
            warn!("reconcile failed: {:?}", err);

            publish_failure(&ctx.recorder, &inv.object_ref(&()), &err).await;
            ctx.metrics.reconcile_failure(&inv, &err);

            requeue_for(err)
        }
    }
}

impl CrdbDBaaSInventory {
    /// Replaces the instances in the status with what the cloud reports now.
    /// The status is left untouched if anything fails.
    async fn sync(&self, ctx: &Context, inv_api: &Api<CrdbDBaaSInventory>) -> Result<Action> {
        let cloud = ctx
            .clusters
            .resolve(&ctx.client, &self.credentials_key())
            .await?;

        info!("Discovering clusters from CockroachDB Cloud");
        let instances = discovery::discover(&cloud).await?;

        let mut conditions = self
            .status
            .as_ref()
            .map(|s| s.conditions.clone())
            .unwrap_or_default();
        conditions::set(
            &mut conditions,
            Condition {
                r#type: SPEC_SYNCED.into(),
                status: CONDITION_TRUE.into(),
                reason: Some("SyncOK".into()),
                message: Some("Cluster details in sync".into()),
                last_transition_time: None,
            },
            Utc::now(),
        );

        let status = CrdbDBaaSInventoryStatus {
            conditions,
            instances,
        };
        debug!(
            "Updating status of CrdbDBaaSInventory {} with {} instances",
            self.name_any(),
            status.instances.len()
        );
        inv_api
            .patch_status(
                &self.name_any(),
                &PatchParams::default(),
                &Patch::Merge(json!({ "status": status })),
            )
            .await
            .map_err(Error::StatusUpdate)?;
        ctx.metrics.inventory_synced(self, status.instances.len());

        Ok(Action::requeue(ctx.resync))
    }
}

/// Run the CrdbDBaaSInventory controller
pub async fn run(client: Client, metrics: Metrics, state: State) {
    let inventories: Api<CrdbDBaaSInventory> = Api::all(client.clone());

    if let Err(e) = inventories.list(&ListParams::default().limit(1)).await {
        error!("CrdbDBaaSInventory is not queryable; {e:?}. Is the CRD installed?");
        std::process::exit(1);
    }

    controller::Controller::new(inventories, Config::default())
        .shutdown_on_signal()
        .run(
            reconcile,
            error_policy,
            Context::new(client, metrics, state),
        )
        .filter_map(|x| async move { Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
}

#[cfg(test)]
mod tests {
    use http::Method;
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::ByteString;
    use kube::api::ObjectMeta;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::cloud::credentials::CloudSettings;
    use crate::controllers::DEFAULT_RETRY_DELAY;
    use crate::resources::crdbdbaasinventories::{CrdbDBaaSInventorySpec, Instance};
    use crate::resources::NamespacedName;
    use crate::test_utils::FakeKube;

    const RESYNC: Duration = Duration::from_secs(300);

    fn context(fake: &FakeKube, server: &MockServer) -> Arc<Context> {
        let state = State::new(
            CloudSettings {
                endpoint: server.uri().parse().unwrap(),
                timeout: Duration::from_secs(5),
            },
            RESYNC,
        );
        Context::new(fake.client(), Metrics::new().unwrap(), state)
    }

    fn seed(fake: &FakeKube, status: Option<CrdbDBaaSInventoryStatus>) -> CrdbDBaaSInventory {
        fake.seed(&Secret {
            metadata: ObjectMeta {
                name: Some("creds".into()),
                namespace: Some("tenant".into()),
                ..Default::default()
            },
            data: Some(
                [
                    ("orgId".to_string(), ByteString(b"org-1".to_vec())),
                    ("apiKey".to_string(), ByteString(b"key-1".to_vec())),
                ]
                .into(),
            ),
            ..Default::default()
        });

        let mut inv = CrdbDBaaSInventory::new(
            "inv",
            CrdbDBaaSInventorySpec {
                credentials_ref: NamespacedName {
                    name: "creds".into(),
                    namespace: None,
                },
            },
        );
        inv.metadata.namespace = Some("tenant".into());
        inv.status = status;
        fake.seed(&inv);
        inv
    }

    async fn mount_cluster(server: &MockServer, id: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/api/v1/orgs/org-1/clusters/{id}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "cluster": {"id": id, "name": format!("name-{id}"), "serverless": {"tenantName": format!("tenant-{id}")}},
                "regions": [{"name": "us-east1", "sqlDns": format!("{id}.cockroachlabs.cloud")}]
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_sync_publishes_every_cluster() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/orgs/org-1/clusters"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "clusters": [{"id": "c1", "name": "name-c1"}, {"id": "c2", "name": "name-c2"}]
            })))
            .mount(&server)
            .await;
        mount_cluster(&server, "c1").await;
        mount_cluster(&server, "c2").await;
        let fake = FakeKube::new();
        let inv = seed(&fake, None);

        let action = reconcile(Arc::new(inv), context(&fake, &server))
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(RESYNC));

        let status = fake
            .get::<CrdbDBaaSInventory>("tenant", "inv")
            .unwrap()
            .status
            .unwrap();
        let ids: Vec<_> = status.instances.iter().map(|i| i.instance_id.as_str()).collect();
        assert_eq!(ids, ["c1", "c2"]);
        assert_eq!(
            status.instances[1].instance_info["regions.1.sqlDns"],
            "c2.cockroachlabs.cloud"
        );
        assert!(conditions::is_true(&status.conditions, SPEC_SYNCED));
        assert_eq!(status.conditions[0].reason.as_deref(), Some("SyncOK"));
    }

    #[tokio::test]
    async fn test_vanished_clusters_are_dropped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/orgs/org-1/clusters"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"clusters": [{"id": "c2"}]})),
            )
            .mount(&server)
            .await;
        mount_cluster(&server, "c2").await;
        let fake = FakeKube::new();
        let stale = Instance {
            instance_id: "c1".into(),
            name: "gone".into(),
            ..Default::default()
        };
        let inv = seed(
            &fake,
            Some(CrdbDBaaSInventoryStatus {
                conditions: vec![],
                instances: vec![stale],
            }),
        );

        reconcile(Arc::new(inv), context(&fake, &server))
            .await
            .unwrap();

        let status = fake
            .get::<CrdbDBaaSInventory>("tenant", "inv")
            .unwrap()
            .status
            .unwrap();
        assert_eq!(status.instances.len(), 1);
        assert_eq!(status.instances[0].instance_id, "c2");
    }

    #[tokio::test]
    async fn test_api_failure_leaves_status_alone() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/orgs/org-1/clusters"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"clusters": [{"id": "c1"}]})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/orgs/org-1/clusters/c1"))
            .respond_with(ResponseTemplate::new(500).set_body_string("oops"))
            .mount(&server)
            .await;
        let fake = FakeKube::new();
        let inv = seed(&fake, None);

        let action = reconcile(Arc::new(inv), context(&fake, &server))
            .await
            .unwrap();

        assert_eq!(action, Action::requeue(DEFAULT_RETRY_DELAY));
        assert_eq!(fake.count(Method::PATCH, "/status"), 0);
        assert!(fake
            .get::<CrdbDBaaSInventory>("tenant", "inv")
            .unwrap()
            .status
            .is_none());
    }

    #[tokio::test]
    async fn test_missing_credentials_retry_after_delay() {
        let server = MockServer::start().await;
        let fake = FakeKube::new();
        let mut inv = seed(&fake, None);
        inv.spec.credentials_ref.name = "missing".into();
        fake.seed(&inv);

        let action = reconcile(Arc::new(inv), context(&fake, &server))
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(DEFAULT_RETRY_DELAY));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deleted_inventory_is_ignored() {
        let server = MockServer::start().await;
        let fake = FakeKube::new();
        let mut inv = CrdbDBaaSInventory::new(
            "inv",
            CrdbDBaaSInventorySpec {
                credentials_ref: NamespacedName::default(),
            },
        );
        inv.metadata.namespace = Some("tenant".into());

        let action = reconcile(Arc::new(inv), context(&fake, &server))
            .await
            .unwrap();
        assert_eq!(action, Action::await_change());
    }
}
