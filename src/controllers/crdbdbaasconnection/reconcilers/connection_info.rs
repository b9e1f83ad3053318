use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, Patch, PatchParams};
use tracing::debug;

use super::object_meta;
use crate::cloud::models::CLUSTER_CERTIFICATE_FILE_NAME;
use crate::controllers::crdbdbaasconnection::controller::Context;
use crate::controllers::OPERATOR_NAME;
use crate::resources::crdbdbaasconnections::CrdbDBaaSConnection;
use crate::resources::crdbdbaasinventories::Instance;
use crate::Error;

pub const SQL_PORT: &str = "26257";
pub const DEFAULT_DATABASE: &str = "defaultdb";

/// Connection parameters for a client of `instance`
fn data(instance: &Instance) -> BTreeMap<String, String> {
    let info = |key: &str| instance.instance_info.get(key).cloned().unwrap_or_default();

    let options = format!(
        "sslmode=verify-full&sslrootcert=$HOME/.postgresql/{CLUSTER_CERTIFICATE_FILE_NAME}&options=--cluster={}",
        info("serverless.tenantName"),
    );

    BTreeMap::from([
        ("type".into(), "postgresql".into()),
        ("provider".into(), "CockroachDB Cloud".into()),
        ("host".into(), info("regions.1.sqlDns")),
        ("port".into(), SQL_PORT.into()),
        ("database".into(), DEFAULT_DATABASE.into()),
        ("options".into(), options),
    ])
}

pub fn config_map(conn: &CrdbDBaaSConnection, instance: &Instance) -> Result<ConfigMap, Error> {
    Ok(ConfigMap {
        metadata: object_meta(conn, conn.connection_info_name())?,
        data: Some(data(instance)),
        ..Default::default()
    })
}

/// Writes the ConfigMap with server-side apply, so rewriting it is harmless
pub async fn reconcile_connection_info(
    ctx: &Context,
    namespace: &str,
    conn: &CrdbDBaaSConnection,
    instance: &Instance,
) -> Result<String, Error> {
    let cm = config_map(conn, instance)?;
    let name = conn.connection_info_name();

    let cm_api: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), namespace);
    let params = PatchParams::apply(OPERATOR_NAME).force();
    debug!("Applying ConfigMap {name} in namespace {namespace}");
    cm_api.patch(&name, &params, &Patch::Apply(&cm)).await?;

    Ok(name)
}
