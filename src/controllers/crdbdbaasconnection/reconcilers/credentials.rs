use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::ResourceExt;
use serde_json::json;
use tracing::*;

use super::compensation::{Artifact, Compensation};
use super::object_meta;
use crate::cloud::models::{ClusterCertificate, SqlUser};
use crate::cloud::ClusterServiceClient;
use crate::controllers::crdbdbaasconnection::controller::Context;
use crate::resources::crdbdbaasconnections::{
    CrdbDBaaSConnection, ProvisioningCursor, ProvisioningStep,
};
use crate::Error;

pub const USERNAME_KEY: &str = "username";
pub const PASSWORD_KEY: &str = "password";
/// Records which cluster the SQL user in a credentials Secret lives on
pub const CLUSTER_ID_ANNOTATION: &str = "crdb.cockroachlabs.cloud/cluster-id";

pub fn secret(
    conn: &CrdbDBaaSConnection,
    user: &SqlUser,
    cert: &ClusterCertificate,
) -> Result<Secret, Error> {
    let mut metadata = object_meta(conn, conn.credentials_secret_name())?;
    metadata.annotations = Some(BTreeMap::from([(
        CLUSTER_ID_ANNOTATION.into(),
        conn.spec.instance_id.clone(),
    )]));

    Ok(Secret {
        metadata,
        type_: Some("Opaque".into()),
        data: Some(BTreeMap::from([
            (USERNAME_KEY.into(), ByteString(user.name.clone().into_bytes())),
            (PASSWORD_KEY.into(), ByteString(user.password.clone().into_bytes())),
            (cert.file_name.clone(), ByteString(cert.data.clone().into_bytes())),
        ])),
        ..Default::default()
    })
}

fn stored_user(secret: &Secret) -> Option<String> {
    secret
        .data
        .as_ref()
        .and_then(|data| data.get(USERNAME_KEY))
        .and_then(|name| String::from_utf8(name.0.clone()).ok())
}

/// Records the cursor in the connection status. Nothing remote may happen before this succeeds.
async fn commit_cursor(
    api: &Api<CrdbDBaaSConnection>,
    conn: &CrdbDBaaSConnection,
    cursor: &ProvisioningCursor,
) -> Result<(), Error> {
    debug!(
        "Recording provisioning step {:?} of CrdbDBaaSConnection {}",
        cursor.step,
        conn.name_any()
    );
    api.patch_status(
        &conn.name_any(),
        &PatchParams::default(),
        &Patch::Merge(json!({ "status": { "provisioning": cursor } })),
    )
    .await
    .map_err(Error::StatusUpdate)?;
    Ok(())
}

/// Makes sure a credentials Secret for a live SQL user exists, and returns its name.
///
/// If an earlier attempt already stored the user the cursor points at, the
/// user is adopted. Anything else left by an earlier attempt is removed and a
/// new user is created. `compensation` receives what this call created or
/// adopted, so a later failure can take it back.
pub async fn reconcile_credentials(
    ctx: &Context,
    namespace: &str,
    conn: &CrdbDBaaSConnection,
    api: &Api<CrdbDBaaSConnection>,
    cloud: &ClusterServiceClient,
    compensation: &mut Compensation,
) -> Result<String, Error> {
    let secret_api: Api<Secret> = Api::namespaced(ctx.client.clone(), namespace);
    let name = conn.credentials_secret_name();
    let fingerprint = conn.fingerprint();
    let cursor = conn.cursor();
    let existing = secret_api.get_opt(&name).await?;

    if let (Some(secret), Some(cursor)) = (&existing, cursor) {
        if cursor.fingerprint == fingerprint
            && stored_user(secret).as_deref() == Some(cursor.sql_user.as_str())
        {
            info!(
                "Adopting SQL user {} stored by an earlier attempt",
                cursor.sql_user
            );
            compensation.record(Artifact::SqlUser {
                cluster_id: cursor.instance_id.clone(),
                name: cursor.sql_user.clone(),
            });
            compensation.record(Artifact::Secret { name: name.clone() });
            return Ok(name);
        }
    }

    let mut leftovers = Compensation::new(namespace);
    if let Some(cursor) = cursor {
        leftovers.record(Artifact::SqlUser {
            cluster_id: cursor.instance_id.clone(),
            name: cursor.sql_user.clone(),
        });
    }
    if let Some(secret) = &existing {
        let cluster_id = secret.annotations().get(CLUSTER_ID_ANNOTATION).cloned();
        if let (Some(user), Some(cluster_id)) = (stored_user(secret), cluster_id) {
            if cursor.is_none_or(|c| c.sql_user != user) {
                leftovers.record(Artifact::SqlUser {
                    cluster_id,
                    name: user,
                });
            }
        }
        leftovers.record(Artifact::Secret { name: name.clone() });
    }
    if !leftovers.is_empty() {
        warn!("Removing what an unfinished attempt left behind before starting over");
        leftovers.unwind(&ctx.client, cloud).await;
    }

    let user = SqlUser::generate();
    let instance_id = conn.spec.instance_id.clone();
    let mut cursor = ProvisioningCursor {
        fingerprint,
        instance_id: instance_id.clone(),
        sql_user: user.name.clone(),
        step: ProvisioningStep::UserRequested,
    };
    commit_cursor(api, conn, &cursor).await?;

    info!("Creating SQL user {} on cluster {instance_id}", user.name);
    cloud.register_user(&instance_id, &user).await?;
    compensation.record(Artifact::SqlUser {
        cluster_id: instance_id.clone(),
        name: user.name.clone(),
    });

    debug!("Downloading CA certificate of cluster {instance_id}");
    let cert = match cloud.get_cluster_certificate(&instance_id).await {
        Ok(cert) => cert,
        Err(err) => {
            compensation.unwind(&ctx.client, cloud).await;
            return Err(err.into());
        }
    };

    debug!("Creating Secret {name} in namespace {namespace}");
    let created = match secret(conn, &user, &cert) {
        Ok(secret) => secret_api
            .create(&PostParams::default(), &secret)
            .await
            .map_err(Error::from),
        Err(err) => Err(err),
    };
    if let Err(err) = created {
        compensation.unwind(&ctx.client, cloud).await;
        return Err(err);
    }
    compensation.record(Artifact::Secret { name: name.clone() });

    cursor.step = ProvisioningStep::CredentialsStored;
    commit_cursor(api, conn, &cursor).await?;

    Ok(name)
}
