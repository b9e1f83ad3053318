use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};

use crate::controllers::owner_labels;
use crate::resources::crdbdbaasconnections::CrdbDBaaSConnection;
use crate::Error;

pub mod compensation;
pub mod connection_info;
pub mod credentials;

/// Controller reference back to the connection. It does not block deletion of the connection.
fn owner_reference(conn: &CrdbDBaaSConnection) -> Result<OwnerReference, Error> {
    let mut oref = conn.controller_owner_ref(&()).ok_or_else(|| {
        Error::InvalidResource(format!(
            "CrdbDBaaSConnection {} has no uid",
            conn.name_any()
        ))
    })?;
    oref.block_owner_deletion = Some(false);
    Ok(oref)
}

/// Metadata shared by every object generated for `conn`
pub fn object_meta(conn: &CrdbDBaaSConnection, name: String) -> Result<ObjectMeta, Error> {
    Ok(ObjectMeta {
        name: Some(name),
        namespace: conn.namespace(),
        labels: Some(owner_labels(conn)),
        owner_references: Some(vec![owner_reference(conn)?]),
        ..Default::default()
    })
}
