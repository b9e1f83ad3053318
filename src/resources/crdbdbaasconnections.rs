use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::conditions::{Condition, ConnectionState};
use super::{LocalObjectReference, NamespacedName};

/// Generated name prefix of the Secret holding the SQL user and CA certificate
pub const CREDENTIALS_SECRET_PREFIX: &str = "crdb-cloud-user-credentials-";
/// Generated name prefix of the ConfigMap holding connection parameters
pub const CONNECTION_INFO_PREFIX: &str = "crdb-cloud-conn-cm-";

/// Requests credentials for one CockroachDB Cloud cluster listed by a CrdbDBaaSInventory
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    kind = "CrdbDBaaSConnection",
    group = "dbaas.redhat.com",
    version = "v1alpha1",
    namespaced,
    status = "CrdbDBaaSConnectionStatus",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"ReadyForBinding\")].status"}"#,
    printcolumn = r#"{"name":"Instance", "type":"string", "jsonPath":".spec.instanceID"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[kube(shortname = "crdbconn")]
#[serde(rename_all = "camelCase")]
pub struct CrdbDBaaSConnectionSpec {
    /// The inventory listing the instance. Defaults to the namespace of the connection.
    pub inventory_ref: NamespacedName,
    /// The ID of the cluster to connect to
    #[serde(rename = "instanceID")]
    pub instance_id: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CrdbDBaaSConnectionStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// The Secret holding `username`, `password` and the CA certificate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials_ref: Option<LocalObjectReference>,

    /// The ConfigMap holding host, port, database and connection options
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_info_ref: Option<LocalObjectReference>,

    /// Progress of an unfinished provisioning, cleared once the connection is ready
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provisioning: Option<ProvisioningCursor>,
}

/// Recorded before each remote side effect, so a retry can tell what a
/// previous attempt left behind
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningCursor {
    /// Hash of the inventory and instance the attempt targeted
    pub fingerprint: String,
    /// The cluster the SQL user was requested on
    #[serde(rename = "instanceID")]
    pub instance_id: String,
    /// The SQL user requested by the attempt
    pub sql_user: String,
    pub step: ProvisioningStep,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
pub enum ProvisioningStep {
    /// The SQL user may exist remotely, nothing was stored yet
    UserRequested,
    /// The credentials Secret was created
    CredentialsStored,
}

fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest[..5].iter().map(|b| format!("{b:02x}")).collect()
}

impl CrdbDBaaSConnection {
    /// The inventory reference, with the namespace filled in
    pub fn inventory_key(&self) -> (String, String) {
        let namespace = self
            .spec
            .inventory_ref
            .namespace
            .clone()
            .or_else(|| self.namespace())
            .unwrap_or_default();
        (namespace, self.spec.inventory_ref.name.clone())
    }

    /// Identifies what a provisioning attempt is for: which inventory, which instance
    pub fn fingerprint(&self) -> String {
        let (namespace, name) = self.inventory_key();
        let mut hasher = Sha256::new();
        for part in [namespace.as_str(), name.as_str(), self.spec.instance_id.as_str()] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    fn uid(&self) -> String {
        self.metadata.uid.clone().unwrap_or_else(|| self.name_any())
    }

    pub fn credentials_secret_name(&self) -> String {
        format!("{CREDENTIALS_SECRET_PREFIX}{}", short_hash(&self.uid()))
    }

    pub fn connection_info_name(&self) -> String {
        format!("{CONNECTION_INFO_PREFIX}{}", short_hash(&self.uid()))
    }

    pub fn state(&self) -> Option<ConnectionState> {
        self.status
            .as_ref()
            .and_then(|s| ConnectionState::from_conditions(&s.conditions))
    }

    pub fn cursor(&self) -> Option<&ProvisioningCursor> {
        self.status.as_ref().and_then(|s| s.provisioning.as_ref())
    }
}
