use std::collections::BTreeMap;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::conditions::{self, Condition, SPEC_SYNCED};
use super::NamespacedName;
use crate::cloud::SecretKey;
use crate::Error;

/// Represents the CockroachDB Cloud organization whose clusters can be bound to
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    kind = "CrdbDBaaSInventory",
    group = "dbaas.redhat.com",
    version = "v1alpha1",
    namespaced,
    status = "CrdbDBaaSInventoryStatus",
    printcolumn = r#"{"name":"Synced", "type":"string", "jsonPath":".status.conditions[?(@.type==\"SpecSynced\")].status"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[kube(shortname = "crdbinv")]
#[serde(rename_all = "camelCase")]
pub struct CrdbDBaaSInventorySpec {
    /// The Secret holding the `orgId` and `apiKey` used to talk to CockroachDB Cloud.
    /// Defaults to the namespace of the inventory.
    pub credentials_ref: NamespacedName,
}

/// Status of the CrdbDBaaSInventory. Replaced as a whole on every successful sync.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CrdbDBaaSInventoryStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// The clusters of the organization, as last seen
    #[serde(default)]
    pub instances: Vec<Instance>,
}

/// A CockroachDB Cloud cluster that connections can be made to
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    /// The cluster ID
    #[serde(rename = "instanceID")]
    pub instance_id: String,
    /// The cluster name
    pub name: String,
    /// Flattened cluster details: regions, SQL endpoints, version, plan and state
    #[serde(default)]
    pub instance_info: BTreeMap<String, String>,
}

impl CrdbDBaaSInventory {
    pub fn credentials_key(&self) -> SecretKey {
        let namespace = self
            .spec
            .credentials_ref
            .namespace
            .clone()
            .or_else(|| self.namespace())
            .unwrap_or_default();
        SecretKey::new(namespace, self.spec.credentials_ref.name.clone())
    }

    /// Looks up an instance of a synced inventory. A synced inventory that
    /// does not list the instance yields a different error than one that has
    /// not synced.
    pub fn instance(&self, instance_id: &str) -> Result<&Instance, Error> {
        let inventory = format!(
            "{}/{}",
            self.namespace().unwrap_or_default(),
            self.name_any()
        );
        let status = self
            .status
            .as_ref()
            .filter(|s| conditions::is_true(&s.conditions, SPEC_SYNCED))
            .ok_or_else(|| Error::InventoryNotSynced(inventory.clone()))?;

        status
            .instances
            .iter()
            .find(|i| i.instance_id == instance_id)
            .ok_or(Error::InstanceNotFound {
                instance_id: instance_id.into(),
                inventory,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::conditions::CONDITION_TRUE;

    fn inventory(status: Option<CrdbDBaaSInventoryStatus>) -> CrdbDBaaSInventory {
        let mut inventory = CrdbDBaaSInventory::new(
            "inv",
            CrdbDBaaSInventorySpec {
                credentials_ref: NamespacedName {
                    name: "creds".into(),
                    namespace: None,
                },
            },
        );
        inventory.metadata.namespace = Some("tenant".into());
        inventory.status = status;
        inventory
    }

    fn synced(instances: Vec<Instance>) -> CrdbDBaaSInventoryStatus {
        CrdbDBaaSInventoryStatus {
            conditions: vec![Condition {
                r#type: SPEC_SYNCED.into(),
                status: CONDITION_TRUE.into(),
                ..Default::default()
            }],
            instances,
        }
    }

    #[test]
    fn test_credentials_default_to_inventory_namespace() {
        let mut inv = inventory(None);
        assert_eq!(inv.credentials_key(), SecretKey::new("tenant", "creds"));

        inv.spec.credentials_ref.namespace = Some("shared".into());
        assert_eq!(inv.credentials_key(), SecretKey::new("shared", "creds"));
    }

    #[test]
    fn test_instance_lookup_distinguishes_unsynced_from_missing() {
        assert!(matches!(
            inventory(None).instance("c1"),
            Err(Error::InventoryNotSynced(_))
        ));

        let inv = inventory(Some(synced(vec![Instance {
            instance_id: "c1".into(),
            name: "one".into(),
            ..Default::default()
        }])));
        assert_eq!(inv.instance("c1").unwrap().name, "one");
        assert!(matches!(
            inv.instance("c2"),
            Err(Error::InstanceNotFound { ref instance_id, .. }) if instance_id == "c2"
        ));
    }

    #[test]
    fn test_instance_serializes_with_upper_case_id() {
        let value = serde_json::to_value(Instance {
            instance_id: "c1".into(),
            name: "one".into(),
            instance_info: [("plan".to_string(), "SERVERLESS".to_string())].into(),
        })
        .unwrap();
        assert_eq!(
            value,
            serde_json::json!({"instanceID": "c1", "name": "one", "instanceInfo": {"plan": "SERVERLESS"}})
        );
    }

    #[test]
    fn test_crd_definition() {
        use assert_json_diff::assert_json_include;
        use kube::CustomResourceExt;

        let crd = serde_json::to_value(CrdbDBaaSInventory::crd()).unwrap();
        assert_json_include!(
            actual: crd,
            expected: serde_json::json!({
                "metadata": { "name": "crdbdbaasinventories.dbaas.redhat.com" },
                "spec": {
                    "group": "dbaas.redhat.com",
                    "scope": "Namespaced",
                    "names": { "kind": "CrdbDBaaSInventory", "shortNames": ["crdbinv"] },
                }
            })
        );
    }
}
