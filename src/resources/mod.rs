use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub mod conditions;
pub mod crdbdbaasconnections;
pub mod crdbdbaasinventories;

/// A reference to an object by name, optionally in another namespace
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
pub struct NamespacedName {
    pub name: String,
    /// Defaults to the namespace of the referencing object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// A reference to an object in the same namespace
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
pub struct LocalObjectReference {
    pub name: String,
}
