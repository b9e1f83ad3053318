use std::fmt;

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const CONDITION_TRUE: &str = "True";
pub const CONDITION_FALSE: &str = "False";

/// Condition type set on a CrdbDBaaSInventory once its instances reflect the cloud
pub const SPEC_SYNCED: &str = "SpecSynced";
/// Terminal condition type of a CrdbDBaaSConnection
pub const READY_FOR_BINDING: &str = "ReadyForBinding";
/// Non-terminal condition type of a CrdbDBaaSConnection, overwritten on every failed attempt
pub const NOT_READY: &str = "NotReady";

/// A status condition, as found on most Kubernetes resources
#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Last time the condition transitioned from one status to another
    pub last_transition_time: Option<Time>,

    /// Human-readable message indicating details about last transition
    pub message: Option<String>,

    /// Reason for the condition's last transition
    pub reason: Option<String>,

    /// Status is the status of the condition (True, False, Unknown)
    pub status: String,

    /// Type of condition (ReadyForBinding, NotReady, SpecSynced)
    pub r#type: String,
}

impl Condition {
    pub fn is_true(&self) -> bool {
        self.status == CONDITION_TRUE
    }
}

pub fn find<'a>(conditions: &'a [Condition], r#type: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == r#type)
}

pub fn is_true(conditions: &[Condition], r#type: &str) -> bool {
    find(conditions, r#type).is_some_and(Condition::is_true)
}

/// Replaces the condition of the same type, keeping its transition time when the status did not change
pub fn set(conditions: &mut Vec<Condition>, mut condition: Condition, now: DateTime<Utc>) {
    let existing = conditions.iter().position(|c| c.r#type == condition.r#type);

    let last_transition_time = match existing.map(|i| &conditions[i]) {
        Some(existing) if existing.status == condition.status => existing
            .last_transition_time
            .clone()
            .unwrap_or(Time(now)),
        _ => Time(now),
    };
    condition.last_transition_time = Some(last_transition_time);

    match existing {
        Some(i) => conditions[i] = condition,
        None => conditions.push(condition),
    }
}

pub fn remove(conditions: &mut Vec<Condition>, r#type: &str) {
    conditions.retain(|c| c.r#type != r#type)
}

/// Why a CrdbDBaaSConnection is not ready yet
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotReadyReason {
    /// The inventory is missing, not yet synced, or does not list the instance
    InventoryNotReady,
    /// The API credential could not be read
    CredentialsUnavailable,
    /// A call to the CockroachDB Cloud API failed
    ProvisioningFailed,
    /// A Kubernetes object could not be written
    PersistenceFailed,
}

impl fmt::Display for NotReadyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NotReadyReason::InventoryNotReady => "InventoryNotReady",
            NotReadyReason::CredentialsUnavailable => "CredentialsUnavailable",
            NotReadyReason::ProvisioningFailed => "ProvisioningFailed",
            NotReadyReason::PersistenceFailed => "PersistenceFailed",
        })
    }
}

/// Where a CrdbDBaaSConnection stands. Only `Ready` is terminal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Ready,
    NotReady {
        reason: NotReadyReason,
        message: String,
    },
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Ready)
    }

    /// The state as the condition written to the resource
    pub fn to_condition(&self) -> Condition {
        match self {
            ConnectionState::Ready => Condition {
                r#type: READY_FOR_BINDING.into(),
                status: CONDITION_TRUE.into(),
                reason: Some("Ready".into()),
                message: Some("Connection is ready".into()),
                last_transition_time: None,
            },
            ConnectionState::NotReady { reason, message } => Condition {
                r#type: NOT_READY.into(),
                status: CONDITION_FALSE.into(),
                reason: Some(reason.to_string()),
                message: Some(message.clone()),
                last_transition_time: None,
            },
        }
    }

    /// Reads the state back from a list of conditions; `None` means provisioning never started
    pub fn from_conditions(conditions: &[Condition]) -> Option<ConnectionState> {
        if is_true(conditions, READY_FOR_BINDING) {
            return Some(ConnectionState::Ready);
        }
        let not_ready = find(conditions, NOT_READY)?;
        let reason = match not_ready.reason.as_deref() {
            Some("CredentialsUnavailable") => NotReadyReason::CredentialsUnavailable,
            Some("ProvisioningFailed") => NotReadyReason::ProvisioningFailed,
            Some("PersistenceFailed") => NotReadyReason::PersistenceFailed,
            _ => NotReadyReason::InventoryNotReady,
        };
        Some(ConnectionState::NotReady {
            reason,
            message: not_ready.message.clone().unwrap_or_default(),
        })
    }
}
