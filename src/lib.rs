use std::time::Duration;

use thiserror::Error;

use crate::controllers::DEFAULT_RETRY_DELAY;

#[derive(Error, Debug)]
pub enum Error {
    #[error("SerializationError: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Kube Error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Failed to commit status: {0}")]
    StatusUpdate(kube::Error),

    #[error(transparent)]
    Cloud(#[from] cloud::Error),

    #[error("The CrdbDBaaSInventory {0} does not exist")]
    InventoryNotFound(String),

    #[error("The CrdbDBaaSInventory {0} is not yet in sync, or is invalid")]
    InventoryNotSynced(String),

    #[error("Instance with id {instance_id} not found in CrdbDBaaSInventory {inventory}")]
    InstanceNotFound {
        instance_id: String,
        inventory: String,
    },

    #[error("The Secret {0} does not exist")]
    SecretNotFound(String),

    #[error("The Secret {0} does not hold a complete API credential (orgId and apiKey)")]
    IncompleteCredential(String),

    #[error("Invalid resource: {0}")]
    InvalidResource(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// What the controller does with a failed reconcile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Swallow the error and try again after the given delay
    RequeueAfter(Duration),
    /// Swallow the error and try again straight away
    RequeueNow,
    /// Hand the error to the controller, which backs off through `error_policy`
    Surface,
}

impl Error {
    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::SerializationError(_) => "SerializationError",
            Error::KubeError(_) => "KubeError",
            Error::StatusUpdate(_) => "StatusUpdate",
            Error::Cloud(cloud::Error::Transport(_)) => "TransportError",
            Error::Cloud(cloud::Error::Api { .. }) => "APIError",
            Error::Cloud(cloud::Error::InvalidEndpoint(_)) => "InvalidEndpoint",
            Error::InventoryNotFound(_) => "InventoryNotFound",
            Error::InventoryNotSynced(_) => "InventoryNotSynced",
            Error::InstanceNotFound { .. } => "InstanceNotFound",
            Error::SecretNotFound(_) => "SecretNotFound",
            Error::IncompleteCredential(_) => "IncompleteCredential",
            Error::InvalidResource(_) => "InvalidResource",
        }
    }

    /// The single retry table for both reconcilers
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            Error::InventoryNotFound(_)
            | Error::SecretNotFound(_)
            | Error::IncompleteCredential(_)
            | Error::Cloud(_) => RetryPolicy::RequeueAfter(DEFAULT_RETRY_DELAY),
            Error::KubeError(err) if is_transient(err) => {
                RetryPolicy::RequeueAfter(DEFAULT_RETRY_DELAY)
            }
            Error::StatusUpdate(err) if is_transient(err) => RetryPolicy::RequeueNow,
            Error::KubeError(_)
            | Error::StatusUpdate(_)
            | Error::SerializationError(_)
            | Error::InventoryNotSynced(_)
            | Error::InstanceNotFound { .. }
            | Error::InvalidResource(_) => RetryPolicy::Surface,
        }
    }
}

/// Kubernetes failures worth a quiet retry; anything else (permissions, validation) is surfaced
fn is_transient(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(response) => {
            response.code >= 500 || response.code == 409 || response.code == 429
        }
        kube::Error::HyperError(_) | kube::Error::Service(_) => true,
        _ => false,
    }
}

/// Client, models and credential handling for the CockroachDB Cloud API
pub mod cloud;

pub mod controllers;

/// Log and trace integrations
pub mod telemetry;

/// Metrics
mod metrics;

pub use controllers::{run, State};
pub use metrics::Metrics;

/// CRDs owned by this operator
pub mod resources;

#[cfg(test)]
pub(crate) mod test_utils;
