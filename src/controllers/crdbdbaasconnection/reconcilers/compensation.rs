use std::fmt;

use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, DeleteParams};
use kube::Client;
use tracing::*;

use crate::cloud::ClusterServiceClient;

/// Something a provisioning attempt created and may have to take back
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Artifact {
    SqlUser { cluster_id: String, name: String },
    Secret { name: String },
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Artifact::SqlUser { cluster_id, name } => {
                write!(f, "SQL user {name} on cluster {cluster_id}")
            }
            Artifact::Secret { name } => write!(f, "Secret {name}"),
        }
    }
}

/// The artifacts created so far, in creation order
pub struct Compensation {
    namespace: String,
    artifacts: Vec<Artifact>,
}

impl Compensation {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            artifacts: Vec::new(),
        }
    }

    pub fn record(&mut self, artifact: Artifact) {
        self.artifacts.push(artifact)
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// Removes every recorded artifact, newest first.
    ///
    /// An artifact that is already gone counts as removed. Failures are logged
    /// together once and never retried.
    pub async fn unwind(&mut self, client: &Client, cloud: &ClusterServiceClient) {
        let secrets: Api<Secret> = Api::namespaced(client.clone(), &self.namespace);
        let mut failures = Vec::new();

        while let Some(artifact) = self.artifacts.pop() {
            let result = match &artifact {
                Artifact::SqlUser { cluster_id, name } => {
                    match cloud.delete_user(cluster_id, name).await {
                        Err(e) if !e.is_not_found() => Err(e.to_string()),
                        _ => Ok(()),
                    }
                }
                Artifact::Secret { name } => {
                    match secrets.delete(name, &DeleteParams::default()).await {
                        Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
                        Err(e) => Err(e.to_string()),
                        Ok(_) => Ok(()),
                    }
                }
            };

            match result {
                Ok(()) => info!("Removed {artifact}"),
                Err(e) => failures.push(format!("{artifact}: {e}")),
            }
        }

        if !failures.is_empty() {
            warn!(?failures, "Failed to remove artifacts of an unfinished provisioning");
        }
    }
}
