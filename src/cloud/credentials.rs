use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use tokio::sync::Mutex;
use tracing::*;
use url::Url;

use super::ClusterServiceClient;
use crate::{Error, Result};

pub const ORG_ID_KEY: &str = "orgId";
pub const API_KEY_KEY: &str = "apiKey";

/// An organization scoped CockroachDB Cloud API key
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub org_id: String,
    pub api_key: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("org_id", &self.org_id)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Identity of a credentials Secret
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SecretKey {
    pub namespace: String,
    pub name: String,
}

impl SecretKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

fn field(secret: &Secret, key: &str) -> Option<String> {
    secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        // secrets very regularly have trailing newlines
        .map(|value| value.0.trim_ascii())
        .and_then(|bytes| String::from_utf8(bytes.to_vec()).ok())
        .filter(|value| !value.is_empty())
}

/// Reads the credential out of the referenced Secret. The Secret is read on
/// every call, so a rotated key is picked up on the next reconcile.
pub async fn resolve(client: &Client, key: &SecretKey) -> Result<Credential> {
    let secrets: Api<Secret> = Api::namespaced(client.clone(), &key.namespace);
    let secret = secrets
        .get_opt(&key.name)
        .await?
        .ok_or_else(|| Error::SecretNotFound(key.to_string()))?;

    match (field(&secret, ORG_ID_KEY), field(&secret, API_KEY_KEY)) {
        (Some(org_id), Some(api_key)) => Ok(Credential { org_id, api_key }),
        _ => Err(Error::IncompleteCredential(key.to_string())),
    }
}

/// Where and how the clients reach the API
#[derive(Clone, Debug)]
pub struct CloudSettings {
    pub endpoint: Url,
    pub timeout: Duration,
}

/// Clients for the CockroachDB Cloud API, one per credentials Secret.
///
/// Two resources that reference different Secrets never share a client, and
/// the lock makes sure only one client is ever built per Secret.
pub struct ClusterServiceClients {
    settings: CloudSettings,
    clients: Mutex<HashMap<SecretKey, Arc<ClusterServiceClient>>>,
}

impl ClusterServiceClients {
    pub fn new(settings: CloudSettings) -> Self {
        Self {
            settings,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves the credential held by `key` and returns the client for it,
    /// building it on first use and refreshing its credential otherwise.
    /// The client of a deleted Secret is dropped.
    pub async fn resolve(&self, client: &Client, key: &SecretKey) -> Result<Arc<ClusterServiceClient>> {
        // the Secret is read under the lock, so credentials are applied in the order they were read
        let mut clients = self.clients.lock().await;
        let credential = match resolve(client, key).await {
            Ok(credential) => credential,
            Err(err) => {
                if matches!(err, Error::SecretNotFound(_)) && clients.remove(key).is_some() {
                    debug!("Dropped CockroachDB Cloud client of deleted Secret {key}");
                }
                return Err(err);
            }
        };

        if let Some(existing) = clients.get(key) {
            if existing.credential().await != credential {
                debug!("Refreshing CockroachDB Cloud credential from Secret {key}");
                existing.set_credential(credential).await;
            }
            return Ok(existing.clone());
        }

        debug!("Creating CockroachDB Cloud client for Secret {key}");
        let created = Arc::new(ClusterServiceClient::new(
            self.settings.endpoint.clone(),
            self.settings.timeout,
            credential,
        )?);
        clients.insert(key.clone(), created.clone());
        Ok(created)
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }
}
