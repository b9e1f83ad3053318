use std::time::Duration;

use reqwest::{header, Method, StatusCode};
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;

use super::models::{
    Cluster, ClusterCertificate, ClusterDetails, ClustersResponse, CreateSqlUserRequest, SqlUser,
    SqlUsersResponse, UserName, CLUSTER_CERTIFICATE_FILE_NAME,
};
use super::{Credential, Error};

pub const DEFAULT_ENDPOINT: &str = "https://cockroachlabs.cloud";

/// Authenticated adapter over the CockroachDB Cloud REST API.
///
/// The credential can be swapped in place; every request reads the credential
/// once, when it is built.
pub struct ClusterServiceClient {
    http: reqwest::Client,
    endpoint: Url,
    credential: RwLock<Credential>,
}

impl ClusterServiceClient {
    pub fn new(endpoint: Url, timeout: Duration, credential: Credential) -> Result<Self, Error> {
        if endpoint.cannot_be_a_base() {
            return Err(Error::InvalidEndpoint(endpoint.to_string()));
        }

        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            endpoint,
            credential: RwLock::new(credential),
        })
    }

    pub async fn set_credential(&self, credential: Credential) {
        *self.credential.write().await = credential;
    }

    pub async fn credential(&self) -> Credential {
        self.credential.read().await.clone()
    }

    fn url(&self, segments: &[&str]) -> Result<Url, Error> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|()| Error::InvalidEndpoint(self.endpoint.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn clusters_url(&self, credential: &Credential, rest: &[&str]) -> Result<Url, Error> {
        let mut segments = vec!["api", "v1", "orgs", credential.org_id.as_str(), "clusters"];
        segments.extend_from_slice(rest);
        self.url(&segments)
    }

    fn request(&self, method: Method, url: Url, credential: &Credential) -> reqwest::RequestBuilder {
        debug!("{method} {url}");
        self.http
            .request(method, url)
            .header(header::ACCEPT, "application/json")
            .bearer_auth(&credential.api_key)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, Error> {
        let response = request.send().await?;
        if response.status() != StatusCode::OK {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api { status, body });
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, credential: &Credential) -> Result<T, Error> {
        let response = self
            .send(self.request(Method::GET, url, credential))
            .await?;
        Ok(response.json().await?)
    }

    /// Active clusters of the organization
    pub async fn list_clusters(&self) -> Result<Vec<Cluster>, Error> {
        let credential = self.credential().await;
        let mut url = self.clusters_url(&credential, &[])?;
        url.query_pairs_mut().append_pair("active", "true");

        let response: ClustersResponse = self.get_json(url, &credential).await?;
        Ok(response.clusters)
    }

    pub async fn get_cluster(&self, cluster_id: &str) -> Result<ClusterDetails, Error> {
        let credential = self.credential().await;
        let url = self.clusters_url(&credential, &[cluster_id])?;
        self.get_json(url, &credential).await
    }

    /// Names of the SQL users on a cluster; passwords are never returned by the API
    pub async fn list_users(&self, cluster_id: &str) -> Result<Vec<UserName>, Error> {
        let credential = self.credential().await;
        let url = self.clusters_url(&credential, &[cluster_id, "sql-users"])?;
        let response: SqlUsersResponse = self.get_json(url, &credential).await?;
        Ok(response.users)
    }

    /// Creates a freshly generated SQL user
    pub async fn create_user(&self, cluster_id: &str) -> Result<SqlUser, Error> {
        let user = SqlUser::generate();
        self.register_user(cluster_id, &user).await?;
        Ok(user)
    }

    /// Creates the given SQL user. The API echoes the user back; the echo is
    /// trusted and not compared.
    pub async fn register_user(&self, cluster_id: &str, user: &SqlUser) -> Result<(), Error> {
        let credential = self.credential().await;
        let url = self.clusters_url(&credential, &[cluster_id, "sql-users"])?;
        let body = CreateSqlUserRequest {
            user: UserName {
                name: user.name.clone(),
            },
            password: &user.password,
        };

        self.send(self.request(Method::POST, url, &credential).json(&body))
            .await?;
        Ok(())
    }

    pub async fn delete_user(&self, cluster_id: &str, user_name: &str) -> Result<(), Error> {
        let credential = self.credential().await;
        let url = self.clusters_url(&credential, &[cluster_id, "sql-users", user_name])?;
        self.send(self.request(Method::DELETE, url, &credential))
            .await?;
        Ok(())
    }

    pub async fn get_cluster_certificate(&self, cluster_id: &str) -> Result<ClusterCertificate, Error> {
        let credential = self.credential().await;
        let url = self.url(&["clusters", cluster_id, "cert"])?;
        let response = self
            .send(self.request(Method::GET, url, &credential))
            .await?;

        Ok(ClusterCertificate {
            file_name: CLUSTER_CERTIFICATE_FILE_NAME.into(),
            data: response.text().await?,
        })
    }
}
