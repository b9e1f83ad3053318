use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Clone, Debug, Default)]
pub struct ClustersResponse {
    #[serde(default)]
    pub clusters: Vec<Cluster>,
}

#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Cluster {
    pub id: String,
    pub name: String,
    pub cockroach_version: String,
    pub plan: String,
    pub cloud_provider: String,
    pub state: String,
    pub creator_id: String,
    pub long_running_operation_status: String,
    pub serverless: Option<ServerlessInfo>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerlessInfo {
    pub regions: Vec<String>,
    pub spend_limit: i64,
    pub tenant_name: String,
}

#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct ClusterDetails {
    pub cluster: Cluster,
    pub regions: Vec<Region>,
}

#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Region {
    pub name: String,
    pub sql_dns: String,
}

#[derive(Deserialize, Clone, Debug, Default)]
pub(super) struct SqlUsersResponse {
    #[serde(default)]
    pub users: Vec<UserName>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct UserName {
    pub name: String,
}

/// Body of the create-user call: `{"user": {"name": ...}, "password": ...}`
#[derive(Serialize, Debug)]
pub(super) struct CreateSqlUserRequest<'a> {
    pub user: UserName,
    pub password: &'a str,
}

/// A SQL user on a cloud cluster. The password is only known for users this
/// operator created itself.
#[derive(Clone, PartialEq, Eq)]
pub struct SqlUser {
    pub name: String,
    pub password: String,
}

impl fmt::Debug for SqlUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlUser")
            .field("name", &self.name)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl SqlUser {
    /// A fresh user named `sql_user_<unix nanos>` with a random password
    pub fn generate() -> Self {
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        SqlUser {
            name: format!("sql_user_{nanos}"),
            password: super::password::generate(),
        }
    }
}

pub const CLUSTER_CERTIFICATE_FILE_NAME: &str = "root.crt";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterCertificate {
    pub file_name: String,
    /// PEM encoded CA bundle
    pub data: String,
}
