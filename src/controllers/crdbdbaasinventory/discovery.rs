use std::collections::BTreeMap;

use tracing::debug;

use crate::cloud::models::{Cluster, Region};
use crate::cloud::{self, ClusterServiceClient};
use crate::resources::crdbdbaasinventories::Instance;

/// Flattens a cluster and its regions into an instance. Region keys are 1-indexed.
pub fn instance(cluster: &Cluster, regions: &[Region]) -> Instance {
    let mut info = BTreeMap::new();

    let tenant_name = cluster
        .serverless
        .as_ref()
        .map(|s| s.tenant_name.clone())
        .unwrap_or_default();
    info.insert("serverless.tenantName".to_string(), tenant_name);

    for (i, region) in regions.iter().enumerate() {
        let n = i + 1;
        info.insert(format!("regions.{n}.name"), region.name.clone());
        info.insert(format!("regions.{n}.sqlDns"), region.sql_dns.clone());
    }

    for (key, value) in [
        ("cockroachVersion", &cluster.cockroach_version),
        ("creatorId", &cluster.creator_id),
        ("cloudProvider", &cluster.cloud_provider),
        ("plan", &cluster.plan),
        ("state", &cluster.state),
        ("longRunningOperationStatus", &cluster.long_running_operation_status),
    ] {
        info.insert(key.to_string(), value.clone());
    }

    // both keys are always present, empty when the API left the timestamp out
    for (key, timestamp) in [("createAt", cluster.created_at), ("updateAt", cluster.updated_at)] {
        let value = timestamp.map(|t| t.to_rfc3339()).unwrap_or_default();
        info.insert(key.to_string(), value);
    }

    Instance {
        instance_id: cluster.id.clone(),
        name: cluster.name.clone(),
        instance_info: info,
    }
}

/// Lists the active clusters and fetches the regions of each. Any failure fails the whole discovery.
pub async fn discover(cloud: &ClusterServiceClient) -> Result<Vec<Instance>, cloud::Error> {
    let clusters = cloud.list_clusters().await?;
    debug!("Found {} clusters", clusters.len());

    let mut instances = Vec::with_capacity(clusters.len());
    for cluster in &clusters {
        let details = cloud.get_cluster(&cluster.id).await?;
        instances.push(instance(cluster, &details.regions));
    }
    Ok(instances)
}
