//! JSON cluster fixtures for `podgridd simulate`.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use podgrid_scheduler::MemoryClusterClient;
use podgrid_types::{
    KubeObject, Node, PersistentVolume, PersistentVolumeClaim, Pod, ReplicaSet, ReplicationController, Service,
};

/// Initial cluster contents; every list may be omitted.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterFixture {
    pub nodes: Vec<Node>,
    pub pods: Vec<Pod>,
    pub persistent_volumes: Vec<PersistentVolume>,
    pub persistent_volume_claims: Vec<PersistentVolumeClaim>,
    pub services: Vec<Service>,
    pub replication_controllers: Vec<ReplicationController>,
    pub replica_sets: Vec<ReplicaSet>,
}

impl ClusterFixture {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_json(&content).with_context(|| format!("invalid fixture {}", path.display()))
    }

    pub fn from_json(content: &str) -> anyhow::Result<Self> {
        let mut fixture: Self = serde_json::from_str(content)?;
        for pod in &mut fixture.pods {
            fill_uid(pod);
        }
        Ok(fixture)
    }

    /// Keys of pods that start without a node and belong to `scheduler_name`.
    pub fn pending_pods(&self, scheduler_name: &str) -> Vec<String> {
        self.pods
            .iter()
            .filter(|p| !p.is_assigned() && !p.is_terminated() && p.spec.scheduler_name == scheduler_name)
            .map(|p| p.key())
            .collect()
    }

    /// Write everything into `client`, support objects before pods.
    pub fn seed(&self, client: &MemoryClusterClient) {
        for pv in &self.persistent_volumes {
            client.apply(pv.clone());
        }
        for pvc in &self.persistent_volume_claims {
            client.apply(pvc.clone());
        }
        for svc in &self.services {
            client.apply(svc.clone());
        }
        for rc in &self.replication_controllers {
            client.apply(rc.clone());
        }
        for rs in &self.replica_sets {
            client.apply(rs.clone());
        }
        for node in &self.nodes {
            client.apply(node.clone());
        }
        for pod in &self.pods {
            client.apply(pod.clone());
        }
    }
}

fn fill_uid<T: KubeObject>(obj: &mut T) {
    if obj.meta().uid.is_empty() {
        let key = obj.key();
        obj.meta_mut().uid = key;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"{
        "nodes": [
            {
                "meta": { "name": "n1" },
                "status": {
                    "allocatable": { "milli_cpu": 4000, "memory": 8589934592, "pods": 110 },
                    "conditions": [ { "condition_type": "Ready", "status": "True" } ]
                }
            }
        ],
        "pods": [
            { "meta": { "namespace": "default", "name": "web" } },
            { "meta": { "namespace": "default", "name": "db" }, "spec": { "node_name": "n1" } },
            { "meta": { "namespace": "default", "name": "batch" }, "spec": { "scheduler_name": "other" } }
        ]
    }"#;

    #[test]
    fn parses_and_finds_pending_pods() {
        let fixture = ClusterFixture::from_json(FIXTURE).unwrap();
        assert_eq!(fixture.nodes.len(), 1);
        assert!(fixture.nodes[0].is_schedulable());
        assert_eq!(fixture.pods[0].meta.uid, "default/web");
        assert_eq!(fixture.pending_pods("default-scheduler"), vec!["default/web".to_string()]);
    }

    #[test]
    fn seeds_the_client() {
        let fixture = ClusterFixture::from_json(FIXTURE).unwrap();
        let client = MemoryClusterClient::new();
        fixture.seed(&client);
        assert_eq!(client.objects::<Pod>().len(), 3);
        assert!(client.object::<Node>("n1").is_some());
    }

    #[test]
    fn bundled_demo_parses() {
        let fixture = ClusterFixture::from_json(include_str!("../../../demos/cluster.json")).unwrap();
        assert_eq!(fixture.nodes.len(), 2);
        assert_eq!(fixture.nodes[0].status.allocatable.milli_cpu, 4000);
        assert_eq!(fixture.pending_pods("default-scheduler").len(), 3);
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(ClusterFixture::from_json("{ \"nodes\": 3 }").is_err());
    }
}
