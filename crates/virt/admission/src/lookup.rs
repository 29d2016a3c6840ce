//! Collaborators for reading cluster state
//!
//! Admission never owns the backing store. Policies that need to look at
//! other resources go through [`ResourceLookup`]; the cluster configuration
//! comes from a [`ConfigSource`]. Both are shared across requests.
//!
//! [`InMemoryLookup`] keeps everything in process and is what the daemon
//! ships by default. Not suitable for production use.

use crate::error::{LookupError, LookupResult};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::RwLock;
use virt_types::{ClusterConfig, VirtualMachineInstance, VirtualMachineInstanceMigration};

/// Read access to other resources, plus the one patch admission may issue
#[async_trait]
pub trait ResourceLookup: Send + Sync + Debug {
    /// Point lookup of an instance
    async fn get_vmi(&self, namespace: &str, name: &str) -> LookupResult<VirtualMachineInstance>;

    /// Migrations that target the named instance
    async fn list_migrations(
        &self,
        namespace: &str,
        vmi_name: &str,
    ) -> LookupResult<Vec<VirtualMachineInstanceMigration>>;

    /// Instance hosted by a launcher pod, if the pod hosts one
    async fn vmi_for_pod(&self, namespace: &str, pod: &str) -> LookupResult<Option<VirtualMachineInstance>>;

    /// Mark an instance for evacuation from `node`
    async fn patch_evacuation(&self, namespace: &str, name: &str, node: &str) -> LookupResult<()>;
}

/// Source of cluster configuration snapshots
pub trait ConfigSource: Send + Sync + Debug {
    /// Current snapshot; callers hold it for one request
    fn get_config(&self) -> Arc<ClusterConfig>;
}

/// Config source that never changes
#[derive(Debug, Clone, Default)]
pub struct StaticConfigSource {
    config: Arc<ClusterConfig>,
}

impl StaticConfigSource {
    pub fn new(config: ClusterConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl ConfigSource for StaticConfigSource {
    fn get_config(&self) -> Arc<ClusterConfig> {
        Arc::clone(&self.config)
    }
}

/// Evacuation patch recorded by [`InMemoryLookup`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvacuationPatch {
    pub namespace: String,
    pub name: String,
    pub node: String,
}

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

/// In-memory resource store
#[derive(Debug, Default)]
pub struct InMemoryLookup {
    /// Instances indexed by namespace and name
    vmis: RwLock<HashMap<Key, VirtualMachineInstance>>,

    /// Migrations indexed by namespace and name
    migrations: RwLock<HashMap<Key, VirtualMachineInstanceMigration>>,

    /// Launcher pod to instance name
    pods: RwLock<HashMap<Key, String>>,

    /// Evacuation patches applied so far
    patches: RwLock<Vec<EvacuationPatch>>,

    /// Error returned by every call while set
    failure: RwLock<Option<LookupError>>,
}

impl InMemoryLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an instance, replacing any with the same name
    pub async fn insert_vmi(&self, vmi: VirtualMachineInstance) {
        let k = key(&vmi.metadata.namespace, &vmi.metadata.name);
        self.vmis.write().await.insert(k, vmi);
    }

    /// Store a migration, replacing any with the same name
    pub async fn insert_migration(&self, migration: VirtualMachineInstanceMigration) {
        let k = key(&migration.metadata.namespace, &migration.metadata.name);
        self.migrations.write().await.insert(k, migration);
    }

    /// Record that `pod` hosts the named instance
    pub async fn insert_pod(&self, namespace: &str, pod: &str, vmi_name: &str) {
        self.pods
            .write()
            .await
            .insert(key(namespace, pod), vmi_name.to_string());
    }

    /// Make every call fail with `error` until cleared
    pub async fn fail_with(&self, error: Option<LookupError>) {
        *self.failure.write().await = error;
    }

    /// Evacuation patches applied so far
    pub async fn patches(&self) -> Vec<EvacuationPatch> {
        self.patches.read().await.clone()
    }

    /// Get the total number of stored instances
    pub async fn vmi_count(&self) -> usize {
        self.vmis.read().await.len()
    }

    async fn check_failure(&self) -> LookupResult<()> {
        match self.failure.read().await.as_ref() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ResourceLookup for InMemoryLookup {
    async fn get_vmi(&self, namespace: &str, name: &str) -> LookupResult<VirtualMachineInstance> {
        self.check_failure().await?;
        self.vmis
            .read()
            .await
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| LookupError::NotFound {
                kind: "VirtualMachineInstance".to_string(),
                name: format!("{namespace}/{name}"),
            })
    }

    async fn list_migrations(
        &self,
        namespace: &str,
        vmi_name: &str,
    ) -> LookupResult<Vec<VirtualMachineInstanceMigration>> {
        self.check_failure().await?;
        let mut found: Vec<_> = self
            .migrations
            .read()
            .await
            .values()
            .filter(|m| m.metadata.namespace == namespace && m.spec.vmi_name == vmi_name)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        Ok(found)
    }

    async fn vmi_for_pod(&self, namespace: &str, pod: &str) -> LookupResult<Option<VirtualMachineInstance>> {
        self.check_failure().await?;
        let Some(vmi_name) = self.pods.read().await.get(&key(namespace, pod)).cloned() else {
            return Ok(None);
        };
        Ok(self.vmis.read().await.get(&key(namespace, &vmi_name)).cloned())
    }

    async fn patch_evacuation(&self, namespace: &str, name: &str, node: &str) -> LookupResult<()> {
        self.check_failure().await?;
        let mut vmis = self.vmis.write().await;
        let vmi = vmis
            .get_mut(&key(namespace, name))
            .ok_or_else(|| LookupError::NotFound {
                kind: "VirtualMachineInstance".to_string(),
                name: format!("{namespace}/{name}"),
            })?;
        vmi.status.evacuation_node_name = Some(node.to_string());

        self.patches.write().await.push(EvacuationPatch {
            namespace: namespace.to_string(),
            name: name.to_string(),
            node: node.to_string(),
        });
        Ok(())
    }
}
