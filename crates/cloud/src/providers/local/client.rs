//! Local provider implementation.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::info;

use super::store::LocalState;
use crate::providers::traits::{
    CloudProvider, CloudProviderError, CreateInstanceRequest, FirewallRule, Instance,
    InstanceStatus,
};

/// Provider that stores instances in a JSON file.
pub struct LocalProvider {
    /// State file location.
    path: PathBuf,
    /// Serializes read-modify-write cycles on the state file.
    lock: Mutex<()>,
}

impl LocalProvider {
    /// Create a provider backed by `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// State file location.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Run `f` against the loaded state and persist the result.
    fn with_state<T>(
        &self,
        f: impl FnOnce(&mut LocalState) -> Result<T, CloudProviderError>,
    ) -> Result<T, CloudProviderError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| CloudProviderError::State("state lock poisoned".to_string()))?;

        let mut state =
            LocalState::load(&self.path).map_err(|e| CloudProviderError::State(format!("{e:#}")))?;
        let result = f(&mut state)?;
        state
            .save(&self.path)
            .map_err(|e| CloudProviderError::State(format!("{e:#}")))?;
        Ok(result)
    }

    /// Read the state without writing it back.
    fn read_state(&self) -> Result<LocalState, CloudProviderError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| CloudProviderError::State("state lock poisoned".to_string()))?;

        LocalState::load(&self.path).map_err(|e| CloudProviderError::State(format!("{e:#}")))
    }
}

#[async_trait]
impl CloudProvider for LocalProvider {
    async fn create_instance(
        &self,
        req: CreateInstanceRequest,
    ) -> Result<Instance, CloudProviderError> {
        self.with_state(|state| {
            let mut tags: BTreeMap<String, String> = req.tags.clone();
            tags.insert("Name".to_string(), req.name.clone());

            let instance = Instance {
                id: format!("local-{}", uuid::Uuid::new_v4().simple()),
                name: req.name.clone(),
                status: InstanceStatus::Running,
                instance_type: req.instance_type.clone(),
                region: req.region.clone(),
                public_ip: Some("127.0.0.1".to_string()),
                private_ip: Some("127.0.0.1".to_string()),
                image: req.image.clone(),
                root_volume_gib: Some(req.root_volume.size_gib),
                firewall_rules: req.firewall_rules.clone(),
                tags,
                created_at: Some(chrono::Utc::now()),
            };

            info!(instance_id = %instance.id, name = %instance.name, "Local instance created");
            state.instances.push(instance.clone());
            Ok(instance)
        })
    }

    async fn get_instance(&self, id: &str) -> Result<Instance, CloudProviderError> {
        self.read_state()?
            .instances
            .into_iter()
            .find(|i| i.id == id)
            .ok_or_else(|| CloudProviderError::NotFound(format!("Instance not found: {id}")))
    }

    async fn find_instance(&self, name: &str) -> Result<Option<Instance>, CloudProviderError> {
        Ok(self.read_state()?.instances.into_iter().find(|i| {
            i.name == name
                && !matches!(
                    i.status,
                    InstanceStatus::Terminated | InstanceStatus::Terminating
                )
        }))
    }

    async fn wait_instance_ready(
        &self,
        id: &str,
        _timeout_secs: u64,
    ) -> Result<Instance, CloudProviderError> {
        let instance = self.get_instance(id).await?;
        if instance.status == InstanceStatus::Terminated {
            return Err(CloudProviderError::Api {
                status: 500,
                message: "Instance was terminated".to_string(),
            });
        }
        Ok(instance)
    }

    async fn replace_firewall_rules(
        &self,
        id: &str,
        rules: Vec<FirewallRule>,
    ) -> Result<(), CloudProviderError> {
        self.with_state(|state| {
            let instance = state
                .instances
                .iter_mut()
                .find(|i| i.id == id)
                .ok_or_else(|| CloudProviderError::NotFound(format!("Instance not found: {id}")))?;

            info!(instance_id = %id, rule_count = rules.len(), "Local firewall rules replaced");
            instance.firewall_rules = rules;
            Ok(())
        })
    }

    async fn terminate_instance(&self, id: &str) -> Result<(), CloudProviderError> {
        self.with_state(|state| {
            let instance = state
                .instances
                .iter_mut()
                .find(|i| i.id == id)
                .ok_or_else(|| CloudProviderError::NotFound(format!("Instance not found: {id}")))?;

            info!(instance_id = %id, "Local instance terminated");
            instance.status = InstanceStatus::Terminated;
            Ok(())
        })
    }

    async fn list_instances(&self) -> Result<Vec<Instance>, CloudProviderError> {
        Ok(self.read_state()?.instances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::traits::RootVolume;

    fn request(name: &str) -> CreateInstanceRequest {
        CreateInstanceRequest {
            name: name.to_string(),
            instance_type: "t3.xlarge".to_string(),
            region: "us-east-1".to_string(),
            image: "ami-0e001c9271cf7f3b9".to_string(),
            ssh_keys: vec!["operator".to_string()],
            root_volume: RootVolume {
                device_name: "/dev/sda1".to_string(),
                size_gib: 50,
                volume_type: "gp3".to_string(),
            },
            firewall_rules: vec![FirewallRule::inbound_tcp(22, "203.0.113.5/32")],
            user_data: None,
            tags: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_create_find_terminate() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalProvider::new(dir.path().join("state.json"));

        let created = provider.create_instance(request("host-a")).await.unwrap();
        assert_eq!(created.status, InstanceStatus::Running);
        assert_eq!(created.tags.get("Name").map(String::as_str), Some("host-a"));

        let found = provider.find_instance("host-a").await.unwrap().unwrap();
        assert_eq!(found.id, created.id);

        provider.terminate_instance(&created.id).await.unwrap();
        assert!(provider.find_instance("host-a").await.unwrap().is_none());
        assert_eq!(provider.list_instances().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_state_survives_new_provider() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let created = LocalProvider::new(&path)
            .create_instance(request("host-b"))
            .await
            .unwrap();

        let reopened = LocalProvider::new(&path);
        reopened
            .replace_firewall_rules(&created.id, Vec::new())
            .await
            .unwrap();
        let instance = reopened.get_instance(&created.id).await.unwrap();
        assert!(instance.firewall_rules.is_empty());
    }

    #[tokio::test]
    async fn test_missing_instance_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalProvider::new(dir.path().join("state.json"));

        let err = provider.terminate_instance("local-missing").await.unwrap_err();
        assert!(matches!(err, CloudProviderError::NotFound(_)));
    }
}
