//! Instance metadata storage.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use miau_core::{read_text_if_exists, write_text_atomic};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

const INSTANCE_STORE_SCHEMA_VERSION: u32 = 1;
pub const DEFAULT_READ_DELAY_SECONDS: u32 = 8;
pub const MAX_READ_DELAY_SECONDS: u32 = 300;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("instance '{0}' not found")]
    NotFound(String),
    #[error("instance '{0}' already exists")]
    AlreadyExists(String),
    #[error("instance id must not be empty")]
    EmptyId,
    #[error("instance store io failed: {0:#}")]
    Io(anyhow::Error),
    #[error("instance store is malformed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported instance store schema_version {found} (expected {expected})")]
    Schema { found: u32, expected: u32 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceWebhook {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base64: Option<bool>,
}

/// Tenant record: one messaging account served by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub remote_jid: String,
    #[serde(default)]
    pub webhook: InstanceWebhook,
    #[serde(default = "default_auto_read_messages")]
    pub auto_read_messages: bool,
    /// Seconds to wait before marking inbound messages read.
    #[serde(default = "default_read_delay")]
    pub read_delay: u32,
}

fn default_auto_read_messages() -> bool {
    true
}

fn default_read_delay() -> u32 {
    DEFAULT_READ_DELAY_SECONDS
}

impl Instance {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            remote_jid: String::new(),
            webhook: InstanceWebhook::default(),
            auto_read_messages: default_auto_read_messages(),
            read_delay: DEFAULT_READ_DELAY_SECONDS,
        }
    }
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceUpdate {
    pub remote_jid: Option<String>,
    pub webhook_url: Option<String>,
    pub webhook_base64: Option<bool>,
    pub auto_read_messages: Option<bool>,
    pub read_delay: Option<u32>,
}

impl InstanceUpdate {
    fn apply(self, instance: &mut Instance) {
        if let Some(remote_jid) = self.remote_jid {
            instance.remote_jid = remote_jid;
        }
        if let Some(url) = self.webhook_url {
            instance.webhook.url = Some(url);
        }
        if let Some(base64) = self.webhook_base64 {
            instance.webhook.base64 = Some(base64);
        }
        if let Some(auto_read) = self.auto_read_messages {
            instance.auto_read_messages = auto_read;
        }
        if let Some(read_delay) = self.read_delay {
            instance.read_delay = read_delay;
        }
    }
}

#[async_trait]
pub trait InstanceRepository: Send + Sync {
    /// Lists instances, optionally narrowed to one id.
    async fn list(&self, id: Option<&str>) -> Result<Vec<Instance>, RepositoryError>;
    async fn create(&self, instance: Instance) -> Result<Instance, RepositoryError>;
    async fn update(&self, id: &str, update: InstanceUpdate) -> Result<Instance, RepositoryError>;
    async fn delete(&self, id: &str) -> Result<(), RepositoryError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct InstanceStoreFile {
    schema_version: u32,
    #[serde(default)]
    instances: Vec<Instance>,
}

/// Repository backed by one JSON document, rewritten atomically on change.
///
/// [`JsonFileInstanceRepository::ephemeral`] keeps everything in memory.
#[derive(Debug)]
pub struct JsonFileInstanceRepository {
    path: Option<PathBuf>,
    instances: Mutex<BTreeMap<String, Instance>>,
}

impl JsonFileInstanceRepository {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, RepositoryError> {
        let path = path.into();
        let instances = load_instance_store(&path)?;
        debug!(path = %path.display(), count = instances.len(), "instance store loaded");
        Ok(Self {
            path: Some(path),
            instances: Mutex::new(instances),
        })
    }

    pub fn ephemeral() -> Self {
        Self {
            path: None,
            instances: Mutex::new(BTreeMap::new()),
        }
    }

    fn persist(&self, instances: &BTreeMap<String, Instance>) -> Result<(), RepositoryError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        save_instance_store(path, instances)
    }
}

fn load_instance_store(path: &Path) -> Result<BTreeMap<String, Instance>, RepositoryError> {
    let Some(raw) = read_text_if_exists(path).map_err(RepositoryError::Io)? else {
        return Ok(BTreeMap::new());
    };
    let parsed = serde_json::from_str::<InstanceStoreFile>(&raw)?;
    if parsed.schema_version != INSTANCE_STORE_SCHEMA_VERSION {
        return Err(RepositoryError::Schema {
            found: parsed.schema_version,
            expected: INSTANCE_STORE_SCHEMA_VERSION,
        });
    }
    Ok(parsed
        .instances
        .into_iter()
        .map(|instance| (instance.id.clone(), instance))
        .collect())
}

fn save_instance_store(
    path: &Path,
    instances: &BTreeMap<String, Instance>,
) -> Result<(), RepositoryError> {
    let file = InstanceStoreFile {
        schema_version: INSTANCE_STORE_SCHEMA_VERSION,
        instances: instances.values().cloned().collect(),
    };
    let mut payload = serde_json::to_string_pretty(&file)?;
    payload.push('\n');
    write_text_atomic(path, &payload).map_err(RepositoryError::Io)
}

#[async_trait]
impl InstanceRepository for JsonFileInstanceRepository {
    async fn list(&self, id: Option<&str>) -> Result<Vec<Instance>, RepositoryError> {
        let instances = self.instances.lock().await;
        Ok(match id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => instances.get(id).cloned().into_iter().collect(),
            None => instances.values().cloned().collect(),
        })
    }

    async fn create(&self, instance: Instance) -> Result<Instance, RepositoryError> {
        if instance.id.trim().is_empty() {
            return Err(RepositoryError::EmptyId);
        }
        let mut instances = self.instances.lock().await;
        if instances.contains_key(&instance.id) {
            return Err(RepositoryError::AlreadyExists(instance.id));
        }
        instances.insert(instance.id.clone(), instance.clone());
        if let Err(error) = self.persist(&instances) {
            instances.remove(&instance.id);
            return Err(error);
        }
        Ok(instance)
    }

    async fn update(&self, id: &str, update: InstanceUpdate) -> Result<Instance, RepositoryError> {
        let mut instances = self.instances.lock().await;
        let previous = instances
            .get(id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        let mut updated = previous.clone();
        update.apply(&mut updated);
        instances.insert(id.to_string(), updated.clone());
        if let Err(error) = self.persist(&instances) {
            instances.insert(id.to_string(), previous);
            return Err(error);
        }
        Ok(updated)
    }

    async fn delete(&self, id: &str) -> Result<(), RepositoryError> {
        let mut instances = self.instances.lock().await;
        let removed = instances
            .remove(id)
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        if let Err(error) = self.persist(&instances) {
            instances.insert(id.to_string(), removed);
            return Err(error);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_instance_defaults_enable_read_receipts() {
        let instance: Instance = serde_json::from_str(r#"{"id":"tenant"}"#).expect("parse");
        assert_eq!(instance, Instance::new("tenant"));
        assert!(instance.auto_read_messages);
        assert_eq!(instance.read_delay, 8);

        let body = serde_json::to_value(&instance).expect("serialize");
        assert_eq!(
            body,
            serde_json::json!({"id":"tenant","webhook":{},"autoReadMessages":true,"readDelay":8})
        );
    }

    #[tokio::test]
    async fn functional_ephemeral_repository_crud() {
        let repo = JsonFileInstanceRepository::ephemeral();
        repo.create(Instance::new("b")).await.expect("create b");
        repo.create(Instance::new("a")).await.expect("create a");
        assert!(matches!(
            repo.create(Instance::new("a")).await,
            Err(RepositoryError::AlreadyExists(_))
        ));
        assert!(matches!(
            repo.create(Instance::new("  ")).await,
            Err(RepositoryError::EmptyId)
        ));

        let all = repo.list(None).await.expect("list");
        assert_eq!(
            all.iter().map(|instance| instance.id.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        assert_eq!(repo.list(Some("b")).await.expect("list b").len(), 1);
        assert_eq!(repo.list(Some("")).await.expect("list blank").len(), 2);
        assert!(repo.list(Some("zzz")).await.expect("list none").is_empty());

        let updated = repo
            .update(
                "a",
                InstanceUpdate {
                    webhook_base64: Some(true),
                    read_delay: Some(30),
                    ..InstanceUpdate::default()
                },
            )
            .await
            .expect("update");
        assert_eq!(updated.webhook.base64, Some(true));
        assert_eq!(updated.read_delay, 30);
        assert!(updated.auto_read_messages);

        repo.delete("a").await.expect("delete");
        assert!(matches!(
            repo.delete("a").await,
            Err(RepositoryError::NotFound(_))
        ));
        assert!(matches!(
            repo.update("a", InstanceUpdate::default()).await,
            Err(RepositoryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn integration_file_repository_survives_reopen() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("state").join("instances.json");

        let repo = JsonFileInstanceRepository::open(&path).expect("open");
        repo.create(Instance::new("tenant")).await.expect("create");
        repo.update(
            "tenant",
            InstanceUpdate {
                remote_jid: Some("5511999999999@s.whatsapp.net".to_string()),
                ..InstanceUpdate::default()
            },
        )
        .await
        .expect("update");
        drop(repo);

        let reopened = JsonFileInstanceRepository::open(&path).expect("reopen");
        let instances = reopened.list(None).await.expect("list");
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].remote_jid, "5511999999999@s.whatsapp.net");
    }

    #[test]
    fn regression_unknown_schema_version_is_rejected() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("instances.json");
        std::fs::write(&path, r#"{"schema_version":9,"instances":[]}"#).expect("write");
        let error = JsonFileInstanceRepository::open(&path).expect_err("schema mismatch");
        assert!(matches!(
            error,
            RepositoryError::Schema {
                found: 9,
                expected: 1
            }
        ));
    }
}
