//! Registry of live protocol clients keyed by instance id.

use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;

use crate::protocol_client::{ProtocolClient, ProtocolClientFactory};

/// Login flow currently outstanding on a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoginFlow {
    #[default]
    None,
    QrCode,
    Pairing,
}

/// Live client bound to one instance.
pub struct InstanceHandle {
    instance_id: String,
    client: Arc<dyn ProtocolClient>,
    login_flow: Mutex<LoginFlow>,
}

impl std::fmt::Debug for InstanceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceHandle")
            .field("instance_id", &self.instance_id)
            .field("connected", &self.client.is_connected())
            .field("logged_in", &self.client.is_logged_in())
            .field("login_flow", &self.login_flow())
            .finish()
    }
}

impl InstanceHandle {
    fn new(instance_id: String, client: Arc<dyn ProtocolClient>) -> Self {
        Self {
            instance_id,
            client,
            login_flow: Mutex::new(LoginFlow::None),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn client(&self) -> Arc<dyn ProtocolClient> {
        Arc::clone(&self.client)
    }

    pub fn login_flow(&self) -> LoginFlow {
        *self.login_flow.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_login_flow(&self, flow: LoginFlow) {
        *self.login_flow.lock().unwrap_or_else(PoisonError::into_inner) = flow;
    }
}

/// Concurrent `instance_id -> handle` map; at most one live client per instance.
pub struct InstanceRegistry {
    handles: DashMap<String, Arc<InstanceHandle>>,
    factory: Arc<dyn ProtocolClientFactory>,
}

impl InstanceRegistry {
    pub fn new(factory: Arc<dyn ProtocolClientFactory>) -> Self {
        Self {
            handles: DashMap::new(),
            factory,
        }
    }

    pub fn get(&self, instance_id: &str) -> Option<Arc<InstanceHandle>> {
        self.handles
            .get(instance_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Returns the existing handle or stores a fresh disconnected one.
    ///
    /// The entry API holds the shard lock across the check and the insert, so
    /// concurrent callers for one id always converge on a single handle.
    pub fn get_or_create(&self, instance_id: &str) -> Arc<InstanceHandle> {
        let entry = self
            .handles
            .entry(instance_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(instance = instance_id, "creating protocol client");
                Arc::new(InstanceHandle::new(
                    instance_id.to_string(),
                    self.factory.new_client(instance_id),
                ))
            });
        Arc::clone(entry.value())
    }

    pub fn remove(&self, instance_id: &str) -> Option<Arc<InstanceHandle>> {
        self.handles.remove(instance_id).map(|(_, handle)| handle)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn instance_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.handles.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }
}
