//! Persistence collaborator for the dispatching service

use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::models::{Instance, UUID_FIELD};
use crate::{Error, Result};

/// Storage for model instances, keyed by model name and uuid
///
/// The dispatch layer never persists on its own; the dispatching service
/// writes through this trait after (create) or before (update) notifying
/// backends. Any storage (SQL, document store, in-memory) can implement it.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// All instances of `model` with identifier `uuid`
    ///
    /// # Returns
    /// An empty list when nothing matches; more than one element indicates a
    /// duplicated identifier.
    async fn find(&self, model: &str, uuid: &str) -> Result<Vec<Instance>>;

    /// Persist a new instance
    ///
    /// # Arguments
    /// * `instance` - The instance to store; it must carry a uuid
    ///
    /// # Errors
    /// * `Validation` - If the instance has no uuid
    /// * `Conflict` - If an instance with the same uuid already exists
    async fn insert(&self, instance: Instance) -> Result<Instance>;

    /// Merge `fields` into the single instance identified by `uuid`
    ///
    /// # Returns
    /// The instance as stored after the merge
    ///
    /// # Errors
    /// * `NotFound` - If no instance matches
    /// * `Conflict` - If more than one instance matches
    async fn update(
        &self,
        model: &str,
        uuid: &str,
        fields: Map<String, JsonValue>,
    ) -> Result<Instance>;

    /// Remove the single instance identified by `uuid`
    ///
    /// # Errors
    /// * `NotFound` - If no instance matches
    /// * `Conflict` - If more than one instance matches
    async fn delete(&self, model: &str, uuid: &str) -> Result<()>;

    /// Exactly one instance, or `NotFound` / `Conflict`.
    async fn get(&self, model: &str, uuid: &str) -> Result<Instance> {
        let mut matches = self.find(model, uuid).await?;
        match matches.len() {
            0 => Err(not_found(model, uuid)),
            1 => Ok(matches.remove(0)),
            _ => Err(conflict(model, uuid)),
        }
    }
}

fn not_found(model: &str, uuid: &str) -> Error {
    Error::NotFound {
        model: model.to_string(),
        uuid: uuid.to_string(),
    }
}

fn conflict(model: &str, uuid: &str) -> Error {
    Error::Conflict {
        model: model.to_string(),
        uuid: uuid.to_string(),
    }
}

/// In-memory store, one list of instances per model
#[derive(Debug, Default)]
pub struct MemoryStore {
    models: RwLock<BTreeMap<String, Vec<Instance>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with `instances` as given, without uniqueness checks.
    pub fn with_instances(instances: impl IntoIterator<Item = Instance>) -> Self {
        let mut models: BTreeMap<String, Vec<Instance>> = BTreeMap::new();
        for instance in instances {
            models
                .entry(instance.model.clone())
                .or_default()
                .push(instance);
        }
        Self {
            models: RwLock::new(models),
        }
    }

    /// Number of stored instances of `model`.
    pub async fn count(&self, model: &str) -> usize {
        self.models
            .read()
            .await
            .get(model)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

fn matches(instance: &Instance, uuid: &str) -> bool {
    instance.uuid.as_deref() == Some(uuid)
}

/// Index of the single match in `list`.
fn single_match(list: &[Instance], model: &str, uuid: &str) -> Result<usize> {
    let mut positions = list
        .iter()
        .enumerate()
        .filter(|(_, instance)| matches(instance, uuid))
        .map(|(i, _)| i);

    match (positions.next(), positions.next()) {
        (None, _) => Err(not_found(model, uuid)),
        (Some(i), None) => Ok(i),
        (Some(_), Some(_)) => Err(conflict(model, uuid)),
    }
}

#[async_trait]
impl InstanceStore for MemoryStore {
    async fn find(&self, model: &str, uuid: &str) -> Result<Vec<Instance>> {
        let models = self.models.read().await;
        Ok(models
            .get(model)
            .map(|list| {
                list.iter()
                    .filter(|instance| matches(instance, uuid))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn insert(&self, instance: Instance) -> Result<Instance> {
        let Some(uuid) = instance.uuid.clone() else {
            return Err(Error::Validation(format!(
                "cannot store {} without a uuid",
                instance.model
            )));
        };

        let mut models = self.models.write().await;
        let list = models.entry(instance.model.clone()).or_default();
        if list.iter().any(|existing| matches(existing, &uuid)) {
            return Err(conflict(&instance.model, &uuid));
        }
        list.push(instance.clone());
        Ok(instance)
    }

    async fn update(
        &self,
        model: &str,
        uuid: &str,
        mut fields: Map<String, JsonValue>,
    ) -> Result<Instance> {
        fields.remove(UUID_FIELD);

        let mut models = self.models.write().await;
        let list = models
            .get_mut(model)
            .ok_or_else(|| not_found(model, uuid))?;
        let index = single_match(list, model, uuid)?;

        let instance = &mut list[index];
        instance.fields.extend(fields);
        Ok(instance.clone())
    }

    async fn delete(&self, model: &str, uuid: &str) -> Result<()> {
        let mut models = self.models.write().await;
        let list = models
            .get_mut(model)
            .ok_or_else(|| not_found(model, uuid))?;
        let index = single_match(list, model, uuid)?;
        list.remove(index);
        if list.is_empty() {
            models.remove(model);
        }
        Ok(())
    }
}
