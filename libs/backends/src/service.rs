//! CRUD service combining the backend facade with instance persistence
//!
//! - Create: an instance whose uuid is already stored becomes an update;
//!   otherwise the uuid (when absent) and `created` timestamp are assigned,
//!   backends are notified (adopting a remote identifier when configured) and
//!   the instance is stored. An adopted identifier that is already stored
//!   turns the create into an update of that instance.
//! - Read: the stored instance is loaded, backends are asked for their
//!   record, and a canonical backend record wins over the stored one.
//! - Update: persisted first, then backends are notified.
//! - Delete: backends are notified, then the stored instance is removed.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value as JsonValue};
use tracing::info;
use uuid::Uuid;

use crate::facade::Backends;
use crate::models::{AuthContext, Instance, MethodOptions, UUID_FIELD};
use crate::store::InstanceStore;
use crate::{Error, Result};

/// Field holding the creation timestamp of an instance.
pub const CREATED_FIELD: &str = "created";

pub struct DispatchingService {
    store: Arc<dyn InstanceStore>,
    backends: Arc<Backends>,
}

impl DispatchingService {
    pub fn new(store: Arc<dyn InstanceStore>, backends: Arc<Backends>) -> Self {
        Self { store, backends }
    }

    /// Create an instance, or update it when its uuid is already stored.
    pub async fn create(
        &self,
        mut instance: Instance,
        auth: Option<&AuthContext>,
        options: &MethodOptions,
    ) -> Result<Instance> {
        let local_uuid = match instance.uuid.clone() {
            Some(uuid) => {
                if self.is_stored(&instance.model, &uuid).await? {
                    info!(model = %instance.model, %uuid, "Instance exists, updating instead");
                    let model = instance.model.clone();
                    return self.update(&model, &uuid, instance.fields, auth, options).await;
                }
                uuid
            }
            None => {
                let uuid = Uuid::new_v4().to_string();
                instance.uuid = Some(uuid.clone());
                uuid
            }
        };

        let supplied = instance
            .field(CREATED_FIELD)
            .is_some_and(|created| !created.is_null());
        if !supplied {
            instance.fields.insert(
                CREATED_FIELD.to_string(),
                JsonValue::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
            );
        }

        self.backends.create(&mut instance, auth, options).await?;

        // An adopted remote identifier may already be stored locally
        if let Some(adopted) = instance.uuid.clone().filter(|uuid| *uuid != local_uuid) {
            if self.is_stored(&instance.model, &adopted).await? {
                info!(
                    model = %instance.model,
                    uuid = %adopted,
                    "Adopted identifier exists, updating instead"
                );
                if !supplied {
                    instance.fields.remove(CREATED_FIELD);
                }
                let model = instance.model.clone();
                return self.update(&model, &adopted, instance.fields, auth, options).await;
            }
        }

        let stored = self.store.insert(instance).await?;
        info!(
            model = %stored.model,
            uuid = stored.uuid.as_deref().unwrap_or("-"),
            "Instance created"
        );
        Ok(stored)
    }

    /// Whether exactly one instance is stored under `uuid`; several is a conflict.
    async fn is_stored(&self, model: &str, uuid: &str) -> Result<bool> {
        match self.store.find(model, uuid).await?.len() {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(Error::Conflict {
                model: model.to_string(),
                uuid: uuid.to_string(),
            }),
        }
    }

    /// Load an instance and return the backends' canonical record for it, or
    /// the stored instance when no backend has one.
    pub async fn read(
        &self,
        model: &str,
        uuid: &str,
        auth: Option<&AuthContext>,
        options: &MethodOptions,
    ) -> Result<Instance> {
        let stored = self.store.get(model, uuid).await?;
        let canonical = self.backends.read(&stored, auth, options).await?;
        Ok(canonical.unwrap_or(stored))
    }

    /// Merge `fields` into the stored instance, then notify backends.
    ///
    /// A `uuid` key inside `fields` takes precedence over `uuid`.
    pub async fn update(
        &self,
        model: &str,
        uuid: &str,
        mut fields: Map<String, JsonValue>,
        auth: Option<&AuthContext>,
        options: &MethodOptions,
    ) -> Result<Instance> {
        let uuid = match fields.remove(UUID_FIELD) {
            Some(JsonValue::String(body_uuid)) if !body_uuid.is_empty() => body_uuid,
            _ => uuid.to_string(),
        };
        if uuid.is_empty() {
            return Err(Error::Validation(format!("UUID required for update of {}", model)));
        }

        let updated = self.store.update(model, &uuid, fields).await?;
        self.backends.update(&updated, auth, options).await?;

        info!(model, uuid = %uuid, "Instance updated");
        Ok(updated)
    }

    /// Notify backends and remove the stored instance.
    pub async fn delete(
        &self,
        model: &str,
        uuid: &str,
        auth: Option<&AuthContext>,
        options: &MethodOptions,
    ) -> Result<String> {
        if uuid.is_empty() {
            return Err(Error::Validation(format!("UUID required for delete of {}", model)));
        }

        let stored = self.store.get(model, uuid).await?;
        self.backends.delete(&stored, auth, options).await?;
        self.store.delete(model, uuid).await?;

        info!(model, uuid, "Instance deleted");
        Ok(format!("Successfully deleted {}: {}", model, uuid))
    }
}
