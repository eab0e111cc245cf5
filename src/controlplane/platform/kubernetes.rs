//! Kubernetes Platform Adapter
//!
//! Backs the StorageClass and operator status ports with the Kubernetes
//! API, and turns watch events on the objects the controller cares about
//! into sync triggers.

use crate::crd::{ManagementState, ManilaDriver, ManilaDriverStatus};
use crate::domain::conditions::{ConditionSet, ConditionUpdate};
use crate::domain::object_meta::ensure_object_meta;
use crate::domain::ports::{OperatorStatusStore, StorageClassStore};
use crate::error::{Error, Result};
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use k8s_openapi::api::storage::v1::StorageClass;
use kube::api::{Api, DeleteParams, PostParams};
use kube::runtime::reflector::{self, ObjectRef, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Client, ResourceExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const STORAGE_CLASS_KIND: &str = "StorageClass";
const MANILA_DRIVER_KIND: &str = "ManilaDriver";

// =============================================================================
// StorageClass Store
// =============================================================================

/// StorageClass store reading from a reflector cache and writing through
/// the API server
pub struct KubeStorageClassStore {
    api: Api<StorageClass>,
    cache: Store<StorageClass>,
}

impl KubeStorageClassStore {
    pub fn new(client: Client, cache: Store<StorageClass>) -> Self {
        Self {
            api: Api::all(client),
            cache,
        }
    }
}

/// Merge `required` into `existing`. Returns the object to write back, or
/// `None` when the live object already matches.
pub fn merge_storage_class(mut existing: StorageClass, required: &StorageClass) -> Option<StorageClass> {
    let mut modified = false;
    ensure_object_meta(&mut modified, &mut existing.metadata, &required.metadata);

    if required.allow_volume_expansion.is_some()
        && existing.allow_volume_expansion != required.allow_volume_expansion
    {
        existing.allow_volume_expansion = required.allow_volume_expansion;
        modified = true;
    }

    modified.then_some(existing)
}

#[async_trait]
impl StorageClassStore for KubeStorageClassStore {
    fn get(&self, name: &str) -> Option<Arc<StorageClass>> {
        self.cache.get(&ObjectRef::new(name))
    }

    async fn create(&self, class: &StorageClass) -> Result<()> {
        let name = class.name_any();
        self.api
            .create(&PostParams::default(), class)
            .await
            .map_err(|err| Error::from_kube(err, STORAGE_CLASS_KIND, &name))?;
        info!("Created StorageClass {}", name);
        Ok(())
    }

    async fn apply(&self, class: &StorageClass) -> Result<()> {
        let name = class.name_any();
        let existing = self
            .api
            .get_opt(&name)
            .await
            .map_err(|err| Error::from_kube(err, STORAGE_CLASS_KIND, &name))?;

        let Some(existing) = existing else {
            return self.create(class).await;
        };

        match merge_storage_class(existing, class) {
            Some(updated) => {
                self.api
                    .replace(&name, &PostParams::default(), &updated)
                    .await
                    .map_err(|err| Error::from_kube(err, STORAGE_CLASS_KIND, &name))?;
                info!("Updated StorageClass {}", name);
            }
            None => debug!("StorageClass {} is up to date", name),
        }
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.api
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|err| Error::from_kube(err, STORAGE_CLASS_KIND, name))?;
        info!("Deleted StorageClass {}", name);
        Ok(())
    }
}

// =============================================================================
// Operator Status Store
// =============================================================================

/// Operator status store backed by the cluster-scoped ManilaDriver object
pub struct KubeOperatorStatusStore {
    api: Api<ManilaDriver>,
    name: String,
    max_conflict_retry: Duration,
}

impl KubeOperatorStatusStore {
    pub fn new(client: Client, name: impl Into<String>) -> Self {
        Self {
            api: Api::all(client),
            name: name.into(),
            max_conflict_retry: Duration::from_secs(10),
        }
    }

    async fn get(&self) -> Result<ManilaDriver> {
        self.api
            .get(&self.name)
            .await
            .map_err(|err| Error::from_kube(err, MANILA_DRIVER_KIND, &self.name))
    }

    async fn try_update(&self, update: &ConditionUpdate) -> Result<()> {
        let mut driver = self.get().await?;
        let Some(status) = updated_status(&driver, update, Utc::now()) else {
            debug!("ManilaDriver {} conditions unchanged", self.name);
            return Ok(());
        };

        driver.status = Some(status);
        let data = serde_json::to_vec(&driver)?;
        self.api
            .replace_status(&self.name, &PostParams::default(), data)
            .await
            .map_err(|err| Error::from_kube(err, MANILA_DRIVER_KIND, &self.name))?;
        Ok(())
    }
}

/// Status of `driver` after applying `update`, or `None` when nothing
/// would change
pub fn updated_status(
    driver: &ManilaDriver,
    update: &ConditionUpdate,
    now: DateTime<Utc>,
) -> Option<ManilaDriverStatus> {
    let mut conditions = ConditionSet::from_conditions(driver.conditions());
    let generation = driver.metadata.generation;
    let observed = driver.status.as_ref().and_then(|s| s.observed_generation);

    if !update.apply(&mut conditions, now) && observed == generation {
        return None;
    }

    Some(ManilaDriverStatus {
        observed_generation: generation,
        conditions: conditions.into_conditions(),
    })
}

#[async_trait]
impl OperatorStatusStore for KubeOperatorStatusStore {
    async fn management_state(&self) -> Result<ManagementState> {
        Ok(self.get().await?.spec.management_state)
    }

    async fn update_conditions(&self, update: ConditionUpdate) -> Result<()> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(100))
            .with_max_elapsed_time(Some(self.max_conflict_retry))
            .build();

        backoff::future::retry(policy, || async {
            self.try_update(&update).await.map_err(|err| {
                if err.is_conflict() {
                    debug!("Conflict updating ManilaDriver {}, retrying", self.name);
                    backoff::Error::transient(err)
                } else {
                    backoff::Error::permanent(err)
                }
            })
        })
        .await
    }
}

// =============================================================================
// Watch Triggers
// =============================================================================

fn into_triggers<S, K, E>(kind: &'static str, events: S) -> BoxStream<'static, ()>
where
    S: Stream<Item = std::result::Result<K, E>> + Send + 'static,
    K: Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    events
        .filter_map(move |event| async move {
            match event {
                Ok(_) => Some(()),
                Err(err) => {
                    warn!("{} watch error: {}", kind, err);
                    None
                }
            }
        })
        .boxed()
}

/// Start a StorageClass reflector. Returns the cache reader and a trigger
/// stream that must be polled to keep the cache filled.
pub fn storage_class_reflector(client: Client) -> (Store<StorageClass>, BoxStream<'static, ()>) {
    let api: Api<StorageClass> = Api::all(client);
    let (reader, writer) = reflector::store();
    let events = reflector::reflector(writer, watcher(api, watcher::Config::default()))
        .default_backoff()
        .touched_objects();
    (reader, into_triggers(STORAGE_CLASS_KIND, events))
}

/// Trigger stream for changes of the named ManilaDriver
pub fn operator_triggers(client: Client, name: &str) -> BoxStream<'static, ()> {
    let api: Api<ManilaDriver> = Api::all(client);
    let config = watcher::Config::default().fields(&format!("metadata.name={}", name));
    let events = watcher(api, config).default_backoff().touched_objects();
    into_triggers(MANILA_DRIVER_KIND, events)
}

/// Merge trigger streams into one
pub fn merge_triggers(streams: Vec<BoxStream<'static, ()>>) -> BoxStream<'static, ()> {
    stream::select_all(streams).boxed()
}
