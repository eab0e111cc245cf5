//! StorageClass reconciliation
//!
//! Every Manila share type gets a StorageClass named `<prefix><share type>`
//! that points the Manila CSI provisioner at that share type and at the
//! secret holding the OpenStack credentials.
//!
//! StorageClass parameters are immutable once created. When the desired
//! parameters differ from the live ones (for example after the secret moved
//! to another namespace), the class is deleted and created again, carrying
//! over metadata the operator does not own such as the default-class
//! annotation. Classes whose share type disappeared are left alone.

use crate::controlplane::metrics::ControllerMetrics;
use crate::domain::object_meta::{clear_server_fields, ensure_object_meta};
use crate::domain::ports::{ShareType, StorageClassStoreRef};
use crate::error::{Error, Result};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

// =============================================================================
// Constants
// =============================================================================

/// CSI driver name of the Manila provisioner
pub const MANILA_PROVISIONER: &str = "manila.csi.openstack.org";

/// Annotation marking the cluster default StorageClass
pub const DEFAULT_CLASS_ANNOTATION: &str = "storageclass.kubernetes.io/is-default-class";

/// Parameter selecting the Manila share type
pub const SHARE_TYPE_PARAMETER: &str = "type";

const PROVISIONER_SECRET_NAME: &str = "csi.storage.k8s.io/provisioner-secret-name";
const PROVISIONER_SECRET_NAMESPACE: &str = "csi.storage.k8s.io/provisioner-secret-namespace";
const NODE_STAGE_SECRET_NAME: &str = "csi.storage.k8s.io/node-stage-secret-name";
const NODE_STAGE_SECRET_NAMESPACE: &str = "csi.storage.k8s.io/node-stage-secret-namespace";
const NODE_PUBLISH_SECRET_NAME: &str = "csi.storage.k8s.io/node-publish-secret-name";
const NODE_PUBLISH_SECRET_NAMESPACE: &str = "csi.storage.k8s.io/node-publish-secret-namespace";

// =============================================================================
// Configuration
// =============================================================================

/// Fixed inputs of the desired StorageClass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageClassConfig {
    /// Prepended to the share type name
    pub name_prefix: String,
    /// CSI provisioner name
    pub provisioner: String,
    /// Secret with the OpenStack credentials
    pub secret_name: String,
    /// Namespace of that secret
    pub secret_namespace: String,
}

impl Default for StorageClassConfig {
    fn default() -> Self {
        Self {
            name_prefix: "csi-manila-".to_string(),
            provisioner: MANILA_PROVISIONER.to_string(),
            secret_name: "csi-manila-secrets".to_string(),
            secret_namespace: "openshift-manila-csi-driver".to_string(),
        }
    }
}

impl StorageClassConfig {
    /// StorageClass name for a share type
    pub fn class_name(&self, share_type: &ShareType) -> String {
        format!("{}{}", self.name_prefix, share_type.name)
    }

    /// The StorageClass this operator wants for a share type
    pub fn desired_storage_class(&self, share_type: &ShareType) -> StorageClass {
        let secret_params = [
            (PROVISIONER_SECRET_NAME, &self.secret_name),
            (PROVISIONER_SECRET_NAMESPACE, &self.secret_namespace),
            (NODE_STAGE_SECRET_NAME, &self.secret_name),
            (NODE_STAGE_SECRET_NAMESPACE, &self.secret_namespace),
            (NODE_PUBLISH_SECRET_NAME, &self.secret_name),
            (NODE_PUBLISH_SECRET_NAMESPACE, &self.secret_namespace),
        ];

        let mut parameters = BTreeMap::new();
        parameters.insert(SHARE_TYPE_PARAMETER.to_string(), share_type.name.clone());
        for (key, value) in secret_params {
            parameters.insert(key.to_string(), value.clone());
        }

        StorageClass {
            metadata: ObjectMeta {
                name: Some(self.class_name(share_type)),
                ..Default::default()
            },
            provisioner: self.provisioner.clone(),
            parameters: Some(parameters),
            ..Default::default()
        }
    }
}

/// Deep comparison of StorageClass parameters, absent equals empty
pub fn parameters_equal(a: &StorageClass, b: &StorageClass) -> bool {
    let empty = BTreeMap::new();
    a.parameters.as_ref().unwrap_or(&empty) == b.parameters.as_ref().unwrap_or(&empty)
}

// =============================================================================
// Reconciler
// =============================================================================

/// What reconciling one StorageClass did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    /// The class did not exist and was created
    Created,
    /// The class existed with matching parameters
    Unchanged,
    /// The class existed with stale parameters and was recreated
    Replaced,
}

impl ReconcileAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileAction::Created => "created",
            ReconcileAction::Unchanged => "unchanged",
            ReconcileAction::Replaced => "replaced",
        }
    }
}

impl std::fmt::Display for ReconcileAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Keeps one StorageClass per share type in line with the desired state
pub struct StorageClassReconciler {
    store: StorageClassStoreRef,
    config: StorageClassConfig,
    metrics: Arc<ControllerMetrics>,
}

impl StorageClassReconciler {
    pub fn new(
        store: StorageClassStoreRef,
        config: StorageClassConfig,
        metrics: Arc<ControllerMetrics>,
    ) -> Self {
        Self {
            store,
            config,
            metrics,
        }
    }

    /// Reconcile the StorageClasses of all given share types.
    ///
    /// Each share type is handled independently; failures are collected and
    /// returned as one `Error::Aggregate` after every item was attempted.
    pub async fn reconcile(
        &self,
        share_types: &[ShareType],
    ) -> Result<Vec<(String, ReconcileAction)>> {
        let mut outcomes = Vec::with_capacity(share_types.len());
        let mut errors = Vec::new();

        for share_type in share_types {
            debug!("Syncing storage class for share type {}", share_type.name);
            let desired = self.config.desired_storage_class(share_type);
            let name = self.config.class_name(share_type);

            match self.apply_storage_class(desired).await {
                Ok(action) => {
                    self.metrics.record_storage_class(action);
                    outcomes.push((name, action));
                }
                Err(source) => errors.push(Error::StorageClassSync {
                    name,
                    source: Box::new(source),
                }),
            }
        }

        if errors.is_empty() {
            Ok(outcomes)
        } else {
            Err(Error::Aggregate(errors))
        }
    }

    /// Bring one StorageClass to the desired state
    #[instrument(skip(self, desired), fields(name = desired.metadata.name.as_deref().unwrap_or_default()))]
    pub async fn apply_storage_class(&self, mut desired: StorageClass) -> Result<ReconcileAction> {
        let name = desired
            .metadata
            .name
            .clone()
            .ok_or_else(|| Error::Internal("desired StorageClass has no name".into()))?;

        let Some(current) = self.store.get(&name) else {
            info!("Creating StorageClass {}", name);
            self.create(&desired).await?;
            return Ok(ReconcileAction::Created);
        };

        if parameters_equal(&current, &desired) {
            self.store.apply(&desired).await?;
            return Ok(ReconcileAction::Unchanged);
        }

        info!("StorageClass {} parameters changed, replacing it", name);
        match self.store.delete(&name).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {
                debug!("StorageClass {} already deleted", name);
            }
            Err(err) => return Err(err),
        }

        let mut merged = current.metadata.clone();
        let mut modified = false;
        ensure_object_meta(&mut modified, &mut merged, &desired.metadata);
        clear_server_fields(&mut merged);
        desired.metadata = merged;

        self.create(&desired).await?;
        Ok(ReconcileAction::Replaced)
    }

    async fn create(&self, class: &StorageClass) -> Result<()> {
        match self.store.create(class).await {
            Err(err) if err.is_already_exists() => {
                debug!(
                    "StorageClass {} was created concurrently",
                    class.metadata.name.as_deref().unwrap_or_default()
                );
                Ok(())
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeStorageClassStore, StoreCall};
    use assert_matches::assert_matches;
    use prometheus::Registry;

    fn reconciler(store: Arc<FakeStorageClassStore>, config: StorageClassConfig) -> StorageClassReconciler {
        let metrics = Arc::new(ControllerMetrics::new(&Registry::new()).unwrap());
        StorageClassReconciler::new(store, config, metrics)
    }

    fn manila_config() -> StorageClassConfig {
        StorageClassConfig {
            name_prefix: "manila-".into(),
            ..Default::default()
        }
    }

    fn share_types(names: &[&str]) -> Vec<ShareType> {
        names.iter().map(|n| ShareType::named(*n)).collect()
    }

    #[test]
    fn test_desired_class_is_deterministic() {
        let config = StorageClassConfig::default();
        for share_type in share_types(&["default", "fast", "cephfs"]) {
            assert_eq!(
                config.desired_storage_class(&share_type),
                config.desired_storage_class(&share_type)
            );
        }
    }

    #[test]
    fn test_desired_class_contents() {
        let config = manila_config();
        let class = config.desired_storage_class(&ShareType::named("fast"));

        assert_eq!(class.metadata.name.as_deref(), Some("manila-fast"));
        assert_eq!(class.provisioner, "manila.csi.openstack.org");

        let params = class.parameters.unwrap();
        assert_eq!(params.len(), 7);
        assert_eq!(params.get("type").map(String::as_str), Some("fast"));
        assert_eq!(
            params.get("csi.storage.k8s.io/node-publish-secret-namespace").map(String::as_str),
            Some("openshift-manila-csi-driver")
        );
        assert_eq!(
            params.get("csi.storage.k8s.io/provisioner-secret-name").map(String::as_str),
            Some("csi-manila-secrets")
        );
    }

    #[tokio::test]
    async fn test_creates_missing_classes() {
        let store = Arc::new(FakeStorageClassStore::new());
        let r = reconciler(store.clone(), manila_config());

        let outcomes = r.reconcile(&share_types(&["default", "fast"])).await.unwrap();

        assert_eq!(
            outcomes,
            vec![
                ("manila-default".to_string(), ReconcileAction::Created),
                ("manila-fast".to_string(), ReconcileAction::Created),
            ]
        );
        assert_eq!(store.names(), vec!["manila-default", "manila-fast"]);
        for name in store.names() {
            let class = store.class(&name).unwrap();
            assert_eq!(class.provisioner, MANILA_PROVISIONER);
            let params = class.parameters.unwrap();
            assert_eq!(params.get("type").map(String::as_str), name.strip_prefix("manila-"));
            assert_eq!(params.len(), 7);
        }
    }

    #[tokio::test]
    async fn test_second_pass_is_idempotent() {
        let store = Arc::new(FakeStorageClassStore::new());
        let r = reconciler(store.clone(), StorageClassConfig::default());
        let types = share_types(&["default", "fast"]);

        r.reconcile(&types).await.unwrap();
        store.clear_calls();
        let outcomes = r.reconcile(&types).await.unwrap();

        assert!(outcomes.iter().all(|(_, a)| *a == ReconcileAction::Unchanged));
        assert_eq!(store.count(|c| matches!(c, StoreCall::Create(_))), 0);
        assert_eq!(store.count(|c| matches!(c, StoreCall::Delete(_))), 0);
        assert_eq!(store.count(|c| matches!(c, StoreCall::Apply(_))), 2);
    }

    #[tokio::test]
    async fn test_changed_parameters_replace_class() {
        let store = Arc::new(FakeStorageClassStore::new());

        // Class created by an older deployment with the secret elsewhere
        let old_config = StorageClassConfig {
            secret_namespace: "openshift-cluster-csi-drivers".into(),
            ..manila_config()
        };
        let mut existing = old_config.desired_storage_class(&ShareType::named("a"));
        existing.metadata.annotations = Some(BTreeMap::from([(
            DEFAULT_CLASS_ANNOTATION.to_string(),
            "true".to_string(),
        )]));
        existing.metadata.resource_version = Some("1234".into());
        existing.metadata.uid = Some("old-uid".into());
        store.insert(existing);

        let r = reconciler(store.clone(), manila_config());
        let action = r
            .apply_storage_class(manila_config().desired_storage_class(&ShareType::named("a")))
            .await
            .unwrap();

        assert_eq!(action, ReconcileAction::Replaced);
        assert_eq!(
            store.calls(),
            vec![
                StoreCall::Delete("manila-a".into()),
                StoreCall::Create("manila-a".into()),
            ]
        );

        let created = store.class("manila-a").unwrap();
        assert_eq!(
            created
                .metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(DEFAULT_CLASS_ANNOTATION))
                .map(String::as_str),
            Some("true")
        );
        assert!(created.metadata.resource_version.is_none());
        assert!(created.metadata.uid.is_none());
        assert_eq!(
            created
                .parameters
                .unwrap()
                .get("csi.storage.k8s.io/provisioner-secret-namespace")
                .map(String::as_str),
            Some("openshift-manila-csi-driver")
        );
    }

    #[tokio::test]
    async fn test_replacement_tolerates_concurrent_delete() {
        let mut stale = manila_config().desired_storage_class(&ShareType::named("a"));
        stale.parameters = Some(BTreeMap::from([("type".to_string(), "a".to_string())]));

        // Another actor removes the class after our cache saw it
        struct Racing {
            inner: Arc<FakeStorageClassStore>,
            cached: Arc<StorageClass>,
        }
        #[async_trait::async_trait]
        impl crate::domain::ports::StorageClassStore for Racing {
            fn get(&self, _name: &str) -> Option<Arc<StorageClass>> {
                Some(self.cached.clone())
            }
            async fn create(&self, class: &StorageClass) -> Result<()> {
                self.inner.create(class).await
            }
            async fn apply(&self, class: &StorageClass) -> Result<()> {
                self.inner.apply(class).await
            }
            async fn delete(&self, name: &str) -> Result<()> {
                self.inner.delete(name).await
            }
        }

        let inner = Arc::new(FakeStorageClassStore::new());
        let racing = Arc::new(Racing {
            inner: inner.clone(),
            cached: Arc::new(stale),
        });
        let metrics = Arc::new(ControllerMetrics::new(&Registry::new()).unwrap());
        let r = StorageClassReconciler::new(racing, manila_config(), metrics);

        let action = r
            .apply_storage_class(manila_config().desired_storage_class(&ShareType::named("a")))
            .await
            .unwrap();

        assert_eq!(action, ReconcileAction::Replaced);
        assert!(inner.class("manila-a").is_some());
    }

    #[tokio::test]
    async fn test_stale_cache_create_race_is_benign() {
        let store = Arc::new(FakeStorageClassStore::new());
        let config = manila_config();
        store.insert(config.desired_storage_class(&ShareType::named("a")));
        store.hide_from_cache("manila-a");

        let r = reconciler(store.clone(), config);
        let action = r
            .apply_storage_class(manila_config().desired_storage_class(&ShareType::named("a")))
            .await
            .unwrap();

        assert_eq!(action, ReconcileAction::Created);
        assert_eq!(store.calls(), vec![StoreCall::Create("manila-a".into())]);
    }

    #[tokio::test]
    async fn test_partial_failure_attempts_every_item() {
        let store = Arc::new(FakeStorageClassStore::new());
        store.fail_on("manila-b");
        let r = reconciler(store.clone(), manila_config());

        let err = r.reconcile(&share_types(&["a", "b", "c"])).await.unwrap_err();

        assert_eq!(
            store.calls(),
            vec![
                StoreCall::Create("manila-a".into()),
                StoreCall::Create("manila-b".into()),
                StoreCall::Create("manila-c".into()),
            ]
        );
        assert!(store.class("manila-a").is_some());
        assert!(store.class("manila-c").is_some());

        assert_matches!(&err, Error::Aggregate(errors) if errors.len() == 1);
        assert!(err.to_string().contains("manila-b"));
        assert!(!err.to_string().contains("manila-a"));
    }

    #[tokio::test]
    async fn test_delete_failure_aborts_item() {
        let store = Arc::new(FakeStorageClassStore::new());
        let mut stale = manila_config().desired_storage_class(&ShareType::named("a"));
        stale.parameters = None;
        store.insert(stale);
        store.fail_on("manila-a");

        let r = reconciler(store.clone(), manila_config());
        let result = r
            .apply_storage_class(manila_config().desired_storage_class(&ShareType::named("a")))
            .await;

        assert_matches!(result, Err(Error::Internal(_)));
        assert_eq!(store.calls(), vec![StoreCall::Delete("manila-a".into())]);
    }

    #[test]
    fn test_parameters_equal_treats_none_as_empty() {
        let a = StorageClass::default();
        let mut b = StorageClass::default();
        b.parameters = Some(BTreeMap::new());
        assert!(parameters_equal(&a, &b));

        b.parameters = Some(BTreeMap::from([("type".to_string(), "x".to_string())]));
        assert!(!parameters_equal(&a, &b));
    }
}
