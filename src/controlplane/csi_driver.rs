//! CSI driver registration
//!
//! Keeps the cluster-scoped `CSIDriver` object of the Manila CSI driver in
//! place. Started by the Manila controller once share types were found.

use crate::controlplane::manila::MIN_RESYNC_INTERVAL;
use crate::domain::ports::Runnable;
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::storage::v1::{CSIDriver, CSIDriverSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "manila-csi-operator";

/// Label marking objects owned by this operator
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// The CSIDriver object for `name`
pub fn desired_csi_driver(name: &str) -> CSIDriver {
    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_BY_LABEL.to_string(), FIELD_MANAGER.to_string());

    CSIDriver {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: CSIDriverSpec {
            attach_required: Some(false),
            pod_info_on_mount: Some(false),
            volume_lifecycle_modes: Some(vec!["Persistent".to_string()]),
            ..Default::default()
        },
    }
}

/// Controller that applies the CSIDriver object until cancelled
pub struct CsiDriverController {
    api: Api<CSIDriver>,
    driver_name: String,
    resync_interval: Duration,
}

impl CsiDriverController {
    pub fn new(client: Client, driver_name: impl Into<String>, resync_interval: Duration) -> Self {
        Self {
            api: Api::all(client),
            driver_name: driver_name.into(),
            resync_interval,
        }
    }

    async fn apply(&self) -> Result<()> {
        let driver = desired_csi_driver(&self.driver_name);
        self.api
            .patch(
                &self.driver_name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&driver),
            )
            .await
            .map_err(|err| Error::from_kube(err, "CSIDriver", &self.driver_name))?;
        debug!("Applied CSIDriver {}", self.driver_name);
        Ok(())
    }
}

#[async_trait]
impl Runnable for CsiDriverController {
    fn name(&self) -> &str {
        "csi-driver"
    }

    async fn run(&self, cancel: CancellationToken, workers: usize) {
        info!(
            "Registering CSIDriver {} ({} worker)",
            self.driver_name, workers
        );

        let mut ticker = tokio::time::interval(self.resync_interval.max(MIN_RESYNC_INTERVAL));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = self.apply().await {
                        warn!("Failed to apply CSIDriver {}: {}", self.driver_name, err);
                    }
                }
            }
        }
    }
}
