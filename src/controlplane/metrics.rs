//! Prometheus metrics for the Manila controller

use crate::controlplane::storage_class::ReconcileAction;
use crate::error::Result;
use prometheus::{IntCounterVec, IntGauge, Opts, Registry};

/// Counters and gauges exported by the controller
pub struct ControllerMetrics {
    syncs: IntCounterVec,
    storage_classes: IntCounterVec,
    enabled: IntGauge,
}

impl ControllerMetrics {
    /// Create the metrics and register them with `registry`
    pub fn new(registry: &Registry) -> Result<Self> {
        let syncs = IntCounterVec::new(
            Opts::new("manila_controller_syncs_total", "Manila controller syncs by result"),
            &["result"],
        )?;
        let storage_classes = IntCounterVec::new(
            Opts::new(
                "manila_controller_storage_classes_total",
                "StorageClass reconcile actions",
            ),
            &["action"],
        )?;
        let enabled = IntGauge::new(
            "manila_controller_enabled",
            "Whether Manila was detected with at least one share type",
        )?;

        registry.register(Box::new(syncs.clone()))?;
        registry.register(Box::new(storage_classes.clone()))?;
        registry.register(Box::new(enabled.clone()))?;

        Ok(Self {
            syncs,
            storage_classes,
            enabled,
        })
    }

    pub fn record_sync(&self, result: &str) {
        self.syncs.with_label_values(&[result]).inc();
    }

    pub fn record_storage_class(&self, action: ReconcileAction) {
        self.storage_classes
            .with_label_values(&[action.as_str()])
            .inc();
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.set(i64::from(enabled));
    }

    pub fn syncs(&self, result: &str) -> u64 {
        self.syncs.with_label_values(&[result]).get()
    }

    pub fn storage_classes(&self, action: ReconcileAction) -> u64 {
        self.storage_classes
            .with_label_values(&[action.as_str()])
            .get()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.get() == 1
    }
}
