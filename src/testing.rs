//! In-memory port implementations for unit tests

use crate::crd::ManagementState;
use crate::domain::conditions::{ConditionSet, ConditionUpdate};
use crate::domain::ports::{
    OperatorStatusStore, Runnable, ShareType, ShareTypeListing, ShareTypeSource, StorageClassStore,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::storage::v1::StorageClass;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Share Type Source
// =============================================================================

#[derive(Debug, Clone)]
pub enum FakeProbe {
    Types(Vec<ShareType>),
    NotSupported,
    Fail(String),
}

pub struct FakeShareTypes {
    probe: Mutex<FakeProbe>,
    calls: AtomicUsize,
}

impl FakeShareTypes {
    pub fn new(probe: FakeProbe) -> Self {
        Self {
            probe: Mutex::new(probe),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_names(names: &[&str]) -> Self {
        Self::new(FakeProbe::Types(
            names.iter().map(|n| ShareType::named(*n)).collect(),
        ))
    }

    pub fn set(&self, probe: FakeProbe) {
        *self.probe.lock() = probe;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ShareTypeSource for FakeShareTypes {
    async fn list_share_types(&self) -> Result<ShareTypeListing> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.probe.lock().clone() {
            FakeProbe::Types(types) => Ok(ShareTypeListing::Available(types)),
            FakeProbe::NotSupported => Ok(ShareTypeListing::NotSupported),
            FakeProbe::Fail(reason) => Err(Error::OpenStackApi {
                service: "manila".into(),
                reason,
            }),
        }
    }
}

// =============================================================================
// StorageClass Store
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Create(String),
    Apply(String),
    Delete(String),
}

/// StorageClass store whose cache and API are the same map, unless a name
/// is hidden from the cache to simulate a stale lister.
#[derive(Default)]
pub struct FakeStorageClassStore {
    classes: Mutex<BTreeMap<String, StorageClass>>,
    hidden: Mutex<BTreeSet<String>>,
    failing: Mutex<BTreeSet<String>>,
    calls: Mutex<Vec<StoreCall>>,
}

impl FakeStorageClassStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, class: StorageClass) {
        let name = class.metadata.name.clone().unwrap_or_default();
        self.classes.lock().insert(name, class);
    }

    pub fn class(&self, name: &str) -> Option<StorageClass> {
        self.classes.lock().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.classes.lock().keys().cloned().collect()
    }

    /// Make every mutation of `name` fail
    pub fn fail_on(&self, name: &str) {
        self.failing.lock().insert(name.to_string());
    }

    /// Undo every `fail_on`
    pub fn clear_failures(&self) {
        self.failing.lock().clear();
    }

    /// Make the cache miss `name` while the API still has it
    pub fn hide_from_cache(&self, name: &str) {
        self.hidden.lock().insert(name.to_string());
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn count(&self, matches: impl Fn(&StoreCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| matches(c)).count()
    }

    fn check_failing(&self, name: &str) -> Result<()> {
        if self.failing.lock().contains(name) {
            return Err(Error::Internal(format!("injected failure for {}", name)));
        }
        Ok(())
    }
}

fn name_of(class: &StorageClass) -> String {
    class.metadata.name.clone().unwrap_or_default()
}

#[async_trait]
impl StorageClassStore for FakeStorageClassStore {
    fn get(&self, name: &str) -> Option<Arc<StorageClass>> {
        if self.hidden.lock().contains(name) {
            return None;
        }
        self.classes.lock().get(name).cloned().map(Arc::new)
    }

    async fn create(&self, class: &StorageClass) -> Result<()> {
        let name = name_of(class);
        self.calls.lock().push(StoreCall::Create(name.clone()));
        self.check_failing(&name)?;
        let mut classes = self.classes.lock();
        if classes.contains_key(&name) {
            return Err(Error::ResourceExists {
                kind: "StorageClass".into(),
                name,
            });
        }
        classes.insert(name, class.clone());
        Ok(())
    }

    async fn apply(&self, class: &StorageClass) -> Result<()> {
        let name = name_of(class);
        self.calls.lock().push(StoreCall::Apply(name.clone()));
        self.check_failing(&name)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.calls.lock().push(StoreCall::Delete(name.to_string()));
        self.check_failing(name)?;
        match self.classes.lock().remove(name) {
            Some(_) => Ok(()),
            None => Err(Error::ResourceNotFound {
                kind: "StorageClass".into(),
                name: name.to_string(),
            }),
        }
    }
}

// =============================================================================
// Operator Status Store
// =============================================================================

pub struct FakeStatusStore {
    state: Mutex<ManagementState>,
    conditions: Mutex<ConditionSet>,
    updates: AtomicUsize,
    fail_updates: Mutex<Option<String>>,
}

impl FakeStatusStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ManagementState::Managed),
            conditions: Mutex::new(ConditionSet::new()),
            updates: AtomicUsize::new(0),
            fail_updates: Mutex::new(None),
        }
    }

    pub fn set_state(&self, state: ManagementState) {
        *self.state.lock() = state;
    }

    pub fn seed(&self, update: ConditionUpdate) {
        update.apply(&mut self.conditions.lock(), Utc::now());
    }

    pub fn fail_updates(&self, reason: Option<&str>) {
        *self.fail_updates.lock() = reason.map(str::to_string);
    }

    pub fn conditions(&self) -> ConditionSet {
        self.conditions.lock().clone()
    }

    /// Number of update calls, failed ones included
    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OperatorStatusStore for FakeStatusStore {
    async fn management_state(&self) -> Result<ManagementState> {
        Ok(*self.state.lock())
    }

    async fn update_conditions(&self, update: ConditionUpdate) -> Result<()> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.fail_updates.lock().clone() {
            return Err(Error::Internal(reason));
        }
        update.apply(&mut self.conditions.lock(), Utc::now());
        Ok(())
    }
}

// =============================================================================
// Runnable
// =============================================================================

/// Dependent controller that counts how often it was started
#[derive(Default)]
pub struct CountingRunnable {
    starts: AtomicUsize,
    workers: AtomicUsize,
}

impl CountingRunnable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn workers(&self) -> usize {
        self.workers.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Runnable for CountingRunnable {
    fn name(&self) -> &str {
        "counting"
    }

    async fn run(&self, cancel: CancellationToken, workers: usize) {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.workers.store(workers, Ordering::SeqCst);
        cancel.cancelled().await;
    }
}

/// Poll `check` until it holds or a second passes
pub async fn eventually(check: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    check()
}
