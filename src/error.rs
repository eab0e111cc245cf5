//! Error types for the Manila CSI Operator
//!
//! Provides structured error types for the sync loop, the Kubernetes stores
//! and the OpenStack client.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Sync cancelled")]
    Cancelled,

    #[error("{}", format_aggregate(.0))]
    Aggregate(Vec<Error>),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("Resource already exists: {kind}/{name}")]
    ResourceExists { kind: String, name: String },

    #[error("Write conflict on {kind}/{name}")]
    Conflict { kind: String, name: String },

    #[error("Failed to sync StorageClass {name}: {source}")]
    StorageClassSync {
        name: String,
        #[source]
        source: Box<Error>,
    },

    // =========================================================================
    // OpenStack Errors
    // =========================================================================
    #[error("OpenStack authentication failed: {0}")]
    OpenStackAuth(String),

    #[error("OpenStack API error: {service} - {reason}")]
    OpenStackApi { service: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // =========================================================================
    // Metrics Errors
    // =========================================================================
    #[error("Metrics registration error: {0}")]
    Metrics(#[from] prometheus::Error),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_aggregate(errors: &[Error]) -> String {
    match errors {
        [] => String::new(),
        [single] => single.to_string(),
        many => format!(
            "[{}]",
            many.iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Classify a Kubernetes API error for the given object
    pub fn from_kube(err: kube::Error, kind: &str, name: &str) -> Self {
        let api_status = match &err {
            kube::Error::Api(resp) => Some((resp.code, resp.reason.clone())),
            _ => None,
        };
        let Some((code, reason)) = api_status else {
            return Error::Kube(err);
        };
        match (code, reason.as_str()) {
            (404, _) => Error::ResourceNotFound {
                kind: kind.to_string(),
                name: name.to_string(),
            },
            (409, "AlreadyExists") => Error::ResourceExists {
                kind: kind.to_string(),
                name: name.to_string(),
            },
            (409, _) => Error::Conflict {
                kind: kind.to_string(),
                name: name.to_string(),
            },
            _ => Error::Kube(err),
        }
    }

    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transient errors - retry with backoff
            Error::Kube(_)
            | Error::Http(_)
            | Error::Conflict { .. }
            | Error::OpenStackApi { .. } => ErrorAction::RequeueWithBackoff,

            // Credentials rarely fix themselves quickly
            Error::OpenStackAuth(_) => ErrorAction::RequeueAfter(Duration::from_secs(60)),

            // Configuration errors - don't retry automatically
            Error::Configuration(_) | Error::YamlParse(_) => ErrorAction::NoRequeue,

            Error::Cancelled => ErrorAction::NoRequeue,

            Error::StorageClassSync { source, .. } => source.action(),

            Error::Aggregate(errors) => {
                if errors.iter().any(|e| e.action() == ErrorAction::RequeueWithBackoff) {
                    ErrorAction::RequeueWithBackoff
                } else {
                    errors
                        .iter()
                        .map(Error::action)
                        .find(|a| *a != ErrorAction::NoRequeue)
                        .unwrap_or(ErrorAction::NoRequeue)
                }
            }

            // All other errors - retry with backoff
            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Check if this error means the object is gone
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::ResourceNotFound { .. })
            || matches!(self, Error::Kube(kube::Error::Api(resp)) if resp.code == 404)
    }

    /// Check if this error means the object was created concurrently
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::ResourceExists { .. })
            || matches!(self, Error::Kube(kube::Error::Api(resp)) if resp.code == 409 && resp.reason == "AlreadyExists")
    }

    /// Check if this error is an optimistic-concurrency write conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }
}

/// Result type alias for the operator
pub type Result<T> = std::result::Result<T, Error>;
