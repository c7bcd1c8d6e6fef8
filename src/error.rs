//! Unified error handling for the fleetscope crate
//!
//! Every module keeps its own error enum; this module folds them into a single
//! [`Error`] for code that crosses module boundaries (workers, the CLI).
//!
//! Workers use [`FleetscopeErrorTrait::is_recoverable`] to decide between
//! backing off and stopping, and the `needs_registration` / `is_stale_completion`
//! / `is_job_finished` probes to react to the coordinator's answers the same way
//! whether it runs in-process or behind HTTP.

use std::io;
use thiserror::Error;

use crate::coordinator::api::codes;
use crate::coordinator::{ClientError, CoordinatorError, RegistryError};
use crate::coordinator::server::ServerError;
use crate::crawler::FetchError;
use crate::frontier::FrontierError;
use crate::models::InvalidId;
use crate::notifications::ChannelError;
use crate::scope::ScopeError;
use crate::storage::{CheckpointError, StorageError};

pub trait FleetscopeErrorTrait: std::error::Error {
    /// Retrying the same call later may succeed
    fn is_recoverable(&self) -> bool;

    fn category(&self) -> ErrorCategory;
}

/// Which part of the system an error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Fetches, the coordinator client, webhooks
    Network,
    /// Scope patterns and identifiers
    Config,
    Frontier,
    /// Backends, checkpoints, local files
    Storage,
    /// Worker registry and job lifecycle
    Coordination,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Config => "config",
            Self::Frontier => "frontier",
            Self::Storage => "storage",
            Self::Coordination => "coordination",
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Scope error: {0}")]
    Scope(#[from] ScopeError),

    #[error("Frontier error: {0}")]
    Frontier(#[from] FrontierError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Coordinator client error: {0}")]
    Client(#[from] ClientError),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Notification error: {0}")]
    Notification(#[from] ChannelError),

    #[error(transparent)]
    InvalidId(#[from] InvalidId),

    #[error("I/O: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
}

fn storage_recoverable(e: &StorageError) -> bool {
    matches!(
        e,
        StorageError::Redis(_) | StorageError::Pool(_) | StorageError::Unavailable(_) | StorageError::Io(_)
    )
}

impl FleetscopeErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Storage(e) | Self::Frontier(FrontierError::Storage(e)) => storage_recoverable(e),
            Self::Coordinator(CoordinatorError::Frontier(FrontierError::Storage(e))) => {
                storage_recoverable(e)
            }
            Self::Coordinator(CoordinatorError::Registry(RegistryError::CapacityExceeded { .. }))
            | Self::Registry(RegistryError::CapacityExceeded { .. }) => true,
            Self::Client(e) => e.is_retryable(),
            Self::Fetch(e) => e.is_recoverable(),
            Self::Notification(e) => e.is_retryable(),
            Self::Io(_) => true,
            _ => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Fetch(_) | Self::Client(_) | Self::Notification(_) => ErrorCategory::Network,
            Self::Scope(_) | Self::InvalidId(_) => ErrorCategory::Config,
            Self::Frontier(FrontierError::Storage(_))
            | Self::Coordinator(CoordinatorError::Frontier(FrontierError::Storage(_))) => {
                ErrorCategory::Storage
            }
            Self::Frontier(_) | Self::Coordinator(CoordinatorError::Frontier(_)) => {
                ErrorCategory::Frontier
            }
            Self::Storage(_)
            | Self::Checkpoint(_)
            | Self::Coordinator(CoordinatorError::Checkpoint(_))
            | Self::Io(_)
            | Self::Json(_) => ErrorCategory::Storage,
            Self::Coordinator(_) | Self::Registry(_) | Self::Server(_) => ErrorCategory::Coordination,
        }
    }
}

impl Error {
    /// The coordinator does not know the worker (never registered or evicted)
    pub fn needs_registration(&self) -> bool {
        match self {
            Self::Coordinator(CoordinatorError::Registry(e)) | Self::Registry(e) => matches!(
                e,
                RegistryError::WorkerNotFound(_) | RegistryError::Evicted(_)
            ),
            Self::Client(e) => e.needs_registration(),
            _ => false,
        }
    }

    /// A completion arrived for a lease the worker no longer holds
    pub fn is_stale_completion(&self) -> bool {
        match self {
            Self::Coordinator(CoordinatorError::Frontier(FrontierError::LeaseNotHeld { .. }))
            | Self::Frontier(FrontierError::LeaseNotHeld { .. }) => true,
            Self::Client(e) => e.code() == Some(codes::LEASE_NOT_HELD),
            _ => false,
        }
    }

    /// The job reached a terminal state
    pub fn is_job_finished(&self) -> bool {
        match self {
            Self::Coordinator(CoordinatorError::JobFinished(_)) => true,
            Self::Client(e) => e.code() == Some(codes::JOB_FINISHED),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
