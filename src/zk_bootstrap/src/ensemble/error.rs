//! Error taxonomy for ensemble bootstrap
//!
//! [`ExternalError`] is what collaborators (cloud API, consensus service,
//! local files) report. [`BootstrapError`] is what the coordination logic
//! surfaces, with the step, identity and address that were in play.
//! "No functional ensemble found" is not an error: the probe returns `None`.

use super::{coordinator::Phase, member::ServerId, reconfig::JoinStep};
use crate::process::CommandError;
use std::{io, net::IpAddr};
use thiserror::Error;

/// Failure reported by an external collaborator
#[derive(Debug, Error)]
pub enum ExternalError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("{context}: {message}")]
    Malformed { context: String, message: String },

    #[error("{operation} failed: {message}")]
    Api { operation: String, message: String },
}

impl ExternalError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        ExternalError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn malformed(context: impl Into<String>, message: impl ToString) -> Self {
        ExternalError::Malformed {
            context: context.into(),
            message: message.to_string(),
        }
    }

    pub fn api(operation: impl Into<String>, message: impl ToString) -> Self {
        ExternalError::Api {
            operation: operation.into(),
            message: message.to_string(),
        }
    }
}

/// Fatal outcome of a bootstrap or reconciliation run
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Every candidate id is claimed. Needs operator action (range vs fleet size).
    #[error("identity space exhausted: every id in 1..{max} is already claimed")]
    AllocationExhausted { max: ServerId },

    #[error("fleet discovery failed for group '{group}'")]
    FleetDiscovery {
        group: String,
        #[source]
        source: ExternalError,
    },

    /// A join step failed. Never followed by a fresh bootstrap.
    #[error("join via {anchor} failed at step '{step}' for server {id}")]
    ReconfigurationFailed {
        step: JoinStep,
        anchor: IpAddr,
        id: ServerId,
        #[source]
        source: ExternalError,
    },

    /// Registry and live membership may disagree; left for the operator.
    #[error("removing stale servers [{ids}] failed after {attempts} attempts")]
    ReconciliationFailed {
        ids: String,
        attempts: u32,
        #[source]
        source: ExternalError,
    },

    #[error("{phase} failed")]
    Phase {
        phase: Phase,
        #[source]
        source: ExternalError,
    },
}

impl BootstrapError {
    pub(crate) fn phase(phase: Phase) -> impl FnOnce(ExternalError) -> Self {
        move |source| BootstrapError::Phase { phase, source }
    }
}
