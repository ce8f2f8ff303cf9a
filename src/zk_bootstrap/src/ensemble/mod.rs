//! Ensemble membership coordination
//!
//! Split into submodules:
//! - [`identity`] IdentityAllocator: claims a cluster-unique server id once per instance
//! - [`fleet`] FleetDirectory: waits until every seat of the deployment group is filled
//! - [`probe`] EnsembleProbe: finds a peer that belongs to a quorum-holding ensemble
//! - [`reconfig`] ReconfigurationEngine: joins a live ensemble (observer, then participant)
//! - [`reconcile`] StaleMemberReconciler: removes ids of terminated instances
//! - [`coordinator`] BootstrapCoordinator: drives the whole bootstrap sequence

pub mod coordinator;
pub mod error;
pub mod fleet;
pub mod identity;
pub mod member;
pub mod probe;
pub mod reconcile;
pub mod reconfig;
pub mod traits;

pub use coordinator::{BootstrapCoordinator, BootstrapPath, BootstrapReport, Phase};
pub use error::{BootstrapError, ExternalError};
pub use member::{
    DynamicConfig, EnsembleMemberSpec, FleetMember, InstanceRef, NodeIdentity, Role, ServerId,
    ServicePorts,
};
pub use traits::{
    ClaimOutcome, DeploymentGroup, EnsembleControl, InstanceDirectory, InstanceFilter,
    InstanceRecord, LocalStore, Registry,
};

use crate::util::poll::PollPolicy;
use std::{path::PathBuf, time::Duration};

/// Knobs shared by every coordination component
#[derive(Debug, Clone)]
pub struct EnsembleSettings {
    pub ports: ServicePorts,
    /// Ids are claimed from `1..max_instances`
    pub max_instances: ServerId,
    /// Instance tag holding the claimed id
    pub identity_tag: String,
    /// Instance tag holding the deployment group name
    pub group_tag: String,
    /// Instance tag set once bootstrap completes
    pub completion_tag: String,
    /// Configuration directory handed to the service on start
    pub conf_dir: PathBuf,
    pub fleet_poll: PollPolicy,
    /// Consecutive listing failures tolerated while waiting for the fleet
    pub fleet_error_budget: u32,
    pub probe: PollPolicy,
    /// Pause after starting the local server before any reconfig command
    pub settle_delay: Duration,
    pub reconfig_retry: PollPolicy,
    pub reconcile_retry: PollPolicy,
}

impl Default for EnsembleSettings {
    fn default() -> Self {
        Self {
            ports: ServicePorts::default(),
            max_instances: 10,
            identity_tag: "zookeeper_id".to_string(),
            group_tag: "aws:autoscaling:groupName".to_string(),
            completion_tag: "bootstrap_finished_time".to_string(),
            conf_dir: PathBuf::from("/opt/zookeeper/conf"),
            fleet_poll: PollPolicy::unbounded(Duration::from_secs(60)),
            fleet_error_budget: 3,
            probe: PollPolicy::bounded(3, Duration::from_secs(3)),
            settle_delay: Duration::from_secs(30),
            reconfig_retry: PollPolicy::bounded(3, Duration::from_secs(3)),
            reconcile_retry: PollPolicy::bounded(3, Duration::from_secs(3)),
        }
    }
}
