//! Collaborator interfaces
//!
//! The coordination logic only talks to the outside world through these
//! traits: the identity registry, the cloud instance directory, the
//! consensus service control surface, and the node's local files.
//! Production implementations live in `aws`, `zookeeper` and `local`; the
//! integration tests drive the same logic against an in-memory cluster.

use super::{
    error::ExternalError,
    member::{DynamicConfig, EnsembleMemberSpec, InstanceRef, ServerId},
};
use std::{collections::HashMap, net::IpAddr, path::Path};

/// Result of an atomic create-if-absent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    AlreadyExists,
}

/// Shared identity registry, scoped to one namespace.
///
/// `create_if_absent` is the only mutual-exclusion primitive in the system:
/// exactly one caller may see `Claimed` for a given key.
#[allow(async_fn_in_trait)]
pub trait Registry {
    async fn create_if_absent(&self, key: &str) -> Result<ClaimOutcome, ExternalError>;

    async fn list_keys(&self) -> Result<Vec<String>, ExternalError>;

    async fn delete_keys(&self, keys: &[String]) -> Result<(), ExternalError>;
}

/// A running instance as reported by the control plane
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRecord {
    pub instance: InstanceRef,
    pub private_ip: IpAddr,
    pub tags: HashMap<String, String>,
}

/// Running instances of one deployment group that carry an identity tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceFilter {
    pub group_tag: String,
    pub group_name: String,
    pub identity_tag: String,
}

/// Deployment (auto-scaling) group of an instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentGroup {
    pub name: String,
    pub desired_capacity: usize,
}

/// Cloud control plane: instance metadata and tags
#[allow(async_fn_in_trait)]
pub trait InstanceDirectory {
    /// The instance this process runs on
    async fn self_instance(&self) -> Result<InstanceRef, ExternalError>;

    async fn get_tag(
        &self,
        instance: &InstanceRef,
        key: &str,
    ) -> Result<Option<String>, ExternalError>;

    async fn set_tag(
        &self,
        instance: &InstanceRef,
        key: &str,
        value: &str,
    ) -> Result<(), ExternalError>;

    async fn list_instances(
        &self,
        filter: &InstanceFilter,
    ) -> Result<Vec<InstanceRecord>, ExternalError>;

    async fn deployment_group(
        &self,
        instance: &InstanceRef,
    ) -> Result<DeploymentGroup, ExternalError>;
}

/// Control surface of the consensus service
#[allow(async_fn_in_trait)]
pub trait EnsembleControl {
    /// Start the local server with the configuration in `conf_dir`
    async fn start(&self, conf_dir: &Path) -> Result<(), ExternalError>;

    /// Four-letter status word (`srvr`) against `ip:port`; returns the raw response
    async fn status(&self, ip: IpAddr, port: u16) -> Result<String, ExternalError>;

    /// Member lines of the live configuration, as seen by `anchor`
    async fn live_membership(&self, anchor: IpAddr) -> Result<Vec<String>, ExternalError>;

    async fn reconfig_add(
        &self,
        anchor: IpAddr,
        member: &EnsembleMemberSpec,
    ) -> Result<(), ExternalError>;

    async fn reconfig_remove(&self, anchor: IpAddr, ids: &[ServerId]) -> Result<(), ExternalError>;
}

/// Local persisted files of the node
#[allow(async_fn_in_trait)]
pub trait LocalStore {
    /// Write the identity file (`myid`), keeping a backup of the old one
    async fn write_identity(&self, id: ServerId) -> Result<(), ExternalError>;

    /// Write the dynamic configuration file, keeping a backup of the old one
    async fn write_dynamic_config(&self, config: &DynamicConfig) -> Result<(), ExternalError>;

    /// Point the static configuration at the dynamic configuration file
    async fn point_static_config(&self) -> Result<(), ExternalError>;
}
