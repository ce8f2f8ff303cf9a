//! Bootstrap sequence
//!
//! ```text
//! INIT -> ACQUIRE_IDENTITY -> AWAIT_FLEET -> PROBE -> {FRESH | JOIN} -> RECONCILE -> DONE
//! ```
//!
//! Any unrecovered error ends in FAILED. There is no retry at this level:
//! sub-components retry what is safe to retry, and a supervisor restarts the
//! whole process otherwise. Re-running from the start converges on the same
//! state because the identity is sticky and reconciliation is a no-op once
//! clean.

use super::{
    error::{BootstrapError, ExternalError},
    fleet::FleetDirectory,
    identity::IdentityAllocator,
    member::{
        DynamicConfig, EnsembleMemberSpec, FleetMember, InstanceRef, NodeIdentity, Role, ServerId,
    },
    probe::EnsembleProbe,
    reconcile::StaleMemberReconciler,
    reconfig::ReconfigurationEngine,
    traits::{EnsembleControl, InstanceDirectory, LocalStore, Registry},
    EnsembleSettings,
};
use crate::util::timestamp::format_tag_timestamp;
use itertools::Itertools;
use std::{cell::Cell, collections::BTreeSet, fmt, net::IpAddr};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    AcquireIdentity,
    AwaitFleet,
    Probe,
    Fresh,
    Join,
    Reconcile,
    Done,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "init",
            Phase::AcquireIdentity => "acquire identity",
            Phase::AwaitFleet => "await fleet",
            Phase::Probe => "probe",
            Phase::Fresh => "fresh bootstrap",
            Phase::Join => "join",
            Phase::Reconcile => "reconcile",
            Phase::Done => "done",
            Phase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Which branch the bootstrap took
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapPath {
    /// No functional ensemble was found; the fleet formed a new one
    Fresh,
    /// Joined the live ensemble reached through `anchor`
    Join { anchor: IpAddr },
}

/// Outcome of a successful bootstrap
#[derive(Debug, Clone)]
pub struct BootstrapReport {
    pub identity: NodeIdentity,
    pub ip: IpAddr,
    pub path: BootstrapPath,
    pub fleet: Vec<FleetMember>,
    /// Stale ids removed from the ensemble and released in the registry
    pub removed: Vec<ServerId>,
}

pub struct BootstrapCoordinator<R, D, C, L> {
    registry: R,
    directory: D,
    control: C,
    local: L,
    settings: EnsembleSettings,
    phase: Cell<Phase>,
}

impl<R, D, C, L> BootstrapCoordinator<R, D, C, L> {
    /// `local` is only used by [`run`](Self::run); standalone reconciliation
    /// accepts `()` there.
    pub fn new(
        registry: R,
        directory: D,
        control: C,
        local: L,
        settings: EnsembleSettings,
    ) -> Self {
        Self {
            registry,
            directory,
            control,
            local,
            settings,
            phase: Cell::new(Phase::Init),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase.get()
    }

    pub fn settings(&self) -> &EnsembleSettings {
        &self.settings
    }

    fn enter(&self, phase: Phase) {
        debug!("Phase {} -> {}", self.phase.get(), phase);
        self.phase.set(phase);
    }
}

impl<R, D, C, L> BootstrapCoordinator<R, D, C, L>
where
    R: Registry,
    D: InstanceDirectory,
    C: EnsembleControl,
    L: LocalStore,
{
    /// Run the whole bootstrap sequence for the local instance
    pub async fn run(&self) -> Result<BootstrapReport, BootstrapError> {
        match self.run_phases().await {
            Ok(report) => {
                self.enter(Phase::Done);
                Ok(report)
            }
            Err(err) => {
                error!("Bootstrap failed in phase '{}': {}", self.phase.get(), err);
                self.enter(Phase::Failed);
                Err(err)
            }
        }
    }

    async fn run_phases(&self) -> Result<BootstrapReport, BootstrapError> {
        self.enter(Phase::AcquireIdentity);
        let instance = self
            .directory
            .self_instance()
            .await
            .map_err(BootstrapError::phase(Phase::AcquireIdentity))?;
        let identity = IdentityAllocator::new(
            &self.registry,
            &self.directory,
            &self.settings.identity_tag,
            self.settings.max_instances,
        )
        .acquire(&instance)
        .await?;
        self.local
            .write_identity(identity.id)
            .await
            .map_err(BootstrapError::phase(Phase::AcquireIdentity))?;

        self.enter(Phase::AwaitFleet);
        let group = self
            .directory
            .deployment_group(&instance)
            .await
            .map_err(BootstrapError::phase(Phase::AwaitFleet))?;
        let fleet = FleetDirectory::new(&self.directory, &self.settings)
            .await_full_fleet(&group, &identity)
            .await?;
        let self_ip =
            self_ip(&fleet, &instance).map_err(BootstrapError::phase(Phase::AwaitFleet))?;
        let running = running_ids(&fleet);
        let peers: Vec<IpAddr> = fleet
            .iter()
            .filter(|member| !member.is_self)
            .map(|member| member.private_ip)
            .collect();
        info!(
            "Server {} at {} with peers [{}]",
            identity.id,
            self_ip,
            peers.iter().join(", ")
        );

        self.enter(Phase::Probe);
        let anchor =
            EnsembleProbe::new(&self.control, self.settings.ports.client, self.settings.probe)
                .probe(&peers)
                .await;

        let reconciler = StaleMemberReconciler::new(
            &self.registry,
            &self.control,
            self.settings.reconcile_retry,
        );
        let (path, mut removed) = match anchor {
            None => {
                self.enter(Phase::Fresh);
                self.configure_fresh(&fleet).await?;
                (BootstrapPath::Fresh, Vec::new())
            }
            Some(anchor) => {
                self.enter(Phase::Join);
                let removed = ReconfigurationEngine::new(
                    &self.registry,
                    &self.control,
                    &self.local,
                    &self.settings,
                )
                .join(anchor, &identity, self_ip, &running)
                .await?;
                (BootstrapPath::Join { anchor }, removed)
            }
        };

        self.enter(Phase::Reconcile);
        match path {
            BootstrapPath::Join { anchor } => {
                removed.extend(reconciler.reconcile(anchor, &running).await?);
            }
            // No responding ensemble could also mean one that lost quorum and
            // still lists the departed ids, so their keys are kept.
            BootstrapPath::Fresh => info!(
                "No live ensemble to remove stale servers from; registry left untouched"
            ),
        }

        self.mark_complete(&instance).await;
        info!("Bootstrap of server {} finished ({:?})", identity.id, path);

        Ok(BootstrapReport {
            identity,
            ip: self_ip,
            path,
            fleet,
            removed,
        })
    }

    /// Write a configuration listing the whole fleet as participants and start once
    async fn configure_fresh(&self, fleet: &[FleetMember]) -> Result<(), BootstrapError> {
        let config = fresh_config(fleet, &self.settings);
        info!(
            "No functional ensemble found; configuring a new one with {} participants",
            config.len()
        );
        debug!("Dynamic configuration:\n{}", config);

        self.local
            .point_static_config()
            .await
            .map_err(BootstrapError::phase(Phase::Fresh))?;
        self.local
            .write_dynamic_config(&config)
            .await
            .map_err(BootstrapError::phase(Phase::Fresh))?;
        self.control
            .start(&self.settings.conf_dir)
            .await
            .map_err(BootstrapError::phase(Phase::Fresh))?;
        Ok(())
    }

    async fn mark_complete(&self, instance: &InstanceRef) {
        let stamp = format_tag_timestamp();
        if let Err(err) = self
            .directory
            .set_tag(instance, &self.settings.completion_tag, &stamp)
            .await
        {
            warn!(
                "Could not set completion tag '{}' on {}: {}",
                self.settings.completion_tag, instance, err
            );
        }
    }
}

impl<R, D, C, L> BootstrapCoordinator<R, D, C, L>
where
    R: Registry,
    D: InstanceDirectory,
    C: EnsembleControl,
{
    /// Remove stale ids outside of a bootstrap, for periodic maintenance.
    ///
    /// The fleet is listed once, without waiting for full capacity. A partial
    /// listing would make live members look stale, so nothing is removed
    /// unless the group is at its desired capacity. Without an explicit
    /// `anchor` the fleet is probed for one; with no functional ensemble the
    /// run ends without touching the registry.
    pub async fn reconcile_standalone(
        &self,
        anchor: Option<IpAddr>,
    ) -> Result<Vec<ServerId>, BootstrapError> {
        self.enter(Phase::AwaitFleet);
        let instance = self
            .directory
            .self_instance()
            .await
            .map_err(BootstrapError::phase(Phase::AwaitFleet))?;
        let group = self
            .directory
            .deployment_group(&instance)
            .await
            .map_err(BootstrapError::phase(Phase::AwaitFleet))?;
        let fleet = FleetDirectory::new(&self.directory, &self.settings)
            .snapshot(&group, None)
            .await
            .map_err(|source| BootstrapError::FleetDiscovery {
                group: group.name.clone(),
                source,
            })?;

        if fleet.len() < group.desired_capacity {
            warn!(
                "Group '{}' lists {} of {} instances; skipping reconciliation",
                group.name,
                fleet.len(),
                group.desired_capacity
            );
            self.enter(Phase::Done);
            return Ok(Vec::new());
        }

        let anchor = match anchor {
            Some(anchor) => Some(anchor),
            None => {
                self.enter(Phase::Probe);
                let candidates: Vec<IpAddr> = fleet.iter().map(|m| m.private_ip).collect();
                EnsembleProbe::new(&self.control, self.settings.ports.client, self.settings.probe)
                    .probe(&candidates)
                    .await
            }
        };
        let Some(anchor) = anchor else {
            info!("No functional ensemble to reconcile against");
            self.enter(Phase::Done);
            return Ok(Vec::new());
        };

        self.enter(Phase::Reconcile);
        let result = StaleMemberReconciler::new(
            &self.registry,
            &self.control,
            self.settings.reconcile_retry,
        )
        .reconcile(anchor, &running_ids(&fleet))
        .await;

        match result {
            Ok(removed) => {
                self.enter(Phase::Done);
                Ok(removed)
            }
            Err(err) => {
                error!("Reconciliation via {} failed: {}", anchor, err);
                self.enter(Phase::Failed);
                Err(err)
            }
        }
    }
}

/// Every fleet member as a participant, keyed by its server id
pub fn fresh_config(fleet: &[FleetMember], settings: &EnsembleSettings) -> DynamicConfig {
    DynamicConfig::from_members(fleet.iter().filter_map(|member| {
        member.id().map(|id| {
            EnsembleMemberSpec::new(id, member.private_ip, Role::Participant, settings.ports)
        })
    }))
}

fn running_ids(fleet: &[FleetMember]) -> BTreeSet<ServerId> {
    fleet.iter().filter_map(FleetMember::id).collect()
}

fn self_ip(fleet: &[FleetMember], instance: &InstanceRef) -> Result<IpAddr, ExternalError> {
    fleet
        .iter()
        .find(|member| member.is_self)
        .map(|member| member.private_ip)
        .ok_or_else(|| {
            ExternalError::malformed("fleet listing", format!("own instance {instance} is missing"))
        })
}
