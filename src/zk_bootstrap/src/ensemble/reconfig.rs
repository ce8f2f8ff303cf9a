//! Joining a live ensemble
//!
//! The node enters as a non-voting observer first, so a slow or broken
//! newcomer can never cost the ensemble its quorum. Stale members are removed
//! before the promotion to participant, which keeps every single reconfig
//! step small. Any failed step aborts the join; falling back to a fresh
//! bootstrap here would duplicate membership.

use super::{
    error::{BootstrapError, ExternalError},
    member::{DynamicConfig, EnsembleMemberSpec, NodeIdentity, Role, ServerId},
    reconcile::StaleMemberReconciler,
    traits::{EnsembleControl, LocalStore, Registry},
    EnsembleSettings,
};
use crate::util::poll::PollPolicy;
use std::{collections::BTreeSet, fmt, net::IpAddr};
use tracing::{info, warn};

/// Steps of the join protocol, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinStep {
    PointStaticConfig,
    FetchMembership,
    WriteDynamicConfig,
    StartService,
    Promote,
}

impl fmt::Display for JoinStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JoinStep::PointStaticConfig => "point static config",
            JoinStep::FetchMembership => "fetch live membership",
            JoinStep::WriteDynamicConfig => "write dynamic config",
            JoinStep::StartService => "start service",
            JoinStep::Promote => "promote to participant",
        };
        f.write_str(name)
    }
}

pub struct ReconfigurationEngine<'a, R, C, L> {
    registry: &'a R,
    control: &'a C,
    local: &'a L,
    settings: &'a EnsembleSettings,
}

impl<'a, R, C, L> ReconfigurationEngine<'a, R, C, L>
where
    R: Registry,
    C: EnsembleControl,
    L: LocalStore,
{
    pub fn new(
        registry: &'a R,
        control: &'a C,
        local: &'a L,
        settings: &'a EnsembleSettings,
    ) -> Self {
        Self {
            registry,
            control,
            local,
            settings,
        }
    }

    /// Join the ensemble that `anchor` belongs to and return the stale ids removed on the way
    pub async fn join(
        &self,
        anchor: IpAddr,
        identity: &NodeIdentity,
        self_ip: IpAddr,
        running: &BTreeSet<ServerId>,
    ) -> Result<Vec<ServerId>, BootstrapError> {
        let id = identity.id;
        let ports = self.settings.ports;
        let failed = |step: JoinStep| {
            move |source: ExternalError| BootstrapError::ReconfigurationFailed {
                step,
                anchor,
                id,
                source,
            }
        };

        info!("Resetting static configuration");
        self.local
            .point_static_config()
            .await
            .map_err(failed(JoinStep::PointStaticConfig))?;

        info!("Adding server {} as observer to the configuration of {}", id, anchor);
        let lines = self
            .control
            .live_membership(anchor)
            .await
            .map_err(failed(JoinStep::FetchMembership))?;
        let mut config = DynamicConfig::parse_lines(lines.iter().map(String::as_str))
            .map_err(|err| {
                failed(JoinStep::FetchMembership)(ExternalError::malformed(
                    format!("live configuration of {anchor}"),
                    err,
                ))
            })?;

        let observer = EnsembleMemberSpec::new(id, self_ip, Role::Observer, ports);
        if let Some(previous) = config.upsert(observer) {
            warn!(
                "Server {} is already listed as {}; rewriting it as observer",
                id, previous.role
            );
        }

        self.local
            .write_dynamic_config(&config)
            .await
            .map_err(failed(JoinStep::WriteDynamicConfig))?;
        self.control
            .start(&self.settings.conf_dir)
            .await
            .map_err(failed(JoinStep::StartService))?;

        // Reconfig commands right after a cold start are unreliable.
        PollPolicy::settle("local server settle", self.settings.settle_delay).await;

        info!("Reconfiguration by removing stale servers");
        let removed = StaleMemberReconciler::new(
            self.registry,
            self.control,
            self.settings.reconcile_retry,
        )
        .reconcile(anchor, running)
        .await?;

        info!("Reconfiguration by adding server {} as participant", id);
        let participant = EnsembleMemberSpec::new(id, self_ip, Role::Participant, ports);
        let participant = &participant;
        let control = self.control;
        self.settings
            .reconfig_retry
            .retry("reconfig add", move |_| control.reconfig_add(anchor, participant))
            .await
            .map_err(|exhausted| failed(JoinStep::Promote)(exhausted.last_error))?;

        info!("Ensemble reconfigured with server {}", id);
        Ok(removed)
    }
}
