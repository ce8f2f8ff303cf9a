//! Stale member removal
//!
//! Every id ever claimed has a registry key. Ids whose owning instance is no
//! longer running are removed from the live ensemble first and only then
//! released in the registry, so an id never returns to circulation while the
//! ensemble still counts it as a member.
//!
//! Several booting nodes may reconcile at the same time. Each attempt
//! re-reads the registry and recomputes the plan, so a removal that lost a
//! race converges on the next attempt.

use super::{
    error::{BootstrapError, ExternalError},
    identity::parse_server_id,
    member::ServerId,
    traits::{EnsembleControl, Registry},
};
use crate::util::poll::{Exhausted, PollPolicy};
use itertools::Itertools;
use std::{
    cell::RefCell,
    collections::{BTreeMap, BTreeSet},
    net::IpAddr,
};
use tracing::{debug, info, warn};

/// Claimed ids that are not backed by a running instance
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationPlan {
    /// Stale id -> registry key it was claimed under
    identities_to_remove: BTreeMap<ServerId, String>,
}

impl ReconciliationPlan {
    /// Diff the claimed registry keys against the running ids.
    ///
    /// Keys that are not server ids are left alone.
    pub fn compute(claimed_keys: &[String], running: &BTreeSet<ServerId>) -> Self {
        let identities_to_remove = claimed_keys
            .iter()
            .filter_map(|key| match parse_server_id(key) {
                Ok(id) if !running.contains(&id) => Some((id, key.clone())),
                Ok(_) => None,
                Err(_) => {
                    warn!("Ignoring registry key '{}': not a server id", key);
                    None
                }
            })
            .collect();
        Self {
            identities_to_remove,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.identities_to_remove.is_empty()
    }

    pub fn ids(&self) -> Vec<ServerId> {
        self.identities_to_remove.keys().copied().collect()
    }

    pub fn registry_keys(&self) -> Vec<String> {
        self.identities_to_remove.values().cloned().collect()
    }

    /// Comma-joined ids, the form `reconfig -remove` takes
    pub fn joined(&self) -> String {
        self.identities_to_remove.keys().join(",")
    }
}

pub struct StaleMemberReconciler<'a, R, C> {
    registry: &'a R,
    control: &'a C,
    policy: PollPolicy,
}

impl<'a, R: Registry, C: EnsembleControl> StaleMemberReconciler<'a, R, C> {
    pub fn new(registry: &'a R, control: &'a C, policy: PollPolicy) -> Self {
        Self {
            registry,
            control,
            policy,
        }
    }

    /// Remove every claimed id missing from `running` and return the removed ids.
    ///
    /// Ids are removed from the live ensemble through `anchor` before their
    /// registry keys are deleted. There is no registry-only variant: without a
    /// functional ensemble nothing proves the ids are gone from every
    /// surviving server's configuration.
    pub async fn reconcile(
        &self,
        anchor: IpAddr,
        running: &BTreeSet<ServerId>,
    ) -> Result<Vec<ServerId>, BootstrapError> {
        let last_attempted = RefCell::new(String::new());
        let last_attempted = &last_attempted;

        let result = self
            .policy
            .retry("stale member removal", move |_| async move {
                let claimed = self.registry.list_keys().await?;
                let plan = ReconciliationPlan::compute(&claimed, running);
                if plan.is_empty() {
                    debug!("No stale server ids to remove");
                    return Ok(Vec::new());
                }

                *last_attempted.borrow_mut() = plan.joined();
                self.apply(anchor, &plan).await?;
                Ok::<_, ExternalError>(plan.ids())
            })
            .await;

        match result {
            Ok(removed) => Ok(removed),
            Err(Exhausted {
                attempts,
                last_error,
            }) => Err(BootstrapError::ReconciliationFailed {
                ids: last_attempted.take(),
                attempts,
                source: last_error,
            }),
        }
    }

    /// Execute a computed plan: live removal, then registry release.
    ///
    /// An empty plan makes no external call.
    pub async fn apply(
        &self,
        anchor: IpAddr,
        plan: &ReconciliationPlan,
    ) -> Result<(), ExternalError> {
        if plan.is_empty() {
            return Ok(());
        }

        let ids = plan.joined();
        info!("Removing servers {} from the ensemble via {}", ids, anchor);
        self.control.reconfig_remove(anchor, &plan.ids()).await?;

        info!("Releasing registry entries for servers {}", ids);
        self.registry.delete_keys(&plan.registry_keys()).await?;
        Ok(())
    }
}
