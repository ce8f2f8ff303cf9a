//! Server id allocation
//!
//! An instance keeps its id across restarts: the id is recorded in an
//! instance tag and looked up first. Only a first boot claims a new id, by
//! walking `1..max_instances` in ascending order and taking the first key the
//! registry lets us create.
//!
//! The tag write after a successful claim is not atomic with the claim. If it
//! fails, the next run claims a fresh slot and the orphaned key is cleaned up
//! by reconciliation once it is seen as not backed by a running instance.

use super::{
    coordinator::Phase,
    error::{BootstrapError, ExternalError},
    member::{InstanceRef, NodeIdentity, ServerId},
    traits::{ClaimOutcome, InstanceDirectory, Registry},
};
use tracing::{debug, info};

pub struct IdentityAllocator<'a, R, D> {
    registry: &'a R,
    directory: &'a D,
    identity_tag: &'a str,
    max_instances: ServerId,
}

impl<'a, R: Registry, D: InstanceDirectory> IdentityAllocator<'a, R, D> {
    pub fn new(
        registry: &'a R,
        directory: &'a D,
        identity_tag: &'a str,
        max_instances: ServerId,
    ) -> Self {
        Self {
            registry,
            directory,
            identity_tag,
            max_instances,
        }
    }

    /// Return the identity bound to `instance`, claiming one on first boot
    pub async fn acquire(&self, instance: &InstanceRef) -> Result<NodeIdentity, BootstrapError> {
        let existing = self
            .directory
            .get_tag(instance, self.identity_tag)
            .await
            .map_err(BootstrapError::phase(Phase::AcquireIdentity))?;

        if let Some(value) = existing {
            let id = parse_server_id(&value)
                .map_err(BootstrapError::phase(Phase::AcquireIdentity))?;
            info!("Instance {} already holds server id {}", instance, id);
            return Ok(NodeIdentity {
                id,
                bound_instance: instance.clone(),
            });
        }

        let id = self.claim_lowest().await?;

        self.directory
            .set_tag(instance, self.identity_tag, &id.to_string())
            .await
            .map_err(BootstrapError::phase(Phase::AcquireIdentity))?;

        info!("Instance {} claimed server id {}", instance, id);
        Ok(NodeIdentity {
            id,
            bound_instance: instance.clone(),
        })
    }

    /// Claim the lowest free id in `1..max_instances`
    async fn claim_lowest(&self) -> Result<ServerId, BootstrapError> {
        for id in 1..self.max_instances {
            match self
                .registry
                .create_if_absent(&id.to_string())
                .await
                .map_err(BootstrapError::phase(Phase::AcquireIdentity))?
            {
                ClaimOutcome::Claimed => return Ok(id),
                ClaimOutcome::AlreadyExists => debug!("Server id {} already claimed", id),
            }
        }

        Err(BootstrapError::AllocationExhausted {
            max: self.max_instances,
        })
    }
}

pub(crate) fn parse_server_id(value: &str) -> Result<ServerId, ExternalError> {
    match value.trim().parse::<ServerId>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(ExternalError::malformed(
            "server id tag",
            format!("'{value}' is not a positive integer"),
        )),
    }
}
