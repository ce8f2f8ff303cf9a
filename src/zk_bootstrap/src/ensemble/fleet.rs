//! Fleet discovery
//!
//! Lists the running instances of the node's deployment group that already
//! carry an identity tag, and waits until every seat of the group is filled.
//! Probing or writing a fresh configuration from a partial fleet could form
//! a splintered or undersized ensemble, so there is no internal timeout: a
//! supervisor outside this process owns that decision.

use super::{
    error::{BootstrapError, ExternalError},
    identity::parse_server_id,
    member::{FleetMember, NodeIdentity, ServerId},
    traits::{DeploymentGroup, InstanceDirectory, InstanceFilter, InstanceRecord},
    EnsembleSettings,
};
use std::{cell::Cell, collections::HashMap};
use tracing::{info, warn};

pub struct FleetDirectory<'a, D> {
    directory: &'a D,
    settings: &'a EnsembleSettings,
}

impl<'a, D: InstanceDirectory> FleetDirectory<'a, D> {
    pub fn new(directory: &'a D, settings: &'a EnsembleSettings) -> Self {
        Self {
            directory,
            settings,
        }
    }

    fn filter(&self, group: &DeploymentGroup) -> InstanceFilter {
        InstanceFilter {
            group_tag: self.settings.group_tag.clone(),
            group_name: group.name.clone(),
            identity_tag: self.settings.identity_tag.clone(),
        }
    }

    /// One listing of the group, sorted by server id.
    ///
    /// `me` marks the caller's own instance and overrides whatever identity
    /// tag the listing shows for it.
    pub async fn snapshot(
        &self,
        group: &DeploymentGroup,
        me: Option<&NodeIdentity>,
    ) -> Result<Vec<FleetMember>, ExternalError> {
        let records = self.directory.list_instances(&self.filter(group)).await?;
        Ok(to_members(records, &self.settings.identity_tag, me))
    }

    /// Block until the group's desired capacity is reached and `me` is listed
    pub async fn await_full_fleet(
        &self,
        group: &DeploymentGroup,
        me: &NodeIdentity,
    ) -> Result<Vec<FleetMember>, BootstrapError> {
        let failures = Cell::new(0u32);
        let failures = &failures;
        let budget = self.settings.fleet_error_budget;
        let capacity = group.desired_capacity;

        info!("Waiting for {} instances in group '{}'", capacity, group.name);

        let members = self
            .settings
            .fleet_poll
            .poll_until("fleet discovery", move |_| async move {
                match self.snapshot(group, Some(me)).await {
                    Ok(members) => {
                        failures.set(0);
                        let has_self = members.iter().any(|m| m.is_self);
                        info!(
                            "Found {} of {} instances in group '{}'",
                            members.len(),
                            capacity,
                            group.name
                        );
                        if members.len() >= capacity && has_self {
                            Ok(Some(members))
                        } else {
                            if !has_self {
                                info!("Own instance {} not listed yet", me.bound_instance);
                            }
                            Ok(None)
                        }
                    }
                    Err(err) => {
                        let count = failures.get() + 1;
                        failures.set(count);
                        if count > budget {
                            Err(err)
                        } else {
                            warn!(
                                "Listing group '{}' failed ({} of {} tolerated): {}",
                                group.name, count, budget, err
                            );
                            Ok(None)
                        }
                    }
                }
            })
            .await
            .map_err(|source| BootstrapError::FleetDiscovery {
                group: group.name.clone(),
                source,
            })?;

        let members = members.ok_or_else(|| BootstrapError::FleetDiscovery {
            group: group.name.clone(),
            source: ExternalError::api(
                "fleet discovery",
                format!("desired capacity {capacity} not reached within the poll limit"),
            ),
        })?;

        info!("Total instances in group '{}': {}", group.name, members.len());
        Ok(members)
    }
}

fn to_members(
    records: Vec<InstanceRecord>,
    identity_tag: &str,
    me: Option<&NodeIdentity>,
) -> Vec<FleetMember> {
    let mut seen: HashMap<ServerId, String> = HashMap::new();
    let mut members: Vec<FleetMember> = records
        .into_iter()
        .filter_map(|record| {
            let is_self = me.is_some_and(|me| me.bound_instance == record.instance);
            let identity = match me {
                Some(me) if is_self => me.clone(),
                _ => {
                    let tag = record.tags.get(identity_tag)?;
                    match parse_server_id(tag) {
                        Ok(id) => NodeIdentity {
                            id,
                            bound_instance: record.instance.clone(),
                        },
                        Err(err) => {
                            warn!("Skipping instance {}: {}", record.instance, err);
                            return None;
                        }
                    }
                }
            };

            if let Some(other) = seen.insert(identity.id, record.instance.to_string()) {
                warn!(
                    "Server id {} is tagged on both {} and {}",
                    identity.id, other, record.instance
                );
            }

            Some(FleetMember {
                instance: record.instance,
                private_ip: record.private_ip,
                identity: Some(identity),
                is_self,
            })
        })
        .collect();

    members.sort_by_key(|m| m.id());
    members
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ensemble::member::InstanceRef;
    use std::net::{IpAddr, Ipv4Addr};

    fn record(instance: &str, last: u8, tag: Option<&str>) -> InstanceRecord {
        InstanceRecord {
            instance: InstanceRef::new(instance),
            private_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)),
            tags: tag
                .map(|t| HashMap::from([("zookeeper_id".to_string(), t.to_string())]))
                .unwrap_or_default(),
        }
    }

    #[test]
    fn test_to_members_marks_self_and_sorts() {
        let me = NodeIdentity {
            id: 2,
            bound_instance: InstanceRef::new("i-b"),
        };
        let members = to_members(
            vec![
                record("i-c", 3, Some("3")),
                record("i-b", 2, None),
                record("i-a", 1, Some("1")),
            ],
            "zookeeper_id",
            Some(&me),
        );

        let ids: Vec<_> = members.iter().map(|m| m.id()).collect();
        assert_eq!(ids, vec![Some(1), Some(2), Some(3)]);
        assert!(members[1].is_self);
        assert!(!members[0].is_self && !members[2].is_self);
    }

    #[test]
    fn test_to_members_skips_untagged_and_malformed_peers() {
        let members = to_members(
            vec![
                record("i-a", 1, Some("1")),
                record("i-b", 2, None),
                record("i-c", 3, Some("three")),
            ],
            "zookeeper_id",
            None,
        );

        assert_eq!(members.len(), 1);
        assert_eq!(members[0].instance, InstanceRef::new("i-a"));
    }
}
