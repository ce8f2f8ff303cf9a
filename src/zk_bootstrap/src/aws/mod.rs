//! AWS control plane through the `aws` command line
//!
//! - Registry: one CloudWatch Logs stream per claimed server id in a
//!   dedicated log group. `create-log-stream` fails with
//!   `ResourceAlreadyExistsException` when the name is taken, which makes it
//!   an atomic create-if-absent.
//! - Instance directory: EC2 tags and `describe-instances`, plus the
//!   auto-scaling group for the desired capacity.
//! - The own instance id comes from the instance metadata service.

mod metadata;
mod model;

pub use metadata::{InstanceMetadata, DEFAULT_METADATA_ENDPOINT};

use crate::{
    ensemble::{
        ClaimOutcome, DeploymentGroup, ExternalError, InstanceDirectory, InstanceFilter,
        InstanceRecord, InstanceRef, Registry,
    },
    process::{CommandError, CommandRunner},
};
use model::{DescribeAutoScalingGroups, DescribeInstances, DescribeLogStreams, DescribeTags};
use serde::de::DeserializeOwned;
use std::net::IpAddr;
use tracing::{debug, info, warn};

const DEFAULT_GROUP_TAG: &str = "aws:autoscaling:groupName";
const ALREADY_EXISTS: &str = "ResourceAlreadyExistsException";
const NOT_FOUND: &str = "ResourceNotFoundException";

#[derive(Debug, Clone)]
pub struct AwsCli {
    runner: CommandRunner,
    region: String,
    log_group: String,
    group_tag: String,
    metadata: InstanceMetadata,
}

impl AwsCli {
    pub fn new(
        runner: CommandRunner,
        region: impl Into<String>,
        log_group: impl Into<String>,
        metadata: InstanceMetadata,
    ) -> Self {
        Self {
            runner,
            region: region.into(),
            log_group: log_group.into(),
            group_tag: DEFAULT_GROUP_TAG.to_string(),
            metadata,
        }
    }

    /// Instance tag naming the auto-scaling group
    pub fn with_group_tag(mut self, group_tag: impl Into<String>) -> Self {
        self.group_tag = group_tag.into();
        self
    }

    async fn run(&self, args: &[&str]) -> Result<String, CommandError> {
        let argv = args
            .iter()
            .copied()
            .chain(["--region", self.region.as_str(), "--output", "json"]);
        self.runner.run("aws", argv).await
    }

    async fn query<T: DeserializeOwned>(&self, args: &[&str]) -> Result<T, ExternalError> {
        let stdout = self.run(args).await?;
        serde_json::from_str(&stdout)
            .map_err(|err| ExternalError::malformed(format!("aws {}", args.join(" ")), err))
    }
}

fn stderr_contains(err: &CommandError, marker: &str) -> bool {
    err.stderr().is_some_and(|stderr| stderr.contains(marker))
}

impl Registry for AwsCli {
    async fn create_if_absent(&self, key: &str) -> Result<ClaimOutcome, ExternalError> {
        let result = self
            .run(&[
                "logs",
                "create-log-stream",
                "--log-group-name",
                self.log_group.as_str(),
                "--log-stream-name",
                key,
            ])
            .await;

        match result {
            Ok(_) => Ok(ClaimOutcome::Claimed),
            Err(err) if stderr_contains(&err, ALREADY_EXISTS) => Ok(ClaimOutcome::AlreadyExists),
            Err(err) => Err(err.into()),
        }
    }

    async fn list_keys(&self) -> Result<Vec<String>, ExternalError> {
        let streams: DescribeLogStreams = self
            .query(&["logs", "describe-log-streams", "--log-group-name", self.log_group.as_str()])
            .await?;
        Ok(streams
            .log_streams
            .into_iter()
            .map(|stream| stream.log_stream_name)
            .collect())
    }

    async fn delete_keys(&self, keys: &[String]) -> Result<(), ExternalError> {
        for key in keys {
            let result = self
                .run(&[
                    "logs",
                    "delete-log-stream",
                    "--log-group-name",
                    self.log_group.as_str(),
                    "--log-stream-name",
                    key.as_str(),
                ])
                .await;

            match result {
                Ok(_) => debug!("Deleted log stream {}/{}", self.log_group, key),
                Err(err) if stderr_contains(&err, NOT_FOUND) => {
                    debug!("Log stream {}/{} already gone", self.log_group, key)
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}

impl InstanceDirectory for AwsCli {
    async fn self_instance(&self) -> Result<InstanceRef, ExternalError> {
        let instance = self.metadata.instance_id().await?;
        info!("Running on instance {}", instance);
        Ok(instance)
    }

    async fn get_tag(
        &self,
        instance: &InstanceRef,
        key: &str,
    ) -> Result<Option<String>, ExternalError> {
        let resource = format!("Name=resource-id,Values={instance}");
        let tag_key = format!("Name=key,Values={key}");
        let tags: DescribeTags = self
            .query(&["ec2", "describe-tags", "--filters", resource.as_str(), tag_key.as_str()])
            .await?;
        Ok(tags
            .tags
            .into_iter()
            .find(|tag| tag.key == key)
            .map(|tag| tag.value))
    }

    async fn set_tag(
        &self,
        instance: &InstanceRef,
        key: &str,
        value: &str,
    ) -> Result<(), ExternalError> {
        let tag = format!("Key={key},Value={value}");
        self.run(&["ec2", "create-tags", "--resources", instance.as_str(), "--tags", tag.as_str()])
            .await?;
        debug!("Tagged {} with {}={}", instance, key, value);
        Ok(())
    }

    async fn list_instances(
        &self,
        filter: &InstanceFilter,
    ) -> Result<Vec<InstanceRecord>, ExternalError> {
        let group = format!("Name=tag:{},Values={}", filter.group_tag, filter.group_name);
        let identity = format!("Name=tag-key,Values={}", filter.identity_tag);
        let described: DescribeInstances = self
            .query(&[
                "ec2",
                "describe-instances",
                "--filters",
                "Name=instance-state-name,Values=running",
                group.as_str(),
                identity.as_str(),
            ])
            .await?;

        let records = described
            .reservations
            .into_iter()
            .flat_map(|reservation| reservation.instances)
            .filter_map(|instance| {
                let ip = match instance.private_ip().map(str::parse::<IpAddr>) {
                    Some(Ok(ip)) => ip,
                    Some(Err(err)) => {
                        warn!("Skipping {}: bad private address: {}", instance.instance_id, err);
                        return None;
                    }
                    None => {
                        warn!("Skipping {}: no private address", instance.instance_id);
                        return None;
                    }
                };
                Some(InstanceRecord {
                    instance: InstanceRef::new(instance.instance_id),
                    private_ip: ip,
                    tags: instance
                        .tags
                        .into_iter()
                        .map(|tag| (tag.key, tag.value))
                        .collect(),
                })
            })
            .collect();
        Ok(records)
    }

    async fn deployment_group(
        &self,
        instance: &InstanceRef,
    ) -> Result<DeploymentGroup, ExternalError> {
        let name = self
            .get_tag(instance, &self.group_tag)
            .await?
            .ok_or_else(|| {
                ExternalError::api(
                    "deployment group",
                    format!("{instance} has no '{}' tag", self.group_tag),
                )
            })?;

        let groups: DescribeAutoScalingGroups = self
            .query(&[
                "autoscaling",
                "describe-auto-scaling-groups",
                "--auto-scaling-group-names",
                name.as_str(),
            ])
            .await?;
        let group = groups
            .auto_scaling_groups
            .into_iter()
            .find(|group| group.auto_scaling_group_name == name)
            .ok_or_else(|| {
                ExternalError::api("deployment group", format!("group '{name}' not found"))
            })?;

        info!(
            "Auto-scaling group {} wants {} instances",
            group.auto_scaling_group_name, group.desired_capacity
        );
        Ok(DeploymentGroup {
            name: group.auto_scaling_group_name,
            desired_capacity: group.desired_capacity,
        })
    }
}
