//! Shared utilities for command handlers

use crate::{
    aws::{AwsCli, InstanceMetadata},
    cli::config::RuntimeConfig,
    process::CommandRunner,
    zookeeper::ZkControl,
};
use eyre::WrapErr;
use std::time::Duration;
use tracing::{debug, info};

/// Build a single-threaded Tokio runtime.
///
/// The bootstrap sequence is strictly sequential; all waiting is on timers,
/// child processes and sockets.
pub(crate) fn build_tokio_runtime() -> eyre::Result<tokio::runtime::Runtime> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    debug!("Tokio runtime created (current thread)");
    Ok(runtime)
}

/// Cloud and ZooKeeper collaborators for `region`, wired from the runtime config
pub(crate) fn build_collaborators(
    region: &str,
    config: &RuntimeConfig,
) -> eyre::Result<(AwsCli, ZkControl)> {
    let runner = CommandRunner::new(config.search_path());
    debug!("Command search path: {:?}", runner.search_path());

    let metadata = InstanceMetadata::new(
        config.metadata_endpoint.as_str(),
        Duration::from_secs(config.timing.metadata_timeout_secs),
    )
    .wrap_err("failed to set up the instance metadata client")?;

    let aws = AwsCli::new(
        runner.clone(),
        region,
        config.registry_namespace.as_str(),
        metadata,
    )
    .with_group_tag(config.group_tag.as_str());
    let zookeeper = ZkControl::new(runner, &config.zookeeper_bin_dir, config.ports.client)
        .with_status_timeout(Duration::from_secs(config.timing.status_timeout_secs));

    Ok((aws, zookeeper))
}

/// Print configuration summary
pub(crate) fn log_config_summary(region: &str, config: &RuntimeConfig) {
    info!("Configuration:");
    info!("  Region: {}", region);
    info!("  Registry: {}", config.registry_namespace);
    info!("  ZooKeeper bin: {}", config.zookeeper_bin_dir.display());
    info!(
        "  Ports: client {}, peer {}, election {}",
        config.ports.client, config.ports.peer, config.ports.election
    );
    info!("  Server ids: 1..{}", config.max_instances);
}
