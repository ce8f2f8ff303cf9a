use crate::{
    cli::{self, options::BootstrapArgs},
    commands::common::{build_collaborators, build_tokio_runtime, log_config_summary},
    ensemble::{BootstrapCoordinator, BootstrapPath},
    local::LocalFiles,
};
use eyre::WrapErr;
use itertools::Itertools;
use tracing::info;

/// Handle the 'bootstrap' subcommand
pub fn handle_bootstrap(args: &BootstrapArgs) -> eyre::Result<()> {
    let runtime_config = cli::config::load_runtime_config(args.common.config.as_deref())?;
    let settings = runtime_config.ensemble_settings(args.conf_dir.as_deref());

    log_config_summary(&args.region, &runtime_config);
    info!("  Identity file: {}", args.id_file.display());
    info!("  Dynamic file: {}", args.dynamic_file.display());
    info!("  Config dir: {}", settings.conf_dir.display());

    let (aws, zookeeper) = build_collaborators(&args.region, &runtime_config)?;
    let local = LocalFiles::new(
        args.id_file.clone(),
        args.dynamic_file.clone(),
        &settings.conf_dir,
    );
    // Registry and directory are both backed by the aws command line
    let coordinator = BootstrapCoordinator::new(aws.clone(), aws, zookeeper, local, settings);

    let runtime = build_tokio_runtime()?;
    let report = runtime
        .block_on(coordinator.run())
        .wrap_err_with(|| format!("bootstrap stopped in phase '{}'", coordinator.phase()))?;

    match report.path {
        BootstrapPath::Fresh => info!(
            "Server {} ({}) formed a new ensemble of {}",
            report.identity.id,
            report.ip,
            report.fleet.len()
        ),
        BootstrapPath::Join { anchor } => info!(
            "Server {} ({}) joined the ensemble via {}",
            report.identity.id, report.ip, anchor
        ),
    }
    if !report.removed.is_empty() {
        info!("Removed stale servers: {}", report.removed.iter().join(","));
    }
    info!("Bootstrap completed");
    Ok(())
}
