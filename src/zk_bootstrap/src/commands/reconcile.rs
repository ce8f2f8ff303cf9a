use crate::{
    cli::{self, options::ReconcileArgs},
    commands::common::{build_collaborators, build_tokio_runtime, log_config_summary},
    ensemble::BootstrapCoordinator,
};
use eyre::WrapErr;
use itertools::Itertools;
use tracing::info;

/// Handle the 'reconcile' subcommand
pub fn handle_reconcile(args: &ReconcileArgs) -> eyre::Result<()> {
    let runtime_config = cli::config::load_runtime_config(args.common.config.as_deref())?;
    let settings = runtime_config.ensemble_settings(None);
    log_config_summary(&args.region, &runtime_config);

    let (aws, zookeeper) = build_collaborators(&args.region, &runtime_config)?;
    let coordinator = BootstrapCoordinator::new(aws.clone(), aws, zookeeper, (), settings);

    let runtime = build_tokio_runtime()?;
    let removed = runtime
        .block_on(coordinator.reconcile_standalone(args.anchor))
        .wrap_err("reconciliation failed")?;

    if removed.is_empty() {
        info!("No stale servers removed");
    } else {
        info!("Removed stale servers: {}", removed.iter().join(","));
    }
    Ok(())
}
