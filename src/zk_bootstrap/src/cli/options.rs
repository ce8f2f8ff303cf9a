use clap::{Args, Parser, Subcommand};
use std::{net::IpAddr, path::PathBuf};

/// Bootstrap and maintain a ZooKeeper ensemble on an auto-scaling group
#[derive(Parser)]
#[command(name = "zk_bootstrap")]
#[command(version)]
#[command(about = "Bootstrap and maintain a ZooKeeper ensemble on an auto-scaling group")]
#[command(after_help = "Examples:\n  \
    zk_bootstrap bootstrap --region eu-west-1 --id-file /var/lib/zookeeper/myid \\\n    \
    --dynamic-file /opt/zookeeper/conf/zoo.cfg.dynamic\n  \
    zk_bootstrap reconcile --region eu-west-1")]
#[command(arg_required_else_help = true)]
pub struct Options {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Claim a server id, then form a new ensemble or join the live one
    #[command(after_help = "Examples:\n  \
        zk_bootstrap bootstrap --region eu-west-1 --id-file /var/lib/zookeeper/myid \\\n    \
        --dynamic-file /opt/zookeeper/conf/zoo.cfg.dynamic\n  \
        zk_bootstrap bootstrap --region eu-west-1 --id-file myid --dynamic-file zoo.cfg.dynamic \\\n    \
        --conf-dir /etc/zookeeper --config zk_bootstrap.yaml")]
    Bootstrap(BootstrapArgs),

    /// Remove server ids of terminated instances from the live ensemble
    #[command(after_help = "Examples:\n  \
        zk_bootstrap reconcile --region eu-west-1\n  \
        zk_bootstrap reconcile --region eu-west-1 --anchor 10.0.1.12")]
    Reconcile(ReconcileArgs),
}

/// Arguments for the bootstrap command
#[derive(Args)]
pub struct BootstrapArgs {
    /// AWS region of the fleet
    #[arg(long)]
    pub region: String,

    /// Path of the ZooKeeper identity file (myid)
    #[arg(long)]
    pub id_file: PathBuf,

    /// Path of the dynamic reconfiguration file
    #[arg(long)]
    pub dynamic_file: PathBuf,

    /// ZooKeeper configuration directory holding zoo.cfg.
    /// Overrides `conf_dir` from the runtime configuration.
    #[arg(long)]
    pub conf_dir: Option<PathBuf>,

    #[command(flatten)]
    pub common: CommonOptions,
}

/// Arguments for the reconcile command
#[derive(Args)]
pub struct ReconcileArgs {
    /// AWS region of the fleet
    #[arg(long)]
    pub region: String,

    /// Address of a live ensemble member; probes the fleet when omitted
    #[arg(long)]
    pub anchor: Option<IpAddr>,

    #[command(flatten)]
    pub common: CommonOptions,
}

/// Common options shared across all commands
#[derive(Args, Clone, Default)]
pub struct CommonOptions {
    /// Runtime configuration file (YAML)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Enable verbose output (every command line, every probe attempt)
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

impl Command {
    pub fn common(&self) -> &CommonOptions {
        match self {
            Command::Bootstrap(args) => &args.common,
            Command::Reconcile(args) => &args.common,
        }
    }
}
