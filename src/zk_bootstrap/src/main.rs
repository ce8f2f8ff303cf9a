use clap::Parser;
use tracing::error;
use zk_bootstrap::{
    cli::options::{Command, Options},
    commands::{handle_bootstrap, handle_reconcile},
    util::logging::init_logging,
};

fn main() {
    // Parse command-line options first (before initializing tracing)
    let opts = Options::parse();
    init_logging(opts.command.common().verbose);

    if let Err(err) = run(&opts) {
        error!("{:?}", err);
        std::process::exit(1);
    }
}

fn run(opts: &Options) -> eyre::Result<()> {
    // Route to appropriate handler based on subcommand
    match &opts.command {
        Command::Bootstrap(args) => handle_bootstrap(args),
        Command::Reconcile(args) => handle_reconcile(args),
    }
}
