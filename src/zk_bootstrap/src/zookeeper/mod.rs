//! ZooKeeper control surface
//!
//! Starting the server and dynamic reconfiguration go through the scripts
//! shipped in the ZooKeeper `bin/` directory (`zkServer.sh`, `zkCli.sh`);
//! the health probe is the `srvr` four-letter word sent straight to the
//! client port. `srvr` is in the default `4lw.commands.whitelist`; `stat`
//! is not.

mod four_letter;

pub use four_letter::send_word;

use crate::{
    ensemble::{EnsembleControl, EnsembleMemberSpec, ExternalError, ServerId},
    process::{CommandError, CommandRunner},
};
use itertools::Itertools;
use std::{
    ffi::OsStr,
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{debug, info, warn};

/// Path of the live dynamic configuration inside the ZooKeeper tree
const CONFIG_ZNODE: &str = "/zookeeper/config";
/// Four-letter word used for health checks
const STATUS_WORD: &str = "srvr";

/// Drives a local ZooKeeper installation
#[derive(Debug, Clone)]
pub struct ZkControl {
    runner: CommandRunner,
    bin_dir: PathBuf,
    client_port: u16,
    status_timeout: Duration,
}

impl ZkControl {
    pub fn new(runner: CommandRunner, bin_dir: impl Into<PathBuf>, client_port: u16) -> Self {
        Self {
            runner,
            bin_dir: bin_dir.into(),
            client_port,
            status_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_status_timeout(mut self, status_timeout: Duration) -> Self {
        self.status_timeout = status_timeout;
        self
    }

    fn script(&self, name: &str) -> String {
        self.bin_dir.join(name).to_string_lossy().into_owned()
    }

    async fn cli(&self, server: IpAddr, args: &[&str]) -> Result<String, CommandError> {
        let server = SocketAddr::new(server, self.client_port).to_string();
        let argv = ["-server", server.as_str()]
            .into_iter()
            .chain(args.iter().copied());
        self.runner.run(&self.script("zkCli.sh"), argv).await
    }
}

/// `zkServer.sh` prints its JMX notice on stderr even when the start succeeds
fn is_benign_start_notice(err: &CommandError) -> bool {
    matches!(err, CommandError::Stderr { stderr, .. } if stderr.contains("JMX"))
}

/// Keep the member lines of a `get /zookeeper/config` answer
pub fn member_lines(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with("server."))
        .map(str::to_string)
        .collect()
}

impl EnsembleControl for ZkControl {
    async fn start(&self, conf_dir: &Path) -> Result<(), ExternalError> {
        info!(
            "Starting ZooKeeper server with configuration in {}",
            conf_dir.display()
        );
        let args = [OsStr::new("--config"), conf_dir.as_os_str(), OsStr::new("start")];
        let result = self.runner.run(&self.script("zkServer.sh"), args).await;

        match result {
            Ok(stdout) => debug!("{}", stdout),
            Err(err) if is_benign_start_notice(&err) => {
                debug!("Ignoring start notice: {}", err.stderr().unwrap_or_default());
                debug!("{}", err.stdout().unwrap_or_default());
            }
            Err(err) => return Err(err.into()),
        }

        info!("ZooKeeper started");
        Ok(())
    }

    async fn status(&self, ip: IpAddr, port: u16) -> Result<String, ExternalError> {
        let addr = SocketAddr::new(ip, port);
        send_word(addr, STATUS_WORD, self.status_timeout)
            .await
            .map_err(|source| ExternalError::io(format!("{STATUS_WORD} {addr}"), source))
    }

    async fn live_membership(&self, anchor: IpAddr) -> Result<Vec<String>, ExternalError> {
        let output = self.cli(anchor, &["get", CONFIG_ZNODE]).await?;
        let lines = member_lines(&output);
        if lines.is_empty() {
            return Err(ExternalError::malformed(
                format!("{CONFIG_ZNODE} on {anchor}"),
                "no member lines",
            ));
        }
        Ok(lines)
    }

    async fn reconfig_add(
        &self,
        anchor: IpAddr,
        member: &EnsembleMemberSpec,
    ) -> Result<(), ExternalError> {
        let line = member.to_string();
        info!("reconfig -add {} via {}", line, anchor);
        let output = self.cli(anchor, &["reconfig", "-add", line.as_str()]).await?;
        debug!("{}", output);
        Ok(())
    }

    async fn reconfig_remove(&self, anchor: IpAddr, ids: &[ServerId]) -> Result<(), ExternalError> {
        if ids.is_empty() {
            warn!("reconfig -remove called without ids; skipping");
            return Ok(());
        }
        let ids = ids.iter().join(",");
        info!("reconfig -remove {} via {}", ids, anchor);
        let output = self.cli(anchor, &["reconfig", "-remove", ids.as_str()]).await?;
        debug!("{}", output);
        Ok(())
    }
}
