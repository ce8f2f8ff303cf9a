//! Existing-ensemble detection
//!
//! A server only reports a steady `leader` or `follower` mode while a
//! majority agrees on the leadership, so one such answer proves that a
//! quorum-holding ensemble exists. Candidates are tried in order and the
//! first functional responder wins.
//!
//! A `None` result cannot tell "never formed" from "formed but lost quorum";
//! both lead the caller to a fresh bootstrap.

use super::{error::ExternalError, traits::EnsembleControl};
use crate::util::{
    logging::is_verbose,
    poll::{Exhausted, PollPolicy},
};
use std::{fmt, net::IpAddr};
use thiserror::Error;
use tracing::{info, warn};

/// Server mode as reported on the `Mode:` line of `srvr`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMode {
    Leader,
    Follower,
    Observer,
    Standalone,
    ReadOnly,
    Other(String),
}

impl ServerMode {
    /// Whether this mode proves the responder is part of a quorum
    pub fn holds_quorum(&self) -> bool {
        matches!(self, ServerMode::Leader | ServerMode::Follower)
    }
}

impl fmt::Display for ServerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerMode::Leader => f.write_str("leader"),
            ServerMode::Follower => f.write_str("follower"),
            ServerMode::Observer => f.write_str("observer"),
            ServerMode::Standalone => f.write_str("standalone"),
            ServerMode::ReadOnly => f.write_str("read-only"),
            ServerMode::Other(mode) => f.write_str(mode),
        }
    }
}

/// Extract the mode from a `srvr` response
pub fn parse_mode(stat: &str) -> Option<ServerMode> {
    let mode = stat
        .lines()
        .find_map(|line| line.trim().strip_prefix("Mode:"))?
        .trim();

    Some(match mode {
        "leader" => ServerMode::Leader,
        "follower" => ServerMode::Follower,
        "observer" => ServerMode::Observer,
        "standalone" => ServerMode::Standalone,
        "read-only" => ServerMode::ReadOnly,
        other => ServerMode::Other(other.to_string()),
    })
}

#[derive(Debug, Error)]
enum ProbeFailure {
    #[error("unreachable: {0}")]
    Unreachable(ExternalError),
    #[error("not serving as part of a quorum ({0})")]
    NotServing(String),
}

pub struct EnsembleProbe<'a, C> {
    control: &'a C,
    client_port: u16,
    policy: PollPolicy,
}

impl<'a, C: EnsembleControl> EnsembleProbe<'a, C> {
    pub fn new(control: &'a C, client_port: u16, policy: PollPolicy) -> Self {
        Self {
            control,
            client_port,
            policy,
        }
    }

    /// Return the first candidate that belongs to a functional ensemble
    pub async fn probe(&self, candidates: &[IpAddr]) -> Option<IpAddr> {
        info!(
            "Checking for an existing ensemble among {} candidates",
            candidates.len()
        );

        for &ip in candidates {
            info!("Trying to connect to {}", ip);
            match self.check(ip).await {
                Ok(mode) => {
                    info!("Ensemble is functional: {} reports mode {}", ip, mode);
                    return Some(ip);
                }
                Err(Exhausted {
                    attempts,
                    last_error,
                }) => {
                    warn!("{} failed {} probes: {}", ip, attempts, last_error);
                }
            }
        }

        info!("Ensemble is not functional");
        None
    }

    async fn check(&self, ip: IpAddr) -> Result<ServerMode, Exhausted<ProbeFailure>> {
        let control = self.control;
        let port = self.client_port;

        self.policy
            .retry(&format!("probe {ip}"), move |attempt| async move {
                if is_verbose() {
                    info!("Probing {}:{} (attempt {})", ip, port, attempt);
                }
                let stat = control
                    .status(ip, port)
                    .await
                    .map_err(ProbeFailure::Unreachable)?;
                match parse_mode(&stat) {
                    Some(mode) if mode.holds_quorum() => Ok(mode),
                    Some(mode) => Err(ProbeFailure::NotServing(format!("mode {mode}"))),
                    None => Err(ProbeFailure::NotServing("no mode reported".to_string())),
                }
            })
            .await
    }
}
