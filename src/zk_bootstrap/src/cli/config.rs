//! Runtime configuration (YAML)
//!
//! Every field has a default, so the file is optional and may list only the
//! values that differ:
//!
//! ```yaml
//! zookeeper_bin_dir: /opt/zookeeper/bin
//! max_instances: 10
//! timing:
//!   settle_delay_secs: 30
//!   probe: { attempts: 3, interval_secs: 3 }
//! ```

use crate::{
    ensemble::{EnsembleSettings, ServerId, ServicePorts},
    process::default_search_path,
    util::poll::PollPolicy,
};
use eyre::{ensure, WrapErr};
use serde::{Deserialize, Serialize};
use std::{
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub ports: ServicePorts,

    /// Directory holding zkServer.sh and zkCli.sh
    pub zookeeper_bin_dir: PathBuf,

    /// ZooKeeper configuration directory (zoo.cfg)
    pub conf_dir: PathBuf,

    /// PATH handed to every child command.
    /// Defaults to the PATH line of /etc/environment.
    pub search_path: Option<String>,

    /// CloudWatch log group used as the id registry
    pub registry_namespace: String,

    /// Ids are claimed from 1..max_instances
    pub max_instances: ServerId,

    pub identity_tag: String,
    pub group_tag: String,
    pub completion_tag: String,

    pub metadata_endpoint: String,

    pub timing: TimingConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let settings = EnsembleSettings::default();
        Self {
            ports: settings.ports,
            zookeeper_bin_dir: PathBuf::from("/opt/zookeeper/bin"),
            conf_dir: settings.conf_dir,
            search_path: None,
            registry_namespace: "/zookeeper/instances".to_string(),
            max_instances: settings.max_instances,
            identity_tag: settings.identity_tag,
            group_tag: settings.group_tag,
            completion_tag: settings.completion_tag,
            metadata_endpoint: crate::aws::DEFAULT_METADATA_ENDPOINT.to_string(),
            timing: TimingConfig::default(),
        }
    }
}

/// Bounded retry: attempts and the fixed pause between them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub attempts: u32,
    pub interval_secs: u64,
}

impl RetryConfig {
    const fn new(attempts: u32, interval_secs: u64) -> Self {
        Self {
            attempts,
            interval_secs,
        }
    }

    pub fn policy(&self) -> PollPolicy {
        PollPolicy::bounded(self.attempts, Duration::from_secs(self.interval_secs))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub fleet_poll_interval_secs: u64,
    /// None waits for the fleet forever
    pub fleet_poll_max_attempts: Option<u32>,
    pub fleet_error_budget: u32,
    pub probe: RetryConfig,
    pub settle_delay_secs: u64,
    pub reconfig_retry: RetryConfig,
    pub reconcile_retry: RetryConfig,
    pub status_timeout_secs: u64,
    pub metadata_timeout_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            fleet_poll_interval_secs: 60,
            fleet_poll_max_attempts: None,
            fleet_error_budget: 3,
            probe: RetryConfig::new(3, 3),
            settle_delay_secs: 30,
            reconfig_retry: RetryConfig::new(3, 3),
            reconcile_retry: RetryConfig::new(3, 3),
            status_timeout_secs: 5,
            metadata_timeout_secs: 5,
        }
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> eyre::Result<()> {
        ensure!(
            self.max_instances >= 2,
            "max_instances must be at least 2 (ids are claimed from 1..max_instances)"
        );
        let timing = &self.timing;
        for (name, retry) in [
            ("probe", timing.probe),
            ("reconfig_retry", timing.reconfig_retry),
            ("reconcile_retry", timing.reconcile_retry),
        ] {
            ensure!(retry.attempts >= 1, "timing.{}.attempts must be at least 1", name);
        }
        ensure!(
            timing.fleet_poll_max_attempts != Some(0),
            "timing.fleet_poll_max_attempts must be at least 1"
        );
        ensure!(
            !self.registry_namespace.is_empty(),
            "registry_namespace must not be empty"
        );
        Ok(())
    }

    /// Search path for child commands
    pub fn search_path(&self) -> OsString {
        match &self.search_path {
            Some(path) => path.into(),
            None => default_search_path(),
        }
    }

    /// Coordination settings, with `conf_dir` taking precedence over the file
    pub fn ensemble_settings(&self, conf_dir: Option<&Path>) -> EnsembleSettings {
        let timing = &self.timing;
        let fleet_interval = Duration::from_secs(timing.fleet_poll_interval_secs);

        EnsembleSettings {
            ports: self.ports,
            max_instances: self.max_instances,
            identity_tag: self.identity_tag.clone(),
            group_tag: self.group_tag.clone(),
            completion_tag: self.completion_tag.clone(),
            conf_dir: conf_dir
                .map(Path::to_path_buf)
                .unwrap_or_else(|| self.conf_dir.clone()),
            fleet_poll: match timing.fleet_poll_max_attempts {
                Some(max) => PollPolicy::bounded(max, fleet_interval),
                None => PollPolicy::unbounded(fleet_interval),
            },
            fleet_error_budget: timing.fleet_error_budget,
            probe: timing.probe.policy(),
            settle_delay: Duration::from_secs(timing.settle_delay_secs),
            reconfig_retry: timing.reconfig_retry.policy(),
            reconcile_retry: timing.reconcile_retry.policy(),
        }
    }
}

/// Load the runtime configuration, or the defaults when no file is given
pub fn load_runtime_config(path: Option<&Path>) -> eyre::Result<RuntimeConfig> {
    let config = match path {
        Some(path) => {
            let content = fs::read_to_string(path)
                .wrap_err_with(|| format!("failed to read config file {}", path.display()))?;
            let config: RuntimeConfig = serde_yaml::from_str(&content)
                .wrap_err_with(|| format!("failed to parse config file {}", path.display()))?;
            debug!("Loaded runtime config from {}", path.display());
            config
        }
        None => RuntimeConfig::default(),
    };

    config.validate()?;
    Ok(config)
}
