//! In-memory cluster shared by the integration tests
//!
//! One [`SimCluster`] holds the registry, the instance directory, the live
//! ensemble membership and every node's local files. Each [`SimNode`] is the
//! view of one instance and implements all collaborator traits against the
//! shared state, recording every call in order. Every operation yields to the
//! scheduler first, so concurrently driven nodes interleave.

#![allow(dead_code)]

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    net::{IpAddr, Ipv4Addr},
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};
use zk_bootstrap::{
    ensemble::{
        ClaimOutcome, DeploymentGroup, DynamicConfig, EnsembleControl, EnsembleMemberSpec,
        EnsembleSettings, ExternalError, InstanceDirectory, InstanceFilter, InstanceRecord,
        InstanceRef, LocalStore, Registry, ServerId,
    },
    util::poll::PollPolicy,
};

pub const GROUP: &str = "zk-test";

pub const LEADER_STAT: &str = "Zookeeper version: 3.8.4\nLatency min/avg/max: 0/0.0/0\n\
    Received: 12\nSent: 11\nConnections: 1\nOutstanding: 0\nZxid: 0x200000002\n\
    Mode: leader\nNode count: 5\n";

pub const FOLLOWER_STAT: &str = "Zookeeper version: 3.8.4\nMode: follower\nNode count: 5\n";

pub const NOT_SERVING: &str = "This ZooKeeper instance is not currently serving requests\n";

/// One external call, as seen by the simulated cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Claim(String),
    ListKeys,
    DeleteKeys(Vec<String>),
    SelfInstance,
    GetTag(String),
    SetTag(String, String),
    ListInstances,
    DeploymentGroup,
    Start(IpAddr),
    Status(IpAddr),
    LiveMembership(IpAddr),
    ReconfigAdd { anchor: IpAddr, line: String },
    ReconfigRemove { anchor: IpAddr, ids: Vec<ServerId> },
    WriteIdentity(ServerId),
    WriteDynamicConfig(String),
    PointStaticConfig,
}

/// How a server answers the status word
#[derive(Debug, Clone)]
pub enum StatusBehavior {
    Unreachable,
    Answer(String),
}

#[derive(Debug, Clone)]
pub struct SimInstance {
    pub ip: IpAddr,
    pub running: bool,
    pub tags: HashMap<String, String>,
}

/// Files one node wrote locally
#[derive(Debug, Clone, Default)]
pub struct NodeFiles {
    pub identity: Option<ServerId>,
    pub dynamic_config: Option<String>,
    pub static_pointed: bool,
}

#[derive(Debug, Default)]
pub struct ClusterState {
    pub registry: BTreeSet<String>,
    pub instances: BTreeMap<InstanceRef, SimInstance>,
    pub desired_capacity: usize,
    pub status: HashMap<IpAddr, StatusBehavior>,
    /// Live membership as served by any functional anchor
    pub live_config: DynamicConfig,
    pub files: HashMap<InstanceRef, NodeFiles>,
    pub calls: Vec<(InstanceRef, Call)>,
    /// Number of upcoming reconfig -add calls that fail
    pub failing_adds: u32,
    /// Number of upcoming reconfig -remove calls that fail
    pub failing_removes: u32,
    /// Number of upcoming instance listings that fail
    pub failing_listings: u32,
    /// Number of upcoming tag writes that fail
    pub failing_set_tags: u32,
}

#[derive(Debug, Clone, Default)]
pub struct SimCluster {
    state: Arc<Mutex<ClusterState>>,
}

pub fn ip(last: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
}

pub fn instance_name(n: u8) -> InstanceRef {
    InstanceRef::new(format!("i-{n:04}"))
}

impl SimCluster {
    pub fn new(desired_capacity: usize) -> Self {
        let cluster = Self::default();
        cluster.state().desired_capacity = desired_capacity;
        cluster
    }

    pub fn state(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap()
    }

    /// Add a running instance `i-000n` at `10.0.0.n`, optionally already holding an id
    pub fn add_instance(&self, n: u8, id: Option<ServerId>) -> SimNode {
        let instance = instance_name(n);
        let mut tags = HashMap::from([(
            "aws:autoscaling:groupName".to_string(),
            GROUP.to_string(),
        )]);
        let mut state = self.state();
        if let Some(id) = id {
            tags.insert("zookeeper_id".to_string(), id.to_string());
            state.registry.insert(id.to_string());
        }
        state.instances.insert(
            instance.clone(),
            SimInstance {
                ip: ip(n),
                running: true,
                tags,
            },
        );
        drop(state);
        self.node(n)
    }

    pub fn node(&self, n: u8) -> SimNode {
        SimNode {
            cluster: self.clone(),
            instance: instance_name(n),
            ip: ip(n),
        }
    }

    pub fn terminate(&self, n: u8) {
        if let Some(instance) = self.state().instances.get_mut(&instance_name(n)) {
            instance.running = false;
        }
    }

    pub fn set_status(&self, n: u8, behavior: StatusBehavior) {
        self.state().status.insert(ip(n), behavior);
    }

    /// Seed the live ensemble with participant lines
    pub fn set_live_members(&self, members: impl IntoIterator<Item = EnsembleMemberSpec>) {
        self.state().live_config = DynamicConfig::from_members(members);
    }

    pub fn registry_keys(&self) -> BTreeSet<String> {
        self.state().registry.clone()
    }

    pub fn calls(&self) -> Vec<(InstanceRef, Call)> {
        self.state().calls.clone()
    }

    /// Calls issued by one node, in order
    pub fn calls_of(&self, n: u8) -> Vec<Call> {
        let instance = instance_name(n);
        self.calls()
            .into_iter()
            .filter(|(from, _)| *from == instance)
            .map(|(_, call)| call)
            .collect()
    }

    pub fn files_of(&self, n: u8) -> NodeFiles {
        self.state()
            .files
            .get(&instance_name(n))
            .cloned()
            .unwrap_or_default()
    }

    pub fn tag_of(&self, n: u8, key: &str) -> Option<String> {
        self.state()
            .instances
            .get(&instance_name(n))
            .and_then(|instance| instance.tags.get(key).cloned())
    }
}

/// One instance's view of the cluster
#[derive(Debug, Clone)]
pub struct SimNode {
    cluster: SimCluster,
    pub instance: InstanceRef,
    pub ip: IpAddr,
}

impl SimNode {
    /// Yield, then record `call` and hand out the state lock
    async fn enter(&self, call: Call) -> MutexGuard<'_, ClusterState> {
        tokio::task::yield_now().await;
        let mut state = self.cluster.state();
        state.calls.push((self.instance.clone(), call));
        state
    }

    fn files<'s>(state: &'s mut ClusterState, instance: &InstanceRef) -> &'s mut NodeFiles {
        state.files.entry(instance.clone()).or_default()
    }
}

fn injected(operation: &str) -> ExternalError {
    ExternalError::api(operation, "injected failure")
}

impl Registry for SimNode {
    async fn create_if_absent(&self, key: &str) -> Result<ClaimOutcome, ExternalError> {
        let mut state = self.enter(Call::Claim(key.to_string())).await;
        if state.registry.insert(key.to_string()) {
            Ok(ClaimOutcome::Claimed)
        } else {
            Ok(ClaimOutcome::AlreadyExists)
        }
    }

    async fn list_keys(&self) -> Result<Vec<String>, ExternalError> {
        let state = self.enter(Call::ListKeys).await;
        Ok(state.registry.iter().cloned().collect())
    }

    async fn delete_keys(&self, keys: &[String]) -> Result<(), ExternalError> {
        let mut state = self.enter(Call::DeleteKeys(keys.to_vec())).await;
        for key in keys {
            state.registry.remove(key);
        }
        Ok(())
    }
}

impl InstanceDirectory for SimNode {
    async fn self_instance(&self) -> Result<InstanceRef, ExternalError> {
        drop(self.enter(Call::SelfInstance).await);
        Ok(self.instance.clone())
    }

    async fn get_tag(
        &self,
        instance: &InstanceRef,
        key: &str,
    ) -> Result<Option<String>, ExternalError> {
        let state = self.enter(Call::GetTag(key.to_string())).await;
        Ok(state
            .instances
            .get(instance)
            .and_then(|i| i.tags.get(key).cloned()))
    }

    async fn set_tag(
        &self,
        instance: &InstanceRef,
        key: &str,
        value: &str,
    ) -> Result<(), ExternalError> {
        let mut state = self
            .enter(Call::SetTag(key.to_string(), value.to_string()))
            .await;
        if state.failing_set_tags > 0 {
            state.failing_set_tags -= 1;
            return Err(injected("set tag"));
        }
        let record = state
            .instances
            .get_mut(instance)
            .ok_or_else(|| ExternalError::api("set tag", format!("{instance} unknown")))?;
        record.tags.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn list_instances(
        &self,
        filter: &InstanceFilter,
    ) -> Result<Vec<InstanceRecord>, ExternalError> {
        let mut state = self.enter(Call::ListInstances).await;
        if state.failing_listings > 0 {
            state.failing_listings -= 1;
            return Err(injected("list instances"));
        }
        Ok(state
            .instances
            .iter()
            .filter(|(_, i)| i.running)
            .filter(|(_, i)| i.tags.get(&filter.group_tag) == Some(&filter.group_name))
            .filter(|(_, i)| i.tags.contains_key(&filter.identity_tag))
            .map(|(instance, i)| InstanceRecord {
                instance: instance.clone(),
                private_ip: i.ip,
                tags: i.tags.clone(),
            })
            .collect())
    }

    async fn deployment_group(
        &self,
        _instance: &InstanceRef,
    ) -> Result<DeploymentGroup, ExternalError> {
        let state = self.enter(Call::DeploymentGroup).await;
        Ok(DeploymentGroup {
            name: GROUP.to_string(),
            desired_capacity: state.desired_capacity,
        })
    }
}

impl EnsembleControl for SimNode {
    async fn start(&self, _conf_dir: &Path) -> Result<(), ExternalError> {
        drop(self.enter(Call::Start(self.ip)).await);
        Ok(())
    }

    async fn status(&self, ip: IpAddr, _port: u16) -> Result<String, ExternalError> {
        let state = self.enter(Call::Status(ip)).await;
        match state.status.get(&ip) {
            Some(StatusBehavior::Answer(answer)) => Ok(answer.clone()),
            Some(StatusBehavior::Unreachable) | None => Err(ExternalError::io(
                format!("stat {ip}"),
                std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
            )),
        }
    }

    async fn live_membership(&self, anchor: IpAddr) -> Result<Vec<String>, ExternalError> {
        let state = self.enter(Call::LiveMembership(anchor)).await;
        let mut lines: Vec<String> = state
            .live_config
            .members()
            .map(ToString::to_string)
            .collect();
        lines.push("version=200000000".to_string());
        Ok(lines)
    }

    async fn reconfig_add(
        &self,
        anchor: IpAddr,
        member: &EnsembleMemberSpec,
    ) -> Result<(), ExternalError> {
        let mut state = self
            .enter(Call::ReconfigAdd {
                anchor,
                line: member.to_string(),
            })
            .await;
        if state.failing_adds > 0 {
            state.failing_adds -= 1;
            return Err(injected("reconfig add"));
        }
        state.live_config.upsert(member.clone());
        Ok(())
    }

    async fn reconfig_remove(&self, anchor: IpAddr, ids: &[ServerId]) -> Result<(), ExternalError> {
        let mut state = self
            .enter(Call::ReconfigRemove {
                anchor,
                ids: ids.to_vec(),
            })
            .await;
        if state.failing_removes > 0 {
            state.failing_removes -= 1;
            return Err(injected("reconfig remove"));
        }
        let remaining: Vec<EnsembleMemberSpec> = state
            .live_config
            .members()
            .filter(|m| !ids.contains(&m.id))
            .cloned()
            .collect();
        state.live_config = DynamicConfig::from_members(remaining);
        Ok(())
    }
}

impl LocalStore for SimNode {
    async fn write_identity(&self, id: ServerId) -> Result<(), ExternalError> {
        let mut state = self.enter(Call::WriteIdentity(id)).await;
        Self::files(&mut state, &self.instance).identity = Some(id);
        Ok(())
    }

    async fn write_dynamic_config(&self, config: &DynamicConfig) -> Result<(), ExternalError> {
        let content = config.to_string();
        let mut state = self.enter(Call::WriteDynamicConfig(content.clone())).await;
        Self::files(&mut state, &self.instance).dynamic_config = Some(content);
        Ok(())
    }

    async fn point_static_config(&self) -> Result<(), ExternalError> {
        let mut state = self.enter(Call::PointStaticConfig).await;
        Self::files(&mut state, &self.instance).static_pointed = true;
        Ok(())
    }
}

/// Default settings with every wait shortened to zero
pub fn fast_settings() -> EnsembleSettings {
    EnsembleSettings {
        fleet_poll: PollPolicy::bounded(3, Duration::ZERO),
        probe: PollPolicy::bounded(3, Duration::ZERO),
        settle_delay: Duration::ZERO,
        reconfig_retry: PollPolicy::bounded(3, Duration::ZERO),
        reconcile_retry: PollPolicy::bounded(3, Duration::ZERO),
        ..EnsembleSettings::default()
    }
}
