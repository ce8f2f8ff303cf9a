//! Data model for fleet members and ensemble membership
//!
//! The dynamic configuration file holds one line per ensemble member:
//!
//! ```text
//! server.<id>=<ip>:<peer_port>:<election_port>:<role>;<client_port>
//! ```
//!
//! ZooKeeper itself reports the client endpoint as `<host>:<port>` after the
//! semicolon (for example `;0.0.0.0:2181`), so the parser accepts both forms
//! and keeps the host for a faithful round trip.

use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, net::IpAddr, str::FromStr};
use thiserror::Error;

/// Integer identity of an ensemble member (ZooKeeper `myid`)
pub type ServerId = u32;

/// Cloud instance reference (e.g. an EC2 instance id)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceRef(pub String);

impl InstanceRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A claimed identity bound to the instance that claimed it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeIdentity {
    pub id: ServerId,
    pub bound_instance: InstanceRef,
}

/// One fleet peer as seen during a single bootstrap pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetMember {
    pub instance: InstanceRef,
    pub private_ip: IpAddr,
    pub identity: Option<NodeIdentity>,
    pub is_self: bool,
}

impl FleetMember {
    pub fn id(&self) -> Option<ServerId> {
        self.identity.as_ref().map(|identity| identity.id)
    }
}

/// Voting role of an ensemble member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Participant,
    Observer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Participant => f.write_str("participant"),
            Role::Observer => f.write_str("observer"),
        }
    }
}

impl FromStr for Role {
    type Err = MemberParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "participant" => Ok(Role::Participant),
            "observer" => Ok(Role::Observer),
            other => Err(MemberParseError::new(s, format!("unknown role '{other}'"))),
        }
    }
}

/// Ports used by every ensemble member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicePorts {
    pub client: u16,
    pub peer: u16,
    pub election: u16,
}

impl Default for ServicePorts {
    fn default() -> Self {
        Self {
            client: 2181,
            peer: 2888,
            election: 3888,
        }
    }
}

/// One line of the dynamic configuration
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnsembleMemberSpec {
    pub id: ServerId,
    pub ip: IpAddr,
    pub role: Role,
    pub client_port: u16,
    pub peer_port: u16,
    pub election_port: u16,
    /// Client bind host, when the line carries one (`;0.0.0.0:2181`)
    pub client_host: Option<String>,
}

impl EnsembleMemberSpec {
    pub fn new(id: ServerId, ip: IpAddr, role: Role, ports: ServicePorts) -> Self {
        Self {
            id,
            ip,
            role,
            client_port: ports.client,
            peer_port: ports.peer,
            election_port: ports.election,
            client_host: None,
        }
    }
}

impl fmt::Display for EnsembleMemberSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "server.{}={}:{}:{}:{};",
            self.id, self.ip, self.peer_port, self.election_port, self.role
        )?;
        match &self.client_host {
            Some(host) => write!(f, "{}:{}", host, self.client_port),
            None => write!(f, "{}", self.client_port),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed member line '{line}': {reason}")]
pub struct MemberParseError {
    pub line: String,
    pub reason: String,
}

impl MemberParseError {
    fn new(line: &str, reason: impl Into<String>) -> Self {
        Self {
            line: line.to_string(),
            reason: reason.into(),
        }
    }
}

impl FromStr for EnsembleMemberSpec {
    type Err = MemberParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let err = |reason: &str| MemberParseError::new(line, reason);

        let (key, value) = line.split_once('=').ok_or_else(|| err("missing '='"))?;
        let id = key
            .strip_prefix("server.")
            .ok_or_else(|| err("key does not start with 'server.'"))?
            .parse::<ServerId>()
            .map_err(|_| err("server id is not a positive integer"))?;
        if id == 0 {
            return Err(err("server id must be positive"));
        }

        let (server_part, client_part) = value
            .split_once(';')
            .ok_or_else(|| err("missing ';<client_port>'"))?;

        // IPv6 addresses are not supported: fields are ':'-separated.
        let fields: Vec<&str> = server_part.split(':').collect();
        let [ip, peer, election, rest @ ..] = fields.as_slice() else {
            return Err(err("expected <ip>:<peer_port>:<election_port>[:<role>]"));
        };
        let ip = ip.parse::<IpAddr>().map_err(|_| err("invalid ip"))?;
        let peer_port = peer.parse::<u16>().map_err(|_| err("invalid peer port"))?;
        let election_port = election
            .parse::<u16>()
            .map_err(|_| err("invalid election port"))?;
        let role = match rest {
            [] => Role::Participant,
            [role] => role.parse::<Role>().map_err(|e| err(&e.reason))?,
            _ => return Err(err("too many ':'-separated fields")),
        };

        let (client_host, client_port) = match client_part.rsplit_once(':') {
            Some((host, port)) => (Some(host.to_string()), port),
            None => (None, client_part),
        };
        let client_port = client_port
            .parse::<u16>()
            .map_err(|_| err("invalid client port"))?;

        Ok(Self {
            id,
            ip,
            role,
            client_port,
            peer_port,
            election_port,
            client_host,
        })
    }
}

/// The dynamic configuration: the authoritative member set, keyed by id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DynamicConfig {
    members: BTreeMap<ServerId, EnsembleMemberSpec>,
}

impl DynamicConfig {
    pub fn from_members(members: impl IntoIterator<Item = EnsembleMemberSpec>) -> Self {
        let mut config = Self::default();
        for member in members {
            config.upsert(member);
        }
        config
    }

    /// Parse member lines. Lines that are not `server.` entries
    /// (blank lines, `version=...`) are skipped.
    pub fn parse_lines<'a>(
        lines: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, MemberParseError> {
        let mut config = Self::default();
        for line in lines {
            let line = line.trim();
            if !line.starts_with("server.") {
                continue;
            }
            config.upsert(line.parse()?);
        }
        Ok(config)
    }

    /// Insert a member, replacing any entry with the same id
    pub fn upsert(&mut self, member: EnsembleMemberSpec) -> Option<EnsembleMemberSpec> {
        self.members.insert(member.id, member)
    }

    pub fn get(&self, id: ServerId) -> Option<&EnsembleMemberSpec> {
        self.members.get(&id)
    }

    pub fn contains(&self, id: ServerId) -> bool {
        self.members.contains_key(&id)
    }

    pub fn members(&self) -> impl Iterator<Item = &EnsembleMemberSpec> {
        self.members.values()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl FromStr for DynamicConfig {
    type Err = MemberParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_lines(s.lines())
    }
}

impl fmt::Display for DynamicConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, member) in self.members.values().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{member}")?;
        }
        Ok(())
    }
}
