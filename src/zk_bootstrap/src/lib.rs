//! Bootstrap and maintain a ZooKeeper ensemble on an AWS auto-scaling group.
//!
//! The coordination logic lives in [`ensemble`] and only talks to the outside
//! world through the collaborator traits in [`ensemble::traits`]. The
//! production collaborators are [`aws::AwsCli`], [`zookeeper::ZkControl`] and
//! [`local::LocalFiles`].

pub mod aws;
pub mod cli;
pub mod commands;
pub mod ensemble;
pub mod local;
pub mod process;
pub mod util;
pub mod zookeeper;
