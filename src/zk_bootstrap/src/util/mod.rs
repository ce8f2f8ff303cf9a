//! Shared utilities

pub mod files;
pub mod logging;
pub mod poll;
pub mod timestamp;
