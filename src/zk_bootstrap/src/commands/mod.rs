//! Command handlers

pub(crate) mod common;
pub mod bootstrap;
pub mod reconcile;

// Re-export command handlers
pub use bootstrap::handle_bootstrap;
pub use reconcile::handle_reconcile;
