//! External command execution

mod command;

pub use command::{default_search_path, search_path_from_environment, CommandError, CommandRunner};
