//! Files the node keeps on its own disk
//!
//! - the identity file (`myid`), a single server id
//! - the dynamic configuration, one member line per server
//! - the static configuration (`zoo.cfg`), whose `dynamicConfigFile=` line
//!   must point at the dynamic configuration
//!
//! Identity and dynamic files are backed up to `<file>.bk` before every
//! overwrite.

use crate::{
    ensemble::{DynamicConfig, ExternalError, LocalStore, ServerId},
    util::files::save_with_backup,
};
use std::{
    io,
    path::{Path, PathBuf},
};
use tracing::info;

const DYNAMIC_CONFIG_KEY: &str = "dynamicConfigFile";

/// Static configuration file name inside the configuration directory
pub const STATIC_CONFIG_FILE: &str = "zoo.cfg";

#[derive(Debug, Clone)]
pub struct LocalFiles {
    id_file: PathBuf,
    dynamic_file: PathBuf,
    static_file: PathBuf,
}

impl LocalFiles {
    pub fn new(id_file: PathBuf, dynamic_file: PathBuf, conf_dir: &Path) -> Self {
        Self {
            id_file,
            dynamic_file,
            static_file: conf_dir.join(STATIC_CONFIG_FILE),
        }
    }

    pub fn id_file(&self) -> &Path {
        &self.id_file
    }

    pub fn dynamic_file(&self) -> &Path {
        &self.dynamic_file
    }

    pub fn static_file(&self) -> &Path {
        &self.static_file
    }
}

/// Rewrite the `dynamicConfigFile=` line of a static configuration, appending it if absent
pub fn point_at_dynamic_file(static_config: &str, dynamic_file: &Path) -> String {
    let entry = format!("{}={}", DYNAMIC_CONFIG_KEY, dynamic_file.display());
    let mut replaced = false;

    let mut lines: Vec<String> = static_config
        .lines()
        .map(|line| {
            let is_entry = line
                .split_once('=')
                .is_some_and(|(key, _)| key.trim() == DYNAMIC_CONFIG_KEY);
            if is_entry {
                replaced = true;
                entry.clone()
            } else {
                line.to_string()
            }
        })
        .collect();

    if !replaced {
        lines.push(entry);
    }

    let mut content = lines.join("\n");
    content.push('\n');
    content
}

async fn save(path: &Path, content: String) -> Result<(), ExternalError> {
    let target = path.to_path_buf();
    tokio::task::spawn_blocking(move || save_with_backup(&target, &content))
        .await
        .map_err(|err| ExternalError::io(path.display().to_string(), io::Error::other(err)))?
        .map_err(|source| ExternalError::io(format!("write {}", path.display()), source))
}

impl LocalStore for LocalFiles {
    async fn write_identity(&self, id: ServerId) -> Result<(), ExternalError> {
        save(&self.id_file, id.to_string()).await?;
        info!("Saved server id {} to {}", id, self.id_file.display());
        Ok(())
    }

    async fn write_dynamic_config(&self, config: &DynamicConfig) -> Result<(), ExternalError> {
        save(&self.dynamic_file, config.to_string()).await?;
        info!(
            "Saved {} members to {}",
            config.len(),
            self.dynamic_file.display()
        );
        Ok(())
    }

    async fn point_static_config(&self) -> Result<(), ExternalError> {
        let current = match tokio::fs::read_to_string(&self.static_file).await {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => String::new(),
            Err(source) => {
                return Err(ExternalError::io(
                    format!("read {}", self.static_file.display()),
                    source,
                ))
            }
        };

        let updated = point_at_dynamic_file(&current, &self.dynamic_file);
        tokio::fs::write(&self.static_file, updated)
            .await
            .map_err(|source| {
                ExternalError::io(format!("write {}", self.static_file.display()), source)
            })?;
        info!(
            "Pointed {} at {}",
            self.static_file.display(),
            self.dynamic_file.display()
        );
        Ok(())
    }
}
