//! Backed-up file writes
//!
//! New content goes to a temporary file in the target directory and is
//! renamed over the target, so readers never see a half-written file.

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use tracing::debug;

/// Path of the backup copy kept next to `path` (`<path>.bk`)
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".bk");
    PathBuf::from(name)
}

/// Save `content` to `path`, copying any previous content to `<path>.bk` first
pub fn save_with_backup(path: &Path, content: &str) -> io::Result<()> {
    if path.is_file() {
        let backup = backup_path(path);
        fs::copy(path, &backup)?;
        debug!("Backed up {} to {}", path.display(), backup.display());
    }

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let mut staged = NamedTempFile::new_in(parent)?;
    staged.write_all(content.as_bytes())?;
    staged.as_file().sync_all()?;
    staged.persist(path).map_err(|err| err.error)?;
    debug!("Saved {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_path_appends_suffix() {
        assert_eq!(
            backup_path(Path::new("/var/lib/zookeeper/myid")),
            PathBuf::from("/var/lib/zookeeper/myid.bk")
        );
    }

    #[test]
    fn test_first_save_creates_no_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("myid");

        save_with_backup(&path, "3").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "3");
        assert!(!backup_path(&path).exists());
    }

    #[test]
    fn test_overwrite_keeps_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zoo.cfg.dynamic");

        save_with_backup(&path, "old").unwrap();
        save_with_backup(&path, "new").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
        assert_eq!(fs::read_to_string(backup_path(&path)).unwrap(), "old");
    }

    #[test]
    fn test_save_leaves_no_staging_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("myid");

        save_with_backup(&path, "1").unwrap();
        save_with_backup(&path, "2").unwrap();

        let mut names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["myid", "myid.bk"]);
    }

    #[test]
    fn test_save_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data/zookeeper/myid");

        save_with_backup(&path, "1").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "1");
    }
}
