//! Advisory per-instance lock.
//!
//! Two applies (or an apply and a rollback) against one instance must not
//! interleave. The lock is a file created with `create_new` in the state
//! directory and removed when the guard drops.

use anyhow::{Context, Result, bail};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
}

impl InstanceLock {
    pub fn acquire(dir: &Path, instance: &str) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Could not create lock directory {}", dir.display()))?;
        let path = dir.join(format!("{}.lock", sanitize(instance)));

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(&path).unwrap_or_default();
                bail!(
                    "Instance '{}' is locked by another tessera run ({}). Remove {} if that run is gone.",
                    instance,
                    holder.trim(),
                    path.display()
                );
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Could not create lock file {}", path.display()));
            }
        };

        let _ = writeln!(
            file,
            "pid {} since {}",
            std::process::id(),
            chrono::Utc::now().to_rfc3339()
        );
        log::debug!("Locked {instance} at {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            log::warn!("Could not remove lock {}: {e}", self.path.display());
        }
    }
}

fn sanitize(instance: &str) -> String {
    instance
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_is_exclusive() {
        let dir = TempDir::new().unwrap();
        let first = InstanceLock::acquire(dir.path(), "ws1").unwrap();

        let err = InstanceLock::acquire(dir.path(), "ws1").unwrap_err();
        assert!(err.to_string().contains("locked"));
        assert!(err.to_string().contains("pid"));

        // other instances are independent
        let _other = InstanceLock::acquire(dir.path(), "ws2").unwrap();
        drop(first);
    }

    #[test]
    fn test_lock_released_on_drop() {
        let dir = TempDir::new().unwrap();
        let path = {
            let lock = InstanceLock::acquire(dir.path(), "ws1").unwrap();
            assert!(lock.path().exists());
            lock.path().to_path_buf()
        };
        assert!(!path.exists());
        assert!(InstanceLock::acquire(dir.path(), "ws1").is_ok());
    }

    #[test]
    fn test_lock_creates_directory() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("state").join("locks");
        let lock = InstanceLock::acquire(&nested, "ws1").unwrap();
        assert!(lock.path().starts_with(&nested));
    }

    #[test]
    fn test_sanitize_path_separators() {
        assert_eq!(sanitize("../etc/ws1"), ".._etc_ws1");
        assert_eq!(sanitize("gpu-1.internal"), "gpu-1.internal");
    }
}
