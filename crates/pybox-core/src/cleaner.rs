//! Resource cleanup
//!
//! A request owns at most one unit and one staging directory. Both are
//! released through [`ResourceCleaner::cleanup`], which never fails: every
//! problem is logged and reported in the returned [`CleanupReport`].
//!
//! [`CleanupGuard`] ties that cleanup to scope exit so a panic or a
//! cancelled request future still releases what it created.

use crate::runtime::{Removal, RuntimeClient};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitCleanup {
    /// No unit was tracked.
    Skipped,
    Removed,
    AlreadyGone,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirCleanup {
    Skipped,
    Removed,
    AlreadyGone,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub unit: UnitCleanup,
    pub staging: DirCleanup,
}

#[derive(Clone)]
pub struct ResourceCleaner {
    runtime: Arc<dyn RuntimeClient>,
}

impl ResourceCleaner {
    pub fn new(runtime: Arc<dyn RuntimeClient>) -> Self {
        Self { runtime }
    }

    /// Remove the unit first, then the staging directory. One failing does not skip the other.
    pub async fn cleanup(&self, unit_name: Option<&str>, staging_dir: Option<&Path>) -> CleanupReport {
        let unit = match unit_name {
            Some(name) => self.remove_unit(name).await,
            None => UnitCleanup::Skipped,
        };
        let staging = match staging_dir {
            Some(dir) => remove_staging_dir(dir).await,
            None => DirCleanup::Skipped,
        };
        CleanupReport { unit, staging }
    }

    /// Force-remove a unit by name. A unit that no longer exists counts as clean.
    pub async fn remove_unit(&self, name: &str) -> UnitCleanup {
        match self.runtime.remove(name, true).await {
            Ok(Removal::Removed) => {
                log::debug!("Removed container {}", name);
                UnitCleanup::Removed
            }
            Ok(Removal::NotFound) => {
                log::debug!("Container {} already removed", name);
                UnitCleanup::AlreadyGone
            }
            Err(e) => {
                log::error!("Failed to remove container {}: {}", name, e);
                UnitCleanup::Failed(e.to_string())
            }
        }
    }

    /// Start tracking resources for one request.
    pub fn guard(&self) -> CleanupGuard {
        CleanupGuard {
            cleaner: self.clone(),
            unit_name: None,
            staging_dir: None,
            finished: false,
        }
    }
}

/// Recursively delete a staging directory, tolerating its absence.
pub async fn remove_staging_dir(dir: &Path) -> DirCleanup {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {
            log::debug!("Removed staging directory {}", dir.display());
            DirCleanup::Removed
        }
        Err(e) if e.kind() == ErrorKind::NotFound => DirCleanup::AlreadyGone,
        Err(e) => {
            log::error!("Failed to remove staging directory {}: {}", dir.display(), e);
            DirCleanup::Failed(e.to_string())
        }
    }
}

/// Releases the tracked unit and staging directory exactly once.
///
/// Call [`CleanupGuard::finish`] on the normal path. If the guard is dropped
/// unfinished, cleanup is spawned onto the current tokio runtime instead.
pub struct CleanupGuard {
    cleaner: ResourceCleaner,
    unit_name: Option<String>,
    staging_dir: Option<PathBuf>,
    finished: bool,
}

impl CleanupGuard {
    /// Track a unit name. Call before asking the runtime to create it.
    pub fn track_unit(&mut self, name: impl Into<String>) {
        self.unit_name = Some(name.into());
    }

    pub fn track_staging_dir(&mut self, dir: impl Into<PathBuf>) {
        self.staging_dir = Some(dir.into());
    }

    pub async fn finish(mut self) -> CleanupReport {
        let report = self
            .cleaner
            .cleanup(self.unit_name.as_deref(), self.staging_dir.as_deref())
            .await;
        self.finished = true;
        report
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if self.finished || (self.unit_name.is_none() && self.staging_dir.is_none()) {
            return;
        }

        let cleaner = self.cleaner.clone();
        let unit_name = self.unit_name.take();
        let staging_dir = self.staging_dir.take();
        log::warn!(
            "Request ended before cleanup (container {:?}, staging {:?}), cleaning up in background",
            unit_name,
            staging_dir
        );

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    cleaner
                        .cleanup(unit_name.as_deref(), staging_dir.as_deref())
                        .await;
                });
            }
            Err(_) => {
                // Without a runtime only the directory can be released.
                if let Some(dir) = staging_dir {
                    if let Err(e) = std::fs::remove_dir_all(&dir) {
                        log::error!("Failed to remove staging directory {}: {}", dir.display(), e);
                    }
                }
                if let Some(name) = unit_name {
                    log::error!("Container {} leaked: no async runtime to remove it", name);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockRuntime;
    use std::time::Duration;
    use tempfile::Builder;

    fn staging_dir() -> PathBuf {
        let dir = Builder::new().prefix("sandbox_test_").tempdir().unwrap();
        std::fs::write(dir.path().join("input.csv"), b"a,b\n").unwrap();
        dir.keep()
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.insert_unit("sandbox-0000aaaa");
        let cleaner = ResourceCleaner::new(runtime.clone());
        let dir = staging_dir();

        let first = cleaner.cleanup(Some("sandbox-0000aaaa"), Some(&dir)).await;
        assert_eq!(first.unit, UnitCleanup::Removed);
        assert_eq!(first.staging, DirCleanup::Removed);
        assert!(!dir.exists());

        let second = cleaner.cleanup(Some("sandbox-0000aaaa"), Some(&dir)).await;
        assert_eq!(second.unit, UnitCleanup::AlreadyGone);
        assert_eq!(second.staging, DirCleanup::AlreadyGone);
    }

    #[tokio::test]
    async fn test_unit_failure_does_not_skip_directory() {
        let runtime = Arc::new(MockRuntime::new().with_remove_failure());
        runtime.insert_unit("sandbox-0000bbbb");
        let cleaner = ResourceCleaner::new(runtime);
        let dir = staging_dir();

        let report = cleaner.cleanup(Some("sandbox-0000bbbb"), Some(&dir)).await;
        assert!(matches!(report.unit, UnitCleanup::Failed(_)));
        assert_eq!(report.staging, DirCleanup::Removed);
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_nothing_tracked() {
        let cleaner = ResourceCleaner::new(Arc::new(MockRuntime::new()));
        let report = cleaner.guard().finish().await;
        assert_eq!(report.unit, UnitCleanup::Skipped);
        assert_eq!(report.staging, DirCleanup::Skipped);
    }

    #[tokio::test]
    async fn test_dropped_guard_cleans_up_in_background() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.insert_unit("sandbox-0000cccc");
        let cleaner = ResourceCleaner::new(runtime.clone());
        let dir = staging_dir();

        {
            let mut guard = cleaner.guard();
            guard.track_unit("sandbox-0000cccc");
            guard.track_staging_dir(&dir);
        }

        for _ in 0..50 {
            if !dir.exists() && runtime.live_units().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!dir.exists());
        assert!(runtime.live_units().is_empty());
        assert_eq!(runtime.removed_units(), vec!["sandbox-0000cccc".to_string()]);
    }

    #[tokio::test]
    async fn test_finished_guard_does_not_clean_twice() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.insert_unit("sandbox-0000dddd");
        let cleaner = ResourceCleaner::new(runtime.clone());

        let mut guard = cleaner.guard();
        guard.track_unit("sandbox-0000dddd");
        guard.finish().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(runtime.removed_units(), vec!["sandbox-0000dddd".to_string()]);
    }
}
