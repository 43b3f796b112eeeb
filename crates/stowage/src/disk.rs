//! Free disk space floor shared by all title workers.
//!
//! Once the floor is breached the guard stays breached for the rest of the run:
//! no new title starts its fragment phase, titles already fetching carry on.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use sysinfo::Disks;
use tracing::{debug, warn};

use crate::error::{Result, StowageError};

/// Reports free space for the filesystem holding a path.
pub trait SpaceProbe: Send + Sync {
    /// `None` when the filesystem cannot be determined.
    fn available_space(&self, path: &Path) -> Option<u64>;
}

/// [`SpaceProbe`] over the mounted disks reported by the OS.
#[derive(Debug, Default)]
pub struct SysinfoProbe {
    disks: Mutex<Disks>,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            disks: Mutex::new(Disks::new_with_refreshed_list()),
        }
    }
}

impl SpaceProbe for SysinfoProbe {
    fn available_space(&self, path: &Path) -> Option<u64> {
        let path = std::path::absolute(path).ok()?;
        let mut disks = self.disks.lock();
        disks.refresh(true);

        // The disk with the longest matching mount point holds the path.
        disks
            .list()
            .iter()
            .filter(|disk| path.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| disk.available_space())
    }
}

/// Fixed free space, for tests and dry runs.
#[derive(Debug)]
pub struct FixedProbe(pub Option<u64>);

impl SpaceProbe for FixedProbe {
    fn available_space(&self, _path: &Path) -> Option<u64> {
        self.0
    }
}

pub struct DiskGuard {
    floor: u64,
    probe: Box<dyn SpaceProbe>,
    breached: AtomicBool,
}

impl DiskGuard {
    pub fn new(floor: u64, probe: Box<dyn SpaceProbe>) -> Self {
        Self {
            floor,
            probe,
            breached: AtomicBool::new(false),
        }
    }

    pub fn with_sysinfo(floor: u64) -> Self {
        Self::new(floor, Box::new(SysinfoProbe::new()))
    }

    pub fn floor(&self) -> u64 {
        self.floor
    }

    pub fn is_breached(&self) -> bool {
        self.breached.load(Ordering::Acquire)
    }

    /// Fails with `DiskSpaceExhausted` when free space at `path` is below the
    /// floor, or when an earlier check already found it below. Unknown free
    /// space lets the work proceed.
    pub fn check(&self, path: &Path) -> Result<()> {
        if self.floor == 0 {
            return Ok(());
        }
        if self.is_breached() {
            return Err(StowageError::DiskSpaceExhausted {
                available: 0,
                floor: self.floor,
            });
        }

        match self.probe.available_space(path) {
            Some(available) if available < self.floor => {
                self.breached.store(true, Ordering::Release);
                warn!(
                    path = %path.display(),
                    available,
                    floor = self.floor,
                    "Free disk space below floor, no new titles will start"
                );
                Err(StowageError::DiskSpaceExhausted {
                    available,
                    floor: self.floor,
                })
            }
            Some(available) => {
                debug!(path = %path.display(), available, floor = self.floor, "Disk space OK");
                Ok(())
            }
            None => {
                warn!(path = %path.display(), "Could not determine free disk space");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_passes_above_floor() {
        let guard = DiskGuard::new(100, Box::new(FixedProbe(Some(1_000))));
        assert!(guard.check(Path::new("/data")).is_ok());
        assert!(!guard.is_breached());
    }

    #[test]
    fn test_guard_latches_once_breached() {
        let guard = DiskGuard::new(100, Box::new(FixedProbe(Some(50))));
        assert!(matches!(
            guard.check(Path::new("/data")),
            Err(StowageError::DiskSpaceExhausted {
                available: 50,
                floor: 100
            })
        ));
        assert!(guard.is_breached());
        assert!(guard.check(Path::new("/data")).is_err());
    }

    #[test]
    fn test_unknown_space_and_zero_floor_pass() {
        let guard = DiskGuard::new(100, Box::new(FixedProbe(None)));
        assert!(guard.check(Path::new("/data")).is_ok());

        let guard = DiskGuard::new(0, Box::new(FixedProbe(Some(0))));
        assert!(guard.check(Path::new("/data")).is_ok());
    }

    #[test]
    fn test_sysinfo_probe_refreshes_between_checks() {
        let probe = SysinfoProbe::new();
        let dir = tempfile::tempdir().unwrap();
        // may be None inside minimal containers
        let first = probe.available_space(dir.path());
        let second = probe.available_space(dir.path());
        assert_eq!(first.is_some(), second.is_some());
    }
}
