use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};

use anyhow::{Context, Error};
use log::{debug, trace};

use osutils::{dependencies::Dependency, findmnt::FindMnt, lsblk, zfs, zpool};
use zroot_api::resources::{Resource, ResourceState};

/// Point-in-time view of what exists and what is mounted.
///
/// A pass takes one snapshot when it starts and makes every decision from
/// it; the live system is never queried again halfway through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountState {
    mounts: BTreeSet<PathBuf>,
    pools: BTreeSet<String>,
    datasets: BTreeSet<String>,
    /// Partition label to the filesystem found on the partition.
    partitions: BTreeMap<String, Option<String>>,
}

impl MountState {
    pub fn new(
        mounts: impl IntoIterator<Item = PathBuf>,
        pools: impl IntoIterator<Item = String>,
        datasets: impl IntoIterator<Item = String>,
        partitions: BTreeMap<String, Option<String>>,
    ) -> Self {
        Self {
            mounts: mounts.into_iter().collect(),
            pools: pools.into_iter().collect(),
            datasets: datasets.into_iter().collect(),
            partitions,
        }
    }

    pub fn is_mounted(&self, path: impl AsRef<Path>) -> bool {
        self.mounts.contains(path.as_ref())
    }

    pub fn has_pool(&self, name: &str) -> bool {
        self.pools.contains(name)
    }

    pub fn has_dataset(&self, name: &str) -> bool {
        self.datasets.contains(name)
    }

    pub fn has_partition(&self, label: &str) -> bool {
        self.partitions.contains_key(label)
    }

    /// Filesystem found on the partition labelled `label`, if the partition
    /// exists and holds one.
    pub fn partition_filesystem(&self, label: &str) -> Option<&str> {
        self.partitions.get(label).and_then(|fs| fs.as_deref())
    }

    /// Every mounted path, sorted.
    pub fn mounts(&self) -> impl Iterator<Item = &Path> {
        self.mounts.iter().map(PathBuf::as_path)
    }

    pub fn resource_state(&self, resource: &Resource) -> ResourceState {
        let exists = match resource {
            Resource::Partition(p) => self.has_partition(&p.name),
            Resource::Pool(p) => self.has_pool(&p.name),
            Resource::Dataset(d) => self.has_dataset(&d.name),
            Resource::Mount(m) => {
                return if self.is_mounted(&m.target) {
                    ResourceState::Mounted
                } else {
                    ResourceState::Absent
                };
            }
        };

        if exists {
            ResourceState::Created
        } else {
            ResourceState::Absent
        }
    }
}

pub trait MountInspector {
    fn snapshot(&self) -> Result<MountState, Error>;

    /// Whether anything exists at `path` right now, mounted or not.
    fn path_exists(&self, path: &Path) -> bool;
}

/// Reads the mount table, the pool and dataset lists and the partition
/// labels of the running system.
#[derive(Debug, Default)]
pub struct SystemInspector;

impl MountInspector for SystemInspector {
    fn snapshot(&self) -> Result<MountState, Error> {
        let mounts = FindMnt::run()
            .context("Failed to read the mount table")?
            .targets();

        // Without the ZFS tools there cannot be any pool yet.
        let (pools, datasets) = if Dependency::Zpool.exists() && Dependency::Zfs.exists() {
            let pools = zpool::list()?;
            let datasets = zfs::list()?.into_iter().map(|d| d.name).collect();
            (pools, datasets)
        } else {
            debug!("ZFS tools are not installed, assuming no pools exist");
            (Vec::new(), Vec::new())
        };

        let partitions = lsblk::partitions_by_label(&lsblk::list()?);

        let state = MountState::new(mounts, pools, datasets, partitions);
        trace!("Mount state snapshot: {state:?}");
        Ok(state)
    }

    fn path_exists(&self, path: &Path) -> bool {
        path.exists()
    }
}
