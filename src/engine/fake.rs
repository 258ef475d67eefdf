//! In-memory stand-in for the host, used by the engine tests.
//!
//! Tracks partitions, pools, datasets and mounts the way the real tools
//! report them, and refuses the same things the real tools refuse: busy
//! datasets cannot be destroyed, pools with mounted datasets cannot be
//! exported, directories with mounts below them cannot be removed.

use std::{
    cell::RefCell,
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};

use anyhow::{bail, Error};

use zroot_api::{
    config::ProvisionConfig,
    outcome::Outcome,
    resources::{
        Dataset, FilesystemKind, MountKind, MountPoint, MountSource, Partition, Pool,
        ResourceModel,
    },
};

use super::{
    backend::StorageBackend,
    mount_state::{MountInspector, MountState},
    EngineContext,
};

#[derive(Debug, Default)]
struct FakeState {
    /// Partition label to filesystem.
    partitions: BTreeMap<String, Option<String>>,
    /// Pool name to whether the pool is imported.
    pools: BTreeMap<String, bool>,
    datasets: BTreeSet<String>,
    mounts: BTreeMap<PathBuf, MountSource>,
    directories: BTreeSet<PathBuf>,
    modes: BTreeMap<PathBuf, u32>,
    executed: Vec<String>,
    failures: BTreeSet<String>,
    missing: BTreeSet<PathBuf>,
}

impl FakeState {
    fn pool_imported(&self, pool: &str) -> bool {
        self.pools.get(pool).copied().unwrap_or(false)
    }

    fn dataset_visible(&self, name: &str) -> bool {
        self.datasets.contains(name) && self.pool_imported(pool_of(name))
    }

    /// Whether `path` is a directory or mount point, or holds one below it.
    fn path_exists(&self, path: &Path) -> bool {
        self.directories
            .iter()
            .chain(self.mounts.keys())
            .any(|p| p.starts_with(path))
    }

    fn mounted_datasets<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a str> {
        self.mounts.values().filter_map(move |source| match source {
            MountSource::Dataset(name) if is_within(name, prefix) => Some(name.as_str()),
            _ => None,
        })
    }
}

fn pool_of(dataset: &str) -> &str {
    dataset.split('/').next().unwrap_or(dataset)
}

/// Whether `name` is the dataset `ancestor` or one of its descendants.
fn is_within(name: &str, ancestor: &str) -> bool {
    name == ancestor
        || name
            .strip_prefix(ancestor)
            .is_some_and(|rest| rest.starts_with('/'))
}

#[derive(Debug, Default)]
pub struct FakeSystem {
    state: RefCell<FakeState>,
}

impl FakeSystem {
    /// Every operation that changed something, as `"{operation} {subject}"`.
    pub fn executed(&self) -> Vec<String> {
        self.state.borrow().executed.clone()
    }

    pub fn mode(&self, path: impl AsRef<Path>) -> Option<u32> {
        self.state.borrow().modes.get(path.as_ref()).copied()
    }

    pub fn has_directory(&self, path: impl AsRef<Path>) -> bool {
        self.state.borrow().directories.contains(path.as_ref())
    }

    /// Makes `"{operation} {subject}"` fail until failures are cleared.
    pub fn fail_on(&self, key: &str) {
        self.state.borrow_mut().failures.insert(key.to_owned());
    }

    pub fn clear_failures(&self) {
        self.state.borrow_mut().failures.clear();
    }

    /// Makes a host path unavailable as a mount source.
    pub fn mark_missing(&self, path: impl Into<PathBuf>) {
        self.state.borrow_mut().missing.insert(path.into());
    }

    /// Mounts something at `target` behind the engine's back.
    pub fn mark_mounted(&self, target: &Path) {
        let mut state = self.state.borrow_mut();
        state
            .mounts
            .insert(target.to_owned(), MountSource::HostPath("none".into()));
        state.directories.insert(target.to_owned());
    }

    /// Unmounts `target` behind the engine's back.
    pub fn mark_unmounted(&self, target: &Path) {
        self.state.borrow_mut().mounts.remove(target);
    }

    fn attempt(
        &self,
        operation: &str,
        subject: impl AsRef<str>,
        change: impl FnOnce(&mut FakeState) -> Result<Outcome, Error>,
    ) -> Result<Outcome, Error> {
        let key = format!("{operation} {}", subject.as_ref());
        let mut state = self.state.borrow_mut();
        if state.failures.contains(&key) {
            bail!("Injected failure: {key}");
        }

        let outcome = change(&mut *state)?;
        if outcome == Outcome::Done {
            state.executed.push(key);
        }
        Ok(outcome)
    }
}

impl MountInspector for FakeSystem {
    fn snapshot(&self) -> Result<MountState, Error> {
        let state = self.state.borrow();
        Ok(MountState::new(
            state.mounts.keys().cloned(),
            state
                .pools
                .iter()
                .filter(|(_, imported)| **imported)
                .map(|(name, _)| name.clone()),
            state
                .datasets
                .iter()
                .filter(|name| state.pool_imported(pool_of(name)))
                .cloned(),
            state.partitions.clone(),
        ))
    }

    fn path_exists(&self, path: &Path) -> bool {
        self.state.borrow().path_exists(path)
    }
}

impl StorageBackend for FakeSystem {
    fn create_partition(&self, partition: &Partition) -> Result<Outcome, Error> {
        self.attempt("create-partition", &partition.name, |state| {
            if state.partitions.contains_key(&partition.name) {
                return Ok(Outcome::AlreadySatisfied);
            }
            state.partitions.insert(partition.name.clone(), None);
            Ok(Outcome::Done)
        })
    }

    fn format(&self, partition: &Partition, filesystem: FilesystemKind) -> Result<Outcome, Error> {
        self.attempt("format", &partition.name, |state| {
            let Some(current) = state.partitions.get_mut(&partition.name) else {
                return Ok(Outcome::NotFound);
            };
            *current = Some(filesystem.probe_name().to_owned());
            Ok(Outcome::Done)
        })
    }

    fn create_pool(&self, pool: &Pool) -> Result<Outcome, Error> {
        self.attempt("create-pool", &pool.name, |state| {
            if let Some(imported) = state.pools.get_mut(&pool.name) {
                *imported = true;
                return Ok(Outcome::AlreadySatisfied);
            }
            if !state.partitions.contains_key(&pool.vdev) {
                return Ok(Outcome::NotFound);
            }
            state.pools.insert(pool.name.clone(), true);
            state.datasets.insert(pool.name.clone());
            Ok(Outcome::Done)
        })
    }

    fn create_dataset(&self, dataset: &Dataset) -> Result<Outcome, Error> {
        self.attempt("create-dataset", &dataset.name, |state| {
            if state.dataset_visible(&dataset.name) {
                return Ok(Outcome::AlreadySatisfied);
            }
            match dataset.parent() {
                Some(parent) if state.dataset_visible(parent) => (),
                _ => return Ok(Outcome::NotFound),
            }
            state.datasets.insert(dataset.name.clone());
            Ok(Outcome::Done)
        })
    }

    fn mount(&self, mount: &MountPoint) -> Result<Outcome, Error> {
        self.attempt("mount", mount.target.display().to_string(), |state| {
            if state.mounts.contains_key(&mount.target) {
                return Ok(Outcome::AlreadySatisfied);
            }

            let available = match (&mount.kind, &mount.source) {
                (_, MountSource::Dataset(name)) => state.dataset_visible(name),
                (MountKind::Block(filesystem), MountSource::Partition(name)) => {
                    match state.partitions.get(name) {
                        None => false,
                        Some(found) if found.as_deref() == Some(filesystem.probe_name()) => true,
                        Some(found) => bail!("Partition '{name}' holds {found:?}, not {filesystem}"),
                    }
                }
                (_, MountSource::Partition(name)) => state.partitions.contains_key(name),
                (_, MountSource::HostPath(path)) => !state.missing.contains(path),
            };
            if !available {
                return Ok(Outcome::NotFound);
            }

            state
                .mounts
                .insert(mount.target.clone(), mount.source.clone());
            state.directories.insert(mount.target.clone());
            Ok(Outcome::Done)
        })
    }

    fn set_mode(&self, path: &Path, mode: u32) -> Result<Outcome, Error> {
        self.attempt("set-mode", path.display().to_string(), |state| {
            if !state.directories.contains(path) {
                return Ok(Outcome::NotFound);
            }
            state.modes.insert(path.to_owned(), mode);
            Ok(Outcome::Done)
        })
    }

    fn unmount(&self, target: &Path, recursive: bool, _lazy: bool) -> Result<Outcome, Error> {
        self.attempt("unmount", target.display().to_string(), |state| {
            let below: Vec<PathBuf> = state
                .mounts
                .keys()
                .filter(|m| m.starts_with(target) && m.as_path() != target)
                .cloned()
                .collect();
            if !state.mounts.contains_key(target) {
                // Like umount, only an existing directory is "not mounted".
                if !state.path_exists(target) {
                    bail!("umount: {}: not found", target.display());
                }
                return Ok(Outcome::NotFound);
            }
            if !below.is_empty() && !recursive {
                bail!("'{}' is busy", target.display());
            }

            for mount in below {
                state.mounts.remove(&mount);
            }
            state.mounts.remove(target);
            // Directories created inside the unmounted filesystem go with it.
            state
                .directories
                .retain(|d| !d.starts_with(target) || d.as_path() == target);
            Ok(Outcome::Done)
        })
    }

    fn destroy_dataset(&self, name: &str, recursive: bool) -> Result<Outcome, Error> {
        self.attempt("destroy-dataset", name, |state| {
            if !state.dataset_visible(name) {
                return Ok(Outcome::NotFound);
            }
            if !recursive && state.datasets.iter().any(|d| d != name && is_within(d, name)) {
                bail!("Dataset '{name}' has children");
            }
            if let Some(busy) = state.mounted_datasets(name).next() {
                bail!("Dataset '{busy}' is busy");
            }
            state.datasets.retain(|d| !is_within(d, name));
            Ok(Outcome::Done)
        })
    }

    fn export_pool(&self, name: &str) -> Result<Outcome, Error> {
        self.attempt("export-pool", name, |state| {
            if !state.pool_imported(name) {
                return Ok(Outcome::NotFound);
            }
            if let Some(busy) = state.mounted_datasets(name).next() {
                bail!("Cannot export pool '{name}': '{busy}' is mounted");
            }
            state.pools.insert(name.to_owned(), false);
            Ok(Outcome::Done)
        })
    }

    fn destroy_pool(&self, name: &str) -> Result<Outcome, Error> {
        self.attempt("destroy-pool", name, |state| {
            if !state.pool_imported(name) {
                return Ok(Outcome::NotFound);
            }
            if let Some(busy) = state.mounted_datasets(name).next() {
                bail!("Cannot destroy pool '{name}': '{busy}' is mounted");
            }
            state.pools.remove(name);
            state.datasets.retain(|d| !is_within(d, name));
            Ok(Outcome::Done)
        })
    }

    fn delete_partition(&self, partition: &Partition) -> Result<Outcome, Error> {
        self.attempt("delete-partition", &partition.name, |state| {
            Ok(match state.partitions.remove(&partition.name) {
                Some(_) => Outcome::Done,
                None => Outcome::NotFound,
            })
        })
    }

    fn remove_directory(&self, path: &Path, recursive: bool) -> Result<Outcome, Error> {
        self.attempt("remove-directory", path.display().to_string(), |state| {
            if let Some(busy) = state.mounts.keys().find(|m| m.starts_with(path)) {
                bail!("'{}' is still mounted", busy.display());
            }
            if !state.directories.contains(path) {
                return Ok(Outcome::NotFound);
            }
            if !recursive && state.directories.iter().any(|d| d.starts_with(path) && d != path) {
                bail!("Directory '{}' is not empty", path.display());
            }
            state.directories.retain(|d| !d.starts_with(path));
            Ok(Outcome::Done)
        })
    }

    fn erase_disk(&self, disk: &Path) -> Result<Outcome, Error> {
        self.attempt("erase-disk", disk.display().to_string(), |state| {
            if let Some((target, _)) = state
                .mounts
                .iter()
                .find(|(_, source)| !matches!(source, MountSource::HostPath(_)))
            {
                bail!("'{}' is still mounted from the disk", target.display());
            }
            state.partitions.clear();
            state.pools.clear();
            state.datasets.clear();
            Ok(Outcome::Done)
        })
    }
}

/// Configuration used throughout the engine tests. The package cache bind
/// is left out so nothing depends on the host.
pub fn demo_config() -> ProvisionConfig {
    let mut config = ProvisionConfig::new("/dev/disk/by-id/nvme-demo", "demo", "jammy");
    config.package_cache = None;
    config
}

/// Runs `f` with an engine context whose inspector and backend are both
/// `system`.
pub fn with_context<T>(
    system: &FakeSystem,
    config: &ProvisionConfig,
    f: impl FnOnce(&EngineContext) -> T,
) -> T {
    let model = ResourceModel::build(config);
    let plan = model.plan().unwrap();
    f(&EngineContext {
        config,
        model: &model,
        plan: &plan,
        inspector: system,
        backend: system,
    })
}
