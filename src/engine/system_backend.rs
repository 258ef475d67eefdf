use std::path::Path;

use anyhow::{bail, Context, Error};
use log::{debug, info};

use osutils::{
    dd, files,
    findmnt::FindMnt,
    mkfs, mount,
    sgdisk::{self, NewPartition},
    udevadm, wipefs, zfs,
    zpool::{self, NewPool},
};
use zroot_api::{
    constants::PARTLABEL_DIR,
    outcome::Outcome,
    resources::{Dataset, FilesystemKind, MountKind, MountPoint, MountSource, Partition, Pool},
};

use super::backend::StorageBackend;

/// Amount of data zeroed at the start of a disk when erasing it.
const ERASE_ZERO_MIB: u64 = 10 * 1024;

/// Runs the system tools.
#[derive(Debug, Default)]
pub struct SystemBackend;

impl SystemBackend {
    fn partition_exists(name: &str) -> bool {
        Path::new(PARTLABEL_DIR).join(name).exists()
    }
}

impl StorageBackend for SystemBackend {
    fn create_partition(&self, partition: &Partition) -> Result<Outcome, Error> {
        if Self::partition_exists(&partition.name) {
            return Ok(Outcome::AlreadySatisfied);
        }

        sgdisk::create_partition(
            &partition.disk,
            &NewPartition {
                number: partition.ordinal,
                start: partition.start,
                size: partition.size,
                type_code: partition.type_code(),
                label: &partition.name,
            },
        )?;
        sgdisk::reload(&partition.disk)?;
        udevadm::settle()?;

        if !Self::partition_exists(&partition.name) {
            bail!(
                "Partition '{}' was created but '{}' did not appear",
                partition.name,
                partition.device_path().display()
            );
        }
        Ok(Outcome::Done)
    }

    fn format(&self, partition: &Partition, filesystem: FilesystemKind) -> Result<Outcome, Error> {
        let device = partition.device_path();
        if !device.exists() {
            return Ok(Outcome::NotFound);
        }
        mkfs::run(&device, filesystem, &partition.name)?;
        Ok(Outcome::Done)
    }

    fn create_pool(&self, pool: &Pool) -> Result<Outcome, Error> {
        let prompts = pool.encryption.is_enabled();

        let outcome = if zpool::exists(&pool.name)? {
            Outcome::AlreadySatisfied
        } else if zpool::import(&pool.name, &pool.altroot)?.is_done() {
            info!("Imported existing pool '{}'", pool.name);
            Outcome::AlreadySatisfied
        } else {
            if !pool.vdev_path.exists() {
                return Ok(Outcome::NotFound);
            }
            zpool::create(&NewPool {
                name: &pool.name,
                vdev: &pool.vdev_path,
                altroot: &pool.altroot,
                options: &pool.options,
                root_properties: &pool.root_properties,
                prompts,
            })?
        };

        if prompts && outcome == Outcome::AlreadySatisfied {
            let key = zfs::load_key(&pool.name, prompts)?;
            debug!("Loading key of pool '{}': {key}", pool.name);
        }
        Ok(outcome)
    }

    fn create_dataset(&self, dataset: &Dataset) -> Result<Outcome, Error> {
        zfs::create(&dataset.name, &dataset.creation_properties())
    }

    fn mount(&self, mount: &MountPoint) -> Result<Outcome, Error> {
        match (&mount.kind, &mount.source) {
            // The pool creates the directory under its altroot.
            (MountKind::Dataset, MountSource::Dataset(name)) => return zfs::mount(name),
            (MountKind::Dataset, source) => bail!("Dataset mount from {source:?}"),
            _ => (),
        }

        mount::ensure_mount_directory(&mount.target)?;
        match (&mount.kind, &mount.source) {
            (MountKind::Block(filesystem), MountSource::Partition(name)) => mount::mount(
                Path::new(PARTLABEL_DIR).join(name),
                &mount.target,
                filesystem.probe_name(),
                &mount.options,
            ),
            (MountKind::RecursiveBind, MountSource::HostPath(host)) => {
                mount::rbind(host, &mount.target)
            }
            (MountKind::Bind, MountSource::HostPath(host)) => mount::bind(
                host,
                &mount.target,
                mount.options.iter().any(|o| o == "ro"),
            ),
            (MountKind::LoopOffset { offset }, MountSource::HostPath(image)) => {
                mount::mount_loop_offset(image, &mount.target, *offset, &mount.options)
            }
            (kind, source) => bail!("Cannot perform a {kind} mount from {source:?}"),
        }
    }

    fn set_mode(&self, path: &Path, mode: u32) -> Result<Outcome, Error> {
        if !path.exists() {
            return Ok(Outcome::NotFound);
        }
        files::set_mode(path, mode)?;
        Ok(Outcome::Done)
    }

    fn unmount(&self, target: &Path, recursive: bool, lazy: bool) -> Result<Outcome, Error> {
        mount::umount(target, recursive, lazy)
    }

    fn destroy_dataset(&self, name: &str, recursive: bool) -> Result<Outcome, Error> {
        zfs::destroy(name, recursive)
    }

    fn export_pool(&self, name: &str) -> Result<Outcome, Error> {
        zpool::export(name)
    }

    fn destroy_pool(&self, name: &str) -> Result<Outcome, Error> {
        zpool::destroy(name)
    }

    fn delete_partition(&self, partition: &Partition) -> Result<Outcome, Error> {
        if !Self::partition_exists(&partition.name) {
            return Ok(Outcome::NotFound);
        }
        sgdisk::delete_partition(&partition.disk, partition.ordinal)?;
        sgdisk::reload(&partition.disk)?;
        Ok(Outcome::Done)
    }

    fn remove_directory(&self, path: &Path, recursive: bool) -> Result<Outcome, Error> {
        if !recursive {
            return mount::remove_mount_directory(path);
        }

        // Never recurse into a host tree that is still bind-mounted below.
        let mounts = FindMnt::run().context("Failed to read the mount table")?;
        if let Some(busy) = mounts.targets().iter().find(|t| t.starts_with(path)) {
            bail!(
                "Refusing to remove '{}': '{}' is still mounted",
                path.display(),
                busy.display()
            );
        }

        Ok(if files::remove_dir_all(path)? {
            Outcome::Done
        } else {
            Outcome::NotFound
        })
    }

    fn erase_disk(&self, disk: &Path) -> Result<Outcome, Error> {
        if !disk.exists() {
            return Ok(Outcome::NotFound);
        }
        wipefs::all(disk)?;
        sgdisk::zap_all(disk)?;
        sgdisk::clear(disk)?;
        dd::zero(disk, ERASE_ZERO_MIB)?;
        sgdisk::reload(disk)?;
        udevadm::settle()?;
        Ok(Outcome::Done)
    }
}
