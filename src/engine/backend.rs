//! The storage backend performs every state-changing operation on behalf of
//! the engines.
//!
//! Each call returns a trinary [`Outcome`] on success: `Done` when it
//! changed the system, `AlreadySatisfied` when the requested state was
//! already in place, and `NotFound` when the resource it operates on (or
//! needs) does not exist. Anything else is an error. Engines decide what
//! `NotFound` means for the step at hand.

use std::path::Path;

use anyhow::Error;

use zroot_api::{
    outcome::Outcome,
    resources::{Dataset, FilesystemKind, MountPoint, Partition, Pool},
};

pub trait StorageBackend {
    /// Adds `partition` to the partition table of its disk.
    fn create_partition(&self, partition: &Partition) -> Result<Outcome, Error>;

    /// Writes a filesystem onto a partition, labelled with the partition's
    /// name.
    fn format(&self, partition: &Partition, filesystem: FilesystemKind) -> Result<Outcome, Error>;

    /// Creates the pool, or imports an exported pool of the same name, and
    /// makes its encryption key available.
    fn create_pool(&self, pool: &Pool) -> Result<Outcome, Error>;

    fn create_dataset(&self, dataset: &Dataset) -> Result<Outcome, Error>;

    /// Mounts `mount` at its target, creating the target directory when the
    /// kind of mount needs it.
    fn mount(&self, mount: &MountPoint) -> Result<Outcome, Error>;

    /// Sets the permission bits of a directory.
    fn set_mode(&self, path: &Path, mode: u32) -> Result<Outcome, Error>;

    fn unmount(&self, target: &Path, recursive: bool, lazy: bool) -> Result<Outcome, Error>;

    fn destroy_dataset(&self, name: &str, recursive: bool) -> Result<Outcome, Error>;

    /// Exports the pool, releasing its devices while keeping its data.
    fn export_pool(&self, name: &str) -> Result<Outcome, Error>;

    fn destroy_pool(&self, name: &str) -> Result<Outcome, Error>;

    fn delete_partition(&self, partition: &Partition) -> Result<Outcome, Error>;

    /// Removes a directory. A non-recursive removal only succeeds on an
    /// empty directory.
    fn remove_directory(&self, path: &Path, recursive: bool) -> Result<Outcome, Error>;

    /// Erases every signature, partition table and the first blocks of a
    /// whole disk.
    fn erase_disk(&self, disk: &Path) -> Result<Outcome, Error>;
}
