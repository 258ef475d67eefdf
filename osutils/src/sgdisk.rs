//! GPT partition table edits through `sgdisk`.
//!
//! Partitions are always referred to by number on the command line, which is
//! the only form `sgdisk` accepts. Callers address them by label everywhere
//! else.

use std::path::Path;

use anyhow::{Context, Error};

use zroot_api::{config::Size, resources::SizeSpec};

use crate::dependencies::Dependency;

/// Describes a partition to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPartition<'a> {
    pub number: u32,
    pub start: Option<Size>,
    pub size: SizeSpec,
    pub type_code: &'a str,
    pub label: &'a str,
}

impl NewPartition<'_> {
    /// Arguments for `sgdisk`. A start of `0` and an end relative to the
    /// start (`+512M`) or to the end of the disk (`-20G`) are understood by
    /// `sgdisk` directly.
    fn args(&self) -> Vec<String> {
        let start = self
            .start
            .map(|s| s.to_string())
            .unwrap_or_else(|| "0".into());
        let end = match self.size {
            SizeSpec::Fixed(size) => format!("+{size}"),
            SizeSpec::RemainingMinus(reserve) if reserve.bytes() == 0 => "0".into(),
            SizeSpec::RemainingMinus(reserve) => format!("-{reserve}"),
        };

        vec![
            format!("--new={}:{start}:{end}", self.number),
            format!("--typecode={}:{}", self.number, self.type_code),
            format!("--change-name={}:{}", self.number, self.label),
        ]
    }
}

/// Adds a partition to the partition table of `disk`.
pub fn create_partition(disk: impl AsRef<Path>, partition: &NewPartition) -> Result<(), Error> {
    Dependency::Sgdisk
        .cmd()
        .args(partition.args())
        .arg(disk.as_ref())
        .run_and_check()
        .with_context(|| {
            format!(
                "Failed to create partition '{}' on '{}'",
                partition.label,
                disk.as_ref().display()
            )
        })
}

/// Removes partition `number` from the partition table of `disk`.
pub fn delete_partition(disk: impl AsRef<Path>, number: u32) -> Result<(), Error> {
    Dependency::Sgdisk
        .cmd()
        .with_arg(format!("--delete={number}"))
        .with_arg(disk.as_ref())
        .run_and_check()
        .with_context(|| {
            format!(
                "Failed to delete partition {number} on '{}'",
                disk.as_ref().display()
            )
        })
}

/// Destroys the GPT and MBR data structures on `disk`.
pub fn zap_all(disk: impl AsRef<Path>) -> Result<(), Error> {
    Dependency::Sgdisk
        .cmd()
        .with_arg("--zap-all")
        .with_arg(disk.as_ref())
        .run_and_check()
        .with_context(|| format!("Failed to zap '{}'", disk.as_ref().display()))
}

/// Writes a fresh, empty GPT to `disk`.
pub fn clear(disk: impl AsRef<Path>) -> Result<(), Error> {
    Dependency::Sgdisk
        .cmd()
        .with_arg("--clear")
        .with_arg("--mbrtogpt")
        .with_arg(disk.as_ref())
        .run_and_check()
        .with_context(|| {
            format!(
                "Failed to create a new partition table on '{}'",
                disk.as_ref().display()
            )
        })
}

/// Asks the kernel to re-read the partition table of `disk`.
pub fn reload(disk: impl AsRef<Path>) -> Result<(), Error> {
    Dependency::Partprobe
        .cmd()
        .with_arg(disk.as_ref())
        .run_and_check()
        .with_context(|| {
            format!(
                "Failed to reload the partition table of '{}'",
                disk.as_ref().display()
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_partition_args() {
        let efi = NewPartition {
            number: 1,
            start: Some(Size(1 << 20)),
            size: SizeSpec::Fixed(Size(512 << 20)),
            type_code: "EF00",
            label: "demo-efi",
        };
        assert_eq!(
            efi.args(),
            vec!["--new=1:1M:+512M", "--typecode=1:EF00", "--change-name=1:demo-efi"]
        );

        let zfs = NewPartition {
            number: 3,
            start: None,
            size: SizeSpec::RemainingMinus(Size(20 << 30)),
            type_code: "BF01",
            label: "demo-zfs",
        };
        assert_eq!(
            zfs.args(),
            vec!["--new=3:0:-20G", "--typecode=3:BF01", "--change-name=3:demo-zfs"]
        );

        let all = NewPartition {
            size: SizeSpec::RemainingMinus(Size(0)),
            ..zfs
        };
        assert_eq!(all.args()[0], "--new=3:0:0");
    }
}
