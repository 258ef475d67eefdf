//! Module for interacting with the `findmnt` command.
//!
//! `findmnt --json` prints the mount table of the calling process as a tree:
//! every entry lists the mounts below it in `children`. The tree is parsed
//! into `FindMnt` and can be flattened depth-first, which is the form the
//! mount state snapshot needs.
//!
//! For example, a host with a staged pool mounted under `/mnt/zroot` shows
//! (`findmnt -o target,source,fstype`):
//!
//! ```text
//! TARGET                                 SOURCE                              FSTYPE
//! /                                      /dev/sda2                           ext4
//! ├─/proc                                proc                                proc
//! ├─/dev                                 udev                                devtmpfs
//! └─/mnt/zroot                           demo/jammy/root                     zfs
//!   ├─/mnt/zroot/var/log                 demo/jammy/var/log                  zfs
//!   ├─/mnt/zroot/boot                    /dev/nvme0n1p2                      ext4
//!   └─/mnt/zroot/dev                     udev[/]                             devtmpfs
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::dependencies::Dependency;

/// Columns requested from `findmnt`, matching the fields of
/// `MountpointMetadata`.
pub const FINDMNT_COLUMNS: &str = "target,source,fstype,options";

/// Represents the output of `findmnt --json` as a Rust structure.
#[derive(Debug, Deserialize)]
pub struct FindMnt {
    pub filesystems: Vec<MountpointMetadata>,
}

/// A filesystem entry from `findmnt --json` with the columns defined in
/// `FINDMNT_COLUMNS`.
#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub struct MountpointMetadata {
    /// Mount target.
    pub target: PathBuf,

    /// Source device, dataset name or pseudo filesystem.
    ///
    /// Some mounts, such as certain overlays, report no source at all.
    pub source: Option<String>,

    /// Filesystem type.
    pub fstype: String,

    /// Comma separated mount options.
    pub options: String,

    /// Mounts under this filesystem.
    #[serde(default)]
    pub children: Vec<MountpointMetadata>,
}

impl FindMnt {
    /// Runs `findmnt --json` and parses the output into a `FindMnt` structure.
    pub fn run() -> Result<Self, anyhow::Error> {
        let output = Dependency::Findmnt
            .cmd()
            .with_arg("--json")
            .with_arg("-o")
            .with_arg(FINDMNT_COLUMNS)
            .output_and_check()
            .context("Failed to run findmnt")?;

        Self::from_json(&output).context("Failed to deserialize output of findmnt")
    }

    /// Parses a JSON string into a `FindMnt` structure.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// All mounts in depth-first order.
    pub fn traverse_depth(&self) -> Vec<&MountpointMetadata> {
        self.filesystems
            .iter()
            .flat_map(MountpointMetadata::traverse_depth)
            .collect()
    }

    /// Targets of all mounts, in depth-first order. A target mounted more
    /// than once appears once per mount.
    pub fn targets(&self) -> Vec<PathBuf> {
        self.traverse_depth()
            .into_iter()
            .map(|mp| mp.target.clone())
            .collect()
    }
}

impl MountpointMetadata {
    /// Returns a vec with the current and all child mount points in
    /// depth-first order.
    pub fn traverse_depth(&self) -> Vec<&MountpointMetadata> {
        std::iter::once(self)
            .chain(
                self.children
                    .iter()
                    .flat_map(MountpointMetadata::traverse_depth),
            )
            .collect()
    }

    /// Returns whether the mount point or any of its children contain the given
    /// path.
    pub fn contains_path(&self, path: impl AsRef<Path>) -> bool {
        path.as_ref().starts_with(&self.target)
    }

    /// Returns whether a mount with exactly the given target exists in this
    /// mount or any of its children.
    pub fn contains_mountpoint(&self, target: impl AsRef<Path>) -> bool {
        if !self.contains_path(target.as_ref()) {
            return false;
        }

        if self.target == target.as_ref() {
            return true;
        }

        self.children
            .iter()
            .any(|child| child.contains_mountpoint(target.as_ref()))
    }
}
