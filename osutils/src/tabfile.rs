use std::path::{Path, PathBuf};

use anyhow::{Context, Error};

use zroot_api::{constants::ROOT_MOUNT_POINT_PATH, resources::FilesystemKind};

/// A representation of a fstab file.
#[derive(Debug, Default)]
pub struct TabFile {
    pub entries: Vec<TabFileEntry>,
}

/// A representation of a single entry in a tab file.
#[derive(Debug, PartialEq, Eq)]
pub struct TabFileEntry {
    pub device: TabDevice,
    pub mount_point: TabMountPoint,
    pub fs_type: FilesystemKind,
    pub options: Vec<String>,
}

/// A representation of a device in a tab file.
#[derive(Debug, PartialEq, Eq)]
pub enum TabDevice {
    /// A partition addressed by its GPT partition label.
    PartLabel(String),
    BlockDevice(PathBuf),
}

/// A representation of a mount point in a tab file.
#[derive(Debug, PartialEq, Eq)]
pub enum TabMountPoint {
    None,
    Path(PathBuf),
}

impl TabFile {
    /// Write this tab file to disk at location `tab_file_path`.
    pub fn write(&self, tab_file_path: impl AsRef<Path>) -> Result<(), Error> {
        std::fs::write(tab_file_path.as_ref(), self.render().as_bytes())
            .with_context(|| format!("Failed to write new {}", tab_file_path.as_ref().display()))
    }

    /// Render this tab file as a string.
    pub fn render(&self) -> String {
        self.entries.iter().map(|entry| entry.render()).collect()
    }
}

impl TabFileEntry {
    /// Create a new entry for a labelled partition mounted at a path.
    pub fn new_partlabel(
        label: impl Into<String>,
        mount_point: impl Into<PathBuf>,
        fs_type: FilesystemKind,
    ) -> Self {
        Self {
            device: TabDevice::PartLabel(label.into()),
            mount_point: TabMountPoint::Path(mount_point.into()),
            fs_type,
            options: Vec::new(),
        }
    }

    /// Create a new entry for a labelled partition used as swap.
    pub fn new_swap(label: impl Into<String>) -> Self {
        Self {
            device: TabDevice::PartLabel(label.into()),
            mount_point: TabMountPoint::None,
            fs_type: FilesystemKind::Swap,
            options: vec!["sw".into()],
        }
    }

    /// Add options to this entry.
    pub fn with_options(mut self, options: Vec<String>) -> Self {
        self.options = options;
        self
    }

    /// Render this entry as a string suitable for writing to a tab file.
    pub fn render(&self) -> String {
        // fsck pass is 1 for root, 2 for everything else, 0 for none
        let fsck_pass = match self.mount_point {
            TabMountPoint::None => 0,
            TabMountPoint::Path(ref path) if path == Path::new(ROOT_MOUNT_POINT_PATH) => 1,
            _ => 2,
        };

        let options = if self.options.is_empty() {
            "defaults".into()
        } else {
            self.options.join(",")
        };

        format!(
            "{} {} {} {} 0 {}\n",
            self.device.render(),
            self.mount_point.render(),
            self.fs_type.probe_name(),
            options,
            fsck_pass,
        )
    }
}

impl TabDevice {
    pub fn render(&self) -> String {
        match self {
            TabDevice::PartLabel(label) => format!("PARTLABEL={label}"),
            TabDevice::BlockDevice(path) => path.to_string_lossy().to_string(),
        }
    }
}

impl TabMountPoint {
    pub fn render(&self) -> String {
        match self {
            TabMountPoint::None => "none".to_string(),
            TabMountPoint::Path(path) => path.to_string_lossy().to_string(),
        }
    }
}
