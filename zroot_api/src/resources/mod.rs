//! Typed descriptions of the storage resources managed on a disk.
//!
//! Resources carry no behavior beyond describing themselves and the other
//! resources they reference. Their canonical identity is a [`ResourceId`]:
//! the partition name (addressed through its by-label symlink), the pool or
//! dataset name, or the mount target path. Nothing is ever identified by an
//! index or transient device node.

use std::{
    collections::BTreeMap,
    fmt::{self, Display},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use strum_macros::{Display as StrumDisplay, IntoStaticStr};

use crate::{
    config::{Encryption, Size},
    constants::PARTLABEL_DIR,
};

mod model;

pub use model::ResourceModel;

/// Canonical identity of a resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceId {
    Partition(String),
    Pool(String),
    Dataset(String),
    Mount(PathBuf),
}

impl Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceId::Partition(name) => write!(f, "partition:{name}"),
            ResourceId::Pool(name) => write!(f, "pool:{name}"),
            ResourceId::Dataset(name) => write!(f, "dataset:{name}"),
            ResourceId::Mount(target) => write!(f, "mount:{}", target.display()),
        }
    }
}

/// Lifecycle state of a resource during a provisioning or teardown pass.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, StrumDisplay,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum ResourceState {
    Absent,
    Created,
    Mounted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr, StrumDisplay)]
#[strum(serialize_all = "lowercase")]
pub enum PartitionRole {
    Efi,
    Boot,
    Swap,
    Zfs,
}

impl PartitionRole {
    /// GPT partition type code as understood by `sgdisk --typecode`.
    pub fn type_code(self) -> &'static str {
        match self {
            PartitionRole::Efi => "EF00",
            PartitionRole::Boot => "8300",
            PartitionRole::Swap => "8200",
            PartitionRole::Zfs => "BF01",
        }
    }

    /// Filesystem written onto a partition of this role, if any. The pool
    /// partition is claimed by the pool itself.
    pub fn filesystem(self) -> Option<FilesystemKind> {
        match self {
            PartitionRole::Efi => Some(FilesystemKind::Vfat),
            PartitionRole::Boot => Some(FilesystemKind::Ext4),
            PartitionRole::Swap => Some(FilesystemKind::Swap),
            PartitionRole::Zfs => None,
        }
    }
}

/// Filesystems written directly onto partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr, StrumDisplay)]
#[strum(serialize_all = "lowercase")]
pub enum FilesystemKind {
    Vfat,
    Ext4,
    Swap,
}

impl FilesystemKind {
    /// Name reported by `blkid`/`lsblk` for a device holding this filesystem.
    pub fn probe_name(self) -> &'static str {
        self.into()
    }
}

/// How large a partition is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeSpec {
    Fixed(Size),

    /// Everything left on the disk except the given amount at its end.
    RemainingMinus(Size),
}

impl Display for SizeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeSpec::Fixed(size) => write!(f, "{size}"),
            SizeSpec::RemainingMinus(reserve) => write!(f, "remaining-{reserve}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    /// `{disk_label}-{role}`.
    pub name: String,
    pub role: PartitionRole,
    pub disk: PathBuf,
    /// 1-based GPT partition number.
    pub ordinal: u32,
    /// Explicit start offset; the first free sector when unset.
    pub start: Option<Size>,
    pub size: SizeSpec,
}

impl Partition {
    /// The stable by-label path every operation uses to address this
    /// partition.
    pub fn device_path(&self) -> PathBuf {
        Path::new(PARTLABEL_DIR).join(&self.name)
    }

    pub fn type_code(&self) -> &'static str {
        self.role.type_code()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pool {
    pub name: String,
    /// Name of the partition backing the pool.
    pub vdev: String,
    pub vdev_path: PathBuf,
    pub encryption: Encryption,
    /// Alternate root the pool's datasets mount under.
    pub altroot: PathBuf,
    /// Pool properties (`zpool create -o`).
    pub options: Vec<(String, String)>,
    /// Properties of the pool's root dataset (`zpool create -O`).
    pub root_properties: Vec<(String, String)>,
}

/// Dataset mount behavior, the `canmount` property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr, StrumDisplay)]
#[strum(serialize_all = "lowercase")]
pub enum CanMount {
    /// Container only. Never mounted itself.
    Off,
    /// Created but mounted only on request.
    NoAuto,
    On,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    /// Full name including the pool, e.g. `demo/jammy/root`.
    pub name: String,
    pub can_mount: CanMount,
    /// Explicit `mountpoint` property. Inherited from the parent when unset.
    pub mountpoint: Option<PathBuf>,
    /// Mountpoint after inheritance, relative to the installed system's `/`.
    pub effective_mountpoint: Option<PathBuf>,
    /// Additional properties passed at creation, in order.
    pub properties: Vec<(String, String)>,
    /// Permissions applied to the mounted directory right after creation.
    pub mode: Option<u32>,
}

impl Dataset {
    /// Name of the parent dataset; the pool's name for top-level datasets.
    pub fn parent(&self) -> Option<&str> {
        self.name.rsplit_once('/').map(|(parent, _)| parent)
    }

    /// Whether this dataset only exists to hold children.
    pub fn is_container(&self) -> bool {
        self.can_mount == CanMount::Off
    }

    /// All properties to set on creation, `canmount` and `mountpoint` first.
    pub fn creation_properties(&self) -> Vec<(String, String)> {
        let mut properties = vec![("canmount".to_owned(), self.can_mount.to_string())];
        if let Some(mountpoint) = &self.mountpoint {
            properties.push(("mountpoint".into(), mountpoint.display().to_string()));
        }
        properties.extend(self.properties.iter().cloned());
        properties
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountSource {
    Dataset(String),
    Partition(String),
    HostPath(PathBuf),
}

impl MountSource {
    /// The managed resource providing this mount, if any.
    pub fn resource(&self) -> Option<ResourceId> {
        match self {
            MountSource::Dataset(name) => Some(ResourceId::Dataset(name.clone())),
            MountSource::Partition(name) => Some(ResourceId::Partition(name.clone())),
            MountSource::HostPath(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountKind {
    /// The pool's own mount of a dataset.
    Dataset,
    /// A formatted partition.
    Block(FilesystemKind),
    /// A host directory tree including its sub-mounts.
    RecursiveBind,
    /// A single host directory.
    Bind,
    /// A disk image mounted read-only through a loop device at an offset.
    LoopOffset { offset: u64 },
}

impl Display for MountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MountKind::Dataset => f.write_str("dataset"),
            MountKind::Block(fs) => write!(f, "block({fs})"),
            MountKind::RecursiveBind => f.write_str("rbind"),
            MountKind::Bind => f.write_str("bind"),
            MountKind::LoopOffset { offset } => write!(f, "loop(offset={offset})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPoint {
    /// Absolute path on the host, staging root included.
    pub target: PathBuf,
    pub source: MountSource,
    pub kind: MountKind,
    pub options: Vec<String>,
}

/// The kind of dependency between two resources, and the state the
/// dependency must reach before the dependent may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr, StrumDisplay)]
#[strum(serialize_all = "kebab-case")]
pub enum DependencyKind {
    /// Parent dataset or pool of a dataset.
    Parent,
    /// Device or dataset a pool or mount is built from.
    Source,
    /// Partitions are created in ordinal order.
    Sequence,
    /// The mount whose target directory encloses this mount's target.
    MountedWithin,
}

impl DependencyKind {
    pub fn required_state(self) -> ResourceState {
        match self {
            DependencyKind::Parent | DependencyKind::Source | DependencyKind::Sequence => {
                ResourceState::Created
            }
            DependencyKind::MountedWithin => ResourceState::Mounted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    Partition(Partition),
    Pool(Pool),
    Dataset(Dataset),
    Mount(MountPoint),
}

impl Resource {
    pub fn id(&self) -> ResourceId {
        match self {
            Resource::Partition(p) => ResourceId::Partition(p.name.clone()),
            Resource::Pool(p) => ResourceId::Pool(p.name.clone()),
            Resource::Dataset(d) => ResourceId::Dataset(d.name.clone()),
            Resource::Mount(m) => ResourceId::Mount(m.target.clone()),
        }
    }

    /// Resources this one explicitly refers to. Ordering constraints derived
    /// from the layout as a whole (partition sequence, nested mount targets)
    /// are added by the planner.
    pub fn references(&self) -> Vec<(ResourceId, DependencyKind)> {
        match self {
            Resource::Partition(_) => Vec::new(),
            Resource::Pool(pool) => vec![(
                ResourceId::Partition(pool.vdev.clone()),
                DependencyKind::Source,
            )],
            Resource::Dataset(dataset) => dataset
                .parent()
                .map(|parent| {
                    // Top-level datasets hang off the pool itself.
                    let id = if parent.contains('/') {
                        ResourceId::Dataset(parent.to_owned())
                    } else {
                        ResourceId::Pool(parent.to_owned())
                    };
                    vec![(id, DependencyKind::Parent)]
                })
                .unwrap_or_default(),
            Resource::Mount(mount) => mount
                .source
                .resource()
                .map(|id| vec![(id, DependencyKind::Source)])
                .unwrap_or_default(),
        }
    }

    /// Mount target, for resources that are mounted.
    pub fn mount_target(&self) -> Option<&Path> {
        match self {
            Resource::Mount(m) => Some(&m.target),
            _ => None,
        }
    }

    pub fn as_partition(&self) -> Option<&Partition> {
        match self {
            Resource::Partition(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_pool(&self) -> Option<&Pool> {
        match self {
            Resource::Pool(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_dataset(&self) -> Option<&Dataset> {
        match self {
            Resource::Dataset(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_mount(&self) -> Option<&MountPoint> {
        match self {
            Resource::Mount(m) => Some(m),
            _ => None,
        }
    }

    /// One-line human readable description.
    pub fn describe(&self) -> String {
        match self {
            Resource::Partition(p) => format!(
                "partition '{}' #{} ({}, {}, {})",
                p.name,
                p.ordinal,
                p.role,
                p.type_code(),
                p.size
            ),
            Resource::Pool(p) => format!(
                "pool '{}' on '{}' (altroot {}{})",
                p.name,
                p.vdev,
                p.altroot.display(),
                if p.encryption.is_enabled() {
                    ", encrypted"
                } else {
                    ""
                }
            ),
            Resource::Dataset(d) => format!(
                "dataset '{}' (canmount={}{})",
                d.name,
                d.can_mount,
                d.effective_mountpoint
                    .as_ref()
                    .map(|m| format!(", mountpoint={}", m.display()))
                    .unwrap_or_default()
            ),
            Resource::Mount(m) => format!(
                "{} mount of {} at '{}'",
                m.kind,
                match &m.source {
                    MountSource::Dataset(name) => format!("dataset '{name}'"),
                    MountSource::Partition(name) => format!("partition '{name}'"),
                    MountSource::HostPath(path) => format!("'{}'", path.display()),
                },
                m.target.display()
            ),
        }
    }
}

/// Borrowed lookup view over an ordered property list.
pub fn property_map(properties: &[(String, String)]) -> BTreeMap<&str, &str> {
    properties
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect()
}
