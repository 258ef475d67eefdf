use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use log::trace;

use crate::{
    config::{ProvisionConfig, Size},
    constants::{
        AUTO_SNAPSHOT_PROPERTY, DEFAULT_EFI_START, HOST_RBIND_DIRS, OS_ROOT_DATASET,
        ROOT_MOUNT_POINT_PATH,
    },
    storage_graph::{error::PlanError, Plan, PlanBuilder},
};

use super::{
    CanMount, Dataset, FilesystemKind, MountKind, MountPoint, MountSource, Partition,
    PartitionRole, Pool, Resource, SizeSpec,
};

/// Where a staged system's package cache is bind-mounted, relative to its
/// root.
const STAGED_PACKAGE_CACHE: &str = "var/cache/apt/archives";

/// Every resource declared for one configuration, in declaration order.
///
/// Declaration order matters: the planner keeps it wherever dependencies
/// allow, so a dataset's mount is declared right after the dataset to get
/// the root dataset mounted before anything is created beneath it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceModel {
    staging_root: PathBuf,
    pool_name: String,
    root_dataset: String,
    resources: Vec<Resource>,
}

impl ResourceModel {
    /// Declares the full resource set for `config`. Pure: the same
    /// configuration always yields the same resources in the same order.
    pub fn build(config: &ProvisionConfig) -> Self {
        let mut builder = ModelBuilder::new(config);

        builder.partitions(config);
        builder.pool(config);

        // OS specific datasets.
        let os = config.os_dataset.as_str();
        builder.dataset(os, CanMount::Off, Some("/"), Vec::new(), None);
        builder.dataset(
            &format!("{os}/{OS_ROOT_DATASET}"),
            CanMount::NoAuto,
            Some("/"),
            Vec::new(),
            None,
        );
        builder.dataset(&format!("{os}/var"), CanMount::Off, None, Vec::new(), None);
        builder.dataset(&format!("{os}/var/log"), CanMount::On, None, Vec::new(), None);
        builder.dataset(
            &format!("{os}/var/journal"),
            CanMount::On,
            None,
            Vec::new(),
            None,
        );
        builder.dataset(
            &format!("{os}/var/cache"),
            CanMount::On,
            None,
            vec![snapshots(false)],
            None,
        );
        builder.dataset(
            &format!("{os}/var/tmp"),
            CanMount::On,
            None,
            vec![snapshots(false)],
            Some(0o1777),
        );
        builder.dataset(
            &format!("{os}/tmp"),
            CanMount::On,
            None,
            vec![
                snapshots(false),
                property("setuid", "off"),
                property("devices", "off"),
                property("sync", "disabled"),
            ],
            Some(0o1777),
        );

        // Shared datasets, usable by any OS installed in the pool.
        builder.shared("home", "/home", vec![snapshots(true)], None);
        builder.shared("root", "/root", Vec::new(), Some(0o700));
        builder.shared("shared", "/shared", vec![snapshots(true)], None);
        builder.shared("docker", "/var/lib/docker", vec![snapshots(false)], None);
        if let Some(database) = &config.database_dataset {
            builder.shared(
                database,
                &format!("/var/lib/{database}"),
                vec![
                    property("recordsize", "8K"),
                    property("primarycache", "metadata"),
                    property("logbias", "throughput"),
                ],
                None,
            );
        }

        builder.other_mounts(config);

        ResourceModel {
            staging_root: config.staging_root.clone(),
            pool_name: config.pool_name().to_owned(),
            root_dataset: format!("{}/{}/{OS_ROOT_DATASET}", config.pool_name(), os),
            resources: builder.resources,
        }
    }

    /// Orders the declared resources.
    pub fn plan(&self) -> Result<Plan, PlanError> {
        let mut builder = PlanBuilder::default();
        for resource in &self.resources {
            builder.add_resource(resource.clone());
        }
        builder.build()
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn partitions(&self) -> impl Iterator<Item = &Partition> {
        self.resources.iter().filter_map(Resource::as_partition)
    }

    pub fn pool(&self) -> Option<&Pool> {
        self.resources.iter().find_map(Resource::as_pool)
    }

    pub fn datasets(&self) -> impl Iterator<Item = &Dataset> {
        self.resources.iter().filter_map(Resource::as_dataset)
    }

    pub fn mounts(&self) -> impl Iterator<Item = &MountPoint> {
        self.resources.iter().filter_map(Resource::as_mount)
    }

    pub fn staging_root(&self) -> &Path {
        &self.staging_root
    }

    pub fn pool_name(&self) -> &str {
        &self.pool_name
    }

    /// Dataset mounted as the staged system's `/`.
    pub fn root_dataset(&self) -> &str {
        &self.root_dataset
    }

    pub fn partition(&self, role: PartitionRole) -> Option<&Partition> {
        self.partitions().find(|p| p.role == role)
    }

    /// Joins a path of the installed system onto the staging root.
    pub fn staged_path(&self, path: impl AsRef<Path>) -> PathBuf {
        staged(&self.staging_root, path.as_ref())
    }
}

fn staged(staging_root: &Path, path: &Path) -> PathBuf {
    match path.strip_prefix(ROOT_MOUNT_POINT_PATH) {
        Ok(relative) if relative.as_os_str().is_empty() => staging_root.to_owned(),
        Ok(relative) => staging_root.join(relative),
        Err(_) => staging_root.join(path),
    }
}

fn property(key: &str, value: &str) -> (String, String) {
    (key.to_owned(), value.to_owned())
}

fn snapshots(enabled: bool) -> (String, String) {
    property(AUTO_SNAPSHOT_PROPERTY, if enabled { "true" } else { "false" })
}

struct ModelBuilder {
    staging_root: PathBuf,
    pool_name: String,
    resources: Vec<Resource>,
    /// Effective mountpoint of every declared dataset; the pool's own root
    /// dataset has none.
    mountpoints: BTreeMap<String, Option<PathBuf>>,
}

impl ModelBuilder {
    fn new(config: &ProvisionConfig) -> Self {
        let pool_name = config.pool_name().to_owned();
        let mut mountpoints = BTreeMap::new();
        mountpoints.insert(pool_name.clone(), None);
        Self {
            staging_root: config.staging_root.clone(),
            pool_name,
            resources: Vec::new(),
            mountpoints,
        }
    }

    fn push(&mut self, resource: Resource) {
        trace!("Declaring {}", resource.describe());
        self.resources.push(resource);
    }

    fn partitions(&mut self, config: &ProvisionConfig) {
        let mut layout = vec![
            (
                PartitionRole::Efi,
                DEFAULT_EFI_START.parse::<Size>().ok(),
                SizeSpec::Fixed(config.efi_size),
            ),
            (PartitionRole::Boot, None, SizeSpec::Fixed(config.boot_size)),
        ];
        if let Some(swap) = config.swap {
            layout.push((PartitionRole::Swap, None, SizeSpec::Fixed(swap)));
        }
        layout.push((
            PartitionRole::Zfs,
            None,
            SizeSpec::RemainingMinus(config.reserve),
        ));

        for (ordinal, (role, start, size)) in (1u32..).zip(layout) {
            self.push(Resource::Partition(Partition {
                name: format!("{}-{}", config.disk_label, role),
                role,
                disk: config.disk.clone(),
                ordinal,
                start,
                size,
            }));
        }
    }

    fn pool(&mut self, config: &ProvisionConfig) {
        let vdev = format!("{}-{}", config.disk_label, PartitionRole::Zfs);
        let vdev_path = self
            .resources
            .iter()
            .filter_map(Resource::as_partition)
            .find(|p| p.name == vdev)
            .map(Partition::device_path)
            .unwrap_or_default();

        let mut root_properties = vec![
            property("acltype", "posixacl"),
            property("canmount", "off"),
            property("compression", "zstd"),
            property("dnodesize", "auto"),
            property("normalization", "formD"),
            property("relatime", "on"),
            property("xattr", "sa"),
        ];
        root_properties.extend(config.encryption.properties());
        root_properties.push(property("mountpoint", "none"));

        self.push(Resource::Pool(Pool {
            name: self.pool_name.clone(),
            vdev,
            vdev_path,
            encryption: config.encryption,
            altroot: self.staging_root.clone(),
            options: vec![property("ashift", "12"), property("autotrim", "on")],
            root_properties,
        }));
    }

    /// Declares a dataset below the pool and, unless it is a container, the
    /// mount of its effective mountpoint under the staging root.
    fn dataset(
        &mut self,
        relative_name: &str,
        can_mount: CanMount,
        mountpoint: Option<&str>,
        properties: Vec<(String, String)>,
        mode: Option<u32>,
    ) {
        let name = format!("{}/{}", self.pool_name, relative_name);
        let effective_mountpoint = match mountpoint {
            Some(explicit) => Some(PathBuf::from(explicit)),
            None => name.rsplit_once('/').and_then(|(parent, leaf)| {
                self.mountpoints
                    .get(parent)
                    .cloned()
                    .flatten()
                    .map(|inherited| inherited.join(leaf))
            }),
        };
        self.mountpoints
            .insert(name.clone(), effective_mountpoint.clone());

        let mount = match (&effective_mountpoint, can_mount) {
            (_, CanMount::Off) | (None, _) => None,
            (Some(path), _) => Some(MountPoint {
                target: staged(&self.staging_root, path),
                source: MountSource::Dataset(name.clone()),
                kind: MountKind::Dataset,
                options: Vec::new(),
            }),
        };

        self.push(Resource::Dataset(Dataset {
            name,
            can_mount,
            mountpoint: mountpoint.map(PathBuf::from),
            effective_mountpoint,
            properties,
            mode,
        }));
        if let Some(mount) = mount {
            self.push(Resource::Mount(mount));
        }
    }

    /// Top-level dataset with its own mountpoint, not tied to the installed
    /// OS.
    fn shared(
        &mut self,
        relative_name: &str,
        mountpoint: &str,
        properties: Vec<(String, String)>,
        mode: Option<u32>,
    ) {
        self.dataset(
            relative_name,
            CanMount::On,
            Some(mountpoint),
            properties,
            mode,
        );
    }

    fn other_mounts(&mut self, config: &ProvisionConfig) {
        let boot = format!("{}-{}", config.disk_label, PartitionRole::Boot);
        self.push(Resource::Mount(MountPoint {
            target: staged(&self.staging_root, Path::new("/boot")),
            source: MountSource::Partition(boot),
            kind: MountKind::Block(FilesystemKind::Ext4),
            options: Vec::new(),
        }));

        if let Some(efi_mount) = &config.efi_mount {
            let efi = format!("{}-{}", config.disk_label, PartitionRole::Efi);
            self.push(Resource::Mount(MountPoint {
                target: efi_mount.clone(),
                source: MountSource::Partition(efi),
                kind: MountKind::Block(FilesystemKind::Vfat),
                options: Vec::new(),
            }));
        }

        for dir in HOST_RBIND_DIRS {
            self.push(Resource::Mount(MountPoint {
                target: staged(&self.staging_root, Path::new(dir)),
                source: MountSource::HostPath(dir.into()),
                kind: MountKind::RecursiveBind,
                options: Vec::new(),
            }));
        }

        if let Some(package_cache) = &config.package_cache {
            self.push(Resource::Mount(MountPoint {
                target: self.staging_root.join(STAGED_PACKAGE_CACHE),
                source: MountSource::HostPath(package_cache.clone()),
                kind: MountKind::Bind,
                options: Vec::new(),
            }));
        }

        if let Some(memtest) = &config.memtest {
            self.push(Resource::Mount(MountPoint {
                target: memtest.mount_point.clone(),
                source: MountSource::HostPath(memtest.image.clone()),
                kind: MountKind::LoopOffset {
                    offset: memtest.offset.bytes(),
                },
                options: vec!["ro".into()],
            }));
        }
    }
}
