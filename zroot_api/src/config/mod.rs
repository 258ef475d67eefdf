//! Provisioning configuration.
//!
//! A `ProvisionConfig` is read once per invocation, validated, and then
//! handed by reference to the resource model and the engines. Nothing in the
//! crate keeps configuration in global state.

use std::{
    fs,
    path::{Path, PathBuf},
};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    constants::{
        DEFAULT_BOOT_SIZE, DEFAULT_CACHE_DIR, DEFAULT_DATABASE_DATASET, DEFAULT_EFI_SIZE,
        DEFAULT_MEMTEST_MOUNT, DEFAULT_PACKAGE_CACHE, DEFAULT_RESERVE, DEFAULT_STAGING_ROOT,
        ROOT_MOUNT_POINT_PATH,
    },
    error::{InvalidInputError, ReportError, ZrootError},
};

mod legacy;
mod size;

pub use size::Size;

lazy_static! {
    static ref NAME_REGEX: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.:-]*$").unwrap();
}

/// Pool encryption.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Encryption {
    /// No encryption.
    None,

    /// AES-256-GCM keyed by a passphrase entered at the prompt when the pool
    /// is created or its key is loaded.
    #[default]
    Aes256Gcm,
}

impl Encryption {
    pub fn is_enabled(self) -> bool {
        self != Encryption::None
    }

    /// Dataset properties enabling this encryption mode on the pool root.
    pub fn properties(self) -> Vec<(String, String)> {
        match self {
            Encryption::None => Vec::new(),
            Encryption::Aes256Gcm => vec![
                ("encryption".into(), "aes-256-gcm".into()),
                ("keylocation".into(), "prompt".into()),
                ("keyformat".into(), "passphrase".into()),
            ],
        }
    }
}

/// A disk image loop-mounted read-only at a byte offset, e.g. a memtest
/// USB image whose EFI partition is copied onto the EFI partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ImageMount {
    pub image: PathBuf,
    pub offset: Size,
    #[serde(default = "default_memtest_mount")]
    pub mount_point: PathBuf,
}

/// Settings consumed by the OS configuration step only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct OsSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_codename: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ProvisionConfig {
    /// Block device to provision. A `/dev/disk/by-id/...` path is recommended.
    pub disk: PathBuf,

    /// Label used as the prefix of every partition name.
    pub disk_label: String,

    /// Name of the OS container dataset, relative to the pool.
    pub os_dataset: String,

    /// Pool name. Defaults to the disk label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_name: Option<String>,

    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Alternate root the pool's datasets are mounted under.
    #[serde(default = "default_staging_root")]
    pub staging_root: PathBuf,

    /// Where to mount the EFI partition on the host. Not mounted when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub efi_mount: Option<PathBuf>,

    /// Host package cache bind-mounted into the staged system.
    #[serde(default = "default_package_cache")]
    pub package_cache: Option<PathBuf>,

    #[serde(default)]
    pub encryption: Encryption,

    /// Size of an optional swap partition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swap: Option<Size>,

    /// Name of the database storage dataset. `null` leaves it out.
    #[serde(default = "default_database_dataset")]
    pub database_dataset: Option<String>,

    #[serde(default = "default_efi_size")]
    pub efi_size: Size,

    #[serde(default = "default_boot_size")]
    pub boot_size: Size,

    /// Space left unallocated at the end of the disk.
    #[serde(default = "default_reserve")]
    pub reserve: Size,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memtest: Option<ImageMount>,

    #[serde(default)]
    pub os: OsSettings,
}

fn default_cache_dir() -> PathBuf {
    DEFAULT_CACHE_DIR.into()
}

fn default_staging_root() -> PathBuf {
    DEFAULT_STAGING_ROOT.into()
}

fn default_package_cache() -> Option<PathBuf> {
    Some(DEFAULT_PACKAGE_CACHE.into())
}

fn default_database_dataset() -> Option<String> {
    Some(DEFAULT_DATABASE_DATASET.into())
}

fn default_memtest_mount() -> PathBuf {
    DEFAULT_MEMTEST_MOUNT.into()
}

fn default_size(s: &str) -> Size {
    s.parse().unwrap_or(Size(0))
}

fn default_efi_size() -> Size {
    default_size(DEFAULT_EFI_SIZE)
}

fn default_boot_size() -> Size {
    default_size(DEFAULT_BOOT_SIZE)
}

fn default_reserve() -> Size {
    default_size(DEFAULT_RESERVE)
}

/// Reasons a configuration is rejected after it was parsed.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum InvalidConfigurationError {
    #[error("Field '{field}' has invalid name '{value}'")]
    InvalidName { field: String, value: String },

    #[error("Field '{field}' must be an absolute path, got '{path}'")]
    RelativePath { field: String, path: String },

    #[error("Staging root cannot be the host root directory")]
    StagingRootIsHostRoot,

    #[error("Field '{field}' must be a non-zero size")]
    ZeroSize { field: String },
}

impl ProvisionConfig {
    /// Creates a configuration with every optional field at its default.
    pub fn new(
        disk: impl Into<PathBuf>,
        disk_label: impl Into<String>,
        os_dataset: impl Into<String>,
    ) -> Self {
        Self {
            disk: disk.into(),
            disk_label: disk_label.into(),
            os_dataset: os_dataset.into(),
            pool_name: None,
            cache_dir: default_cache_dir(),
            staging_root: default_staging_root(),
            efi_mount: None,
            package_cache: default_package_cache(),
            encryption: Encryption::default(),
            swap: None,
            database_dataset: default_database_dataset(),
            efi_size: default_efi_size(),
            boot_size: default_boot_size(),
            reserve: default_reserve(),
            memtest: None,
            os: OsSettings::default(),
        }
    }

    /// Loads and validates a configuration file. Files ending in `.ini` or
    /// `.conf` are read in the legacy INI layout, anything else as YAML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ZrootError> {
        let path = path.as_ref();
        let contents =
            fs::read_to_string(path).structured(InvalidInputError::LoadConfiguration {
                path: path.display().to_string(),
            })?;

        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("ini") | Some("conf") => legacy::parse(&contents),
            _ => serde_yaml::from_str(&contents).map_err(anyhow::Error::from),
        }
        .structured(InvalidInputError::ParseConfiguration {
            path: path.display().to_string(),
        })?;

        config
            .validate()
            .map_err(|e| ZrootError::new(InvalidInputError::from(e)))?;
        Ok(config)
    }

    /// Name of the pool, falling back to the disk label.
    pub fn pool_name(&self) -> &str {
        self.pool_name.as_deref().unwrap_or(&self.disk_label)
    }

    /// Hostname written into the staged system, falling back to the disk
    /// label.
    pub fn hostname(&self) -> &str {
        self.os.hostname.as_deref().unwrap_or(&self.disk_label)
    }

    pub fn validate(&self) -> Result<(), InvalidConfigurationError> {
        check_name("disk-label", &self.disk_label)?;
        check_name("pool-name", self.pool_name())?;
        for component in self.os_dataset.split('/') {
            check_name("os-dataset", component).map_err(|_| {
                InvalidConfigurationError::InvalidName {
                    field: "os-dataset".into(),
                    value: self.os_dataset.clone(),
                }
            })?;
        }
        if let Some(database) = &self.database_dataset {
            check_name("database-dataset", database)?;
        }

        check_absolute("disk", &self.disk)?;
        check_absolute("cache-dir", &self.cache_dir)?;
        check_absolute("staging-root", &self.staging_root)?;
        if self.staging_root == Path::new(ROOT_MOUNT_POINT_PATH) {
            return Err(InvalidConfigurationError::StagingRootIsHostRoot);
        }
        if let Some(efi_mount) = &self.efi_mount {
            check_absolute("efi-mount", efi_mount)?;
        }
        if let Some(package_cache) = &self.package_cache {
            check_absolute("package-cache", package_cache)?;
        }
        if let Some(memtest) = &self.memtest {
            check_absolute("memtest.image", &memtest.image)?;
            check_absolute("memtest.mount-point", &memtest.mount_point)?;
        }

        for (field, size) in [("efi-size", self.efi_size), ("boot-size", self.boot_size)]
            .into_iter()
            .chain(self.swap.map(|s| ("swap", s)))
        {
            if size.bytes() == 0 {
                return Err(InvalidConfigurationError::ZeroSize {
                    field: field.into(),
                });
            }
        }

        Ok(())
    }
}

fn check_name(field: &str, value: &str) -> Result<(), InvalidConfigurationError> {
    if NAME_REGEX.is_match(value) {
        Ok(())
    } else {
        Err(InvalidConfigurationError::InvalidName {
            field: field.into(),
            value: value.into(),
        })
    }
}

fn check_absolute(field: &str, path: &Path) -> Result<(), InvalidConfigurationError> {
    if path.is_absolute() {
        Ok(())
    } else {
        Err(InvalidConfigurationError::RelativePath {
            field: field.into(),
            path: path.display().to_string(),
        })
    }
}
