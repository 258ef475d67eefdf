use const_format::formatcp;

/// Default path of the provisioning configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/zroot/config.yaml";

/// Directory holding the stable by-label partition symlinks.
pub const PARTLABEL_DIR: &str = "/dev/disk/by-partlabel";

/// Default staging root the pool's datasets are mounted under.
pub const DEFAULT_STAGING_ROOT: &str = "/mnt/zroot";

/// Default directory for run logs and downloaded artifacts.
pub const DEFAULT_CACHE_DIR: &str = "/var/cache/zroot";

/// Host package cache shared with the staged system.
pub const DEFAULT_PACKAGE_CACHE: &str = "/var/cache/apt/archives";

/// Default mount point for a loop-mounted memtest image.
pub const DEFAULT_MEMTEST_MOUNT: &str = "/mnt/memtest86";

pub const ROOT_MOUNT_POINT_PATH: &str = "/";

/// Section name used by legacy INI configuration files.
pub const LEGACY_INI_SECTION: &str = "zor";

/// Default name of the database storage dataset.
pub const DEFAULT_DATABASE_DATASET: &str = "postgresql";

pub const DEFAULT_EFI_START: &str = "1M";
pub const DEFAULT_EFI_SIZE: &str = "512M";
pub const DEFAULT_BOOT_SIZE: &str = "2G";
pub const DEFAULT_RESERVE: &str = "20G";

/// User property controlling inclusion in automatic snapshots.
pub const AUTO_SNAPSHOT_PROPERTY: &str = "com.sun:auto-snapshot";

/// Name of the dataset under the OS container that is mounted as `/`.
pub const OS_ROOT_DATASET: &str = "root";

/// Host directories recursively bind-mounted into the staging root.
pub const HOST_RBIND_DIRS: [&str; 3] = ["/dev", "/proc", "/sys"];

/// Sub-directory of the cache directory receiving per-command run logs.
pub const RUN_LOG_DIR: &str = "logs";

/// Fallback run log location used before the configuration is loaded.
pub const FALLBACK_RUN_LOG_DIR: &str = formatcp!("{DEFAULT_CACHE_DIR}/{RUN_LOG_DIR}");
