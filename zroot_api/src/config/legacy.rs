//! Reader for the INI configuration layout used by earlier installer
//! scripts:
//!
//! ```ini
//! [zor]
//! DISK_DEV = /dev/disk/by-id/nvme-Samsung_SSD_970
//! DISK_LABEL = b1
//! OS_DATASET = jammy
//! RELEASE_CODENAME = jammy
//! HOSTNAME = b1-host
//! CACHE_DPATH = /var/cache/zor
//! ```
//!
//! Keys that have no counterpart in `ProvisionConfig` (user account
//! settings) are ignored.

use anyhow::{anyhow, Context, Error};
use configparser::ini::Ini;

use crate::constants::LEGACY_INI_SECTION;

use super::ProvisionConfig;

pub(super) fn parse(contents: &str) -> Result<ProvisionConfig, Error> {
    let mut ini = Ini::new();
    ini.read(contents.to_owned())
        .map_err(|e| anyhow!("Failed to parse INI contents: {e}"))?;

    // configparser lowercases keys by default.
    let get = |key: &str| {
        ini.get(LEGACY_INI_SECTION, key)
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty())
    };
    let require = |key: &str| {
        get(key).with_context(|| {
            format!(
                "Missing key '{}' in section [{LEGACY_INI_SECTION}]",
                key.to_uppercase()
            )
        })
    };

    let mut config = ProvisionConfig::new(
        require("disk_dev")?,
        require("disk_label")?,
        require("os_dataset")?,
    );

    if let Some(cache_dir) = get("cache_dpath") {
        config.cache_dir = cache_dir.into();
    }
    config.os.hostname = get("hostname");
    config.os.release_codename = get("release_codename");

    Ok(config)
}
