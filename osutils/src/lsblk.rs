use std::{collections::BTreeMap, path::PathBuf};

use anyhow::{Context, Error};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::dependencies::Dependency;

/// Columns requested from `lsblk`.
const LSBLK_COLUMNS: &str = "NAME,TYPE,PARTLABEL,FSTYPE";

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct LsBlkOutput {
    pub blockdevices: Vec<BlockDevice>,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct BlockDevice {
    pub name: PathBuf,
    #[serde(rename = "type")]
    pub device_type: String,
    #[serde(rename = "partlabel")]
    pub part_label: Option<String>,
    #[serde(rename = "fstype")]
    pub fs_type: Option<String>,
    pub children: Option<Vec<BlockDevice>>,
}

impl BlockDevice {
    /// This device followed by all of its descendants, depth-first.
    pub fn flatten(&self) -> Vec<&BlockDevice> {
        std::iter::once(self)
            .chain(
                self.children
                    .iter()
                    .flatten()
                    .flat_map(BlockDevice::flatten),
            )
            .collect()
    }
}

/// Lists all block devices on the system.
pub fn list() -> Result<Vec<BlockDevice>, Error> {
    let result = Dependency::Lsblk
        .cmd()
        .with_arg("--json")
        .with_arg("--paths")
        .with_arg("--output")
        .with_arg(LSBLK_COLUMNS)
        .output_and_check()
        .context("Failed to execute lsblk")?;

    let parsed = parse_lsblk_output(result.as_str());
    if parsed.is_err() {
        warn!("lsblk output: {}", result);
    }

    parsed
}

/// Maps the label of every labelled partition to the filesystem signature
/// found on it, if any.
pub fn partitions_by_label(devices: &[BlockDevice]) -> BTreeMap<String, Option<String>> {
    devices
        .iter()
        .flat_map(BlockDevice::flatten)
        .filter(|device| device.device_type == "part")
        .filter_map(|device| {
            device
                .part_label
                .as_ref()
                .filter(|label| !label.is_empty())
                .map(|label| (label.clone(), device.fs_type.clone()))
        })
        .collect()
}

fn parse_lsblk_output(output: &str) -> Result<Vec<BlockDevice>, Error> {
    let parsed: LsBlkOutput =
        serde_json::from_str(output).context("Failed to parse lsblk output")?;

    Ok(parsed.blockdevices)
}
