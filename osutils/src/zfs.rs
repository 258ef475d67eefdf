use anyhow::{Context, Error};
use log::debug;

use zroot_api::outcome::Outcome;

use crate::dependencies::Dependency;

const DATASET_EXISTS: &[&str] = &["dataset already exists"];

/// Messages printed when a dataset, or the pool or parent it should live
/// in, does not exist.
const DATASET_MISSING: &[&str] = &[
    "dataset does not exist",
    "parent does not exist",
    "no such pool",
];

const ALREADY_MOUNTED: &[&str] = &["already mounted"];

const KEY_LOADED: &[&str] = &["Key already loaded"];

/// A dataset as reported by `zfs list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetInfo {
    pub name: String,
    /// `false` only for encrypted datasets whose key is not loaded.
    pub key_available: bool,
}

/// Creates dataset `name` with the given properties. Parents are not
/// created implicitly.
pub fn create(name: &str, properties: &[(String, String)]) -> Result<Outcome, Error> {
    let mut cmd = Dependency::Zfs.cmd();
    cmd.arg("create");
    for (key, value) in properties {
        cmd.arg("-o").arg(format!("{key}={value}"));
    }
    cmd.arg(name);

    let output = cmd
        .output()
        .with_context(|| format!("Failed to create dataset '{name}'"))?;
    if output.failed_with(DATASET_EXISTS) {
        return Ok(Outcome::AlreadySatisfied);
    }
    if output.failed_with(DATASET_MISSING) {
        return Ok(Outcome::NotFound);
    }
    output
        .check()
        .with_context(|| format!("Failed to create dataset '{name}'"))?;
    Ok(Outcome::Done)
}

/// Destroys dataset `name`, and with `recursive` all of its descendants.
pub fn destroy(name: &str, recursive: bool) -> Result<Outcome, Error> {
    let mut cmd = Dependency::Zfs.cmd();
    cmd.arg("destroy");
    if recursive {
        cmd.arg("-r");
    }
    cmd.arg(name);

    let output = cmd
        .output()
        .with_context(|| format!("Failed to destroy dataset '{name}'"))?;
    if output.failed_with(DATASET_MISSING) {
        return Ok(Outcome::NotFound);
    }
    output
        .check()
        .with_context(|| format!("Failed to destroy dataset '{name}'"))?;
    Ok(Outcome::Done)
}

/// Mounts dataset `name` at its mountpoint under the pool's altroot.
pub fn mount(name: &str) -> Result<Outcome, Error> {
    let output = Dependency::Zfs
        .cmd()
        .with_arg("mount")
        .with_arg(name)
        .output()
        .with_context(|| format!("Failed to mount dataset '{name}'"))?;
    if output.failed_with(ALREADY_MOUNTED) {
        return Ok(Outcome::AlreadySatisfied);
    }
    if output.failed_with(DATASET_MISSING) {
        return Ok(Outcome::NotFound);
    }
    output
        .check()
        .with_context(|| format!("Failed to mount dataset '{name}'"))?;
    Ok(Outcome::Done)
}

/// Loads the encryption key of `name`, prompting for the passphrase when
/// `prompts` is set. Skips datasets whose key is already available.
pub fn load_key(name: &str, prompts: bool) -> Result<Outcome, Error> {
    let listed = list()?;
    match listed.iter().find(|d| d.name == name) {
        None => return Ok(Outcome::NotFound),
        Some(dataset) if dataset.key_available => {
            debug!("Key of '{name}' is already loaded");
            return Ok(Outcome::AlreadySatisfied);
        }
        Some(_) => (),
    }

    let cmd = Dependency::Zfs.cmd().with_arg("load-key").with_arg(name);
    if prompts {
        cmd.run_interactive()
            .with_context(|| format!("Failed to load key of '{name}'"))?;
        return Ok(Outcome::Done);
    }

    let output = cmd
        .output()
        .with_context(|| format!("Failed to load key of '{name}'"))?;
    if output.failed_with(KEY_LOADED) {
        return Ok(Outcome::AlreadySatisfied);
    }
    output
        .check()
        .with_context(|| format!("Failed to load key of '{name}'"))?;
    Ok(Outcome::Done)
}

/// Every dataset of every imported pool.
pub fn list() -> Result<Vec<DatasetInfo>, Error> {
    let output = Dependency::Zfs
        .cmd()
        .with_arg("list")
        .with_arg("-H")
        .with_arg("-o")
        .with_arg("name,keystatus")
        .output_and_check()
        .context("Failed to list datasets")?;
    Ok(parse_list(&output))
}

fn parse_list(output: &str) -> Vec<DatasetInfo> {
    output
        .lines()
        .filter_map(|line| {
            let mut columns = line.split('\t');
            let name = columns.next()?.trim();
            if name.is_empty() {
                return None;
            }
            let key_available = columns.next().map(str::trim) != Some("unavailable");
            Some(DatasetInfo {
                name: name.to_owned(),
                key_available,
            })
        })
        .collect()
}
