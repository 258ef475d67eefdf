use std::path::Path;

use anyhow::{Context, Error};
use log::debug;

use zroot_api::outcome::Outcome;

use crate::dependencies::{Command, Dependency};

/// Messages `zpool` prints when the pool it was asked about does not exist.
const NO_SUCH_POOL: &[&str] = &["no such pool"];

/// Messages `zpool create` prints when the name is already taken.
const POOL_EXISTS: &[&str] = &["already exists"];

/// Parameters of a new single-vdev pool.
#[derive(Debug, Clone, Copy)]
pub struct NewPool<'a> {
    pub name: &'a str,
    pub vdev: &'a Path,
    /// Alternate root the pool's datasets mount under.
    pub altroot: &'a Path,
    /// Pool properties, passed as `-o key=value`.
    pub options: &'a [(String, String)],
    /// Properties of the root dataset, passed as `-O key=value`.
    pub root_properties: &'a [(String, String)],
    /// The passphrase of an encrypted pool is read from the terminal.
    pub prompts: bool,
}

impl NewPool<'_> {
    fn command(&self) -> Command {
        let mut cmd = Dependency::Zpool.cmd();
        cmd.arg("create");
        for (key, value) in self.options {
            cmd.arg("-o").arg(format!("{key}={value}"));
        }
        for (key, value) in self.root_properties {
            cmd.arg("-O").arg(format!("{key}={value}"));
        }
        cmd.arg("-R")
            .arg(self.altroot)
            .arg("-f")
            .arg(self.name)
            .arg(self.vdev);
        cmd
    }
}

/// Creates a pool. A pool that is already imported under the same name is
/// left untouched.
pub fn create(pool: &NewPool) -> Result<Outcome, Error> {
    if exists(pool.name)? {
        debug!("Pool '{}' already exists", pool.name);
        return Ok(Outcome::AlreadySatisfied);
    }

    let cmd = pool.command();
    if pool.prompts {
        // The passphrase prompt needs the terminal, so no output to classify.
        cmd.run_interactive()
            .with_context(|| format!("Failed to create pool '{}'", pool.name))?;
        return Ok(Outcome::Done);
    }

    let output = cmd
        .output()
        .with_context(|| format!("Failed to create pool '{}'", pool.name))?;
    if output.failed_with(POOL_EXISTS) {
        return Ok(Outcome::AlreadySatisfied);
    }
    output
        .check()
        .with_context(|| format!("Failed to create pool '{}'", pool.name))?;
    Ok(Outcome::Done)
}

/// Imports the exported pool `name` without mounting any of its datasets.
///
/// Returns `NotFound` when no pool with that name can be imported.
pub fn import(name: &str, altroot: impl AsRef<Path>) -> Result<Outcome, Error> {
    let output = Dependency::Zpool
        .cmd()
        .with_arg("import")
        .with_arg("-N")
        .with_arg("-f")
        .with_arg("-R")
        .with_arg(altroot.as_ref())
        .with_arg(name)
        .output()
        .with_context(|| format!("Failed to import pool '{name}'"))?;

    if output.failed_with(NO_SUCH_POOL) {
        return Ok(Outcome::NotFound);
    }
    output
        .check()
        .with_context(|| format!("Failed to import pool '{name}'"))?;
    Ok(Outcome::Done)
}

pub fn export(name: &str) -> Result<Outcome, Error> {
    simple_pool_command("export", name)
}

pub fn destroy(name: &str) -> Result<Outcome, Error> {
    simple_pool_command("destroy", name)
}

fn simple_pool_command(verb: &str, name: &str) -> Result<Outcome, Error> {
    let output = Dependency::Zpool
        .cmd()
        .with_arg(verb)
        .with_arg("-f")
        .with_arg(name)
        .output()
        .with_context(|| format!("Failed to {verb} pool '{name}'"))?;

    if output.failed_with(NO_SUCH_POOL) {
        return Ok(Outcome::NotFound);
    }
    output
        .check()
        .with_context(|| format!("Failed to {verb} pool '{name}'"))?;
    Ok(Outcome::Done)
}

/// Names of all imported pools.
pub fn list() -> Result<Vec<String>, Error> {
    let output = Dependency::Zpool
        .cmd()
        .with_arg("list")
        .with_arg("-H")
        .with_arg("-o")
        .with_arg("name")
        .output_and_check()
        .context("Failed to list pools")?;
    Ok(parse_names(&output))
}

pub fn exists(name: &str) -> Result<bool, Error> {
    Ok(list()?.iter().any(|pool| pool == name))
}

fn parse_names(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && *line != "no pools available")
        .map(str::to_owned)
        .collect()
}
