use std::path::{Path, PathBuf};

use anyhow::{Context, Error};
use serde::{Deserialize, Serialize};

use crate::dependencies::Dependency;

/// A process holding files open below some directory.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct ProcessFiles {
    pub pid: Option<u32>,
    pub command: String,
    pub paths: Vec<PathBuf>,
}

/// Lists the processes with files open anywhere below `directory_path`,
/// following mounts but not symlinks.
pub fn run(directory_path: impl AsRef<Path>) -> Result<Vec<ProcessFiles>, Error> {
    // lsof exits with 1 when nothing is open, so the status is not checked.
    let result = Dependency::Lsof
        .cmd()
        .with_arg("-V")
        .with_arg("-x")
        .with_arg("f")
        .with_arg("+D")
        .with_arg(directory_path.as_ref())
        .with_arg("-F")
        .with_arg("pcn")
        .output()
        .context("Failed to list opened files")?;

    parse_lsof_output(&result.output())
}

fn parse_lsof_output(output: &str) -> Result<Vec<ProcessFiles>, Error> {
    let mut processes = Vec::new();
    let mut pid: Option<u32> = None;
    let mut process: Option<ProcessFiles> = None;

    for line in output.lines() {
        if let Some(value) = line.strip_prefix('p') {
            pid = value.parse().ok();
        } else if let Some(command) = line.strip_prefix('c') {
            if let Some(process) = process.take() {
                processes.push(process);
            }
            process = Some(ProcessFiles {
                pid,
                command: command.into(),
                paths: Vec::new(),
            });
        } else if let Some(name) = line.strip_prefix('n') {
            process
                .as_mut()
                .context("missing process name")?
                .paths
                .push(PathBuf::from(name));
        }
    }
    if let Some(process) = process {
        processes.push(process);
    }

    Ok(processes)
}
