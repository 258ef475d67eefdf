use std::{fs, io, path::Path};

use anyhow::{bail, Context, Error};
use log::{error, trace};
use sys_mount::{MountBuilder, MountFlags};

use zroot_api::outcome::Outcome;

use crate::{
    dependencies::{Command, Dependency},
    files, lsof,
};

/// Messages `mount` prints when the target already carries a mount.
const ALREADY_MOUNTED: &[&str] = &["already mounted"];

/// Messages `mount` prints when the source device or image is missing.
const SOURCE_MISSING: &[&str] = &["does not exist", "No such file or directory", "can't find"];

/// Messages `umount` prints when there is nothing to unmount. A target
/// directory that is gone is reported as "not found".
const NOT_MOUNTED: &[&str] = &["not mounted", "not found", "No such file or directory"];

/// Mounts a block device holding a filesystem of type `fstype` at `target`.
pub fn mount(
    device: impl AsRef<Path>,
    target: impl AsRef<Path>,
    fstype: &str,
    options: &[String],
) -> Result<Outcome, Error> {
    let mut cmd = Dependency::Mount.cmd();
    if !options.is_empty() {
        cmd.arg("-o").arg(options.join(","));
    }
    cmd.arg("-t")
        .arg(fstype)
        .arg(device.as_ref())
        .arg(target.as_ref());

    run_mount(cmd, device.as_ref(), target.as_ref())
}

/// Recursively bind-mounts the host directory `source` at `target`,
/// including everything mounted below it. The new tree is made a slave of
/// the host's so unmounting it does not propagate back to the host.
pub fn rbind(source: impl AsRef<Path>, target: impl AsRef<Path>) -> Result<Outcome, Error> {
    let mut cmd = Dependency::Mount.cmd();
    cmd.arg("--rbind")
        .arg("--make-rslave")
        .arg(source.as_ref())
        .arg(target.as_ref());

    run_mount(cmd, source.as_ref(), target.as_ref())
}

/// Mounts the filesystem found `offset` bytes into the disk image `image`
/// through a loop device.
pub fn mount_loop_offset(
    image: impl AsRef<Path>,
    target: impl AsRef<Path>,
    offset: u64,
    options: &[String],
) -> Result<Outcome, Error> {
    let mut all_options = vec!["loop".to_owned(), format!("offset={offset}")];
    all_options.extend(options.iter().cloned());

    let mut cmd = Dependency::Mount.cmd();
    cmd.arg("-o")
        .arg(all_options.join(","))
        .arg(image.as_ref())
        .arg(target.as_ref());

    run_mount(cmd, image.as_ref(), target.as_ref())
}

fn run_mount(cmd: Command, source: &Path, target: &Path) -> Result<Outcome, Error> {
    let output = cmd.output().with_context(|| {
        format!(
            "Failed to mount '{}' at '{}'",
            source.display(),
            target.display()
        )
    })?;

    if output.failed_with(ALREADY_MOUNTED) {
        return Ok(Outcome::AlreadySatisfied);
    }
    if output.failed_with(SOURCE_MISSING) {
        return Ok(Outcome::NotFound);
    }

    output.check().with_context(|| {
        format!(
            "Failed to mount '{}' at '{}'",
            source.display(),
            target.display()
        )
    })?;
    Ok(Outcome::Done)
}

/// Bind-mounts the single directory `source` at `target`.
pub fn bind(
    source: impl AsRef<Path>,
    target: impl AsRef<Path>,
    read_only: bool,
) -> Result<Outcome, Error> {
    let flags = if read_only {
        MountFlags::BIND | MountFlags::RDONLY
    } else {
        MountFlags::BIND
    };

    trace!(
        "Bind mounting '{}' at '{}'",
        source.as_ref().display(),
        target.as_ref().display()
    );
    match MountBuilder::default()
        .flags(flags)
        .mount(source.as_ref(), target.as_ref())
    {
        Ok(_) => Ok(Outcome::Done),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Outcome::NotFound),
        Err(e) => Err(Error::new(e).context(format!(
            "Failed to bind mount '{}' to '{}'",
            source.as_ref().display(),
            target.as_ref().display()
        ))),
    }
}

/// Unmounts `target`. A recursive unmount also detaches everything mounted
/// below it; a lazy one detaches the mounts now and cleans them up once they
/// are no longer busy.
///
/// Returns `NotFound` when nothing was mounted at `target`.
pub fn umount(target: impl AsRef<Path>, recursive: bool, lazy: bool) -> Result<Outcome, Error> {
    let mut cmd = Dependency::Umount.cmd();
    if recursive {
        cmd.arg("--recursive");
    }
    if lazy {
        cmd.arg("--lazy");
    }
    cmd.arg(target.as_ref());

    let output = cmd
        .output()
        .with_context(|| format!("Failed to unmount '{}'", target.as_ref().display()))?;
    if output.failed_with(NOT_MOUNTED) {
        return Ok(Outcome::NotFound);
    }

    if let Err(e) = output.check() {
        // Best effort: log who keeps the target busy, ignoring failures such
        // as lsof not being installed.
        if let Ok(open_files) = lsof::run(target.as_ref()) {
            if !open_files.is_empty() {
                error!("Open files: {:?}", open_files);
            }
        }

        return Err(Error::new(e).context(format!(
            "Failed to unmount directory '{}'",
            target.as_ref().display()
        )));
    }

    Ok(Outcome::Done)
}

/// Ensures that `target_path` exists and is a directory that can be mounted
/// over.
pub fn ensure_mount_directory(target_path: &Path) -> Result<(), Error> {
    if target_path.exists() {
        if !target_path.is_dir() {
            bail!("Mount path '{}' is not a directory", target_path.display());
        }
    } else {
        files::create_dirs(target_path).context(format!(
            "Failed to create mount path '{}'",
            target_path.display()
        ))?;
    }

    Ok(())
}

/// Removes the now unused mount directory `path`. A directory that is gone
/// already counts as removed.
pub fn remove_mount_directory(path: &Path) -> Result<Outcome, Error> {
    match fs::remove_dir(path) {
        Ok(()) => Ok(Outcome::Done),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Outcome::NotFound),
        Err(e) => Err(Error::new(e).context(format!(
            "Failed to remove mount directory '{}'",
            path.display()
        ))),
    }
}
