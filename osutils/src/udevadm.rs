use anyhow::{Context, Error};

use crate::dependencies::Dependency;

/// Waits until udev has processed all queued events, e.g. the creation of
/// by-label symlinks for new partitions.
pub fn settle() -> Result<(), Error> {
    Dependency::Udevadm
        .cmd()
        .with_arg("settle")
        .run_and_check()
        .context("Failed to settle udev")
}
