use std::path::Path;

use anyhow::{Context, Error};

use crate::dependencies::{Command, Dependency};

/// Block size used when zeroing.
const BLOCK_SIZE_MIB: u64 = 10;

fn zero_command(device: &Path, mib: u64) -> Command {
    Dependency::Dd
        .cmd()
        .with_arg(format!("bs={BLOCK_SIZE_MIB}M"))
        .with_arg(format!("count={}", mib.div_ceil(BLOCK_SIZE_MIB)))
        .with_arg("if=/dev/zero")
        .with_arg(format!("of={}", device.display()))
        .with_arg("conv=fdatasync")
}

/// Overwrites the first `mib` MiB of `device` with zeros, rounded up to a
/// whole number of blocks.
pub fn zero(device: impl AsRef<Path>, mib: u64) -> Result<(), Error> {
    zero_command(device.as_ref(), mib)
        .run_and_check()
        .with_context(|| format!("Failed to zero '{}'", device.as_ref().display()))
}
