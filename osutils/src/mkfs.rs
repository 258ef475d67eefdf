use std::path::Path;

use anyhow::{Context, Error};

use zroot_api::resources::FilesystemKind;

use crate::dependencies::{Command, Dependency};

/// Builds the command writing a `kind` filesystem labelled `label` onto
/// `device`, replacing whatever was there.
fn command(device: &Path, kind: FilesystemKind, label: &str) -> Command {
    match kind {
        FilesystemKind::Vfat => Dependency::MkfsVfat
            .cmd()
            .with_arg("-F")
            .with_arg("32")
            .with_arg("-s")
            .with_arg("1")
            .with_arg("-n")
            .with_arg(label)
            .with_arg(device),
        FilesystemKind::Ext4 => Dependency::MkfsExt4
            .cmd()
            .with_arg("-q")
            .with_arg("-F")
            .with_arg("-L")
            .with_arg(label)
            .with_arg(device),
        FilesystemKind::Swap => Dependency::Mkswap
            .cmd()
            .with_arg("--label")
            .with_arg(label)
            .with_arg(device),
    }
}

/// Formats `device` with a filesystem of the given kind.
pub fn run(device: impl AsRef<Path>, kind: FilesystemKind, label: &str) -> Result<(), Error> {
    command(device.as_ref(), kind, label)
        .run_and_check()
        .with_context(|| {
            format!(
                "Failed to create {kind} filesystem on '{}'",
                device.as_ref().display()
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command() {
        let device = Path::new("/dev/disk/by-partlabel/demo-efi");
        assert_eq!(
            command(device, FilesystemKind::Vfat, "demo-efi").render_command(),
            "mkfs.vfat -F 32 -s 1 -n demo-efi /dev/disk/by-partlabel/demo-efi"
        );

        let device = Path::new("/dev/disk/by-partlabel/demo-boot");
        assert_eq!(
            command(device, FilesystemKind::Ext4, "demo-boot").render_command(),
            "mkfs.ext4 -q -F -L demo-boot /dev/disk/by-partlabel/demo-boot"
        );

        let device = Path::new("/dev/disk/by-partlabel/demo-swap");
        assert_eq!(
            command(device, FilesystemKind::Swap, "demo-swap").render_command(),
            "mkswap --label demo-swap /dev/disk/by-partlabel/demo-swap"
        );
    }
}
