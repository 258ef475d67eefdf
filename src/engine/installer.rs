use std::path::Path;

use anyhow::{Context, Error};
use log::{debug, info};

use osutils::{
    files, path,
    tabfile::{TabFile, TabFileEntry},
};
use zroot_api::{
    config::ProvisionConfig,
    error::{PreconditionError, ReportError, ServicingError, ZrootError},
    resources::{FilesystemKind, PartitionRole, ResourceModel},
};

use super::EngineContext;

const FILE_MODE: u32 = 0o644;

/// Mount options of the boot and EFI partitions in the installed system.
const BOOT_MOUNT_OPTIONS: [&str; 3] = ["defaults", "nodev", "relatime"];

/// Writes into a fully mounted staging root.
pub trait OsInstaller {
    fn install(
        &self,
        root: &Path,
        config: &ProvisionConfig,
        model: &ResourceModel,
    ) -> Result<(), Error>;
}

/// Runs `installer` against the staging root once the root dataset is
/// mounted there and every mount target below it exists.
#[tracing::instrument(skip_all)]
pub fn configure_os(ctx: &EngineContext, installer: &dyn OsInstaller) -> Result<(), ZrootError> {
    let root = ctx.model.staging_root();
    let snapshot = ctx
        .inspector
        .snapshot()
        .structured(ServicingError::InspectState)?;
    if !snapshot.is_mounted(root) {
        return Err(ZrootError::new(PreconditionError::RootNotMounted {
            path: root.display().to_string(),
        }));
    }

    for mount in ctx.model.mounts().filter(|m| m.target.starts_with(root)) {
        if !mount.target.is_dir() {
            return Err(ZrootError::new(PreconditionError::MissingSkeleton {
                path: mount.target.display().to_string(),
            }));
        }
    }

    info!("Configuring the OS staged at '{}'", root.display());
    installer
        .install(root, ctx.config, ctx.model)
        .structured(ServicingError::ConfigureOs)
}

/// Writes the host identity, the mount table and the boot loader entries.
#[derive(Debug, Default)]
pub struct ConfigFileInstaller;

impl OsInstaller for ConfigFileInstaller {
    fn install(
        &self,
        root: &Path,
        config: &ProvisionConfig,
        model: &ResourceModel,
    ) -> Result<(), Error> {
        let write = |relative: &str, contents: String| {
            let target = path::join_relative(root, relative);
            debug!("Writing '{}'", target.display());
            files::write_file(&target, FILE_MODE, contents.as_bytes())
                .with_context(|| format!("Failed to write '{relative}'"))
        };

        write("/etc/hostname", format!("{}\n", config.hostname()))?;
        write("/etc/hosts", hosts(config.hostname()))?;
        write("/etc/fstab", fstab(model).render())?;
        write("/boot/refind_linux.conf", refind_linux_conf(model.root_dataset()))?;
        if let Some(codename) = &config.os.release_codename {
            write("/etc/apt/sources.list", apt_sources(codename))?;
        }
        Ok(())
    }
}

fn hosts(hostname: &str) -> String {
    format!(
        "127.0.0.1 localhost\n\
         127.0.1.1 {hostname}\n\
         \n\
         # The following lines are desirable for IPv6 capable hosts\n\
         ::1     ip6-localhost ip6-loopback\n\
         fe00::0 ip6-localnet\n\
         ff00::0 ip6-mcastprefix\n\
         ff02::1 ip6-allnodes\n\
         ff02::2 ip6-allrouters\n\
         ff02::3 ip6-allhosts\n"
    )
}

/// Only the partitions go into the table; ZFS mounts its own datasets.
fn fstab(model: &ResourceModel) -> TabFile {
    let options: Vec<String> = BOOT_MOUNT_OPTIONS.iter().map(|o| o.to_string()).collect();
    let mut tab = TabFile::default();

    if let Some(boot) = model.partition(PartitionRole::Boot) {
        tab.entries.push(
            TabFileEntry::new_partlabel(&boot.name, "/boot", FilesystemKind::Ext4)
                .with_options(options.clone()),
        );
    }
    if let Some(efi) = model.partition(PartitionRole::Efi) {
        tab.entries.push(
            TabFileEntry::new_partlabel(&efi.name, "/boot/efi", FilesystemKind::Vfat)
                .with_options(options),
        );
    }
    if let Some(swap) = model.partition(PartitionRole::Swap) {
        tab.entries.push(TabFileEntry::new_swap(&swap.name));
    }
    tab
}

fn refind_linux_conf(root_dataset: &str) -> String {
    let root = format!("rw root=ZFS={root_dataset}");
    [
        ("Boot", root.clone()),
        ("ZFS Debug", format!("{root} zfsdebug=on")),
        (
            "SD Debug",
            format!(
                "{root} systemd.log_level=debug systemd.log_target=kmsg log_buf_len=1M \
                 printk.devkmsg=on enforcing=0"
            ),
        ),
    ]
    .iter()
    .map(|(title, options)| format!("\"{title}\" \"{options}\"\n"))
    .collect()
}

fn apt_sources(codename: &str) -> String {
    [
        ("http://archive.ubuntu.com/ubuntu", codename.to_owned()),
        ("http://security.ubuntu.com/ubuntu", format!("{codename}-security")),
        ("http://archive.ubuntu.com/ubuntu", format!("{codename}-updates")),
    ]
    .iter()
    .flat_map(|(mirror, suite)| {
        ["deb", "deb-src"]
            .map(|kind| format!("{kind} {mirror} {suite} main restricted universe multiverse\n"))
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    use indoc::indoc;
    use tempfile::TempDir;

    use zroot_api::{config::Size, error::ErrorKind};

    use crate::engine::fake::{demo_config, with_context, FakeSystem};

    /// Configuration staging into `dir`, with a swap partition.
    fn staged_config(dir: &TempDir) -> ProvisionConfig {
        let mut config = demo_config();
        config.staging_root = dir.path().to_owned();
        config.swap = Some(Size(8 << 30));
        config.os.hostname = Some("kestrel".into());
        config
    }

    fn create_skeleton(config: &ProvisionConfig) {
        let model = ResourceModel::build(config);
        for mount in model.mounts() {
            fs::create_dir_all(&mount.target).unwrap();
        }
    }

    #[test]
    fn test_install() {
        let dir = TempDir::new().unwrap();
        let mut config = staged_config(&dir);
        config.os.release_codename = Some("jammy".into());
        let model = ResourceModel::build(&config);

        ConfigFileInstaller
            .install(dir.path(), &config, &model)
            .unwrap();

        let read = |relative: &str| fs::read_to_string(dir.path().join(relative)).unwrap();
        assert_eq!(read("etc/hostname"), "kestrel\n");
        assert!(read("etc/hosts").starts_with("127.0.0.1 localhost\n127.0.1.1 kestrel\n"));
        assert_eq!(
            read("etc/fstab"),
            indoc! {"
                PARTLABEL=demo-boot /boot ext4 defaults,nodev,relatime 0 2
                PARTLABEL=demo-efi /boot/efi vfat defaults,nodev,relatime 0 2
                PARTLABEL=demo-swap none swap sw 0 0
            "}
        );
        assert_eq!(
            read("boot/refind_linux.conf"),
            indoc! {r#"
                "Boot" "rw root=ZFS=demo/jammy/root"
                "ZFS Debug" "rw root=ZFS=demo/jammy/root zfsdebug=on"
                "SD Debug" "rw root=ZFS=demo/jammy/root systemd.log_level=debug systemd.log_target=kmsg log_buf_len=1M printk.devkmsg=on enforcing=0"
            "#}
        );

        let sources = read("etc/apt/sources.list");
        assert_eq!(sources.lines().count(), 6);
        assert!(sources.contains(
            "deb-src http://security.ubuntu.com/ubuntu jammy-security main restricted universe multiverse\n"
        ));
    }

    #[test]
    fn test_sources_list_needs_codename() {
        let dir = TempDir::new().unwrap();
        let config = staged_config(&dir);
        let model = ResourceModel::build(&config);

        ConfigFileInstaller
            .install(dir.path(), &config, &model)
            .unwrap();
        assert!(!dir.path().join("etc/apt/sources.list").exists());
        assert!(dir.path().join("etc/fstab").exists());
    }

    #[test]
    fn test_configure_os_requires_mounted_root() {
        let dir = TempDir::new().unwrap();
        let config = staged_config(&dir);
        create_skeleton(&config);
        let system = FakeSystem::default();

        let error = with_context(&system, &config, |ctx| {
            configure_os(ctx, &ConfigFileInstaller)
        })
        .unwrap_err();
        assert_eq!(
            error.kind(),
            &ErrorKind::Precondition(PreconditionError::RootNotMounted {
                path: dir.path().display().to_string(),
            })
        );
        assert!(!dir.path().join("etc/hostname").exists());
    }

    #[test]
    fn test_configure_os_requires_skeleton() {
        let dir = TempDir::new().unwrap();
        let config = staged_config(&dir);
        let system = FakeSystem::default();
        system.mark_mounted(dir.path());

        let error = with_context(&system, &config, |ctx| {
            configure_os(ctx, &ConfigFileInstaller)
        })
        .unwrap_err();
        assert!(matches!(
            error.kind(),
            ErrorKind::Precondition(PreconditionError::MissingSkeleton { .. })
        ));

        create_skeleton(&config);
        with_context(&system, &config, |ctx| {
            configure_os(ctx, &ConfigFileInstaller)
        })
        .unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("etc/hostname")).unwrap(),
            "kestrel\n"
        );
    }
}
