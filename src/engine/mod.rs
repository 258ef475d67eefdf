use log::{debug, info};

use zroot_api::{
    config::ProvisionConfig,
    error::{ReportError, ServicingError, ZrootError, ZrootResultExt},
    resources::{ResourceId, ResourceModel, ResourceState},
    storage_graph::Plan,
};

mod backend;
mod installer;
mod mount_state;
mod provision;
mod system_backend;
mod teardown;

#[cfg(test)]
mod fake;

pub use backend::StorageBackend;
pub use installer::{configure_os, ConfigFileInstaller, OsInstaller};
pub use mount_state::{MountInspector, MountState, SystemInspector};
pub use provision::{provision, ProvisionReport, StepOutcome, Transition};
pub use system_backend::SystemBackend;
pub use teardown::{teardown, TeardownAction, TeardownMode, TeardownPolicy, TeardownReport};

/// Everything a pass works with. Built once per invocation; nothing in it
/// changes while a pass runs.
pub struct EngineContext<'a> {
    pub config: &'a ProvisionConfig,
    pub model: &'a ResourceModel,
    pub plan: &'a Plan,
    pub inspector: &'a dyn MountInspector,
    pub backend: &'a dyn StorageBackend,
}

impl EngineContext<'_> {
    /// Current state of every planned resource, in creation order.
    pub fn status(&self) -> Result<Vec<(ResourceId, ResourceState)>, ZrootError> {
        let snapshot = self
            .inspector
            .snapshot()
            .structured(ServicingError::InspectState)?;
        Ok(self
            .plan
            .creation_order()
            .map(|resource| (resource.id(), snapshot.resource_state(resource)))
            .collect())
    }

    /// Tears everything down and erases the whole disk.
    #[tracing::instrument(skip_all)]
    pub fn wipe_disk(&self) -> Result<(), ZrootError> {
        let report = teardown(self, TeardownMode::Destroy, TeardownPolicy::BestEffort)
            .message("Failed to release the disk before erasing it")?;
        debug!(
            "Released the disk with {} teardown failure(s)",
            report.failures()
        );

        info!("Erasing disk '{}'", self.config.disk.display());
        let outcome = self
            .backend
            .erase_disk(&self.config.disk)
            .structured(ServicingError::EraseDisk {
                device: self.config.disk.display().to_string(),
            })?;
        info!("Erasing disk '{}': {outcome}", self.config.disk.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use super::fake::{demo_config, with_context, FakeSystem};

    #[test]
    fn test_status() {
        let system = FakeSystem::default();
        let config = demo_config();

        let before = with_context(&system, &config, |ctx| ctx.status()).unwrap();
        assert!(before
            .iter()
            .all(|(_, state)| *state == ResourceState::Absent));

        with_context(&system, &config, |ctx| provision(ctx, false)).unwrap();
        let after = with_context(&system, &config, |ctx| ctx.status()).unwrap();
        assert_eq!(after.len(), before.len());
        assert_eq!(after[0], (ResourceId::Partition("demo-efi".into()), ResourceState::Created));
        assert!(after.contains(&(
            ResourceId::Mount("/mnt/zroot/boot".into()),
            ResourceState::Mounted
        )));
        assert!(after.iter().all(|(id, state)| match id {
            ResourceId::Mount(_) => *state == ResourceState::Mounted,
            _ => *state == ResourceState::Created,
        }));
    }

    #[test]
    fn test_wipe_disk() {
        let system = FakeSystem::default();
        let config = demo_config();
        with_context(&system, &config, |ctx| provision(ctx, false)).unwrap();

        with_context(&system, &config, |ctx| ctx.wipe_disk()).unwrap();

        let executed = system.executed();
        assert_eq!(
            executed.last().unwrap(),
            "erase-disk /dev/disk/by-id/nvme-demo"
        );
        assert!(executed.iter().any(|e| e == "destroy-pool demo"));
        assert_eq!(system.snapshot().unwrap(), MountState::default());
    }

    #[test]
    fn test_wipe_blank_disk() {
        let system = FakeSystem::default();
        with_context(&system, &demo_config(), |ctx| ctx.wipe_disk()).unwrap();
        assert_eq!(
            system.executed(),
            vec!["erase-disk /dev/disk/by-id/nvme-demo".to_owned()]
        );
    }
}
