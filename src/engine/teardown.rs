use std::path::Path;

use anyhow::Error;
use log::{debug, info, warn};
use strum_macros::Display;

use zroot_api::{
    error::{ReportError, ServicingError, ZrootError},
    outcome::Outcome,
    resources::Resource,
};

use super::{
    backend::StorageBackend,
    mount_state::{MountInspector, MountState},
    EngineContext,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum TeardownMode {
    /// Unmount everything and export the pool. No data is lost.
    Release,
    /// Additionally destroy datasets, the pool and the partitions.
    Destroy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum TeardownPolicy {
    /// Stop at the first failure.
    FailFast,
    /// Log failures and carry on with the remaining resources.
    BestEffort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum TeardownAction {
    Unmount,
    DestroyDataset,
    ExportPool,
    DestroyPool,
    DeletePartition,
    RemoveDirectory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownOutcome {
    Done,
    /// Nothing to do, the resource was already gone.
    AlreadyAbsent,
    /// The backend failed; only recorded under a best-effort policy.
    Failed(String),
}

#[derive(Debug, Default)]
pub struct TeardownReport {
    steps: Vec<(String, TeardownAction, TeardownOutcome)>,
}

impl TeardownReport {
    /// Every step, in execution order, as (subject, action, outcome).
    pub fn steps(&self) -> &[(String, TeardownAction, TeardownOutcome)] {
        &self.steps
    }

    pub fn failures(&self) -> usize {
        self.steps
            .iter()
            .filter(|(_, _, outcome)| matches!(outcome, TeardownOutcome::Failed(_)))
            .count()
    }

    /// Outcome of `action` on `subject`, if it was attempted.
    pub fn outcome(&self, subject: &str, action: TeardownAction) -> Option<&TeardownOutcome> {
        self.steps
            .iter()
            .find(|(s, a, _)| s == subject && *a == action)
            .map(|(_, _, outcome)| outcome)
    }
}

/// Walks the plan in reverse creation order, releasing or destroying every
/// resource, then unmounts and removes the staging root.
#[tracing::instrument(skip_all)]
pub fn teardown(
    ctx: &EngineContext,
    mode: TeardownMode,
    policy: TeardownPolicy,
) -> Result<TeardownReport, ZrootError> {
    info!("Tearing down ({mode}, {policy})");
    let snapshot = ctx
        .inspector
        .snapshot()
        .structured(ServicingError::InspectState)?;

    let mut pass = TeardownPass {
        backend: ctx.backend,
        snapshot,
        mode,
        policy,
        report: TeardownReport::default(),
    };

    for resource in ctx.plan.teardown_order() {
        pass.step(resource)?;
    }
    pass.release_staging_root(ctx.inspector, ctx.model.staging_root())?;

    info!(
        "Teardown finished: {} step(s), {} failure(s)",
        pass.report.steps.len(),
        pass.report.failures()
    );
    Ok(pass.report)
}

struct TeardownPass<'a> {
    backend: &'a dyn StorageBackend,
    snapshot: MountState,
    mode: TeardownMode,
    policy: TeardownPolicy,
    report: TeardownReport,
}

impl TeardownPass<'_> {
    fn step(&mut self, resource: &Resource) -> Result<(), ZrootError> {
        let destroy = self.mode == TeardownMode::Destroy;
        match resource {
            Resource::Mount(mount) => {
                let subject = mount.target.display().to_string();
                if self.snapshot.is_mounted(&mount.target) {
                    self.run(subject, TeardownAction::Unmount, |backend| {
                        backend.unmount(&mount.target, true, true)
                    })?;
                } else {
                    debug!("'{subject}' is not mounted");
                    self.record(subject, TeardownAction::Unmount, TeardownOutcome::AlreadyAbsent);
                }
            }
            Resource::Dataset(dataset) if destroy => {
                self.run(dataset.name.clone(), TeardownAction::DestroyDataset, |backend| {
                    backend.destroy_dataset(&dataset.name, true)
                })?;
            }
            Resource::Pool(pool) if destroy => {
                self.run(pool.name.clone(), TeardownAction::DestroyPool, |backend| {
                    backend.destroy_pool(&pool.name)
                })?;
            }
            Resource::Pool(pool) => {
                self.run(pool.name.clone(), TeardownAction::ExportPool, |backend| {
                    backend.export_pool(&pool.name)
                })?;
            }
            Resource::Partition(partition) if destroy => {
                self.run(
                    partition.name.clone(),
                    TeardownAction::DeletePartition,
                    |backend| backend.delete_partition(partition),
                )?;
            }
            Resource::Dataset(_) | Resource::Partition(_) => (),
        }
        Ok(())
    }

    /// The staging root can stay mounted after everything below it was
    /// released, so it gets one more unmount regardless of the snapshot
    /// before its directory is removed. A staging root that is gone and was
    /// not mounted when the pass started has nothing left to release.
    fn release_staging_root(
        &mut self,
        inspector: &dyn MountInspector,
        staging_root: &Path,
    ) -> Result<(), ZrootError> {
        let subject = staging_root.display().to_string();
        if !self.snapshot.is_mounted(staging_root) && !inspector.path_exists(staging_root) {
            debug!("'{subject}' does not exist");
            for action in [TeardownAction::Unmount, TeardownAction::RemoveDirectory] {
                self.record(subject.clone(), action, TeardownOutcome::AlreadyAbsent);
            }
            return Ok(());
        }

        self.run(subject.clone(), TeardownAction::Unmount, |backend| {
            backend.unmount(staging_root, true, true)
        })?;

        let recursive = self.mode == TeardownMode::Destroy;
        self.run(subject, TeardownAction::RemoveDirectory, |backend| {
            backend.remove_directory(staging_root, recursive)
        })
    }

    fn run(
        &mut self,
        subject: String,
        action: TeardownAction,
        operation: impl FnOnce(&dyn StorageBackend) -> Result<Outcome, Error>,
    ) -> Result<(), ZrootError> {
        let outcome = match operation(self.backend) {
            Ok(Outcome::Done) => {
                info!("{action} {subject}: done");
                TeardownOutcome::Done
            }
            Ok(outcome) => {
                debug!("{action} {subject}: {outcome}");
                TeardownOutcome::AlreadyAbsent
            }
            Err(e) => {
                let error = ZrootError::with_source(
                    ServicingError::Backend {
                        operation: action.to_string(),
                        resource: subject.clone(),
                    },
                    e,
                );
                if self.policy == TeardownPolicy::FailFast {
                    return Err(error);
                }
                warn!("Ignoring teardown failure: {error:?}");
                TeardownOutcome::Failed(format!("{error:?}"))
            }
        };
        self.record(subject, action, outcome);
        Ok(())
    }

    fn record(&mut self, subject: String, action: TeardownAction, outcome: TeardownOutcome) {
        self.report.steps.push((subject, action, outcome));
    }
}
