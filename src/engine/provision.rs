use std::collections::BTreeMap;

use anyhow::Error;
use log::{debug, info, warn};
use strum_macros::Display;

use zroot_api::{
    error::{PreconditionError, ReportError, ServicingError, ZrootError, ZrootResultExt},
    outcome::Outcome,
    resources::{MountSource, Resource, ResourceId, ResourceState},
};

use super::{
    backend::StorageBackend,
    mount_state::MountState,
    teardown::{teardown, TeardownMode, TeardownPolicy},
    EngineContext,
};

/// A forward transition of one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Transition {
    Create,
    Format,
    Mount,
    ApplyMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum StepOutcome {
    /// The backend changed the system.
    Done,
    /// The backend found the transition already made.
    AlreadySatisfied,
    /// No backend call was issued, the pass snapshot showed the transition
    /// already made.
    Skipped,
}

/// What one provisioning pass did, step by step.
#[derive(Debug, Default)]
pub struct ProvisionReport {
    steps: Vec<(ResourceId, Transition, StepOutcome)>,
    states: BTreeMap<ResourceId, ResourceState>,
}

impl ProvisionReport {
    pub fn steps(&self) -> &[(ResourceId, Transition, StepOutcome)] {
        &self.steps
    }

    /// State the pass left `id` in.
    pub fn state(&self, id: &ResourceId) -> ResourceState {
        self.states.get(id).copied().unwrap_or(ResourceState::Absent)
    }

    /// Number of steps that changed the system.
    pub fn changes(&self) -> usize {
        self.steps
            .iter()
            .filter(|(_, _, outcome)| *outcome == StepOutcome::Done)
            .count()
    }

    pub fn describe(&self) -> String {
        self.steps
            .iter()
            .map(|(id, transition, outcome)| format!("{transition:>10} {id}: {outcome}\n"))
            .collect()
    }
}

/// Brings every planned resource to its target state, in creation order.
///
/// With `wipe_first`, a best-effort destroying teardown of the whole plan
/// runs first so provisioning starts from absent resources.
#[tracing::instrument(skip_all)]
pub fn provision(ctx: &EngineContext, wipe_first: bool) -> Result<ProvisionReport, ZrootError> {
    if wipe_first {
        info!("Wiping existing resources before provisioning");
        let report = teardown(ctx, TeardownMode::Destroy, TeardownPolicy::BestEffort)
            .message("Failed to wipe existing resources")?;
        if report.failures() > 0 {
            warn!(
                "Wipe finished with {} failure(s), continuing",
                report.failures()
            );
        }
    }

    let snapshot = ctx
        .inspector
        .snapshot()
        .structured(ServicingError::InspectState)?;

    if wipe_first {
        for resource in ctx.plan.creation_order() {
            let state = snapshot.resource_state(resource);
            if state != ResourceState::Absent {
                warn!("{} is still {state} after wiping", resource.id());
            }
        }
    }

    let mut pass = ProvisionPass::new(ctx, snapshot);
    for resource in ctx.plan.creation_order() {
        pass.step(resource)
            .message(format!("Failed to provision {}", resource.id()))?;
    }

    info!(
        "Provisioned {} resources, {} change(s)",
        ctx.plan.len(),
        pass.report.changes()
    );
    Ok(pass.report)
}

struct ProvisionPass<'a> {
    ctx: &'a EngineContext<'a>,
    snapshot: MountState,
    /// Modes of datasets created by this pass, applied once they are
    /// mounted.
    pending_modes: BTreeMap<String, u32>,
    report: ProvisionReport,
}

impl<'a> ProvisionPass<'a> {
    fn new(ctx: &'a EngineContext<'a>, snapshot: MountState) -> Self {
        let states = ctx
            .plan
            .creation_order()
            .map(|resource| (resource.id(), snapshot.resource_state(resource)))
            .collect();

        Self {
            ctx,
            snapshot,
            pending_modes: BTreeMap::new(),
            report: ProvisionReport {
                steps: Vec::new(),
                states,
            },
        }
    }

    fn step(&mut self, resource: &Resource) -> Result<(), ZrootError> {
        let id = resource.id();
        debug!("Provisioning {}", resource.describe());

        match resource {
            Resource::Partition(partition) => {
                self.check_dependencies(&id, Transition::Create)?;
                let created = self.run(&id, Transition::Create, |backend| {
                    backend.create_partition(partition)
                })?;

                if let Some(filesystem) = partition.role.filesystem() {
                    let formatted = self.snapshot.partition_filesystem(&partition.name)
                        == Some(filesystem.probe_name());
                    if created != StepOutcome::Done && formatted {
                        self.record(&id, Transition::Format, StepOutcome::Skipped);
                    } else {
                        self.run(&id, Transition::Format, |backend| {
                            backend.format(partition, filesystem)
                        })?;
                    }
                }
                self.set_state(id, ResourceState::Created);
            }

            Resource::Pool(pool) => {
                self.check_dependencies(&id, Transition::Create)?;
                self.run(&id, Transition::Create, |backend| backend.create_pool(pool))?;
                self.set_state(id, ResourceState::Created);
            }

            Resource::Dataset(dataset) => {
                self.check_dependencies(&id, Transition::Create)?;
                let created = self.run(&id, Transition::Create, |backend| {
                    backend.create_dataset(dataset)
                })?;
                if let (StepOutcome::Done, Some(mode)) = (created, dataset.mode) {
                    self.pending_modes.insert(dataset.name.clone(), mode);
                }
                self.set_state(id, ResourceState::Created);
            }

            Resource::Mount(mount) => {
                self.check_dependencies(&id, Transition::Mount)?;
                if self.snapshot.is_mounted(&mount.target) {
                    debug!("'{}' is already mounted", mount.target.display());
                    self.record(&id, Transition::Mount, StepOutcome::Skipped);
                } else {
                    self.run(&id, Transition::Mount, |backend| backend.mount(mount))?;
                }
                self.set_state(id.clone(), ResourceState::Mounted);

                if let MountSource::Dataset(name) = &mount.source {
                    if let Some(mode) = self.pending_modes.remove(name) {
                        self.run(&id, Transition::ApplyMode, |backend| {
                            backend.set_mode(&mount.target, mode)
                        })?;
                    }
                }
            }
        }

        Ok(())
    }

    /// Fails unless every dependency of `id` reached the state its edge
    /// requires.
    fn check_dependencies(&self, id: &ResourceId, transition: Transition) -> Result<(), ZrootError> {
        for (dependency, kind) in self.ctx.plan.dependencies(id) {
            let dependency_id = dependency.id();
            let actual = self.report.state(&dependency_id);
            let required = kind.required_state();
            if actual < required {
                return Err(ZrootError::new(PreconditionError::DependencyNotReady {
                    operation: transition.to_string(),
                    resource: id.to_string(),
                    dependency: dependency_id.to_string(),
                    required: required.to_string(),
                    actual: actual.to_string(),
                }));
            }
        }
        Ok(())
    }

    /// Invokes the backend and classifies its outcome. `NotFound` from a
    /// forward transition means something it needs is missing.
    fn run(
        &mut self,
        id: &ResourceId,
        transition: Transition,
        operation: impl FnOnce(&dyn StorageBackend) -> Result<Outcome, Error>,
    ) -> Result<StepOutcome, ZrootError> {
        let outcome =
            operation(self.ctx.backend).structured(ServicingError::Backend {
                operation: transition.to_string(),
                resource: id.to_string(),
            })?;

        let step = match outcome {
            Outcome::Done => {
                info!("{transition} {id}: done");
                StepOutcome::Done
            }
            Outcome::AlreadySatisfied => {
                debug!("{transition} {id}: already satisfied");
                StepOutcome::AlreadySatisfied
            }
            Outcome::NotFound => {
                return Err(ZrootError::new(PreconditionError::BackendNotFound {
                    operation: transition.to_string(),
                    resource: id.to_string(),
                }));
            }
        };
        self.record(id, transition, step);
        Ok(step)
    }

    fn record(&mut self, id: &ResourceId, transition: Transition, outcome: StepOutcome) {
        self.report.steps.push((id.clone(), transition, outcome));
    }

    fn set_state(&mut self, id: ResourceId, state: ResourceState) {
        self.report.states.insert(id, state);
    }
}
