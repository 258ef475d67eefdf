use std::io::{self, BufRead, Write};

use log::{debug, info, warn};
use nix::unistd::Uid;

use osutils::dependencies::{self, Dependency};
use zroot_api::{
    config::ProvisionConfig,
    error::{
        ExecutionEnvironmentMisconfigurationError, InvalidInputError, ReportError,
        ServicingError, ZrootError, ZrootResultExt,
    },
    resources::ResourceModel,
    storage_graph::Plan,
};

pub mod cli;
mod engine;
mod logging;

use cli::Commands;
use engine::{
    configure_os, provision, teardown, ConfigFileInstaller, EngineContext, SystemBackend,
    SystemInspector, TeardownMode, TeardownPolicy,
};

pub use logging::{multilog::MultiLogger, run_log::RunLog};

/// Version as provided by environment variables at build time.
pub const ZROOT_VERSION: &str = match option_env!("ZROOT_VERSION") {
    Some(v) => v,
    None => env!("CARGO_PKG_VERSION"),
};

#[must_use]
#[derive(Debug, PartialEq, Eq)]
pub enum ExitKind {
    /// Requested operation completed successfully.
    Done,
    /// The user answered "no" to a confirmation; nothing was changed.
    Declined,
}

/// A loaded configuration together with the resources it declares and their
/// order.
pub struct Zroot {
    config: ProvisionConfig,
    model: ResourceModel,
    plan: Plan,
}

impl Zroot {
    pub fn new(config: ProvisionConfig) -> Result<Self, ZrootError> {
        let model = ResourceModel::build(&config);
        let plan = model
            .plan()
            .map_err(|e| ZrootError::new(InvalidInputError::from(e)))
            .message("Failed to plan the storage layout")?;
        debug!("Planned {} resources", plan.len());

        Ok(Self {
            config,
            model,
            plan,
        })
    }

    pub fn config(&self) -> &ProvisionConfig {
        &self.config
    }

    /// Executes `command`. Destructive commands ask for confirmation on the
    /// terminal unless `assume_yes` is set.
    pub fn run(&self, command: &Commands, assume_yes: bool) -> Result<ExitKind, ZrootError> {
        info!("Running zroot version: {}", ZROOT_VERSION);

        if command.requires_root() && !Uid::effective().is_root() {
            return Err(ZrootError::new(
                ExecutionEnvironmentMisconfigurationError::MissingRequiredPermissions,
            ));
        }
        if matches!(
            command,
            Commands::Provision { .. } | Commands::Teardown { .. } | Commands::WipeDisk
        ) {
            dependencies::check_installed(Dependency::STORAGE)?;
        }

        if command.is_destructive() && !assume_yes {
            let question = format!(
                "'{}' destroys data on '{}' and pool '{}'. Continue?",
                command,
                self.config.disk.display(),
                self.config.pool_name()
            );
            let confirmed = confirm(&question, &mut io::stdin().lock(), &mut io::stderr())
                .structured(ServicingError::ReadConfirmation)?;
            if !confirmed {
                warn!("Declined, nothing was changed");
                return Ok(ExitKind::Declined);
            }
        }

        let inspector = SystemInspector;
        let backend = SystemBackend;
        let ctx = EngineContext {
            config: &self.config,
            model: &self.model,
            plan: &self.plan,
            inspector: &inspector,
            backend: &backend,
        };

        match command {
            Commands::Plan => println!("{}", self.plan.describe()),
            Commands::Validate => info!(
                "Configuration is valid: {} resources on '{}'",
                self.plan.len(),
                self.config.disk.display()
            ),
            Commands::Status => {
                for (id, state) in ctx.status()? {
                    println!("{state:<8} {id}");
                }
            }
            Commands::Provision { wipe_first } => {
                let report = provision(&ctx, *wipe_first)?;
                info!(
                    "Provisioned '{}' with {} change(s)",
                    self.model.staging_root().display(),
                    report.changes()
                );
                debug!("Provisioning steps:\n{}", report.describe());
            }
            Commands::Teardown { destroy } => {
                let mode = if *destroy {
                    TeardownMode::Destroy
                } else {
                    TeardownMode::Release
                };
                teardown(&ctx, mode, TeardownPolicy::FailFast)?;
            }
            Commands::WipeDisk => ctx.wipe_disk()?,
            Commands::ConfigureOs => configure_os(&ctx, &ConfigFileInstaller)?,
        }

        Ok(ExitKind::Done)
    }
}

/// Asks `question` until the answer is "yes" or "no". End of input counts
/// as "no".
fn confirm(question: &str, input: &mut impl BufRead, output: &mut impl Write) -> io::Result<bool> {
    loop {
        write!(output, "{question} [yes/no]: ")?;
        output.flush()?;

        let mut answer = String::new();
        if input.read_line(&mut answer)? == 0 {
            writeln!(output)?;
            return Ok(false);
        }
        match answer.trim().to_lowercase().as_str() {
            "yes" => return Ok(true),
            "no" => return Ok(false),
            _ => writeln!(output, "Please type 'yes' or 'no'.")?,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Cursor;

    use zroot_api::{error::ErrorKind, storage_graph::error::PlanError};

    #[test]
    fn test_confirm() {
        let mut output = Vec::new();
        assert!(confirm("Wipe?", &mut Cursor::new("yes\n"), &mut output).unwrap());
        assert_eq!(String::from_utf8(output).unwrap(), "Wipe? [yes/no]: ");

        let mut output = Vec::new();
        assert!(!confirm("Wipe?", &mut Cursor::new("y\nNO\n"), &mut output).unwrap());
        let output = String::from_utf8(output).unwrap();
        assert_eq!(output.matches("Wipe? [yes/no]: ").count(), 2);
        assert!(output.contains("Please type 'yes' or 'no'."));

        // Closed input never confirms.
        assert!(!confirm("Wipe?", &mut Cursor::new(""), &mut Vec::new()).unwrap());
        assert!(!confirm("Wipe?", &mut Cursor::new("maybe"), &mut Vec::new()).unwrap());
    }

    #[test]
    fn test_new() {
        let config = ProvisionConfig::new("/dev/disk/by-id/nvme-demo", "demo", "jammy");
        let zroot = Zroot::new(config.clone()).unwrap();
        assert_eq!(zroot.config(), &config);
        assert_eq!(zroot.plan.len(), zroot.model.resources().len());
    }

    #[test]
    fn test_new_rejects_duplicate_datasets() {
        // Clashes with the shared docker dataset.
        let mut config = ProvisionConfig::new("/dev/disk/by-id/nvme-demo", "demo", "jammy");
        config.database_dataset = Some("docker".into());

        let error = Zroot::new(config).err().unwrap();
        assert!(matches!(
            error.kind(),
            ErrorKind::InvalidInput(InvalidInputError::InvalidPlan(
                PlanError::DuplicateResource(_)
            ))
        ));
    }

    #[test]
    fn test_unprivileged_commands() {
        let config = ProvisionConfig::new("/dev/disk/by-id/nvme-demo", "demo", "jammy");
        let zroot = Zroot::new(config).unwrap();
        assert_eq!(zroot.run(&Commands::Plan, false).unwrap(), ExitKind::Done);
        assert_eq!(
            zroot.run(&Commands::Validate, false).unwrap(),
            ExitKind::Done
        );
    }
}
