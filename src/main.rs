mod cli;
mod commands;
mod config;
mod fleet;
mod lock;
mod paths;
mod progress;
mod template_file;
mod ui;

use anyhow::{Context as _, Result};
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use config::Config;
use lock::InstanceLock;
use reconcile::{EngineError, SqliteCheckpointStore, TemplateEngine};
use std::io;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

/// Global context for the application
pub struct AppContext {
    pub verbose: u8,
    pub quiet: bool,
    pub json: bool,
    pub config: Config,
    pub timeout: Duration,
}

impl AppContext {
    /// Engine over the configured fleet and checkpoint store.
    pub fn engine(&self) -> Result<TemplateEngine> {
        let executor = Arc::new(fleet::Router::from_config(&self.config)?);
        let store_path = self.config.store_path()?;
        let store = SqliteCheckpointStore::open(&store_path).with_context(|| {
            format!("Could not open checkpoint store {}", store_path.display())
        })?;
        log::debug!("Checkpoint store at {}", store_path.display());
        Ok(TemplateEngine::new(executor, Arc::new(store)))
    }

    /// Fresh deadline for one instance's pipeline.
    pub fn remote_context(&self) -> remote::Context {
        remote::Context::with_timeout(self.timeout)
    }

    pub fn lock(&self, instance: &str) -> Result<InstanceLock> {
        InstanceLock::acquire(&paths::lock_dir()?, instance)
    }

    /// Whether human-oriented chatter should be printed.
    pub fn chatty(&self) -> bool {
        !self.quiet && !self.json
    }
}

/// How a command finished, when it did not error outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Outcome {
    Success,
    /// Blocked by the conflict gate
    Conflict,
    /// An apply stopped part way
    PartialFailure,
    /// At least one instance errored
    Failed,
}

impl Outcome {
    pub fn exit_code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Failed => 1,
            Self::Conflict => 2,
            Self::PartialFailure => 3,
        }
    }

    /// Outcome for an engine error.
    pub fn of_error(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<EngineError>() {
            Some(e) if e.category().exit_code() == 2 => Self::Conflict,
            _ => Self::Failed,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    match run(cli) {
        Ok(outcome) => ExitCode::from(outcome.exit_code()),
        Err(err) => {
            report_error(&err);
            ExitCode::from(Outcome::of_error(&err).exit_code())
        }
    }
}

fn run(cli: Cli) -> Result<Outcome> {
    if let Command::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "tessera", &mut io::stdout());
        return Ok(Outcome::Success);
    }

    let config = Config::load(cli.config.as_deref())?;
    let app = AppContext {
        verbose: cli.verbose,
        quiet: cli.quiet,
        json: cli.json,
        timeout: config.timeout(cli.timeout),
        config,
    };

    match cli.command {
        Command::Apply(args) => commands::apply::run(&app, args),
        Command::Diff(args) => commands::diff::run(&app, args),
        Command::Inspect(args) => commands::inspect::run(&app, &args.instance),
        Command::Checkpoints(cmd) => commands::checkpoints::run(&app, cmd),
        Command::Rollback(args) => commands::rollback::run(&app, args),
        Command::Completions { .. } => Ok(Outcome::Success),
    }
}

/// Print an error with its category hint.
pub fn report_error(err: &anyhow::Error) {
    ui::error(&format!("{err:#}"));
    if let Some(engine_err) = err.downcast_ref::<EngineError>() {
        let category = engine_err.category();
        ui::dim(&format!("{}: {}", category.description(), category.advice()));
        if let Some(id) = engine_err.checkpoint_id() {
            ui::dim(&format!("Checkpoint: {id}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_exit_codes() {
        assert_eq!(Outcome::Success.exit_code(), 0);
        assert_eq!(Outcome::Failed.exit_code(), 1);
        assert_eq!(Outcome::Conflict.exit_code(), 2);
        assert_eq!(Outcome::PartialFailure.exit_code(), 3);
    }

    #[test]
    fn test_worst_outcome_wins() {
        let outcomes = [Outcome::Success, Outcome::Conflict, Outcome::PartialFailure];
        assert_eq!(outcomes.into_iter().max(), Some(Outcome::PartialFailure));
        assert!(Outcome::Failed > Outcome::PartialFailure);
    }

    #[test]
    fn test_outcome_of_error() {
        let conflict: anyhow::Error = EngineError::Conflict {
            instance: "ws1".into(),
            template: "jupyter".into(),
            conflicts: Vec::new(),
        }
        .into();
        assert_eq!(Outcome::of_error(&conflict), Outcome::Conflict);

        let wrapped = conflict.context("while applying to ws1");
        assert_eq!(Outcome::of_error(&wrapped), Outcome::Conflict);

        let other = anyhow::anyhow!("config broken");
        assert_eq!(Outcome::of_error(&other), Outcome::Failed);
    }
}
