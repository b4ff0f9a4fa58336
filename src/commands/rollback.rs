use crate::cli::RollbackArgs;
use crate::{AppContext, Outcome, progress, ui};
use anyhow::Result;

pub fn run(app: &AppContext, args: RollbackArgs) -> Result<Outcome> {
    let prompt = format!(
        "Restore {} to checkpoint {}? Packages and services added since then will be removed.",
        args.instance, args.checkpoint
    );
    if !super::confirm(app, args.yes, &prompt)? {
        ui::info("Cancelled");
        return Ok(Outcome::Success);
    }

    let engine = app.engine()?;
    let _lock = app.lock(&args.instance)?;

    let spinner = progress::spinner_unless(
        !app.chatty(),
        &format!("Rolling back {}...", args.instance),
    );
    let report = engine.rollback_to_checkpoint(&app.remote_context(), &args.instance, &args.checkpoint);
    spinner.finish_and_clear();
    let report = report?;

    if app.json {
        super::print_json(&report)?;
        return Ok(Outcome::Success);
    }

    ui::success(&format!(
        "Restored {} to {}",
        report.instance_name, report.checkpoint_id
    ));
    ui::kv(
        "files",
        &format!(
            "{} restored, {} removed",
            report.files_restored, report.files_removed
        ),
    );
    ui::kv("service actions", &report.service_actions.to_string());
    ui::kv("packages removed", &report.packages_removed.to_string());
    for warning in &report.warnings {
        ui::warn(warning);
    }
    Ok(Outcome::Success)
}
